/*
Copyright 2024, Zep Software, Inc.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Maintenance operations module

pub mod node_operations;
pub mod edge_operations;
pub mod temporal_operations;
pub mod graph_data_operations;
pub mod community_operations;
pub mod utils;

pub use node_operations::*;
pub use edge_operations::*;
pub use temporal_operations::*;
pub use graph_data_operations::*;
pub use community_operations::*;
pub use utils::*;
