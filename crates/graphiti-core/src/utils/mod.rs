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

//! Batch ingestion helpers, datetime utilities and maintenance routines.

pub mod bulk_utils;
pub mod datetime_utils;
pub mod maintenance;
pub mod staging_store;

pub use bulk_utils::RawEpisode;
pub use staging_store::{DeferredOptions, DeferredStats, StagingStore};
