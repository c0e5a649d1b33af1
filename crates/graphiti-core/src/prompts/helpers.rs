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

//! Shared fragments spliced into prompt bodies.

/// Appended to prompts whose replies are parsed back into JSON, since models
/// otherwise sometimes escape non-ASCII characters unnecessarily.
pub const DO_NOT_ESCAPE_UNICODE: &str = "\nDo not escape unicode characters.\n";
