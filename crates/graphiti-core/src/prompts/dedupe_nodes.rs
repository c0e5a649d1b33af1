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

//! Node deduplication prompts

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::prompts::models::{Message, PromptFunction};

/// Resolve each newly extracted node against a set of existing candidate nodes
/// already in the store, picking up a merge target or confirming it's new.
pub fn dedupe(context: &HashMap<String, serde_json::Value>) -> Vec<Message> {
    let sys_prompt = "You are an AI assistant that determines whether newly extracted \
        entities refer to the same real-world thing as entities already known to the \
        graph. Entities can match even when spelled differently, abbreviated, or \
        referred to with a nickname (e.g. \"Bob Smith\" and \"Bob\" are the same person \
        if context supports it).";

    let extracted = context
        .get("extracted_nodes")
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_else(|| "[]".to_string());
    let existing = context
        .get("existing_nodes")
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_else(|| "[]".to_string());

    let user_prompt = format!(
        r#"
<EXISTING NODES>
{existing}
</EXISTING NODES>

<NEW NODES>
{extracted}
</NEW NODES>

For each entry in NEW NODES, decide whether it refers to the same entity as one of the
EXISTING NODES. If it does, set duplicate_idx to that entity's id. If it is genuinely new,
set duplicate_idx to -1. Also choose the best full name to use going forward in `name`
(prefer the more complete/canonical form, e.g. "Bob Smith" over "Bob").

Respond with a JSON object:
{{"entity_resolutions": [{{"id": <new node id>, "name": "<best name>", "duplicate_idx": <existing node id or -1>}}]}}
"#
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}

/// Resolve duplicates within a single batch of newly extracted nodes, before any
/// of them have been compared against the store.
pub fn dedupe_list(context: &HashMap<String, serde_json::Value>) -> Vec<Message> {
    let sys_prompt = "You are an AI assistant that groups a list of newly extracted \
        entities by which ones refer to the same real-world thing.";

    let nodes = context
        .get("nodes")
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_else(|| "[]".to_string());

    let user_prompt = format!(
        r#"
<NODES>
{nodes}
</NODES>

Group the ids above into clusters that refer to the same entity. Entities that have no
duplicate should appear in their own single-element group.

Respond with a JSON object:
{{"duplicate_groups": [[<id>, <id>, ...], ...]}}
"#
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}

/// One entry of [`dedupe`]'s structured response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntityResolution {
    pub id: usize,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_duplicate_idx")]
    pub duplicate_idx: i64,
}

fn default_duplicate_idx() -> i64 {
    -1
}

/// Structured response to [`dedupe`].
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EntityResolutions {
    #[serde(default)]
    pub entity_resolutions: Vec<EntityResolution>,
}

/// Structured response to [`dedupe_list`].
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NodeGroups {
    #[serde(default)]
    pub duplicate_groups: Vec<Vec<usize>>,
}

/// Available prompt versions for node deduplication
pub struct DedupeNodesPrompt {
    pub dedupe: PromptFunction,
    pub dedupe_list: PromptFunction,
}

impl Default for DedupeNodesPrompt {
    fn default() -> Self {
        Self { dedupe, dedupe_list }
    }
}
