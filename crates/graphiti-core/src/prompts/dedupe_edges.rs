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

//! Edge deduplication prompts

use crate::prompts::models::{Message, PromptFunction};
use std::collections::HashMap;

/// Deduplicate similar edges
pub fn dedupe(context: &HashMap<String, serde_json::Value>) -> Vec<Message> {
    let sys_prompt =
        "You are an AI assistant that identifies duplicate edges that should be merged.";

    let edges = context
        .get("edges")
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_else(|| "[]".to_string());

    let user_prompt = format!(
        r#"
<EDGES>
{edges}
</EDGES>

Given the above edges, identify any that represent the same relationship and should be merged.
Consider different ways of expressing the same factual relationship.
"#
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}

/// Per-candidate resolution prompt for C7: given one new fact, the set of existing
/// facts already known between the same pair of entities (its siblings), and a
/// ranked subset of those siblings worth checking for contradiction (the
/// invalidation candidates), decide which siblings the new fact duplicates, which
/// invalidation candidates it contradicts, and what its relation name should be
/// going forward. The reply is a single TSV row, so a long sibling list doesn't
/// need to be re-typed back by the model as JSON.
pub fn resolve(context: &HashMap<String, serde_json::Value>) -> Vec<Message> {
    let sys_prompt = "You are an AI assistant that reconciles a new fact against the \
        facts already known between the same two entities. Decide whether the new \
        fact restates one of the existing facts (duplicate), whether it renders any \
        of them obsolete (contradicted), and what relation name it should carry.";

    let new_fact = context.get("new_fact").and_then(|v| v.as_str()).unwrap_or("");
    let siblings = context
        .get("siblings")
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_else(|| "[]".to_string());
    let invalidation_candidates = context
        .get("invalidation_candidates")
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_else(|| "[]".to_string());

    let user_prompt = format!(
        r#"
<NEW FACT>
{new_fact}
</NEW FACT>

<SIBLING FACTS>
{siblings}
</SIBLING FACTS>

<INVALIDATION CANDIDATES>
{invalidation_candidates}
</INVALIDATION CANDIDATES>

SIBLING FACTS are every existing fact known between these two entities, indexed by id.
INVALIDATION CANDIDATES are the subset of those siblings most similar to the new fact,
also indexed by id, and are the only ones you may mark as contradicted.

Reply with exactly one tab-separated row:

duplicate_facts<TAB>contradicted_facts<TAB>fact_type

- duplicate_facts: comma-separated ids (from SIBLING FACTS) that the new fact merely
  restates, or empty if none.
- contradicted_facts: comma-separated ids (from INVALIDATION CANDIDATES) that the new
  fact renders obsolete, or empty if none.
- fact_type: the relation name (e.g. "WORKS_AT") the resolved fact should carry, or
  DEFAULT to keep the existing one.

Do not include a header row. Emit exactly one row. Your reply must end with a single
blank line.
"#
    );

    vec![Message::system(sys_prompt), Message::user(user_prompt)]
}

/// Available prompt versions for edge deduplication
pub struct DedupeEdgesPrompt {
    pub dedupe: PromptFunction,
    pub resolve: PromptFunction,
}

impl Default for DedupeEdgesPrompt {
    fn default() -> Self {
        Self { dedupe, resolve }
    }
}
