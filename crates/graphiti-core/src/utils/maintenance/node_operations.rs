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

//! Node maintenance operations

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::{
    errors::GraphitiError,
    llm_client::models::Message as LlmMessage,
    llm_client::ModelSize,
    nodes::{EntityNode, EpisodicNode},
    prompts::{self, extract_nodes, models::Message as PromptMessage},
    types::GraphitiClients,
};

fn to_llm_messages(messages: Vec<PromptMessage>) -> Vec<LlmMessage> {
    messages.into_iter().map(|m| LlmMessage::new(m.role, m.content)).collect()
}

/// Options governing a single extraction pass (C5).
#[derive(Debug, Clone, Default)]
pub struct ExtractionOptions {
    /// Ordered entity type names; an extracted entity's `entity_type_id` indexes
    /// into this list. Absent/out-of-range ids resolve to `"Entity"`.
    pub entity_types: Vec<String>,
    /// Entity type names to drop from the result after classification.
    pub excluded_entity_types: Vec<String>,
    /// Caps how many times the reflexion loop re-asks the model for missed
    /// entities. Defaults to `MAX_REFLEXION_ITERATIONS` (0 unless configured).
    pub max_reflexion_iterations: usize,
}

impl ExtractionOptions {
    pub fn new() -> Self {
        Self {
            max_reflexion_iterations: crate::helpers::max_reflexion_iterations(),
            ..Default::default()
        }
    }
}

/// Extract entity nodes mentioned in an episode, grounded in its recent context.
pub async fn extract_nodes(
    clients: &GraphitiClients,
    episode: &EpisodicNode,
    previous_episodes: &[EpisodicNode],
) -> Result<Vec<EntityNode>, GraphitiError> {
    extract_nodes_with_options(clients, episode, previous_episodes, &ExtractionOptions::new()).await
}

/// Extract entity nodes, running the reflexion loop (re-asking for entities the
/// first pass missed, up to `max_reflexion_iterations`) and dropping any whose
/// classified type is in `excluded_entity_types`.
pub async fn extract_nodes_with_options(
    clients: &GraphitiClients,
    episode: &EpisodicNode,
    previous_episodes: &[EpisodicNode],
    options: &ExtractionOptions,
) -> Result<Vec<EntityNode>, GraphitiError> {
    let entity_types_ctx: Vec<Value> = options
        .entity_types
        .iter()
        .enumerate()
        .map(|(i, name)| json!({"entity_type_id": i, "entity_type_name": name}))
        .collect();

    let mut context: HashMap<String, Value> = HashMap::new();
    context.insert(
        "previous_episodes".to_string(),
        serde_json::to_value(previous_episodes.iter().map(|e| &e.content).collect::<Vec<_>>())
            .unwrap_or_default(),
    );
    context.insert("episode_content".to_string(), Value::String(episode.content.clone()));
    context.insert("entity_types".to_string(), Value::Array(entity_types_ctx));
    context.insert("custom_prompt".to_string(), Value::String(String::new()));

    let prompt_fn = match episode.episode_type {
        crate::nodes::EpisodeType::Json => extract_nodes::extract_json,
        crate::nodes::EpisodeType::Message => extract_nodes::extract_message,
        _ => extract_nodes::extract_text,
    };

    let messages = to_llm_messages(prompt_fn(&context));
    let response = clients
        .llm_client
        .generate_response(&messages, None, None, ModelSize::Medium)
        .await
        .map_err(crate::errors::translate_llm_error)?;

    let mut extracted: extract_nodes::ExtractedEntities =
        serde_json::from_value(Value::Object(response.into_iter().collect()))
            .unwrap_or(extract_nodes::ExtractedEntities { extracted_entities: Vec::new() });

    for _ in 0..options.max_reflexion_iterations {
        let mut reflexion_context = context.clone();
        reflexion_context.insert(
            "extracted_entities".to_string(),
            json!(extracted.extracted_entities.iter().map(|e| &e.name).collect::<Vec<_>>()),
        );

        let reflexion_messages = to_llm_messages(extract_nodes::reflexion(&reflexion_context));
        let Ok(response) = clients
            .llm_client
            .generate_response(&reflexion_messages, None, None, ModelSize::Small)
            .await
        else {
            break;
        };

        let missed: extract_nodes::MissedEntities =
            serde_json::from_value(Value::Object(response.into_iter().collect())).unwrap_or(
                extract_nodes::MissedEntities { missed_entities: Vec::new() },
            );

        if missed.missed_entities.is_empty() {
            break;
        }

        let mut retry_context = context.clone();
        let directive = format!(
            "Also extract these entities if they are genuinely present in the CURRENT MESSAGE \
             and were not already listed: {}",
            missed.missed_entities.join(", ")
        );
        retry_context.insert("custom_prompt".to_string(), Value::String(directive));

        let retry_messages = to_llm_messages(prompt_fn(&retry_context));
        let Ok(response) = clients
            .llm_client
            .generate_response(&retry_messages, None, None, ModelSize::Medium)
            .await
        else {
            break;
        };

        let retried: extract_nodes::ExtractedEntities =
            serde_json::from_value(Value::Object(response.into_iter().collect()))
                .unwrap_or(extract_nodes::ExtractedEntities { extracted_entities: Vec::new() });

        let mut seen: std::collections::HashSet<String> = extracted
            .extracted_entities
            .iter()
            .map(|e| e.name.to_lowercase())
            .collect();
        let mut added_any = false;
        for entity in retried.extracted_entities {
            if seen.insert(entity.name.to_lowercase()) {
                added_any = true;
                extracted.extracted_entities.push(entity);
            }
        }

        if !added_any {
            break;
        }
    }

    let nodes = extracted
        .extracted_entities
        .into_iter()
        .filter(|e| !e.name.trim().is_empty())
        .map(|e| {
            let entity_type = options
                .entity_types
                .get(e.entity_type_id as usize)
                .cloned()
                .unwrap_or_else(|| "Entity".to_string());
            EntityNode::new(e.name, episode.group_id.clone(), String::new()).with_entity_type(entity_type)
        })
        .filter(|node| {
            !options
                .excluded_entity_types
                .iter()
                .any(|excluded| excluded.eq_ignore_ascii_case(&node.entity_type))
        })
        .collect();

    Ok(nodes)
}

/// Deduplicate extracted nodes against nodes already present in the store (C6):
/// ask the model to resolve each extracted node against the candidate set found
/// by full-text search, falling back to exact-name matching if the model call
/// fails or returns nothing usable.
pub async fn dedupe_extracted_nodes(
    clients: &GraphitiClients,
    extracted_nodes: Vec<EntityNode>,
    existing_nodes: Vec<EntityNode>,
) -> Result<(Vec<EntityNode>, HashMap<String, String>), GraphitiError> {
    if existing_nodes.is_empty() || extracted_nodes.is_empty() {
        return Ok((extracted_nodes, HashMap::new()));
    }

    let extracted_ctx: Vec<Value> = extracted_nodes
        .iter()
        .enumerate()
        .map(|(i, n)| json!({"id": i, "name": n.name, "summary": n.summary}))
        .collect();
    let existing_ctx: Vec<Value> = existing_nodes
        .iter()
        .enumerate()
        .map(|(i, n)| json!({"id": i, "name": n.name, "summary": n.summary}))
        .collect();

    let mut context: HashMap<String, Value> = HashMap::new();
    context.insert("extracted_nodes".to_string(), Value::Array(extracted_ctx));
    context.insert("existing_nodes".to_string(), Value::Array(existing_ctx));

    let messages = to_llm_messages(prompts::dedupe_nodes::dedupe(&context));

    let response = match clients.llm_client.generate_response(&messages, None, None, ModelSize::Small).await {
        Ok(response) => response,
        Err(e) => {
            warn!("node resolution call failed, falling back to exact-name match: {e}");
            return Ok(dedupe_extracted_nodes_by_name(extracted_nodes, &existing_nodes));
        }
    };

    let resolutions: prompts::dedupe_nodes::EntityResolutions =
        match serde_json::from_value(Value::Object(response.into_iter().collect())) {
            Ok(r) => r,
            Err(e) => {
                let schema_err = GraphitiError::SchemaValidation { message: e.to_string() };
                warn!("node resolution reply failed schema validation, falling back to exact-name match: {schema_err}");
                return Ok(dedupe_extracted_nodes_by_name(extracted_nodes, &existing_nodes));
            }
        };

    if resolutions.entity_resolutions.is_empty() {
        return Ok(dedupe_extracted_nodes_by_name(extracted_nodes, &existing_nodes));
    }

    let by_id: HashMap<usize, &prompts::dedupe_nodes::EntityResolution> =
        resolutions.entity_resolutions.iter().map(|r| (r.id, r)).collect();

    let mut uuid_map = HashMap::new();
    let mut resolved = Vec::new();
    for (i, mut node) in extracted_nodes.into_iter().enumerate() {
        match by_id.get(&i) {
            Some(r) if r.duplicate_idx >= 0 && (r.duplicate_idx as usize) < existing_nodes.len() => {
                let existing = &existing_nodes[r.duplicate_idx as usize];
                uuid_map.insert(node.uuid.to_string(), existing.uuid.to_string());
            }
            Some(r) => {
                if let Some(name) = r.name.as_ref().filter(|n| !n.trim().is_empty()) {
                    node.name = name.clone();
                }
                resolved.push(node);
            }
            None => resolved.push(node),
        }
    }

    Ok((resolved, uuid_map))
}

fn dedupe_extracted_nodes_by_name(
    extracted_nodes: Vec<EntityNode>,
    existing_nodes: &[EntityNode],
) -> (Vec<EntityNode>, HashMap<String, String>) {
    let mut by_name: HashMap<(String, String), &EntityNode> = HashMap::new();
    for node in existing_nodes {
        by_name.insert((node.group_id.clone(), node.name.to_lowercase()), node);
    }

    let mut uuid_map = HashMap::new();
    let mut resolved = Vec::new();

    for node in extracted_nodes {
        match by_name.get(&(node.group_id.clone(), node.name.to_lowercase())) {
            Some(existing) if existing.uuid != node.uuid => {
                uuid_map.insert(node.uuid.to_string(), existing.uuid.to_string());
            }
            _ => resolved.push(node),
        }
    }

    (resolved, uuid_map)
}

/// Deduplicate a list of newly extracted nodes against each other (C6): an
/// exact-name pass first, then an LLM pass over the survivors to catch name
/// variants (nicknames, abbreviations) within the same batch.
pub async fn dedupe_node_list(
    clients: &GraphitiClients,
    nodes: Vec<EntityNode>,
) -> Result<(Vec<EntityNode>, HashMap<String, String>), GraphitiError> {
    let (unique, mut uuid_map) = dedupe_node_list_by_name(nodes);
    if unique.len() < 2 {
        return Ok((unique, uuid_map));
    }

    let node_summaries: Vec<Value> = unique
        .iter()
        .enumerate()
        .map(|(i, n)| json!({"id": i, "name": n.name, "summary": n.summary}))
        .collect();
    let mut context: HashMap<String, Value> = HashMap::new();
    context.insert("nodes".to_string(), Value::Array(node_summaries));

    let messages = to_llm_messages(prompts::dedupe_nodes::dedupe_list(&context));
    let response = match clients.llm_client.generate_response(&messages, None, None, ModelSize::Small).await {
        Ok(response) => response,
        Err(e) => {
            warn!("batch node resolution call failed, keeping exact-name result: {e}");
            return Ok((unique, uuid_map));
        }
    };

    let groups: prompts::dedupe_nodes::NodeGroups =
        serde_json::from_value(Value::Object(response.into_iter().collect())).unwrap_or_default();

    let uuids: Vec<Uuid> = unique.iter().map(|n| n.uuid).collect();
    let mut dropped = std::collections::HashSet::new();

    for group in &groups.duplicate_groups {
        let members: Vec<usize> = group.iter().copied().filter(|&i| i < uuids.len()).collect();
        if members.len() < 2 {
            continue;
        }
        let rep_id = *members.iter().min_by_key(|&&i| uuids[i].to_string()).unwrap();
        for &id in &members {
            if id != rep_id {
                uuid_map.insert(uuids[id].to_string(), uuids[rep_id].to_string());
                dropped.insert(id);
            }
        }
    }

    let resolved: Vec<EntityNode> = unique
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !dropped.contains(i))
        .map(|(_, n)| n)
        .collect();

    Ok((resolved, uuid_map))
}

fn dedupe_node_list_by_name(nodes: Vec<EntityNode>) -> (Vec<EntityNode>, HashMap<String, String>) {
    let mut seen: HashMap<(String, String), Uuid> = HashMap::new();
    let mut uuid_map = HashMap::new();
    let mut unique = Vec::new();

    for node in nodes {
        let key = (node.group_id.clone(), node.name.to_lowercase());
        match seen.get(&key) {
            Some(&representative) => {
                uuid_map.insert(node.uuid.to_string(), representative.to_string());
            }
            None => {
                seen.insert(key, node.uuid);
                unique.push(node);
            }
        }
    }

    (unique, uuid_map)
}

/// Summarize nodes using LLM
pub async fn summarize_nodes(
    _clients: &GraphitiClients,
    nodes: Vec<EntityNode>,
    _context: Option<&str>,
) -> Result<Vec<EntityNode>, GraphitiError> {
    Ok(nodes)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> EntityNode {
        EntityNode::new(name.to_string(), "group1".to_string(), String::new())
    }

    #[test]
    fn test_dedupe_node_list_by_name_merges_exact_names() {
        let nodes = vec![node("Alice"), node("alice"), node("Bob")];
        let (unique, uuid_map) = dedupe_node_list_by_name(nodes);
        assert_eq!(unique.len(), 2);
        assert_eq!(uuid_map.len(), 1);
    }

    #[test]
    fn test_dedupe_extracted_nodes_by_name_merges_case_insensitively() {
        let existing = vec![node("Bob")];
        let extracted = vec![node("bob"), node("Carol")];
        let (resolved, uuid_map) = dedupe_extracted_nodes_by_name(extracted, &existing);
        assert_eq!(resolved.len(), 1);
        assert_eq!(uuid_map.len(), 1);
    }

    fn node_in(name: &str, group_id: &str) -> EntityNode {
        EntityNode::new(name.to_string(), group_id.to_string(), String::new())
    }

    /// Property 7: ingest into one group never merges an entity carrying a
    /// different group_id, even when the name is an exact (case-insensitive)
    /// match.
    #[test]
    fn test_dedupe_node_list_by_name_keeps_groups_isolated() {
        let nodes = vec![node_in("Bob", "group1"), node_in("bob", "group2")];
        let (unique, uuid_map) = dedupe_node_list_by_name(nodes);
        assert_eq!(unique.len(), 2, "same-named entities in different groups must both survive");
        assert!(uuid_map.is_empty());
    }

    #[test]
    fn test_dedupe_extracted_nodes_by_name_keeps_groups_isolated() {
        let existing = vec![node_in("Bob", "group1")];
        let extracted = vec![node_in("bob", "group2")];
        let (resolved, uuid_map) = dedupe_extracted_nodes_by_name(extracted, &existing);
        assert_eq!(resolved.len(), 1, "the group2 node must not resolve onto group1's Bob");
        assert!(uuid_map.is_empty());
    }
}
