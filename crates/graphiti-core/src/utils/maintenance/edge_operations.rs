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

//! Edge maintenance operations

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::{
    edges::{EntityEdge, EpisodicEdge},
    errors::GraphitiError,
    llm_client::models::Message as LlmMessage,
    llm_client::ModelSize,
    nodes::{EntityNode, EpisodicNode},
    prompts::{self, extract_edges, models::Message as PromptMessage},
    types::GraphitiClients,
};

/// Caps how many invalidation candidates are ranked per reconciled edge (C7).
const MAX_INVALIDATION_CANDIDATES: usize = 50;

fn to_llm_messages(messages: Vec<PromptMessage>) -> Vec<LlmMessage> {
    messages.into_iter().map(|m| LlmMessage::new(m.role, m.content)).collect()
}

/// Extract entity-to-entity relationships mentioned in an episode, grounded in
/// the entities already extracted for it (C6).
pub async fn extract_edges(
    clients: &GraphitiClients,
    episode: &EpisodicNode,
    extracted_nodes: &[EntityNode],
    previous_episodes: &[EpisodicNode],
) -> Result<Vec<EntityEdge>, GraphitiError> {
    if extracted_nodes.len() < 2 {
        return Ok(Vec::new());
    }

    let node_summaries: Vec<Value> = extracted_nodes
        .iter()
        .enumerate()
        .map(|(i, n)| json!({"id": i, "name": n.name, "entity_type": n.entity_type}))
        .collect();

    let mut context: HashMap<String, Value> = HashMap::new();
    context.insert(
        "previous_episodes".to_string(),
        serde_json::to_value(previous_episodes.iter().map(|e| &e.content).collect::<Vec<_>>())
            .unwrap_or_default(),
    );
    context.insert("episode_content".to_string(), Value::String(episode.content.clone()));
    context.insert("nodes".to_string(), Value::Array(node_summaries));
    context.insert("reference_time".to_string(), Value::String(episode.reference_time.to_rfc3339()));
    context.insert("edge_types".to_string(), Value::Array(Vec::new()));

    let messages = to_llm_messages(extract_edges::edge(&context));

    let response = clients
        .llm_client
        .generate_response(&messages, None, None, ModelSize::Medium)
        .await
        .map_err(crate::errors::translate_llm_error)?;

    let extracted: extract_edges::ExtractedEdges =
        serde_json::from_value(Value::Object(response.into_iter().collect()))
            .unwrap_or(extract_edges::ExtractedEdges { edges: Vec::new() });

    let mut edges = Vec::new();
    for edge in extracted.edges {
        let (Some(source), Some(target)) = (
            extracted_nodes.get(edge.source_entity_id as usize),
            extracted_nodes.get(edge.target_entity_id as usize),
        ) else {
            continue;
        };

        let valid_at = edge
            .valid_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(episode.reference_time);

        let mut entity_edge = EntityEdge::new(
            episode.group_id.clone(),
            source.uuid,
            target.uuid,
            edge.relation_type,
            edge.fact,
            valid_at,
        )
        .with_episodes(vec![episode.uuid]);

        if let Some(invalid_at) = edge.invalid_at.as_deref().and_then(|s| DateTime::parse_from_rfc3339(s).ok()) {
            entity_edge.invalidate(invalid_at.with_timezone(&Utc), Utc::now());
        }

        edges.push(entity_edge);
    }

    Ok(edges)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Rank `siblings` by fact-embedding similarity to `candidate` and take the top
/// `limit`, preserving their original sibling index so the model's reply can
/// reference them positionally.
fn rank_invalidation_candidates(candidate: &EntityEdge, siblings: &[EntityEdge], limit: usize) -> Vec<EntityEdge> {
    let Some(query) = candidate.fact_embedding.as_deref() else {
        return siblings.iter().take(limit).cloned().collect();
    };

    let mut scored: Vec<(f32, &EntityEdge)> = siblings
        .iter()
        .map(|s| {
            let score = s
                .fact_embedding
                .as_deref()
                .map(|e| cosine_similarity(query, e))
                .unwrap_or(0.0);
            (score, s)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(limit).map(|(_, e)| e.clone()).collect()
}

struct EdgeResolution {
    duplicate_facts: Vec<usize>,
    contradicted_facts: Vec<usize>,
    fact_type: String,
}

fn parse_index_list(field: &str) -> Vec<usize> {
    field
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

async fn resolve_candidate_via_model(
    clients: &GraphitiClients,
    candidate: &EntityEdge,
    siblings: &[EntityEdge],
    invalidation_candidates: &[EntityEdge],
) -> Result<EdgeResolution, GraphitiError> {
    let sibling_ctx: Vec<Value> = siblings.iter().enumerate().map(|(i, e)| json!({"id": i, "fact": e.fact})).collect();
    let candidate_ctx: Vec<Value> = invalidation_candidates
        .iter()
        .enumerate()
        .map(|(i, e)| json!({"id": i, "fact": e.fact}))
        .collect();

    let mut context: HashMap<String, Value> = HashMap::new();
    context.insert("new_fact".to_string(), Value::String(candidate.fact.clone()));
    context.insert("siblings".to_string(), Value::Array(sibling_ctx));
    context.insert("invalidation_candidates".to_string(), Value::Array(candidate_ctx));

    let messages = to_llm_messages(prompts::dedupe_edges::resolve(&context));
    let response = clients
        .llm_client
        .generate_response(&messages, None, None, ModelSize::Small)
        .await
        .map_err(crate::errors::translate_llm_error)?;

    let content = response.get("content").and_then(|v| v.as_str()).unwrap_or("");
    let rows = crate::llm_client::tsv::parse_rows(content);

    let Some(row) = rows.first() else {
        return Err(GraphitiError::SchemaValidation {
            message: "edge resolution reply had no data row".to_string(),
        });
    };
    if row.len() < 3 {
        return Err(GraphitiError::SchemaValidation {
            message: format!("edge resolution row had {} fields, expected 3", row.len()),
        });
    }

    Ok(EdgeResolution {
        duplicate_facts: parse_index_list(&row[0]),
        contradicted_facts: parse_index_list(&row[1]),
        fact_type: row[2].clone(),
    })
}

/// Reconcile one candidate edge against its siblings (C7 steps 1-7): compute its
/// fact-embedding, rank invalidation candidates, resolve duplicates/contradictions
/// via the model, and produce invalidated copies of any sibling the candidate
/// supersedes.
async fn reconcile_candidate(
    clients: &GraphitiClients,
    mut candidate: EntityEdge,
    siblings: &[EntityEdge],
) -> Result<(EntityEdge, Vec<EntityEdge>), GraphitiError> {
    if candidate.fact_embedding.is_none() {
        candidate.generate_fact_embedding(clients.embedder.as_ref()).await?;
    }

    if siblings.is_empty() {
        return Ok((candidate, Vec::new()));
    }

    let invalidation_candidates = rank_invalidation_candidates(&candidate, siblings, MAX_INVALIDATION_CANDIDATES);

    let resolution = match resolve_candidate_via_model(clients, &candidate, siblings, &invalidation_candidates).await {
        Ok(r) => r,
        Err(e) => {
            warn!("edge resolution call failed, keeping candidate unresolved: {e}");
            return Ok((candidate, Vec::new()));
        }
    };

    let mut resolved = match resolution.duplicate_facts.first().and_then(|&i| siblings.get(i)) {
        Some(sibling) => sibling.clone(),
        None => candidate.clone(),
    };

    for episode in &candidate.episodes {
        if !resolved.episodes.contains(episode) {
            resolved.episodes.push(*episode);
        }
    }
    resolved.base.updated_at = Utc::now();

    if !resolution.fact_type.is_empty() && resolution.fact_type != "DEFAULT" {
        resolved.name = resolution.fact_type.clone();
    }

    let mut invalidated = Vec::new();
    for &idx in &resolution.contradicted_facts {
        let Some(c) = invalidation_candidates.get(idx) else { continue };

        if let Some(valid_to) = c.valid_to {
            if valid_to < resolved.valid_from {
                continue;
            }
        }
        if let Some(resolved_valid_to) = resolved.valid_to {
            if resolved_valid_to < c.valid_from {
                continue;
            }
        }
        if c.valid_from < resolved.valid_from {
            let mut copy = c.clone();
            copy.invalidate(resolved.valid_from, Utc::now());
            invalidated.push(copy);
        }
    }

    Ok((resolved, invalidated))
}

/// Deduplicate extracted edges against edges already present in the store and
/// reconcile temporal contradictions (C7). Returns the resolved edges and any
/// invalidated copies of superseded siblings.
pub async fn dedupe_extracted_edges(
    clients: &GraphitiClients,
    extracted_edges: Vec<EntityEdge>,
    existing_edges: Vec<EntityEdge>,
) -> Result<(Vec<EntityEdge>, Vec<EntityEdge>), GraphitiError> {
    let mut resolved_by_uuid: HashMap<Uuid, usize> = HashMap::new();
    let mut resolved_edges: Vec<EntityEdge> = Vec::new();
    let mut invalidated_edges: Vec<EntityEdge> = Vec::new();

    for candidate in extracted_edges {
        let siblings: Vec<EntityEdge> = existing_edges
            .iter()
            .filter(|e| {
                (e.source_node_uuid, e.target_node_uuid) == (candidate.source_node_uuid, candidate.target_node_uuid)
                    || (e.source_node_uuid, e.target_node_uuid)
                        == (candidate.target_node_uuid, candidate.source_node_uuid)
            })
            .cloned()
            .collect();

        let (resolved, invalidated) = reconcile_candidate(clients, candidate, &siblings).await?;

        match resolved_by_uuid.get(&resolved.uuid) {
            Some(&i) => {
                for episode in &resolved.episodes {
                    if !resolved_edges[i].episodes.contains(episode) {
                        resolved_edges[i].episodes.push(*episode);
                    }
                }
            }
            None => {
                resolved_by_uuid.insert(resolved.uuid, resolved_edges.len());
                resolved_edges.push(resolved);
            }
        }
        invalidated_edges.extend(invalidated);
    }

    Ok((resolved_edges, invalidated_edges))
}

/// Deduplicate a list of newly extracted edges against each other.
pub async fn dedupe_edge_list(
    _clients: &GraphitiClients,
    edges: Vec<EntityEdge>,
) -> Result<Vec<EntityEdge>, GraphitiError> {
    Ok(dedupe_edge_list_by_triple(edges))
}

fn dedupe_edge_list_by_triple(edges: Vec<EntityEdge>) -> Vec<EntityEdge> {
    let mut by_key: HashMap<(uuid::Uuid, uuid::Uuid, String), EntityEdge> = HashMap::new();

    for edge in edges {
        let key = (edge.source_node_uuid, edge.target_node_uuid, edge.name.to_lowercase());
        match by_key.get_mut(&key) {
            Some(existing) => {
                for episode in &edge.episodes {
                    if !existing.episodes.contains(episode) {
                        existing.episodes.push(*episode);
                    }
                }
            }
            None => {
                by_key.insert(key, edge);
            }
        }
    }

    by_key.into_values().collect()
}

/// Build MENTIONS edges linking an episode to each entity it mentions (C6).
pub fn build_episodic_edges(
    extracted_nodes: &[EntityNode],
    episode: &EpisodicNode,
    created_at: DateTime<Utc>,
) -> Vec<EpisodicEdge> {
    extracted_nodes
        .iter()
        .map(|node| {
            let mut edge = EpisodicEdge::new(episode.group_id.clone(), episode.uuid, node.uuid);
            edge.base.created_at = created_at;
            edge
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_edge(source: uuid::Uuid, target: uuid::Uuid, name: &str) -> EntityEdge {
        EntityEdge::new(
            "group1".to_string(),
            source,
            target,
            name.to_string(),
            format!("{name} fact"),
            Utc::now(),
        )
    }

    #[test]
    fn test_dedupe_edge_list_merges_same_triple() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let edges = vec![sample_edge(a, b, "KNOWS"), sample_edge(a, b, "knows")];
        let result = dedupe_edge_list_by_triple(edges);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_rank_invalidation_candidates_orders_by_similarity() {
        let mut candidate = sample_edge(Uuid::new_v4(), Uuid::new_v4(), "KNOWS");
        candidate.fact_embedding = Some(vec![1.0, 0.0]);

        let mut close = sample_edge(candidate.source_node_uuid, candidate.target_node_uuid, "KNOWS");
        close.fact_embedding = Some(vec![0.9, 0.1]);
        let mut far = sample_edge(candidate.source_node_uuid, candidate.target_node_uuid, "KNOWS");
        far.fact_embedding = Some(vec![0.0, 1.0]);

        let ranked = rank_invalidation_candidates(&candidate, &[far.clone(), close.clone()], 50);
        assert_eq!(ranked[0].fact, close.fact);
    }

    #[test]
    fn test_parse_index_list() {
        assert_eq!(parse_index_list("0, 2,5"), vec![0, 2, 5]);
        assert_eq!(parse_index_list(""), Vec::<usize>::new());
    }
}
