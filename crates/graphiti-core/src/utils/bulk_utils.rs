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

//! Bulk processing utilities for nodes and edges

use std::collections::{HashMap, HashSet};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use tracing::warn;
use crate::{
    types::GraphitiClients,
    nodes::{EntityNode, EpisodicNode, EpisodeType, Node},
    edges::{DuplicateEdge, Edge, EntityEdge, EpisodicEdge},
    search::{get_relevant_edges, get_relevant_nodes, SearchFilters},
    helpers::semaphore_gather,
    errors::GraphitiError,
};

/// Chunk size for batch processing
const CHUNK_SIZE: usize = 10;

/// Attempts before a stalled upsert is surfaced as `GraphitiError::Conflict`. The
/// in-memory/Kuzu backends don't expose a structured version-race signal, so this
/// is a pragmatic stand-in for optimistic-concurrency retry.
const UPSERT_ATTEMPTS: usize = 3;

/// Raw episode data for bulk processing
#[derive(Debug, Clone)]
pub struct RawEpisode {
    pub name: String,
    pub content: String,
    pub source_description: String,
    pub source: EpisodeType,
    pub reference_time: DateTime<Utc>,
}

/// Per-item failures collected by a bulk persistence run (C9 step 5): the batch
/// never rolls back wholesale, so callers get partial success plus this list.
#[derive(Debug, Default)]
pub struct PersistOutcome {
    pub errors: Vec<String>,
}

/// Retrieve previous episodes for multiple episodes in bulk, bounding each
/// lookup to `episode_window_len` prior episodes in the same group.
pub async fn retrieve_previous_episodes_bulk(
    clients: &GraphitiClients,
    episodes: &[EpisodicNode],
    episode_window_len: usize,
) -> Result<Vec<(EpisodicNode, Vec<EpisodicNode>)>, GraphitiError> {
    let futures: Vec<_> = episodes
        .iter()
        .map(|episode| async move {
            let previous = crate::utils::maintenance::graph_data_operations::retrieve_episodes(
                clients,
                episode.reference_time,
                episode_window_len,
                &[episode.group_id.clone()],
            )
            .await
            .unwrap_or_default();
            (episode.clone(), previous)
        })
        .collect();

    let results = semaphore_gather(futures, None).await;
    Ok(results)
}

/// Validate the §3 invariants C9 is responsible for checking before a batch is
/// written: 1 (`valid_to >= valid_from`), 2 (`created_at <= updated_at`), 3 (entity
/// edge endpoints are entity nodes in the batch's group), 4 (node uuids unique per
/// group, edge uuids globally unique), 7 (embeddings fixed-dimension and
/// L2-normalized per group), 8 (episodic edges originate from episodic nodes).
fn validate_batch(
    episodic_nodes: &[EpisodicNode],
    entity_nodes: &[EntityNode],
    episodic_edges: &[EpisodicEdge],
    entity_edges: &[EntityEdge],
) -> Vec<String> {
    let mut errors = Vec::new();

    for node in entity_nodes {
        if let Some(valid_to) = node.valid_to {
            if valid_to < node.valid_from {
                errors.push(format!("node {} has valid_to before valid_from", node.uuid));
            }
        }
        if node.created_at > node.updated_at {
            errors.push(format!("node {} has created_at after updated_at", node.uuid));
        }
    }

    for edge in entity_edges {
        if let Some(valid_to) = edge.valid_to {
            if valid_to < edge.valid_from {
                errors.push(format!("edge {} has valid_to before valid_from", edge.uuid));
            }
        }
        if edge.created_at > edge.updated_at {
            errors.push(format!("edge {} has created_at after updated_at", edge.uuid));
        }
    }

    let mut node_uuids_per_group: HashMap<&str, HashSet<Uuid>> = HashMap::new();
    for node in entity_nodes {
        if !node_uuids_per_group.entry(node.group_id.as_str()).or_default().insert(node.uuid) {
            errors.push(format!("duplicate node uuid {} in group {}", node.uuid, node.group_id));
        }
    }
    for node in episodic_nodes {
        if !node_uuids_per_group.entry(node.group_id.as_str()).or_default().insert(node.uuid) {
            errors.push(format!("duplicate node uuid {} in group {}", node.uuid, node.group_id));
        }
    }

    let mut edge_uuids: HashSet<Uuid> = HashSet::new();
    for edge in entity_edges.iter().map(|e| e.uuid).chain(episodic_edges.iter().map(|e| e.uuid)) {
        if !edge_uuids.insert(edge) {
            errors.push(format!("duplicate edge uuid {edge}"));
        }
    }

    let entity_uuids: HashSet<Uuid> = entity_nodes.iter().map(|n| n.uuid).collect();
    for edge in entity_edges {
        if !entity_uuids.contains(&edge.source_node_uuid) || !entity_uuids.contains(&edge.target_node_uuid) {
            errors.push(format!("entity edge {} references an endpoint outside this batch", edge.uuid));
        }
    }

    let episodic_uuids: HashSet<Uuid> = episodic_nodes.iter().map(|n| n.uuid).collect();
    for edge in episodic_edges {
        if !episodic_uuids.contains(&edge.source_node_uuid) {
            errors.push(format!("episodic edge {} does not originate from an episodic node", edge.uuid));
        }
    }

    let mut dims_per_group: HashMap<&str, usize> = HashMap::new();
    for node in entity_nodes {
        for embedding in [&node.embedding, &node.name_embedding].into_iter().flatten() {
            check_embedding(embedding, &node.group_id, &mut dims_per_group, &mut errors);
        }
    }
    for edge in entity_edges {
        if let Some(embedding) = &edge.fact_embedding {
            check_embedding(embedding, &edge.group_id, &mut dims_per_group, &mut errors);
        }
    }

    errors
}

fn check_embedding(
    embedding: &[f32],
    group_id: &str,
    dims_per_group: &mut HashMap<&str, usize>,
    errors: &mut Vec<String>,
) {
    match dims_per_group.get(group_id) {
        Some(&dim) if dim != embedding.len() => {
            errors.push(format!(
                "group {group_id} has mixed embedding dimensions ({dim} vs {})",
                embedding.len()
            ));
        }
        _ => {
            dims_per_group.insert(group_id, embedding.len());
        }
    }
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if (norm - 1.0).abs() > 0.01 && norm != 0.0 {
        errors.push(format!("group {group_id} has a non-L2-normalized embedding (norm {norm})"));
    }
}

/// Retry an upsert a few times before giving up; used as a stand-in for optimistic
/// concurrency control against backends with no structured conflict signal.
async fn save_node_with_retry(driver: &dyn crate::database::GraphDatabase, node: &dyn Node) -> Result<(), String> {
    let uuid = node.uuid();
    let mut last_err = None;
    for _ in 0..UPSERT_ATTEMPTS {
        match node.save(driver).await {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(e),
        }
    }
    Err(GraphitiError::Conflict { uuid }.to_string() + &format!(" (last error: {})", last_err.unwrap()))
}

async fn save_edge_with_retry(driver: &dyn crate::database::GraphDatabase, edge: &dyn Edge) -> Result<(), String> {
    let uuid = edge.uuid();
    let mut last_err = None;
    for _ in 0..UPSERT_ATTEMPTS {
        match edge.save(driver).await {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(e),
        }
    }
    Err(GraphitiError::Conflict { uuid }.to_string() + &format!(" (last error: {})", last_err.unwrap()))
}

/// Save nodes and edges produced by a bulk ingestion run (C9).
pub async fn add_nodes_and_edges_bulk(
    clients: &GraphitiClients,
    mut episodic_nodes: Vec<EpisodicNode>,
    episodic_edges: Vec<EpisodicEdge>,
    mut entity_nodes: Vec<EntityNode>,
    mut entity_edges: Vec<EntityEdge>,
    duplicate_edges: Vec<DuplicateEdge>,
    mut invalidated_edges: Vec<EntityEdge>,
    generate_embeddings: bool,
) -> Result<PersistOutcome, GraphitiError> {
    if generate_embeddings {
        for node in &mut entity_nodes {
            if node.name_embedding.is_none() {
                node.generate_name_embedding(clients.embedder.as_ref()).await?;
            }
            if node.embedding.is_none() {
                node.generate_summary_embedding(clients.embedder.as_ref()).await?;
            }
        }
        for edge in entity_edges.iter_mut() {
            if edge.fact_embedding.is_none() {
                edge.generate_fact_embedding(clients.embedder.as_ref()).await?;
            }
        }
        for edge in invalidated_edges.iter_mut() {
            if edge.fact_embedding.is_none() {
                edge.generate_fact_embedding(clients.embedder.as_ref()).await?;
            }
        }
    }

    let validation_errors = validate_batch(&episodic_nodes, &entity_nodes, &episodic_edges, &entity_edges);
    if !validation_errors.is_empty() {
        return Err(GraphitiError::Validation {
            message: validation_errors.join("; "),
        });
    }

    let mut outcome = PersistOutcome::default();
    let mut failed_node_uuids: HashSet<Uuid> = HashSet::new();

    for node in &entity_nodes {
        if let Err(e) = save_node_with_retry(clients.driver.as_ref(), node).await {
            failed_node_uuids.insert(node.uuid);
            outcome.errors.push(e);
        }
    }

    for node in &episodic_nodes {
        if let Err(e) = save_node_with_retry(clients.driver.as_ref(), node).await {
            failed_node_uuids.insert(node.uuid);
            outcome.errors.push(e);
        }
    }

    let mut entity_edges_by_episode: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for edge in entity_edges.iter().chain(invalidated_edges.iter()) {
        for episode_uuid in &edge.episodes {
            entity_edges_by_episode.entry(*episode_uuid).or_default().push(edge.uuid);
        }
    }
    for episode in &mut episodic_nodes {
        if let Some(uuids) = entity_edges_by_episode.get(&episode.uuid) {
            episode.entity_edges = uuids.clone();
        }
    }
    for episode in &episodic_nodes {
        if failed_node_uuids.contains(&episode.uuid) {
            continue;
        }
        if let Err(e) = save_node_with_retry(clients.driver.as_ref(), episode).await {
            outcome.errors.push(e);
        }
    }

    for edge in &entity_edges {
        if failed_node_uuids.contains(&edge.source_node_uuid) {
            outcome.errors.push(
                GraphitiError::DanglingReference {
                    edge_uuid: edge.uuid,
                    missing_endpoint: edge.source_node_uuid,
                }
                .to_string(),
            );
            continue;
        }
        if failed_node_uuids.contains(&edge.target_node_uuid) {
            outcome.errors.push(
                GraphitiError::DanglingReference {
                    edge_uuid: edge.uuid,
                    missing_endpoint: edge.target_node_uuid,
                }
                .to_string(),
            );
            continue;
        }
        if let Err(e) = save_edge_with_retry(clients.driver.as_ref(), edge).await {
            outcome.errors.push(e);
        }
    }

    for edge in &episodic_edges {
        if failed_node_uuids.contains(&edge.source_node_uuid) || failed_node_uuids.contains(&edge.target_node_uuid) {
            outcome.errors.push(
                GraphitiError::DanglingReference {
                    edge_uuid: edge.uuid,
                    missing_endpoint: edge.source_node_uuid,
                }
                .to_string(),
            );
            continue;
        }
        if let Err(e) = save_edge_with_retry(clients.driver.as_ref(), edge).await {
            outcome.errors.push(e);
        }
    }

    for edge in &duplicate_edges {
        if let Err(e) = save_edge_with_retry(clients.driver.as_ref(), edge).await {
            outcome.errors.push(e);
        }
    }

    // Invalidated edges are updates to rows the store already has; skip ones whose
    // representative failed to land in this batch rather than creating orphans.
    for edge in &invalidated_edges {
        if failed_node_uuids.contains(&edge.source_node_uuid) || failed_node_uuids.contains(&edge.target_node_uuid) {
            outcome.errors.push(
                GraphitiError::DanglingReference {
                    edge_uuid: edge.uuid,
                    missing_endpoint: edge.source_node_uuid,
                }
                .to_string(),
            );
            continue;
        }
        if let Err(e) = save_edge_with_retry(clients.driver.as_ref(), edge).await {
            outcome.errors.push(e);
        }
    }

    if !outcome.errors.is_empty() {
        warn!("bulk persistence completed with {} item error(s)", outcome.errors.len());
    }

    Ok(outcome)
}

/// Extract nodes and edges from multiple episodes in bulk
pub async fn extract_nodes_and_edges_bulk(
    clients: &GraphitiClients,
    episode_tuples: Vec<(EpisodicNode, Vec<EpisodicNode>)>,
) -> Result<(Vec<EntityNode>, Vec<EntityEdge>, Vec<EpisodicEdge>), GraphitiError> {
    extract_nodes_and_edges_bulk_with_options(
        clients,
        episode_tuples,
        &crate::utils::maintenance::node_operations::ExtractionOptions::new(),
    )
    .await
}

/// Extract nodes and edges from multiple episodes in bulk, applying `options` to
/// every episode's extraction pass (C5 reflexion loop, entity type filtering).
pub async fn extract_nodes_and_edges_bulk_with_options(
    clients: &GraphitiClients,
    episode_tuples: Vec<(EpisodicNode, Vec<EpisodicNode>)>,
    options: &crate::utils::maintenance::node_operations::ExtractionOptions,
) -> Result<(Vec<EntityNode>, Vec<EntityEdge>, Vec<EpisodicEdge>), GraphitiError> {
    let node_futures: Vec<_> = episode_tuples
        .iter()
        .map(|(episode, previous_episodes)| async move {
            crate::utils::maintenance::node_operations::extract_nodes_with_options(
                clients,
                episode,
                previous_episodes,
                options,
            )
            .await
            .unwrap_or_default()
        })
        .collect();

    let extracted_nodes_bulk = semaphore_gather(node_futures, None).await;

    let edge_futures: Vec<_> = episode_tuples
        .iter()
        .enumerate()
        .map(|(i, (episode, previous_episodes))| {
            let nodes_for_episode = extracted_nodes_bulk[i].clone();
            async move {
                crate::utils::maintenance::edge_operations::extract_edges(
                    clients,
                    episode,
                    &nodes_for_episode,
                    previous_episodes,
                )
                .await
                .unwrap_or_default()
            }
        })
        .collect();

    let extracted_edges_bulk = semaphore_gather(edge_futures, None).await;

    let mut episodic_edges = Vec::new();
    for (i, (episode, _)) in episode_tuples.iter().enumerate() {
        episodic_edges.extend(crate::utils::maintenance::edge_operations::build_episodic_edges(
            &extracted_nodes_bulk[i],
            episode,
            episode.created_at,
        ));
    }

    let nodes: Vec<EntityNode> = extracted_nodes_bulk.into_iter().flatten().collect();
    let edges: Vec<EntityEdge> = extracted_edges_bulk.into_iter().flatten().collect();

    Ok((nodes, edges, episodic_edges))
}

/// Deduplicate nodes in bulk: exact-name match, then LLM-based compression,
/// then reconciliation against what's already in the store (C9/C12). Returns the
/// deduped nodes, the uuid compression map, and the `IS_DUPLICATE_OF` edges that
/// record each fold (invariant 6: one canonical, lexicographically-smallest
/// representative per equivalence class).
pub async fn dedupe_nodes_bulk(
    clients: &GraphitiClients,
    extracted_nodes: Vec<EntityNode>,
) -> Result<(Vec<EntityNode>, HashMap<String, String>, Vec<DuplicateEdge>), GraphitiError> {
    let group_ids: HashMap<String, String> =
        extracted_nodes.iter().map(|n| (n.uuid.to_string(), n.group_id.clone())).collect();

    let (nodes, uuid_map) = node_name_match(extracted_nodes);

    let (compressed_nodes, compressed_map) = compress_nodes(clients, nodes, uuid_map).await?;

    let node_chunks: Vec<Vec<EntityNode>> = compressed_nodes
        .chunks(CHUNK_SIZE)
        .map(|chunk| chunk.to_vec())
        .collect();

    let existing_futures: Vec<_> = node_chunks
        .iter()
        .map(|chunk| async move {
            get_relevant_nodes(clients, chunk, &SearchFilters::default()).await.unwrap_or_default()
        })
        .collect();

    let existing_nodes_chunks = semaphore_gather(existing_futures, None).await;
    let existing_uuids: HashSet<String> = existing_nodes_chunks
        .iter()
        .flatten()
        .map(|n| n.uuid.to_string())
        .collect();

    let dedupe_futures: Vec<_> = node_chunks
        .into_iter()
        .zip(existing_nodes_chunks.into_iter())
        .map(|(chunk, existing)| async move {
            crate::utils::maintenance::node_operations::dedupe_extracted_nodes(clients, chunk, existing)
                .await
                .unwrap_or_else(|_| (Vec::new(), HashMap::new()))
        })
        .collect();

    let results = semaphore_gather(dedupe_futures, None).await;

    let mut final_nodes = Vec::new();
    let mut final_uuid_map = compressed_map;

    for (nodes, partial_uuid_map) in results {
        final_nodes.extend(nodes);
        final_uuid_map.extend(partial_uuid_map);
    }

    // An already-persisted node must always win the merge over one only just
    // extracted, regardless of which uuid sorts smaller: the latter was never
    // kept in `final_nodes`, so if it won, nothing would resolve to it.
    let final_uuid_map = compress_uuid_map_preferring(final_uuid_map, &existing_uuids);

    let existing_duplicate_edges = clients
        .driver
        .find_edges(None, None, Some("IS_DUPLICATE_OF"))
        .await
        .map(|edges| {
            edges
                .into_iter()
                .map(|e| (e.source_id, e.target_id))
                .collect::<HashSet<_>>()
        })
        .unwrap_or_default();

    let mut duplicate_edges = Vec::new();
    for (duplicate_uuid, representative_uuid) in &final_uuid_map {
        if duplicate_uuid == representative_uuid {
            continue;
        }
        if existing_duplicate_edges.contains(&(duplicate_uuid.clone(), representative_uuid.clone())) {
            continue;
        }
        let (Ok(duplicate), Ok(representative)) =
            (Uuid::parse_str(duplicate_uuid), Uuid::parse_str(representative_uuid))
        else {
            continue;
        };
        let group_id = group_ids.get(duplicate_uuid).cloned().unwrap_or_default();
        duplicate_edges.push(DuplicateEdge::new(group_id, duplicate, representative));
    }

    Ok((final_nodes, final_uuid_map, duplicate_edges))
}

/// Deduplicate edges in bulk: reconciles against existing edges between the same
/// endpoints and resolves temporal contradictions (C7). Returns the resolved
/// edges and any invalidated copies of superseded siblings.
pub async fn dedupe_edges_bulk(
    clients: &GraphitiClients,
    extracted_edges: Vec<EntityEdge>,
) -> Result<(Vec<EntityEdge>, Vec<EntityEdge>), GraphitiError> {
    let compressed_edges = compress_edges(clients, extracted_edges).await?;

    let edge_chunks: Vec<Vec<EntityEdge>> = compressed_edges
        .chunks(CHUNK_SIZE)
        .map(|chunk| chunk.to_vec())
        .collect();

    let relevant_futures: Vec<_> = edge_chunks
        .iter()
        .map(|chunk| async move {
            get_relevant_edges(clients, chunk, &SearchFilters::default()).await.unwrap_or_default()
        })
        .collect();

    let relevant_edges_chunks = semaphore_gather(relevant_futures, None).await;

    let dedupe_futures: Vec<_> = edge_chunks
        .into_iter()
        .zip(relevant_edges_chunks.into_iter())
        .map(|(chunk, relevant)| async move {
            crate::utils::maintenance::edge_operations::dedupe_extracted_edges(clients, chunk, relevant)
                .await
                .unwrap_or_else(|_| (Vec::new(), Vec::new()))
        })
        .collect();

    let results = semaphore_gather(dedupe_futures, None).await;

    let mut resolved = Vec::new();
    let mut invalidated = Vec::new();
    for (r, inv) in results {
        resolved.extend(r);
        invalidated.extend(inv);
    }
    Ok((resolved, invalidated))
}

/// Match nodes by name to find duplicates
fn node_name_match(nodes: Vec<EntityNode>) -> (Vec<EntityNode>, HashMap<String, String>) {
    let mut uuid_map = HashMap::new();
    let mut name_map: HashMap<(String, String), EntityNode> = HashMap::new();
    let mut unique_nodes = Vec::new();

    for node in nodes {
        let key = (node.group_id.clone(), node.name.clone());
        if let Some(existing_node) = name_map.get(&key) {
            let existing: &EntityNode = existing_node;
            uuid_map.insert(node.uuid.to_string(), existing.uuid.to_string());
        } else {
            name_map.insert(key, node.clone());
            unique_nodes.push(node);
        }
    }

    (unique_nodes, uuid_map)
}

/// Compress nodes using LLM-based deduplication
async fn compress_nodes(
    clients: &GraphitiClients,
    nodes: Vec<EntityNode>,
    uuid_map: HashMap<String, String>,
) -> Result<(Vec<EntityNode>, HashMap<String, String>), GraphitiError> {
    if nodes.is_empty() {
        return Ok((nodes, uuid_map));
    }

    let chunk_size = (nodes.len() as f64).sqrt().max(CHUNK_SIZE as f64) as usize;

    let node_chunks: Vec<Vec<EntityNode>> = nodes
        .chunks(chunk_size)
        .map(|chunk| chunk.to_vec())
        .collect();

    let dedupe_futures: Vec<_> = node_chunks
        .into_iter()
        .map(|chunk| async move {
            crate::utils::maintenance::node_operations::dedupe_node_list(clients, chunk)
                .await
                .unwrap_or_else(|_| (Vec::new(), HashMap::new()))
        })
        .collect();

    let results = semaphore_gather(dedupe_futures, None).await;

    let mut extended_map = uuid_map;
    let mut compressed_nodes = Vec::new();

    for (chunk_nodes, chunk_uuid_map) in results {
        compressed_nodes.extend(chunk_nodes);
        extended_map.extend(chunk_uuid_map);
    }

    if compressed_nodes.len() == nodes.len() {
        let compressed_uuid_map = compress_uuid_map(extended_map);
        Ok((compressed_nodes, compressed_uuid_map))
    } else {
        Box::pin(compress_nodes(clients, compressed_nodes, extended_map)).await
    }
}

/// Compress edges using LLM-based deduplication
async fn compress_edges(
    clients: &GraphitiClients,
    edges: Vec<EntityEdge>,
) -> Result<Vec<EntityEdge>, GraphitiError> {
    if edges.is_empty() {
        return Ok(edges);
    }

    let edge_count = edges.len();
    let edge_chunks = chunk_edges_by_nodes(edges);

    let dedupe_futures: Vec<_> = edge_chunks
        .into_iter()
        .map(|chunk| async move {
            crate::utils::maintenance::edge_operations::dedupe_edge_list(clients, chunk)
                .await
                .unwrap_or_default()
        })
        .collect();

    let results = semaphore_gather(dedupe_futures, None).await;
    let compressed_edges: Vec<EntityEdge> = results.into_iter().flatten().collect();

    if compressed_edges.len() == edge_count {
        Ok(compressed_edges)
    } else {
        Box::pin(compress_edges(clients, compressed_edges)).await
    }
}

/// Compress a uuid mapping via union-find so every key resolves to its connected
/// component's lexicographically-smallest uuid (invariant 6: `M[x] <= x`).
fn compress_uuid_map(uuid_map: HashMap<String, String>) -> HashMap<String, String> {
    let mut parent: HashMap<String, String> = HashMap::new();

    fn find(parent: &mut HashMap<String, String>, x: &str) -> String {
        let next = parent.get(x).cloned().unwrap_or_else(|| x.to_string());
        if next == x {
            return x.to_string();
        }
        let root = find(parent, &next);
        parent.insert(x.to_string(), root.clone());
        root
    }

    for (a, b) in &uuid_map {
        parent.entry(a.clone()).or_insert_with(|| a.clone());
        parent.entry(b.clone()).or_insert_with(|| b.clone());

        let root_a = find(&mut parent, a);
        let root_b = find(&mut parent, b);
        if root_a == root_b {
            continue;
        }
        if root_a < root_b {
            parent.insert(root_b, root_a);
        } else {
            parent.insert(root_a, root_b);
        }
    }

    uuid_map
        .keys()
        .map(|key| {
            let root = find(&mut parent, key);
            (key.clone(), root)
        })
        .collect()
}

/// Like `compress_uuid_map`, but within a connected component a member of
/// `preferred` always wins the root regardless of lexicographic order; ties
/// between two preferred (or two non-preferred) members still fall back to
/// the smallest uuid.
fn compress_uuid_map_preferring(uuid_map: HashMap<String, String>, preferred: &HashSet<String>) -> HashMap<String, String> {
    let mut parent: HashMap<String, String> = HashMap::new();

    fn find(parent: &mut HashMap<String, String>, x: &str) -> String {
        let next = parent.get(x).cloned().unwrap_or_else(|| x.to_string());
        if next == x {
            return x.to_string();
        }
        let root = find(parent, &next);
        parent.insert(x.to_string(), root.clone());
        root
    }

    let better_root = |a: &str, b: &str, preferred: &HashSet<String>| -> (String, String) {
        let a_preferred = preferred.contains(a);
        let b_preferred = preferred.contains(b);
        match (a_preferred, b_preferred) {
            (true, false) => (a.to_string(), b.to_string()),
            (false, true) => (b.to_string(), a.to_string()),
            _ if a < b => (a.to_string(), b.to_string()),
            _ => (b.to_string(), a.to_string()),
        }
    };

    for (a, b) in &uuid_map {
        parent.entry(a.clone()).or_insert_with(|| a.clone());
        parent.entry(b.clone()).or_insert_with(|| b.clone());

        let root_a = find(&mut parent, a);
        let root_b = find(&mut parent, b);
        if root_a == root_b {
            continue;
        }
        let (winner, loser) = better_root(&root_a, &root_b, preferred);
        parent.insert(loser, winner);
    }

    uuid_map
        .keys()
        .map(|key| {
            let root = find(&mut parent, key);
            (key.clone(), root)
        })
        .collect()
}

/// Resolve edge endpoint UUIDs through a dedup mapping in place.
pub fn resolve_edge_pointers(edges: &mut [EntityEdge], uuid_map: &HashMap<String, String>) {
    for edge in edges {
        if let Some(new_uuid) = uuid_map.get(&edge.source_node_uuid.to_string()) {
            if let Ok(uuid) = Uuid::parse_str(new_uuid) {
                edge.base.source_node_uuid = uuid;
            }
        }

        if let Some(new_uuid) = uuid_map.get(&edge.target_node_uuid.to_string()) {
            if let Ok(uuid) = Uuid::parse_str(new_uuid) {
                edge.base.target_node_uuid = uuid;
            }
        }
    }
}

/// Extract edge dates in bulk
pub async fn extract_edge_dates_bulk(
    clients: &GraphitiClients,
    extracted_edges: Vec<EntityEdge>,
    episode_pairs: Vec<(EpisodicNode, Vec<EpisodicNode>)>,
) -> Result<Vec<EntityEdge>, GraphitiError> {
    let mut edges_with_episodes: Vec<EntityEdge> =
        extracted_edges.into_iter().filter(|edge| !edge.episodes.is_empty()).collect();

    let episode_uuid_map: HashMap<String, (EpisodicNode, Vec<EpisodicNode>)> = episode_pairs
        .into_iter()
        .map(|(episode, previous_episodes)| (episode.uuid.to_string(), (episode, previous_episodes)))
        .collect();

    let date_futures: Vec<_> = edges_with_episodes
        .iter()
        .map(|edge| {
            let episode_uuid_map = &episode_uuid_map;
            async move {
                if let Some(episode_uuid) = edge.episodes.first() {
                    if let Some((episode, previous_episodes)) = episode_uuid_map.get(&episode_uuid.to_string()) {
                        return crate::utils::maintenance::edge_operations::extract_edge_dates(
                            clients,
                            edge,
                            episode,
                            previous_episodes,
                        )
                        .await
                        .unwrap_or((None, None));
                    }
                }
                (None, None)
            }
        })
        .collect();

    let results = semaphore_gather(date_futures, None).await;

    for (i, (valid_at, invalid_at)) in results.into_iter().enumerate() {
        let edge = &mut edges_with_episodes[i];
        if let Some(valid_at) = valid_at {
            edge.base.valid_from = valid_at;
        }
        if let Some(invalid_at) = invalid_at {
            edge.invalidate(invalid_at, Utc::now());
        }
    }

    Ok(edges_with_episodes)
}

/// Group edges by node pairs for deduplication
fn chunk_edges_by_nodes(edges: Vec<EntityEdge>) -> Vec<Vec<EntityEdge>> {
    let mut edge_chunk_map: HashMap<String, Vec<EntityEdge>> = HashMap::new();

    for edge in edges {
        if edge.source_node_uuid == edge.target_node_uuid {
            continue;
        }

        let mut pointers = vec![
            edge.source_node_uuid.to_string(),
            edge.target_node_uuid.to_string(),
        ];
        pointers.sort();
        let key = pointers.join("");

        edge_chunk_map.entry(key).or_default().push(edge);
    }

    edge_chunk_map.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node(name: &str) -> EntityNode {
        EntityNode::new(name.to_string(), "group1".to_string(), String::new())
    }

    #[test]
    fn test_node_name_match() {
        let nodes = vec![sample_node("Alice"), sample_node("Bob"), sample_node("Alice")];

        let (unique_nodes, uuid_map) = node_name_match(nodes);

        assert_eq!(unique_nodes.len(), 2);
        assert_eq!(uuid_map.len(), 1);
    }

    /// Property 7: an exact name match across two different group_ids must not
    /// collapse into a single node.
    #[test]
    fn test_node_name_match_keeps_groups_isolated() {
        let mut other_group = sample_node("Alice");
        other_group.group_id = "group2".to_string();
        let nodes = vec![sample_node("Alice"), other_group];

        let (unique_nodes, uuid_map) = node_name_match(nodes);

        assert_eq!(unique_nodes.len(), 2, "same name in different groups must both survive");
        assert!(uuid_map.is_empty());
    }

    #[test]
    fn test_compress_uuid_map_picks_smallest_representative_per_component() {
        let mut uuid_map = HashMap::new();
        uuid_map.insert("a".to_string(), "b".to_string());
        uuid_map.insert("b".to_string(), "c".to_string());
        uuid_map.insert("d".to_string(), "e".to_string());

        let compressed = compress_uuid_map(uuid_map);

        // {a, b, c} and {d, e} are the two connected components; each key resolves
        // to its own component's lexicographically smallest member.
        assert_eq!(compressed.get("a"), Some(&"a".to_string()));
        assert_eq!(compressed.get("b"), Some(&"a".to_string()));
        assert_eq!(compressed.get("d"), Some(&"d".to_string()));
    }

    #[test]
    fn test_compress_uuid_map_idempotent_and_ordered() {
        // a->b->c forms one component plus a direct cycle-shaped edge c->a; the
        // representative must still be the smallest member and re-applying the
        // map to its own output must be a no-op (invariant 1: M[M[x]] == M[x]).
        let mut uuid_map = HashMap::new();
        uuid_map.insert("c".to_string(), "a".to_string());
        uuid_map.insert("b".to_string(), "c".to_string());
        uuid_map.insert("z".to_string(), "b".to_string());

        let compressed = compress_uuid_map(uuid_map);

        for (x, rep) in &compressed {
            assert!(rep <= x, "M[{x}] = {rep} is not <= {x}");
            assert_eq!(compressed.get(rep).cloned().unwrap_or_else(|| rep.clone()), *rep, "M[M[{x}]] != M[{x}]");
        }
        // everything collapses to the lexicographically smallest member "a"
        assert!(compressed.values().all(|v| v == "a"));
    }

    #[test]
    fn test_compress_uuid_map_preferring_keeps_existing_node_as_representative() {
        // "aaaa" (freshly extracted) sorts before "zzzz" (already persisted), but
        // the persisted node must still win so resolve_edge_pointers and the
        // IS_DUPLICATE_OF direction point at a node that actually survives.
        let mut uuid_map = HashMap::new();
        uuid_map.insert("aaaa".to_string(), "zzzz".to_string());

        let preferred: HashSet<String> = ["zzzz".to_string()].into_iter().collect();
        let compressed = compress_uuid_map_preferring(uuid_map, &preferred);

        assert_eq!(compressed.get("aaaa"), Some(&"zzzz".to_string()));
    }

    #[test]
    fn test_chunk_edges_by_nodes() {
        let edges = vec![
            EntityEdge::new(
                "group1".to_string(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "KNOWS".to_string(),
                "fact one".to_string(),
                Utc::now(),
            ),
            EntityEdge::new(
                "group1".to_string(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                "KNOWS".to_string(),
                "fact two".to_string(),
                Utc::now(),
            ),
        ];

        let chunks = chunk_edges_by_nodes(edges);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_validate_batch_flags_inverted_temporal_window() {
        let mut node = sample_node("Alice");
        node.base.valid_to = Some(node.base.valid_from - chrono::Duration::seconds(1));
        let errors = validate_batch(&[], std::slice::from_ref(&node), &[], &[]);
        assert!(errors.iter().any(|e| e.contains("valid_to before valid_from")));
    }

    #[test]
    fn test_validate_batch_flags_dangling_entity_edge() {
        let edge = EntityEdge::new(
            "group1".to_string(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "KNOWS".to_string(),
            "fact".to_string(),
            Utc::now(),
        );
        let errors = validate_batch(&[], &[], &[], std::slice::from_ref(&edge));
        assert!(errors.iter().any(|e| e.contains("outside this batch")));
    }
}
