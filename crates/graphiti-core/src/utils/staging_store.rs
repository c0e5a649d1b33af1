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

//! Deferred staging store: a sled-backed second tier that lets extraction run
//! ahead of resolution. Episodes (and, optionally, their already-extracted
//! nodes/edges) are spilled here and picked up later by `process_deferred`,
//! which drives them through dedup and persistence.

use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::Transactional;
use sled::Tree;
use uuid::Uuid;

use crate::{
    edges::{EntityEdge, EpisodicEdge},
    errors::GraphitiError,
    nodes::{EntityNode, EpisodicNode},
    types::GraphitiClients,
    utils::bulk_utils::{
        add_nodes_and_edges_bulk, dedupe_edges_bulk, dedupe_nodes_bulk, extract_edge_dates_bulk,
        extract_nodes_and_edges_bulk, resolve_edge_pointers,
    },
    utils::maintenance::edge_operations::build_episodic_edges,
    utils::maintenance::graph_data_operations::{retrieve_episodes, EPISODE_WINDOW_LEN},
};

const DEFAULT_BATCH_SIZE: usize = 10;

/// Options controlling a `process_deferred` run.
#[derive(Debug, Clone)]
pub struct DeferredOptions {
    /// Only process these episode uuids, if set.
    pub episode_ids: Option<Vec<Uuid>>,
    /// Only process episodes in this group, if set.
    pub group_id: Option<String>,
    /// Number of episodes driven through dedup/persist together.
    pub batch_size: usize,
    /// How many prior episodes to pull from the graph when enriching context.
    pub lookback_window: usize,
    /// Remove staged rows for an episode once it has been written to the graph.
    pub truncate_after_processing: bool,
}

impl Default for DeferredOptions {
    fn default() -> Self {
        Self {
            episode_ids: None,
            group_id: None,
            batch_size: DEFAULT_BATCH_SIZE,
            lookback_window: EPISODE_WINDOW_LEN,
            truncate_after_processing: true,
        }
    }
}

/// Outcome of a `process_deferred` run.
#[derive(Debug, Clone, Default)]
pub struct DeferredStats {
    pub episodes_processed: usize,
    pub episodes_skipped: usize,
    pub nodes_written: usize,
    pub edges_written: usize,
}

/// A second-tier store for episodes and their (possibly already-extracted)
/// nodes and edges, pending resolution against the graph.
pub struct StagingStore {
    db: sled::Db,
    episodes: Tree,
    entity_nodes: Tree,
    entity_edges: Tree,
    episodic_edges: Tree,
}

// Node/edge rows flatten a `base` struct via `#[serde(flatten)]`, which only
// round-trips through a self-describing format; bincode can't deserialize it.
// serde_json gives the same "just bytes in a sled tree" storage model without
// that limitation.
fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, GraphitiError> {
    serde_json::to_vec(value)
        .map_err(|e| GraphitiError::StagingError(format!("failed to encode staged row: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, GraphitiError> {
    serde_json::from_slice(bytes)
        .map_err(|e| GraphitiError::StagingError(format!("failed to decode staged row: {e}")))
}

fn scan_rows<T: DeserializeOwned>(tree: &Tree, episode_id: Uuid) -> Result<Vec<T>, GraphitiError> {
    let prefix = format!("{episode_id}:");
    let mut rows = Vec::new();
    for item in tree.scan_prefix(prefix.as_bytes()) {
        let (_, value) = item
            .map_err(|e| GraphitiError::StagingError(format!("staging store scan error: {e}")))?;
        rows.push(decode(&value)?);
    }
    Ok(rows)
}

impl StagingStore {
    /// Open (or create) a staging store at `path`.
    pub fn open(path: &str) -> Result<Self, GraphitiError> {
        let db = sled::open(path)
            .map_err(|e| GraphitiError::StagingError(format!("failed to open staging store at {path}: {e}")))?;

        let episodes = db
            .open_tree("episodes")
            .map_err(|e| GraphitiError::StagingError(format!("failed to open episodes tree: {e}")))?;
        let entity_nodes = db
            .open_tree("entity_nodes")
            .map_err(|e| GraphitiError::StagingError(format!("failed to open entity_nodes tree: {e}")))?;
        let entity_edges = db
            .open_tree("entity_edges")
            .map_err(|e| GraphitiError::StagingError(format!("failed to open entity_edges tree: {e}")))?;
        let episodic_edges = db
            .open_tree("episodic_edges")
            .map_err(|e| GraphitiError::StagingError(format!("failed to open episodic_edges tree: {e}")))?;

        Ok(Self {
            db,
            episodes,
            entity_nodes,
            entity_edges,
            episodic_edges,
        })
    }

    /// Spill an episode, keyed on its own uuid. Idempotent.
    pub fn write_episode(&self, episode: &EpisodicNode) -> Result<(), GraphitiError> {
        let key = episode.uuid.to_string();
        self.episodes
            .insert(key.as_bytes(), encode(episode)?)
            .map_err(|e| GraphitiError::StagingError(format!("failed to stage episode {}: {e}", episode.uuid)))?;
        self.db
            .flush()
            .map_err(|e| GraphitiError::StagingError(format!("failed to flush staging store: {e}")))?;
        Ok(())
    }

    /// Spill already-extracted entity nodes for `episode_id`. Idempotent.
    pub fn write_entity_nodes(&self, nodes: &[EntityNode], episode_id: Uuid) -> Result<(), GraphitiError> {
        for node in nodes {
            let key = format!("{episode_id}:{}", node.uuid);
            self.entity_nodes
                .insert(key.as_bytes(), encode(node)?)
                .map_err(|e| GraphitiError::StagingError(format!("failed to stage entity node {}: {e}", node.uuid)))?;
        }
        self.db
            .flush()
            .map_err(|e| GraphitiError::StagingError(format!("failed to flush staging store: {e}")))?;
        Ok(())
    }

    /// Spill already-extracted entity edges for `episode_id`. Idempotent.
    pub fn write_entity_edges(&self, edges: &[EntityEdge], episode_id: Uuid) -> Result<(), GraphitiError> {
        for edge in edges {
            let key = format!("{episode_id}:{}", edge.uuid);
            self.entity_edges
                .insert(key.as_bytes(), encode(edge)?)
                .map_err(|e| GraphitiError::StagingError(format!("failed to stage entity edge {}: {e}", edge.uuid)))?;
        }
        self.db
            .flush()
            .map_err(|e| GraphitiError::StagingError(format!("failed to flush staging store: {e}")))?;
        Ok(())
    }

    /// Spill episodic (MENTIONS) edges for `episode_id`. Idempotent.
    pub fn write_episodic_edges(&self, edges: &[EpisodicEdge], episode_id: Uuid) -> Result<(), GraphitiError> {
        for edge in edges {
            let key = format!("{episode_id}:{}", edge.uuid);
            self.episodic_edges
                .insert(key.as_bytes(), encode(edge)?)
                .map_err(|e| GraphitiError::StagingError(format!("failed to stage episodic edge {}: {e}", edge.uuid)))?;
        }
        self.db
            .flush()
            .map_err(|e| GraphitiError::StagingError(format!("failed to flush staging store: {e}")))?;
        Ok(())
    }

    fn staged_episodes(&self, options: &DeferredOptions) -> Result<Vec<EpisodicNode>, GraphitiError> {
        let mut episodes = Vec::new();
        for item in self.episodes.iter() {
            let (_, value) = item
                .map_err(|e| GraphitiError::StagingError(format!("staging store scan error: {e}")))?;
            let episode: EpisodicNode = decode(&value)?;

            if let Some(ids) = &options.episode_ids {
                if !ids.contains(&episode.uuid) {
                    continue;
                }
            }
            if let Some(group_id) = &options.group_id {
                if &episode.group_id != group_id {
                    continue;
                }
            }
            episodes.push(episode);
        }
        Ok(episodes)
    }

    fn truncate_episode(&self, episode_id: Uuid) -> Result<(), GraphitiError> {
        let entity_node_keys: Vec<sled::IVec> = self
            .entity_nodes
            .scan_prefix(format!("{episode_id}:").as_bytes())
            .keys()
            .filter_map(|k| k.ok())
            .collect();
        let entity_edge_keys: Vec<sled::IVec> = self
            .entity_edges
            .scan_prefix(format!("{episode_id}:").as_bytes())
            .keys()
            .filter_map(|k| k.ok())
            .collect();
        let episodic_edge_keys: Vec<sled::IVec> = self
            .episodic_edges
            .scan_prefix(format!("{episode_id}:").as_bytes())
            .keys()
            .filter_map(|k| k.ok())
            .collect();
        let episode_key = episode_id.to_string();

        (&self.episodes, &self.entity_nodes, &self.entity_edges, &self.episodic_edges)
            .transaction(|(episodes, entity_nodes, entity_edges, episodic_edges)| {
                episodes.remove(episode_key.as_bytes())?;
                for key in &entity_node_keys {
                    entity_nodes.remove(key)?;
                }
                for key in &entity_edge_keys {
                    entity_edges.remove(key)?;
                }
                for key in &episodic_edge_keys {
                    episodic_edges.remove(key)?;
                }
                Ok::<(), sled::transaction::ConflictableTransactionError<()>>(())
            })
            .map_err(|e: sled::transaction::TransactionError<()>| {
                GraphitiError::StagingError(format!("failed to truncate staged rows for episode {episode_id}: {e}"))
            })?;

        self.db
            .flush()
            .map_err(|e| GraphitiError::StagingError(format!("failed to flush staging store: {e}")))?;
        Ok(())
    }

    /// Drive staged episodes through dedup and persistence (C6 -> C9).
    ///
    /// Episodes with staged entity nodes/edges already attached skip re-extraction
    /// and go straight to dedup; episodes staged bare are extracted from their
    /// content first. `previous_episodes` context is always pulled fresh from the
    /// graph within `options.lookback_window`, so out-of-order staging doesn't
    /// strand an episode without context.
    pub async fn process_deferred(
        &self,
        clients: &GraphitiClients,
        options: DeferredOptions,
    ) -> Result<DeferredStats, GraphitiError> {
        let mut stats = DeferredStats::default();
        let episodes = self.staged_episodes(&options)?;

        for batch in episodes.chunks(options.batch_size.max(1)) {
            let mut episode_tuples = Vec::with_capacity(batch.len());
            for episode in batch {
                let previous = retrieve_episodes(
                    clients,
                    episode.reference_time,
                    options.lookback_window,
                    &[episode.group_id.clone()],
                )
                .await
                .unwrap_or_default();
                episode_tuples.push((episode.clone(), previous));
            }

            let mut nodes = Vec::new();
            let mut edges = Vec::new();
            let mut episodic_edges = Vec::new();

            for (episode, previous) in &episode_tuples {
                let staged_nodes: Vec<EntityNode> = scan_rows(&self.entity_nodes, episode.uuid)?;
                let staged_edges: Vec<EntityEdge> = scan_rows(&self.entity_edges, episode.uuid)?;

                if staged_nodes.is_empty() && staged_edges.is_empty() {
                    let (ep_nodes, ep_edges, ep_episodic_edges) = extract_nodes_and_edges_bulk(
                        clients,
                        vec![(episode.clone(), previous.clone())],
                    )
                    .await?;
                    nodes.extend(ep_nodes);
                    edges.extend(ep_edges);
                    episodic_edges.extend(ep_episodic_edges);
                } else {
                    let staged_episodic: Vec<EpisodicEdge> = scan_rows(&self.episodic_edges, episode.uuid)?;
                    let ep_episodic_edges = if staged_episodic.is_empty() {
                        build_episodic_edges(&staged_nodes, episode, episode.created_at)
                    } else {
                        staged_episodic
                    };
                    nodes.extend(staged_nodes);
                    edges.extend(staged_edges);
                    episodic_edges.extend(ep_episodic_edges);
                }
            }

            if nodes.is_empty() && edges.is_empty() {
                stats.episodes_skipped += batch.len();
                continue;
            }

            let (deduped_nodes, uuid_map, duplicate_edges) = dedupe_nodes_bulk(clients, nodes).await?;
            resolve_edge_pointers(&mut edges, &uuid_map);
            let edges = extract_edge_dates_bulk(clients, edges, episode_tuples.clone()).await?;
            let (edges, invalidated_edges) = dedupe_edges_bulk(clients, edges).await?;

            let episodic_nodes: Vec<EpisodicNode> =
                episode_tuples.iter().map(|(episode, _)| episode.clone()).collect();

            let outcome = add_nodes_and_edges_bulk(
                clients,
                episodic_nodes,
                episodic_edges,
                deduped_nodes.clone(),
                edges.clone(),
                duplicate_edges,
                invalidated_edges,
                true,
            )
            .await?;
            for error in &outcome.errors {
                tracing::warn!("deferred batch item failed: {error}");
            }

            stats.episodes_processed += batch.len();
            stats.nodes_written += deduped_nodes.len();
            stats.edges_written += edges.len();

            if options.truncate_after_processing {
                for (episode, _) in &episode_tuples {
                    self.truncate_episode(episode.uuid)?;
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_episode(group_id: &str) -> EpisodicNode {
        EpisodicNode::new(
            "ep".to_string(),
            group_id.to_string(),
            crate::nodes::EpisodeType::Message,
            "test".to_string(),
            "some content".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn test_write_and_filter_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::open(dir.path().to_str().unwrap()).unwrap();

        let ep_a = sample_episode("group-a");
        let ep_b = sample_episode("group-b");
        store.write_episode(&ep_a).unwrap();
        store.write_episode(&ep_b).unwrap();

        let only_a = store
            .staged_episodes(&DeferredOptions {
                group_id: Some("group-a".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].uuid, ep_a.uuid);
    }

    #[test]
    fn test_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::open(dir.path().to_str().unwrap()).unwrap();

        let ep = sample_episode("group-a");
        store.write_episode(&ep).unwrap();
        store.write_episode(&ep).unwrap();

        let all = store.staged_episodes(&DeferredOptions::default()).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_entity_rows_scoped_by_episode() {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::open(dir.path().to_str().unwrap()).unwrap();

        let node = EntityNode::new("Alice".to_string(), "group-a".to_string(), "summary".to_string())
            .with_entity_type("Person".to_string());
        let episode_id = Uuid::new_v4();
        let other_id = Uuid::new_v4();
        store.write_entity_nodes(&[node], episode_id).unwrap();

        let scoped: Vec<EntityNode> = scan_rows(&store.entity_nodes, episode_id).unwrap();
        assert_eq!(scoped.len(), 1);

        let unscoped: Vec<EntityNode> = scan_rows(&store.entity_nodes, other_id).unwrap();
        assert!(unscoped.is_empty());
    }
}
