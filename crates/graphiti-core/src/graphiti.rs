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

//! Main Graphiti orchestrator, wiring ingestion, dedup, and search together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    cache::{Cache, CacheConfig},
    cross_encoder::{CrossEncoderClient, OpenAIRerankerClient},
    database::{create_database, DatabaseConfig, GraphDatabase},
    edges::EntityEdge,
    embedder::{EmbedderClient, OpenAiEmbedder},
    errors::GraphitiError,
    llm_client::{openai_client::OpenAiClient, LlmClient},
    nodes::{EntityNode, EpisodeType, EpisodicNode},
    search::{GraphitiSearch, SearchConfig, SearchFilters, SearchResults},
    types::GraphitiClients,
    utils::{
        bulk_utils::{
            add_nodes_and_edges_bulk, dedupe_edges_bulk, dedupe_nodes_bulk,
            extract_edge_dates_bulk, extract_nodes_and_edges_bulk_with_options,
            retrieve_previous_episodes_bulk, resolve_edge_pointers, RawEpisode,
        },
        datetime_utils::utc_now,
        maintenance::{graph_data_operations::EPISODE_WINDOW_LEN, node_operations::ExtractionOptions},
        staging_store::{DeferredOptions, DeferredStats, StagingStore},
    },
};

/// Options governing an ingest call (§6 Ingest API): which entity types to
/// recognize or drop, whether to compute embeddings eagerly, how much prior
/// context to pull in, and whether to stop after extraction and spill to the
/// deferred staging store (C10) instead of persisting immediately.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub entity_types: Vec<String>,
    pub excluded_entity_types: Vec<String>,
    pub generate_embeddings: bool,
    pub defer: bool,
    pub lookback_window: usize,
    pub max_reflexion_iterations: usize,
    pub batch_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            entity_types: Vec::new(),
            excluded_entity_types: Vec::new(),
            generate_embeddings: true,
            defer: false,
            lookback_window: EPISODE_WINDOW_LEN,
            max_reflexion_iterations: crate::helpers::max_reflexion_iterations(),
            batch_size: 10,
        }
    }
}

impl IngestOptions {
    fn extraction_options(&self) -> ExtractionOptions {
        ExtractionOptions {
            entity_types: self.entity_types.clone(),
            excluded_entity_types: self.excluded_entity_types.clone(),
            max_reflexion_iterations: self.max_reflexion_iterations,
        }
    }
}

/// Outcome of an ingest call. Per §7's error policy, a single malformed episode
/// doesn't poison the batch: failures are collected in `errors` rather than
/// aborting, and the batch's writes that did succeed are not rolled back. A
/// caller that wants "all or nothing" semantics should treat a non-empty
/// `errors` as failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub episodes_processed: usize,
    pub entities_ingested: usize,
    pub edges_ingested: usize,
    pub duplicates_found: usize,
    pub edges_invalidated: usize,
    pub errors: Vec<String>,
}

/// Results from adding a single episode, including the per-episode detail
/// behind an `IngestStats` summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddEpisodeResults {
    pub episode: EpisodicNode,
    pub nodes: Vec<EntityNode>,
    pub edges: Vec<EntityEdge>,
}

/// Configuration for Graphiti
#[derive(Debug, Clone)]
pub struct GraphitiConfig {
    pub database_config: DatabaseConfig,
    pub store_raw_episode_content: bool,
    pub cache_config: Option<CacheConfig>,
    /// Filesystem path for the deferred staging store (C10). Required only when
    /// an ingest call is made with `opts.defer = true`.
    pub staging_path: Option<String>,
}

impl Default for GraphitiConfig {
    fn default() -> Self {
        Self {
            database_config: DatabaseConfig::default(),
            store_raw_episode_content: true,
            cache_config: Some(CacheConfig::default()),
            staging_path: None,
        }
    }
}

/// Main Graphiti orchestrator for temporal graph operations
pub struct Graphiti {
    clients: GraphitiClients,
    database: Arc<dyn GraphDatabase + Send + Sync>,
    store_raw_episode_content: bool,
    staging_path: Option<String>,
}

impl Graphiti {
    /// Initialize a new Graphiti instance
    pub async fn new(config: GraphitiConfig) -> Result<Self, GraphitiError> {
        // Initialize database using the abstraction layer
        let database = create_database(config.database_config).await?;

        // Initialize cache if configured
        let cache: Option<Arc<dyn Cache + Send + Sync>> =
            if let Some(cache_config) = config.cache_config {
                Some(Arc::new(crate::cache::memory_cache::MemoryCache::new(
                    cache_config,
                )))
            } else {
                None
            };

        // Initialize default clients
        let llm_client: Arc<dyn LlmClient> =
            Arc::new(OpenAiClient::new(Default::default(), false)?);
        let embedder: Arc<dyn EmbedderClient> = Arc::new(OpenAiEmbedder::new(Default::default())?);
        let cross_encoder: Arc<dyn CrossEncoderClient> =
            Arc::new(OpenAIRerankerClient::new(Default::default())?);

        // Wrap with cache if available
        let cached_llm_client = if let Some(cache) = &cache {
            crate::llm_client::CachedLlmClient::new(llm_client, cache.clone())
        } else {
            crate::llm_client::CachedLlmClient::new(
                llm_client,
                Arc::new(crate::cache::memory_cache::MemoryCache::new(
                    CacheConfig::default(),
                )),
            )
        };

        let cached_embedder = if let Some(cache) = &cache {
            crate::embedder::CachedEmbedderClient::new(embedder, cache.clone())
        } else {
            crate::embedder::CachedEmbedderClient::new(
                embedder,
                Arc::new(crate::cache::memory_cache::MemoryCache::new(
                    CacheConfig::default(),
                )),
            )
        };

        let database_arc: Arc<dyn GraphDatabase + Send + Sync> = Arc::from(database);

        let clients = GraphitiClients {
            driver: database_arc.clone(),
            llm_client: Arc::new(cached_llm_client),
            embedder: Arc::new(cached_embedder),
            cross_encoder,
            cache: cache.unwrap_or_else(|| {
                Arc::new(crate::cache::memory_cache::MemoryCache::new(
                    CacheConfig::default(),
                ))
            }),
        };

        Ok(Self {
            clients,
            database: database_arc,
            store_raw_episode_content: config.store_raw_episode_content,
            staging_path: config.staging_path,
        })
    }

    /// Initialize with custom clients
    pub async fn with_clients(
        config: GraphitiConfig,
        llm_client: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbedderClient>,
        cross_encoder: Arc<dyn CrossEncoderClient>,
    ) -> Result<Self, GraphitiError> {
        // Initialize database using the abstraction layer
        let database = create_database(config.database_config).await?;

        // Initialize cache if configured
        let cache: Option<Arc<dyn Cache + Send + Sync>> =
            if let Some(cache_config) = config.cache_config {
                Some(Arc::new(crate::cache::memory_cache::MemoryCache::new(
                    cache_config,
                )))
            } else {
                None
            };

        let database_arc = database;

        let clients = GraphitiClients {
            driver: database_arc.clone(),
            llm_client,
            embedder,
            cross_encoder,
            cache: cache.unwrap_or_else(|| {
                Arc::new(crate::cache::memory_cache::MemoryCache::new(
                    CacheConfig::default(),
                ))
            }),
        };

        Ok(Self {
            clients,
            database: database_arc,
            store_raw_episode_content: config.store_raw_episode_content,
            staging_path: config.staging_path,
        })
    }

    /// Close the database connections
    pub async fn close(&self) -> Result<(), GraphitiError> {
        self.database.close().await?;
        Ok(())
    }

    /// Build database indices and constraints
    pub async fn build_indices_and_constraints(
        &self,
        delete_existing: bool,
    ) -> Result<(), GraphitiError> {
        if delete_existing {
            self.database.clear_database().await?;
        }
        self.database.build_indices_and_constraints().await?;
        Ok(())
    }

    fn staging_store(&self) -> Result<StagingStore, GraphitiError> {
        let path = self.staging_path.as_deref().ok_or_else(|| GraphitiError::InvalidInput(
            "opts.defer requires GraphitiConfig.staging_path to be set".to_string(),
        ))?;
        StagingStore::open(path)
    }

    /// Add a single episode to the graph (§6 Ingest API, single-episode form).
    pub async fn add_episode(
        &self,
        name: String,
        content: String,
        source: EpisodeType,
        source_description: String,
        group_id: String,
        reference_time: Option<DateTime<Utc>>,
        opts: Option<IngestOptions>,
    ) -> Result<AddEpisodeResults, GraphitiError> {
        let opts = opts.unwrap_or_default();
        let reference_time = reference_time.unwrap_or_else(utc_now);

        let episode = EpisodicNode::new(
            name,
            group_id.clone(),
            source,
            source_description,
            if self.store_raw_episode_content { content } else { String::new() },
            reference_time,
        );

        let previous_episodes = crate::utils::maintenance::graph_data_operations::retrieve_episodes(
            &self.clients,
            reference_time,
            opts.lookback_window,
            &[group_id],
        )
        .await?;

        let (mut nodes, mut edges, episodic_edges) = extract_nodes_and_edges_bulk_with_options(
            &self.clients,
            vec![(episode.clone(), previous_episodes.clone())],
            &opts.extraction_options(),
        )
        .await?;

        if opts.defer {
            let staging = self.staging_store()?;
            staging.write_episode(&episode)?;
            staging.write_entity_nodes(&nodes, episode.uuid)?;
            staging.write_entity_edges(&edges, episode.uuid)?;
            staging.write_episodic_edges(&episodic_edges, episode.uuid)?;
            return Ok(AddEpisodeResults { episode, nodes, edges });
        }

        let (deduped_nodes, uuid_map, duplicate_edges) = dedupe_nodes_bulk(&self.clients, nodes).await?;
        nodes = deduped_nodes;

        resolve_edge_pointers(&mut edges, &uuid_map);

        edges = extract_edge_dates_bulk(
            &self.clients,
            edges,
            vec![(episode.clone(), previous_episodes)],
        )
        .await?;

        let (resolved_edges, invalidated_edges) = dedupe_edges_bulk(&self.clients, edges).await?;
        edges = resolved_edges;

        let outcome = add_nodes_and_edges_bulk(
            &self.clients,
            vec![episode.clone()],
            episodic_edges,
            nodes.clone(),
            edges.clone(),
            duplicate_edges,
            invalidated_edges,
            opts.generate_embeddings,
        )
        .await?;

        if !outcome.errors.is_empty() {
            tracing::warn!("add_episode completed with {} item error(s)", outcome.errors.len());
        }

        // Best-effort: fold each node into an existing community if its
        // neighbors have a modal one. Communities are a derived view, so a
        // lookup failure here shouldn't fail episode ingestion.
        for node in &nodes {
            let _ = crate::utils::maintenance::community_operations::update_community(
                &self.clients,
                node,
                &node.group_id,
            )
            .await;
        }

        Ok(AddEpisodeResults {
            episode,
            nodes,
            edges,
        })
    }

    /// Add multiple episodes in bulk (§6 `add_episodes`), skipping the per-episode
    /// dedupe-against-store round trip and reconciling nodes/edges once across the
    /// whole batch. Returns the aggregate stats the Ingest API contract specifies;
    /// per §7, the call only represents full success when `errors` is empty.
    pub async fn add_episodes_bulk(
        &self,
        group_id: String,
        raw_episodes: Vec<RawEpisode>,
        opts: Option<IngestOptions>,
    ) -> Result<IngestStats, GraphitiError> {
        let opts = opts.unwrap_or_default();
        let mut stats = IngestStats::default();

        let episodes: Vec<EpisodicNode> = raw_episodes
            .into_iter()
            .map(|raw| {
                EpisodicNode::new(
                    raw.name,
                    group_id.clone(),
                    raw.source,
                    raw.source_description,
                    if self.store_raw_episode_content { raw.content } else { String::new() },
                    raw.reference_time,
                )
            })
            .collect();

        for batch in episodes.chunks(opts.batch_size.max(1)) {
            let episode_tuples =
                retrieve_previous_episodes_bulk(&self.clients, batch, opts.lookback_window).await?;

            let (mut nodes, mut edges, episodic_edges) = extract_nodes_and_edges_bulk_with_options(
                &self.clients,
                episode_tuples.clone(),
                &opts.extraction_options(),
            )
            .await?;

            if opts.defer {
                let staging = self.staging_store()?;
                for (episode, _) in &episode_tuples {
                    staging.write_episode(episode)?;
                    staging.write_entity_nodes(&nodes, episode.uuid)?;
                    staging.write_entity_edges(&edges, episode.uuid)?;
                    staging.write_episodic_edges(&episodic_edges, episode.uuid)?;
                }
                stats.episodes_processed += batch.len();
                continue;
            }

            let (deduped_nodes, uuid_map, duplicate_edges) = dedupe_nodes_bulk(&self.clients, nodes).await?;
            nodes = deduped_nodes;

            resolve_edge_pointers(&mut edges, &uuid_map);

            edges = extract_edge_dates_bulk(&self.clients, edges, episode_tuples.clone()).await?;

            let (resolved_edges, invalidated_edges) = dedupe_edges_bulk(&self.clients, edges).await?;
            edges = resolved_edges;

            let episodic_nodes: Vec<EpisodicNode> =
                episode_tuples.iter().map(|(episode, _)| episode.clone()).collect();

            let outcome = add_nodes_and_edges_bulk(
                &self.clients,
                episodic_nodes,
                episodic_edges,
                nodes.clone(),
                edges.clone(),
                duplicate_edges.clone(),
                invalidated_edges.clone(),
                opts.generate_embeddings,
            )
            .await?;

            stats.episodes_processed += batch.len();
            stats.entities_ingested += nodes.len();
            stats.edges_ingested += edges.len();
            stats.duplicates_found += duplicate_edges.len();
            stats.edges_invalidated += invalidated_edges.len();
            stats.errors.extend(outcome.errors);
        }

        Ok(stats)
    }

    /// Drive episodes previously spilled to the deferred staging store at `path`
    /// through dedup and persistence (§6 Deferred-process API).
    pub async fn process_deferred(
        &self,
        path: &str,
        opts: Option<IngestOptions>,
        episode_ids: Option<Vec<uuid::Uuid>>,
        delete_after_processing: bool,
    ) -> Result<DeferredStats, GraphitiError> {
        let opts = opts.unwrap_or_default();
        let staging = StagingStore::open(path)?;
        staging
            .process_deferred(
                &self.clients,
                DeferredOptions {
                    episode_ids,
                    group_id: None,
                    batch_size: opts.batch_size,
                    lookback_window: opts.lookback_window,
                    truncate_after_processing: delete_after_processing,
                },
            )
            .await
    }

    /// Rebuild communities for `group_id` via label propagation, materializing
    /// the result as community nodes and `HAS_MEMBER` edges (C11).
    pub async fn build_communities(&self, group_id: &str) -> Result<(), GraphitiError> {
        use crate::utils::maintenance::community_operations::{detect_communities, update_community_assignments, CommunityAlgorithm};

        let communities =
            detect_communities(self.database.as_ref(), group_id, CommunityAlgorithm::LabelPropagation).await?;
        update_community_assignments(&self.clients, &communities, group_id).await
    }

    /// Search the graph
    pub async fn search(
        &self,
        query: &str,
        config: Option<SearchConfig>,
        filters: Option<SearchFilters>,
    ) -> Result<SearchResults, GraphitiError> {
        let search = GraphitiSearch::new(self.clients.clone());
        let default_config = SearchConfig::default();
        let default_filters = SearchFilters::default();
        search
            .search(
                query,
                config.as_ref().unwrap_or(&default_config),
                filters.as_ref().unwrap_or(&default_filters),
                None,
            )
            .await
    }

    /// Get access to the clients for advanced operations
    pub fn clients(&self) -> &GraphitiClients {
        &self.clients
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graphiti_config_default() {
        let config = GraphitiConfig::default();
        assert_eq!(config.database_config.uri, "bolt://localhost:7687");
        assert_eq!(config.database_config.username, Some("neo4j".to_string()));
        assert_eq!(
            config.database_config.password,
            Some("password".to_string())
        );
        assert!(config.store_raw_episode_content);
    }

    #[tokio::test]
    #[ignore] // Requires database connection
    async fn test_graphiti_initialization() {
        // This test requires a Neo4j database to be running
        // and proper credentials to be configured
    }
}
