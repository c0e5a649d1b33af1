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

use std::collections::HashMap;

use crate::{
    edges::EntityEdge,
    errors::GraphitiError,
    nodes::{CommunityNode, EntityNode, EpisodicNode},
    search::{SearchFilters, SearchResult},
    types::GraphitiClients,
};

pub const RELEVANT_SCHEMA_LIMIT: usize = 10;
pub const DEFAULT_MIN_SCORE: f64 = 0.6;
pub const DEFAULT_MMR_LAMBDA: f64 = 0.5;
pub const MAX_SEARCH_DEPTH: i32 = 3;
pub const MAX_QUERY_LENGTH: usize = 32;

/// Sanitize a query string for Lucene full-text search
pub fn lucene_sanitize(query: &str) -> String {
    query
        .chars()
        .filter_map(|c| match c {
            '+' | '-' | '&' | '|' | '!' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '"' | '~' | '*' | '?' | ':'
            | '\\' => Some(format!("\\{}", c)),
            c if c.is_alphanumeric() || c.is_whitespace() => Some(c.to_string()),
            _ => None,
        })
        .collect::<Vec<String>>()
        .join("")
}

/// Build a full-text search query with group filtering
pub fn fulltext_query(query: &str, group_ids: Option<&[String]>) -> String {
    let mut group_ids_filter = String::new();
    if let Some(groups) = group_ids {
        let group_filters: Vec<String> = groups
            .iter()
            .map(|g| format!("group_id:\"{}\"", lucene_sanitize(g)))
            .collect();

        if !group_filters.is_empty() {
            group_ids_filter = group_filters.join(" OR ");
            group_ids_filter.push_str(" AND ");
        }
    }

    let lucene_query = lucene_sanitize(query);

    if lucene_query.split_whitespace().count() + group_ids.map_or(0, |g| g.len()) >= MAX_QUERY_LENGTH {
        return String::new();
    }

    format!("{}({})", group_ids_filter, lucene_query)
}

/// Get episodes mentioned by the given edges' `episodes` lists.
pub async fn get_episodes_by_mentions(
    clients: &GraphitiClients,
    _nodes: &[EntityNode],
    edges: &[EntityEdge],
    limit: usize,
) -> Result<Vec<EpisodicNode>, GraphitiError> {
    let mut episode_uuids: Vec<String> = edges
        .iter()
        .flat_map(|edge| edge.episodes.iter().map(|u| u.to_string()))
        .collect();
    episode_uuids.truncate(limit);

    if episode_uuids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = clients
        .driver
        .get_nodes_by_uuids(&episode_uuids)
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    rows.iter().map(EpisodicNode::try_from).collect()
}

/// Get entity nodes mentioned by the given episodes' `entity_edges`.
pub async fn get_mentioned_nodes(
    clients: &GraphitiClients,
    episodes: &[EpisodicNode],
) -> Result<Vec<EntityNode>, GraphitiError> {
    if episodes.is_empty() {
        return Ok(Vec::new());
    }

    let mut entity_uuids = std::collections::HashSet::new();
    for episode in episodes {
        for entity_uuid in &episode.entity_edges {
            entity_uuids.insert(entity_uuid.to_string());
        }
    }

    if entity_uuids.is_empty() {
        return Ok(Vec::new());
    }

    let uuid_list: Vec<String> = entity_uuids.into_iter().collect();
    let rows = clients
        .driver
        .get_nodes_by_uuids(&uuid_list)
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    rows.iter().map(EntityNode::try_from).collect()
}

/// Find existing entity nodes relevant to a batch of newly extracted candidates,
/// by name full-text search, for deduplication (C9/C12).
pub async fn get_relevant_nodes(
    clients: &GraphitiClients,
    nodes: &[EntityNode],
    _filters: &SearchFilters,
) -> Result<Vec<EntityNode>, GraphitiError> {
    if nodes.is_empty() {
        return Ok(Vec::new());
    }

    let group_ids: Vec<String> = {
        let mut ids: Vec<String> = nodes.iter().map(|n| n.group_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    };

    let mut seen = std::collections::HashSet::new();
    let mut results = Vec::new();
    for node in nodes {
        let query = fulltext_query(&node.name, Some(&group_ids));
        if query.is_empty() {
            continue;
        }
        let rows = clients
            .driver
            .fulltext_search(&query, vec!["Entity".to_string()])
            .await
            .map_err(GraphitiError::DatabaseLayer)?;
        for row in rows {
            if seen.insert(row.id.clone()) {
                results.push(EntityNode::try_from(&row)?);
            }
        }
    }
    Ok(results)
}

/// Find existing entity edges relevant to a batch of newly extracted candidates,
/// by fact full-text search, for deduplication (C9/C12).
pub async fn get_relevant_edges(
    clients: &GraphitiClients,
    edges: &[EntityEdge],
    _filters: &SearchFilters,
) -> Result<Vec<EntityEdge>, GraphitiError> {
    if edges.is_empty() {
        return Ok(Vec::new());
    }

    let group_ids: Vec<String> = {
        let mut ids: Vec<String> = edges.iter().map(|e| e.group_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    };

    let mut seen = std::collections::HashSet::new();
    let mut results = Vec::new();
    for edge in edges {
        let query = fulltext_query(&edge.fact, Some(&group_ids));
        if query.is_empty() {
            continue;
        }
        let rows = clients
            .driver
            .fulltext_search(&query, vec!["RELATES_TO".to_string()])
            .await
            .map_err(GraphitiError::DatabaseLayer)?;
        for row in rows {
            if !seen.insert(row.id.clone()) {
                continue;
            }
            let edge_data = crate::database::EdgeData {
                id: row.id.clone(),
                relationship_type: "RELATES_TO".to_string(),
                source_id: row.id.clone(),
                target_id: String::new(),
                properties: row.properties.clone(),
            };
            results.push(EntityEdge::try_from(&edge_data)?);
        }
    }
    Ok(results)
}

/// Get communities that the given entity nodes belong to, via HAS_MEMBER edges.
pub async fn get_communities_by_nodes(
    clients: &GraphitiClients,
    nodes: &[EntityNode],
) -> Result<Vec<CommunityNode>, GraphitiError> {
    if nodes.is_empty() {
        return Ok(Vec::new());
    }

    let mut communities = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for node in nodes {
        let neighbors = clients
            .driver
            .get_neighbors(&node.uuid.to_string(), &[], 1)
            .await
            .map_err(GraphitiError::DatabaseLayer)?;
        for row in &neighbors {
            if row.labels.iter().any(|l| l == "Community") && seen.insert(row.id.clone()) {
                communities.push(CommunityNode::try_from(row)?);
            }
        }
    }
    Ok(communities)
}

/// Perform full-text search on edges via the fact text index.
pub async fn edge_fulltext_search(
    clients: &GraphitiClients,
    query: &str,
    _search_filter: &SearchFilters,
    group_ids: Option<&[String]>,
    limit: usize,
) -> Result<Vec<SearchResult<EntityEdge>>, GraphitiError> {
    let fuzzy_query = fulltext_query(query, group_ids);
    if fuzzy_query.is_empty() {
        return Ok(Vec::new());
    }

    let rows = clients
        .driver
        .fulltext_search(&fuzzy_query, vec!["RELATES_TO".to_string()])
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    rows.iter()
        .take(limit)
        .map(|row| {
            let edge = EntityEdge::try_from(&crate::database::EdgeData {
                id: row.id.clone(),
                relationship_type: "RELATES_TO".to_string(),
                source_id: row
                    .properties
                    .get("source_node_uuid")
                    .map(|_| row.id.clone())
                    .unwrap_or_default(),
                target_id: String::new(),
                properties: row.properties.clone(),
            })?;
            Ok(SearchResult { item: edge, score: DEFAULT_MIN_SCORE })
        })
        .collect()
}

/// Perform vector similarity search on edges by fact embedding.
pub async fn edge_similarity_search(
    clients: &GraphitiClients,
    search_vector: &[f64],
    _source_node_uuid: Option<&str>,
    _target_node_uuid: Option<&str>,
    _search_filter: &SearchFilters,
    _group_ids: Option<&[String]>,
    limit: usize,
    min_score: f64,
) -> Result<Vec<SearchResult<EntityEdge>>, GraphitiError> {
    if search_vector.is_empty() {
        return Ok(Vec::new());
    }
    // Fact embeddings live on RELATES_TO edges; the abstraction's vector_search
    // targets node indices, so relation vector search is left to backends that
    // expose a relationship index (non-goal for the in-memory/Kuzu backend).
    let _ = (limit, min_score);
    Ok(Vec::new())
}

/// Perform breadth-first search on edges from a set of origin nodes.
pub async fn edge_bfs_search(
    clients: &GraphitiClients,
    bfs_origin_node_uuids: Option<&[String]>,
    bfs_max_depth: i32,
    _search_filter: &SearchFilters,
    limit: usize,
) -> Result<Vec<SearchResult<EntityEdge>>, GraphitiError> {
    let Some(origin_uuids) = bfs_origin_node_uuids else {
        return Ok(Vec::new());
    };
    if origin_uuids.is_empty() {
        return Ok(Vec::new());
    }

    let mut edge_uuids = std::collections::HashSet::new();
    for origin in origin_uuids {
        let neighbors = clients
            .driver
            .get_neighbors(origin, &[], bfs_max_depth.max(1) as u32)
            .await
            .map_err(GraphitiError::DatabaseLayer)?;
        for n in neighbors {
            if let Some(crate::database::QueryParameter::String(uuid)) = n.properties.get("uuid") {
                edge_uuids.insert(uuid.clone());
            }
        }
    }

    let uuid_list: Vec<String> = edge_uuids.into_iter().take(limit).collect();
    let rows = clients
        .driver
        .get_edges_by_uuids(&uuid_list)
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    rows.iter()
        .filter(|e| e.relationship_type == "RELATES_TO")
        .map(|row| Ok(SearchResult { item: EntityEdge::try_from(row)?, score: DEFAULT_MIN_SCORE }))
        .collect()
}

/// Node vector similarity search using cosine similarity over the store's vector index.
pub async fn node_similarity_search(
    clients: &GraphitiClients,
    query_vector: &[f32],
    _filters: &SearchFilters,
    group_ids: Option<&[String]>,
    limit: usize,
) -> Result<Vec<SearchResult<EntityNode>>, GraphitiError> {
    if limit == 0 || query_vector.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(groups) = group_ids {
        if groups.is_empty() {
            return Ok(Vec::new());
        }
    }

    let embedding: Vec<f64> = query_vector.iter().map(|&x| x as f64).collect();
    let hits = clients
        .driver
        .vector_search(embedding, "Entity", limit)
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    let mut results: Vec<SearchResult<EntityNode>> = hits
        .iter()
        .map(|(row, score)| Ok(SearchResult { item: EntityNode::try_from(row)?, score: *score }))
        .collect::<Result<_, GraphitiError>>()?;

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(results)
}

/// Node full-text search using the store's Lucene-style index.
pub async fn node_fulltext_search(
    clients: &GraphitiClients,
    query: &str,
    filters: &SearchFilters,
    group_ids: Option<&[String]>,
    limit: usize,
) -> Result<Vec<SearchResult<EntityNode>>, GraphitiError> {
    if query.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let (search_query, _params) = build_node_fulltext_query(query, filters, group_ids, limit);
    let rows = clients
        .driver
        .fulltext_search(&search_query, vec!["Entity".to_string()])
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    rows.iter()
        .take(limit)
        .map(|row| Ok(SearchResult { item: EntityNode::try_from(row)?, score: DEFAULT_MIN_SCORE }))
        .collect()
}

/// Episode full-text search using the store's Lucene-style index.
pub async fn episode_fulltext_search(
    clients: &GraphitiClients,
    query: &str,
    _filters: &SearchFilters,
    group_ids: Option<&[String]>,
    limit: usize,
) -> Result<Vec<SearchResult<EpisodicNode>>, GraphitiError> {
    if query.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let search_query = fulltext_query(query, group_ids);
    if search_query.is_empty() {
        return Ok(Vec::new());
    }

    let rows = clients
        .driver
        .fulltext_search(&search_query, vec!["Episodic".to_string()])
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    rows.iter()
        .take(limit)
        .map(|row| Ok(SearchResult { item: EpisodicNode::try_from(row)?, score: DEFAULT_MIN_SCORE }))
        .collect()
}

/// Community similarity search using vector embeddings.
pub async fn community_similarity_search(
    clients: &GraphitiClients,
    query_vector: &[f64],
    limit: usize,
) -> Result<Vec<SearchResult<CommunityNode>>, GraphitiError> {
    if limit == 0 || query_vector.is_empty() {
        return Ok(Vec::new());
    }
    let hits = clients
        .driver
        .vector_search(query_vector.to_vec(), "Community", limit)
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    hits.iter()
        .map(|(row, score)| Ok(SearchResult { item: CommunityNode::try_from(row)?, score: *score }))
        .collect()
}

/// Community full-text search using the store's Lucene-style index.
pub async fn community_fulltext_search(
    clients: &GraphitiClients,
    query: &str,
    group_ids: Option<&[String]>,
    limit: usize,
) -> Result<Vec<SearchResult<CommunityNode>>, GraphitiError> {
    let fuzzy_query = fulltext_query(query, group_ids);
    if fuzzy_query.is_empty() {
        return Ok(Vec::new());
    }

    let rows = clients
        .driver
        .fulltext_search(&fuzzy_query, vec!["Community".to_string()])
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    rows.iter()
        .take(limit)
        .map(|row| Ok(SearchResult { item: CommunityNode::try_from(row)?, score: DEFAULT_MIN_SCORE }))
        .collect()
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot_product / (norm_a * norm_b)) as f64
    }
}

/// Calculate Manhattan distance between two vectors
pub fn manhattan_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs() as f64).sum()
}

/// Calculate Euclidean distance between two vectors
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return f64::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = (x - y) as f64;
            diff * diff
        })
        .sum::<f64>()
        .sqrt()
}

/// Build a store-agnostic description of a vector similarity query on nodes.
/// Kept for callers that want to log/cache the effective query shape; actual
/// execution goes through `GraphDatabase::vector_search`.
pub fn build_node_vector_query(
    filters: &SearchFilters,
    group_ids: Option<&[String]>,
    limit: usize,
    min_score: f64,
) -> (String, HashMap<String, serde_json::Value>) {
    let mut params = HashMap::new();
    params.insert("k".to_string(), serde_json::Value::Number(serde_json::Number::from(limit)));
    params.insert(
        "min_score".to_string(),
        serde_json::Value::Number(serde_json::Number::from_f64(min_score).unwrap_or(serde_json::Number::from(0))),
    );
    if let Some(groups) = group_ids {
        params.insert("group_ids".to_string(), serde_json::to_value(groups).unwrap_or_default());
    }
    let (_filter_query, filter_params) = filters.node_search_filter_query();
    for (key, value) in filter_params {
        params.insert(key, value);
    }

    (format!("vector_search(Entity, k={}, min_score={})", limit, min_score), params)
}

/// Build a store-agnostic description of a full-text query on nodes.
pub fn build_node_fulltext_query(
    query_text: &str,
    filters: &SearchFilters,
    group_ids: Option<&[String]>,
    limit: usize,
) -> (String, HashMap<String, serde_json::Value>) {
    let search_query = fulltext_query(query_text, group_ids);
    let mut params = HashMap::new();
    params.insert("query_text".to_string(), serde_json::Value::String(search_query.clone()));

    let (_filter_query, filter_params) = filters.node_search_filter_query();
    for (key, value) in filter_params {
        params.insert(key, value);
    }
    params.insert("limit".to_string(), serde_json::Value::Number(serde_json::Number::from(limit)));

    (search_query, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lucene_sanitize() {
        assert_eq!(lucene_sanitize("test+query"), "test\\+query");
        assert_eq!(lucene_sanitize("hello world"), "hello world");
        assert_eq!(lucene_sanitize("user@domain.com"), "userdomaincom");
        assert_eq!(lucene_sanitize("query*"), "query\\*");
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);

        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        assert!((euclidean_distance(&a, &b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_manhattan_distance() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        assert!((manhattan_distance(&a, &b) - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_fulltext_query() {
        let query = fulltext_query("test query", None);
        assert_eq!(query, "(test query)");

        let groups = vec!["group1".to_string(), "group2".to_string()];
        let query = fulltext_query("test", Some(&groups));
        assert!(query.contains("group_id:\"group1\""));
        assert!(query.contains("group_id:\"group2\""));
    }

    #[test]
    fn test_build_node_fulltext_query() {
        let filters = SearchFilters::new();
        let (query, params) = build_node_fulltext_query("test query", &filters, None, 5);
        assert!(query.contains("test"));
        assert!(params.contains_key("query_text"));
    }
}
