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

//! Test doubles for deterministic pipeline tests. Not compiled into the
//! library; shared by `#[cfg(test)]` modules that need a `GraphitiClients`
//! without a live database or model endpoint.
#![cfg(test)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::cache::memory_cache::MemoryCache;
use crate::cache::CacheConfig;
use crate::cross_encoder::CrossEncoderClient;
use crate::database::{
    DatabaseError, DatabaseResult, EdgeData, GraphDatabase, NodeData, QueryParameter, QueryResult,
    Transaction,
};
use crate::embedder::EmbedderClient;
use crate::errors::{GraphitiError, GraphitiResult, LlmResult};
use crate::llm_client::{models::Message, LlmClient, ModelSize};
use crate::types::GraphitiClients;

fn qp_eq(a: &QueryParameter, b: &QueryParameter) -> bool {
    serde_json::to_value(a).ok() == serde_json::to_value(b).ok()
}

/// Pulls the `group_id:"..."` filter terms and the parenthesized phrase back
/// out of a string built by `search::utils::fulltext_query`. A real fulltext
/// index parses that lucene syntax itself; this stub just needs the same two
/// pieces of information out of it.
fn parse_lucene_query(query: &str) -> (Vec<String>, String) {
    let mut group_ids = Vec::new();
    let mut rest = query;
    while let Some(start) = rest.find("group_id:\"") {
        let after = &rest[start + "group_id:\"".len()..];
        if let Some(end) = after.find('"') {
            group_ids.push(after[..end].to_string());
            rest = &after[end + 1..];
        } else {
            break;
        }
    }
    let phrase = match (query.find('('), query.rfind(')')) {
        (Some(open), Some(close)) if open < close => &query[open + 1..close],
        _ => query,
    };
    (group_ids, phrase.to_string())
}

fn node_id(properties: &HashMap<String, QueryParameter>) -> String {
    match properties.get("uuid") {
        Some(QueryParameter::String(s)) => s.clone(),
        _ => Uuid::new_v4().to_string(),
    }
}

/// In-memory `GraphDatabase`, generalized from `kuzu.rs`'s map-backed store
/// but keyed by the `uuid` property (when present) rather than a freshly
/// minted id, so `save_node`/`save_edge`'s get-then-create-or-update check
/// round-trips correctly.
#[derive(Debug, Default)]
pub struct InMemoryGraphDatabase {
    nodes: Mutex<HashMap<String, NodeData>>,
    edges: Mutex<HashMap<String, EdgeData>>,
}

impl InMemoryGraphDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.lock().unwrap().len()
    }

    pub fn edges_of_type(&self, relationship_type: &str) -> Vec<EdgeData> {
        self.edges
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.relationship_type == relationship_type)
            .cloned()
            .collect()
    }

    pub fn all_nodes(&self) -> Vec<NodeData> {
        self.nodes.lock().unwrap().values().cloned().collect()
    }

    pub fn all_edges(&self) -> Vec<EdgeData> {
        self.edges.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl GraphDatabase for InMemoryGraphDatabase {
    async fn execute(
        &self,
        _query: &str,
        _parameters: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<QueryResult> {
        Ok(QueryResult { columns: Vec::new(), rows: Vec::new() })
    }

    async fn begin_transaction(&self) -> DatabaseResult<Box<dyn Transaction>> {
        Err(DatabaseError::UnsupportedOperation(
            "the in-memory test double does not support transactions".to_string(),
        ))
    }

    async fn close(&self) -> DatabaseResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> DatabaseResult<bool> {
        Ok(true)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn create_node(
        &self,
        labels: Vec<String>,
        properties: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<String> {
        let id = node_id(&properties);
        self.nodes
            .lock()
            .unwrap()
            .insert(id.clone(), NodeData { id: id.clone(), labels, properties });
        Ok(id)
    }

    async fn get_node(&self, id: &str) -> DatabaseResult<Option<NodeData>> {
        Ok(self.nodes.lock().unwrap().get(id).cloned())
    }

    async fn update_node(
        &self,
        id: &str,
        properties: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(id).ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
        for (key, value) in properties {
            node.properties.insert(key, value);
        }
        Ok(())
    }

    async fn delete_node(&self, id: &str) -> DatabaseResult<()> {
        self.nodes.lock().unwrap().remove(id);
        Ok(())
    }

    async fn find_nodes(
        &self,
        label: Option<&str>,
        properties: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<Vec<NodeData>> {
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes
            .values()
            .filter(|n| {
                if let Some(required) = label {
                    if !n.labels.iter().any(|l| l == required) {
                        return false;
                    }
                }
                properties
                    .iter()
                    .all(|(k, v)| n.properties.get(k).is_some_and(|nv| qp_eq(nv, v)))
            })
            .cloned()
            .collect())
    }

    async fn create_edge(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: &str,
        properties: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<String> {
        if !self.nodes.lock().unwrap().contains_key(source_id) {
            return Err(DatabaseError::NotFound(format!("source node {source_id} not found")));
        }
        if !self.nodes.lock().unwrap().contains_key(target_id) {
            return Err(DatabaseError::NotFound(format!("target node {target_id} not found")));
        }
        let id = node_id(&properties);
        self.edges.lock().unwrap().insert(
            id.clone(),
            EdgeData {
                id: id.clone(),
                relationship_type: edge_type.to_string(),
                source_id: source_id.to_string(),
                target_id: target_id.to_string(),
                properties,
            },
        );
        Ok(id)
    }

    async fn get_edge(&self, id: &str) -> DatabaseResult<Option<EdgeData>> {
        Ok(self.edges.lock().unwrap().get(id).cloned())
    }

    async fn update_edge(
        &self,
        id: &str,
        properties: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<()> {
        let mut edges = self.edges.lock().unwrap();
        let edge = edges.get_mut(id).ok_or_else(|| DatabaseError::NotFound(id.to_string()))?;
        for (key, value) in properties {
            edge.properties.insert(key, value);
        }
        Ok(())
    }

    async fn delete_edge(&self, id: &str) -> DatabaseResult<()> {
        self.edges.lock().unwrap().remove(id);
        Ok(())
    }

    async fn find_edges(
        &self,
        source_id: Option<&str>,
        target_id: Option<&str>,
        edge_type: Option<&str>,
    ) -> DatabaseResult<Vec<EdgeData>> {
        let edges = self.edges.lock().unwrap();
        Ok(edges
            .values()
            .filter(|e| {
                source_id.map_or(true, |s| e.source_id == s)
                    && target_id.map_or(true, |t| e.target_id == t)
                    && edge_type.map_or(true, |t| e.relationship_type == t)
            })
            .cloned()
            .collect())
    }

    async fn clear_database(&self) -> DatabaseResult<()> {
        self.nodes.lock().unwrap().clear();
        self.edges.lock().unwrap().clear();
        Ok(())
    }

    async fn delete_by_group_id(&self, group_id: &str) -> DatabaseResult<()> {
        let marker = QueryParameter::String(group_id.to_string());
        self.nodes
            .lock()
            .unwrap()
            .retain(|_, n| n.properties.get("group_id").map_or(true, |v| !qp_eq(v, &marker)));
        self.edges
            .lock()
            .unwrap()
            .retain(|_, e| e.properties.get("group_id").map_or(true, |v| !qp_eq(v, &marker)));
        Ok(())
    }

    async fn create_index(&self, _label: &str, _property: &str) -> DatabaseResult<()> {
        Ok(())
    }

    async fn create_constraint(
        &self,
        _label: &str,
        _property: &str,
        _constraint_type: &str,
    ) -> DatabaseResult<()> {
        Ok(())
    }

    async fn build_indices_and_constraints(&self) -> DatabaseResult<()> {
        Ok(())
    }

    async fn fulltext_search(&self, query: &str, labels: Vec<String>) -> DatabaseResult<Vec<NodeData>> {
        let (group_ids, phrase) = parse_lucene_query(query);
        let needle_tokens: Vec<String> = phrase.split_whitespace().map(|w| w.to_lowercase()).collect();
        if needle_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes
            .values()
            .filter(|n| {
                (labels.is_empty() || labels.iter().any(|l| n.labels.contains(l)))
                    && (group_ids.is_empty()
                        || matches!(n.properties.get("group_id"), Some(QueryParameter::String(g)) if group_ids.contains(g)))
                    && match n.properties.get("name") {
                        Some(QueryParameter::String(s)) => {
                            let name_tokens: Vec<String> = s.split_whitespace().map(|w| w.to_lowercase()).collect();
                            needle_tokens.iter().any(|nt| name_tokens.iter().any(|t| t.contains(nt.as_str()) || nt.contains(t.as_str())))
                        }
                        _ => false,
                    }
            })
            .cloned()
            .collect())
    }

    async fn vector_search(
        &self,
        embedding: Vec<f64>,
        label: &str,
        top_k: usize,
    ) -> DatabaseResult<Vec<(NodeData, f64)>> {
        let nodes = self.nodes.lock().unwrap();
        let mut scored: Vec<(NodeData, f64)> = nodes
            .values()
            .filter(|n| n.labels.iter().any(|l| l == label))
            .filter_map(|n| {
                let candidate = match n.properties.get("embedding") {
                    Some(QueryParameter::List(items)) => items
                        .iter()
                        .filter_map(|i| match i {
                            QueryParameter::Float(f) => Some(*f),
                            QueryParameter::Integer(i) => Some(*i as f64),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                    _ => return None,
                };
                Some((n.clone(), cosine(&embedding, &candidate)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn get_nodes_by_uuids(&self, uuids: &[String]) -> DatabaseResult<Vec<NodeData>> {
        let nodes = self.nodes.lock().unwrap();
        Ok(uuids.iter().filter_map(|u| nodes.get(u).cloned()).collect())
    }

    async fn get_edges_by_uuids(&self, uuids: &[String]) -> DatabaseResult<Vec<EdgeData>> {
        let edges = self.edges.lock().unwrap();
        Ok(uuids.iter().filter_map(|u| edges.get(u).cloned()).collect())
    }

    async fn get_neighbors(
        &self,
        uuid: &str,
        group_ids: &[String],
        _max_distance: u32,
    ) -> DatabaseResult<Vec<NodeData>> {
        let edges = self.edges.lock().unwrap();
        let nodes = self.nodes.lock().unwrap();
        let mut neighbor_ids: HashSet<String> = HashSet::new();
        for e in edges.values() {
            if e.source_id == uuid {
                neighbor_ids.insert(e.target_id.clone());
            }
            if e.target_id == uuid {
                neighbor_ids.insert(e.source_id.clone());
            }
        }
        Ok(neighbor_ids
            .into_iter()
            .filter_map(|id| nodes.get(&id).cloned())
            .filter(|n| {
                group_ids.is_empty()
                    || matches!(n.properties.get("group_id"), Some(QueryParameter::String(s)) if group_ids.contains(s))
            })
            .collect())
    }
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// LLM stub that plays back a fixed sequence of responses, one per call, in
/// order. Used instead of `mockall` for orchestration tests: the pipeline
/// calls the model a variable, content-dependent number of times, and a
/// scripted sequence is more direct than a generic mock's call matchers.
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<LlmResult<HashMap<String, Value>>>>,
    calls: Mutex<usize>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<HashMap<String, Value>>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    pub fn from_results(responses: Vec<LlmResult<HashMap<String, Value>>>) -> Self {
        Self { responses: Mutex::new(responses.into_iter().collect()), calls: Mutex::new(0) }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn generate_response(
        &self,
        _messages: &[Message],
        _response_model: Option<&str>,
        _max_tokens: Option<u32>,
        _model_size: ModelSize,
    ) -> LlmResult<HashMap<String, Value>> {
        *self.calls.lock().unwrap() += 1;
        self.responses.lock().unwrap().pop_front().unwrap_or_else(|| Ok(HashMap::new()))
    }

    async fn chat_completion(
        &self,
        _messages: &[Message],
        _json_params: Option<Value>,
    ) -> LlmResult<Value> {
        Ok(Value::Null)
    }
}

/// LLM stub that never resolves (sleeps far longer than any test timeout), for
/// exercising cancellation of an in-flight pipeline stage.
#[derive(Debug, Default)]
pub struct StallingLlmClient;

#[async_trait]
impl LlmClient for StallingLlmClient {
    async fn generate_response(
        &self,
        _messages: &[Message],
        _response_model: Option<&str>,
        _max_tokens: Option<u32>,
        _model_size: ModelSize,
    ) -> LlmResult<HashMap<String, Value>> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(HashMap::new())
    }

    async fn chat_completion(
        &self,
        _messages: &[Message],
        _json_params: Option<Value>,
    ) -> LlmResult<Value> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(Value::Null)
    }
}

/// Builds a TSV-bearing response map shaped like what `edge_operations`'s
/// `resolve_candidate_via_model` expects under the `content` key.
pub fn tsv_response(row: &str) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    map.insert("content".to_string(), Value::String(format!("{row}\n\n")));
    map
}

/// Deterministic embedder: same text always hashes to the same L2-normalized
/// vector, distinct texts (almost always) land on distinct vectors.
pub struct DeterministicEmbedder {
    dim: usize,
}

impl DeterministicEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl EmbedderClient for DeterministicEmbedder {
    async fn create(&self, input_data: &str) -> GraphitiResult<Vec<f32>> {
        let mut v = vec![0f32; self.dim];
        for (i, byte) in input_data.bytes().enumerate() {
            v[i % self.dim] += byte as f32;
            v[(i * 7 + 3) % self.dim] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        Ok(crate::helpers::normalize_l2(&v))
    }
}

/// Cross-encoder stub that preserves input order with strictly decreasing
/// scores, enough to exercise rerank call sites without a real model.
pub struct OrderPreservingCrossEncoder;

#[async_trait]
impl CrossEncoderClient for OrderPreservingCrossEncoder {
    async fn rank(&self, _query: &str, passages: &[String]) -> Result<Vec<(String, f64)>, GraphitiError> {
        Ok(passages
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), 1.0 - (i as f64) * 0.01))
            .collect())
    }
}

pub fn test_clients(
    db: Arc<InMemoryGraphDatabase>,
    llm: Arc<dyn LlmClient + Send + Sync>,
) -> GraphitiClients {
    GraphitiClients {
        driver: db,
        llm_client: llm,
        embedder: Arc::new(DeterministicEmbedder::new(16)),
        cross_encoder: Arc::new(OrderPreservingCrossEncoder),
        cache: Arc::new(MemoryCache::new(CacheConfig::default())),
    }
}
