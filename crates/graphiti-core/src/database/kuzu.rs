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

//! KuzuDB database implementation

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::config::DatabaseConfig;
use super::traits::{EdgeData, GraphDatabase, NodeData, QueryParameter, QueryResult, Transaction};
use super::types::{DatabaseError, DatabaseResult};

/// KuzuDB database implementation
#[derive(Debug)]
pub struct KuzuDatabase {
    // For now, we'll use a simplified in-memory representation
    // In a real implementation, this would use the actual KuzuDB connection
    database_path: String,
    nodes: Arc<Mutex<HashMap<String, NodeData>>>,
    edges: Arc<Mutex<HashMap<String, EdgeData>>>,
}

/// KuzuDB transaction wrapper
pub struct KuzuTransaction {
    database: Arc<KuzuDatabase>,
    // In a real implementation, this would hold the actual KuzuDB transaction
}

impl KuzuDatabase {
    /// Create a new KuzuDB database connection
    pub async fn new(config: DatabaseConfig) -> DatabaseResult<Self> {
        // In a real implementation, you would:
        // 1. Initialize KuzuDB with the database path
        // 2. Set up the connection
        // 3. Create necessary schemas

        Ok(Self {
            database_path: config.uri.clone(),
            nodes: Arc::new(Mutex::new(HashMap::new())),
            edges: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Convert Cypher-like query to KuzuDB query
    fn translate_query(&self, query: &str) -> DatabaseResult<String> {
        // This is a simplified query translation
        // In a real implementation, you would need a full Cypher -> KuzuDB query translator

        // Handle some basic patterns
        if query.contains("MATCH (n)") && query.contains("DETACH DELETE n") {
            return Ok("DELETE NODE FROM * WHERE TRUE;".to_string());
        }

        if query.contains("RETURN 1 as health") {
            return Ok("RETURN 1 as health;".to_string());
        }

        // For CREATE operations, translate to KuzuDB syntax
        if query.starts_with("CREATE (n:") {
            // Extract label and convert to KuzuDB CREATE statement
            return Ok(format!("CREATE NODE TABLE IF NOT EXISTS Entity(uuid STRING, name STRING, PRIMARY KEY(uuid));"));
        }

        // For complex queries, return as-is for now
        // In production, you'd implement a full query translator
        Ok(query.to_string())
    }

    /// Execute a KuzuDB query
    async fn execute_kuzu_query(
        &self,
        query: &str,
        _parameters: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<QueryResult> {
        // This is a mock implementation
        // In a real implementation, you would:
        // 1. Use the actual KuzuDB API to execute the query
        // 2. Parse the results into our standardized format

        let translated_query = self.translate_query(query)?;

        // Mock some common responses
        if translated_query.contains("health") {
            return Ok(QueryResult {
                columns: vec!["health".to_string()],
                rows: vec![{
                    let mut row = HashMap::new();
                    row.insert("health".to_string(), QueryParameter::Integer(1));
                    row
                }],
            });
        }

        // For other queries, return empty result
        Ok(QueryResult {
            columns: vec![],
            rows: vec![],
        })
    }
}

#[async_trait]
impl GraphDatabase for KuzuDatabase {
    async fn execute(
        &self,
        query: &str,
        parameters: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<QueryResult> {
        self.execute_kuzu_query(query, parameters).await
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn begin_transaction(&self) -> DatabaseResult<Box<dyn Transaction>> {
        Ok(Box::new(KuzuTransaction {
            database: Arc::new(KuzuDatabase {
                database_path: self.database_path.clone(),
                nodes: self.nodes.clone(),
                edges: self.edges.clone(),
            }),
        }))
    }

    async fn close(&self) -> DatabaseResult<()> {
        // KuzuDB cleanup would happen here
        Ok(())
    }

    async fn health_check(&self) -> DatabaseResult<bool> {
        // For KuzuDB, check if database file/directory is accessible
        Ok(std::path::Path::new(&self.database_path).exists() || self.database_path.is_empty())
    }

    async fn create_node(
        &self,
        labels: Vec<String>,
        properties: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<String> {
        let uuid = Uuid::new_v4().to_string();
        let node = NodeData {
            id: uuid.clone(),
            labels,
            properties,
        };

        self.nodes.lock().unwrap().insert(uuid.clone(), node);
        Ok(uuid)
    }

    async fn get_node(&self, id: &str) -> DatabaseResult<Option<NodeData>> {
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes.get(id).cloned())
    }

    async fn update_node(
        &self,
        id: &str,
        properties: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        if let Some(node) = nodes.get_mut(id) {
            for (key, value) in properties {
                node.properties.insert(key, value);
            }
        } else {
            return Err(DatabaseError::NotFound(format!(
                "Node with id {} not found",
                id
            )));
        }
        Ok(())
    }

    async fn delete_node(&self, id: &str) -> DatabaseResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.remove(id).is_none() {
            return Err(DatabaseError::NotFound(format!(
                "Node with id {} not found",
                id
            )));
        }

        // Also remove any edges connected to this node
        let mut edges = self.edges.lock().unwrap();
        edges.retain(|_, edge| edge.source_id != id && edge.target_id != id);

        Ok(())
    }

    async fn find_nodes(
        &self,
        label: Option<&str>,
        properties: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<Vec<NodeData>> {
        let nodes = self.nodes.lock().unwrap();
        let mut results = Vec::new();

        for node in nodes.values() {
            // Check label filter
            if let Some(required_label) = label {
                if !node.labels.contains(&required_label.to_string()) {
                    continue;
                }
            }

            // Check property filters
            let mut matches = true;
            for (key, value) in &properties {
                if let Some(node_value) = node.properties.get(key) {
                    if node_value != value {
                        matches = false;
                        break;
                    }
                } else {
                    matches = false;
                    break;
                }
            }

            if matches {
                results.push(node.clone());
            }
        }

        Ok(results)
    }

    async fn create_edge(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: &str,
        properties: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<String> {
        // Check that source and target nodes exist
        let nodes = self.nodes.lock().unwrap();
        if !nodes.contains_key(source_id) {
            return Err(DatabaseError::NotFound(format!(
                "Source node {} not found",
                source_id
            )));
        }
        if !nodes.contains_key(target_id) {
            return Err(DatabaseError::NotFound(format!(
                "Target node {} not found",
                target_id
            )));
        }
        drop(nodes);

        let uuid = Uuid::new_v4().to_string();
        let edge = EdgeData {
            id: uuid.clone(),
            relationship_type: edge_type.to_string(),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            properties,
        };

        self.edges.lock().unwrap().insert(uuid.clone(), edge);
        Ok(uuid)
    }

    async fn get_edge(&self, id: &str) -> DatabaseResult<Option<EdgeData>> {
        let edges = self.edges.lock().unwrap();
        Ok(edges.get(id).cloned())
    }

    async fn update_edge(
        &self,
        id: &str,
        properties: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<()> {
        let mut edges = self.edges.lock().unwrap();
        if let Some(edge) = edges.get_mut(id) {
            for (key, value) in properties {
                edge.properties.insert(key, value);
            }
        } else {
            return Err(DatabaseError::NotFound(format!(
                "Edge with id {} not found",
                id
            )));
        }
        Ok(())
    }

    async fn delete_edge(&self, id: &str) -> DatabaseResult<()> {
        let mut edges = self.edges.lock().unwrap();
        if edges.remove(id).is_none() {
            return Err(DatabaseError::NotFound(format!(
                "Edge with id {} not found",
                id
            )));
        }
        Ok(())
    }

    async fn find_edges(
        &self,
        source_id: Option<&str>,
        target_id: Option<&str>,
        edge_type: Option<&str>,
    ) -> DatabaseResult<Vec<EdgeData>> {
        let edges = self.edges.lock().unwrap();
        let mut results = Vec::new();

        for edge in edges.values() {
            let mut matches = true;

            if let Some(src) = source_id {
                if edge.source_id != src {
                    matches = false;
                }
            }

            if let Some(tgt) = target_id {
                if edge.target_id != tgt {
                    matches = false;
                }
            }

            if let Some(typ) = edge_type {
                if edge.relationship_type != typ {
                    matches = false;
                }
            }

            if matches {
                results.push(edge.clone());
            }
        }

        Ok(results)
    }

    async fn clear_database(&self) -> DatabaseResult<()> {
        self.nodes.lock().unwrap().clear();
        self.edges.lock().unwrap().clear();
        Ok(())
    }

    async fn delete_by_group_id(&self, group_id: &str) -> DatabaseResult<()> {
        // Remove nodes with matching group_id
        {
            let mut nodes = self.nodes.lock().unwrap();
            let to_remove: Vec<String> = nodes
                .iter()
                .filter(|(_, node)| {
                    if let Some(QueryParameter::String(node_group_id)) =
                        node.properties.get("group_id")
                    {
                        node_group_id == group_id
                    } else {
                        false
                    }
                })
                .map(|(id, _)| id.clone())
                .collect();

            for id in to_remove {
                nodes.remove(&id);
            }
        }

        // Remove edges with matching group_id
        {
            let mut edges = self.edges.lock().unwrap();
            edges.retain(|_, edge| {
                if let Some(QueryParameter::String(edge_group_id)) = edge.properties.get("group_id")
                {
                    edge_group_id != group_id
                } else {
                    true
                }
            });
        }

        Ok(())
    }

    async fn create_index(&self, _label: &str, _property: &str) -> DatabaseResult<()> {
        // KuzuDB index creation would go here
        // For now, this is a no-op since we're using in-memory storage
        Ok(())
    }

    async fn create_constraint(
        &self,
        _label: &str,
        _property: &str,
        _constraint_type: &str,
    ) -> DatabaseResult<()> {
        // KuzuDB constraint creation would go here
        // For now, this is a no-op since we're using in-memory storage
        Ok(())
    }

    async fn build_indices_and_constraints(&self) -> DatabaseResult<()> {
        // In a real KuzuDB implementation, you would:
        // 1. Create necessary node tables
        // 2. Create necessary relationship tables
        // 3. Set up indices for performance
        // 4. Set up constraints for data integrity

        // For our mock implementation, this is a no-op
        Ok(())
    }

    async fn fulltext_search(
        &self,
        query: &str,
        labels: Vec<String>,
    ) -> DatabaseResult<Vec<NodeData>> {
        // KuzuDB doesn't have built-in fulltext search like Neo4j
        // You would need to implement this using external tools or manual text matching
        let nodes = self.nodes.lock().unwrap();
        let mut results = Vec::new();

        for node in nodes.values() {
            // Check if node has any of the required labels
            if !labels.is_empty() {
                let has_label = labels.iter().any(|label| node.labels.contains(label));
                if !has_label {
                    continue;
                }
            }

            // Simple text search in node properties
            let query_lower = query.to_lowercase();
            let mut text_matches = false;

            for (_, value) in &node.properties {
                if let QueryParameter::String(text) = value {
                    if text.to_lowercase().contains(&query_lower) {
                        text_matches = true;
                        break;
                    }
                }
            }

            if text_matches {
                results.push(node.clone());
            }
        }

        Ok(results)
    }

    async fn vector_search(
        &self,
        _embedding: Vec<f64>,
        _label: &str,
        _top_k: usize,
    ) -> DatabaseResult<Vec<(NodeData, f64)>> {
        // KuzuDB doesn't have built-in vector search
        // You would need to implement this using external vector databases or manual similarity calculations
        Ok(Vec::new())
    }

    async fn get_nodes_by_uuids(&self, uuids: &[String]) -> DatabaseResult<Vec<NodeData>> {
        let nodes = self.nodes.lock().unwrap();
        Ok(uuids.iter().filter_map(|id| nodes.get(id).cloned()).collect())
    }

    async fn get_edges_by_uuids(&self, uuids: &[String]) -> DatabaseResult<Vec<EdgeData>> {
        let edges = self.edges.lock().unwrap();
        Ok(uuids.iter().filter_map(|id| edges.get(id).cloned()).collect())
    }

    async fn get_neighbors(
        &self,
        uuid: &str,
        group_ids: &[String],
        max_distance: u32,
    ) -> DatabaseResult<Vec<NodeData>> {
        // The in-memory backend only tracks direct adjacency; `max_distance` beyond
        // 1 degrades to the same one-hop neighborhood.
        let _ = max_distance;
        let edges = self.edges.lock().unwrap();
        let nodes = self.nodes.lock().unwrap();

        let mut neighbor_ids = std::collections::HashSet::new();
        for edge in edges.values() {
            if edge.source_id == uuid {
                neighbor_ids.insert(edge.target_id.clone());
            } else if edge.target_id == uuid {
                neighbor_ids.insert(edge.source_id.clone());
            }
        }

        Ok(neighbor_ids
            .into_iter()
            .filter_map(|id| nodes.get(&id).cloned())
            .filter(|node| {
                group_ids.is_empty()
                    || node
                        .properties
                        .get("group_id")
                        .map(|v| matches!(v, QueryParameter::String(g) if group_ids.contains(g)))
                        .unwrap_or(false)
            })
            .collect())
    }
}

#[async_trait]
impl Transaction for KuzuTransaction {
    async fn execute(
        &mut self,
        query: &str,
        parameters: HashMap<String, QueryParameter>,
    ) -> DatabaseResult<QueryResult> {
        // In a real implementation, this would execute within a KuzuDB transaction context
        self.database.execute_kuzu_query(query, parameters).await
    }

    async fn commit(self: Box<Self>) -> DatabaseResult<()> {
        // KuzuDB transaction commit would happen here
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DatabaseResult<()> {
        // KuzuDB transaction rollback would happen here
        Ok(())
    }
}
