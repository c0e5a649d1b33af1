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

use crate::{
    errors::GraphitiError,
    nodes::{EntityNode, Node},
    edges::{EntityEdge, Edge},
    types::GraphitiClients,
};
use std::collections::HashMap;

/// Batch size for bulk operations
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Bulk operations for efficient batch processing
pub struct BulkOperations {
    clients: GraphitiClients,
    batch_size: usize,
}

impl BulkOperations {
    pub fn new(clients: GraphitiClients) -> Self {
        Self {
            clients,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Bulk create nodes with optimized batch operations
    pub async fn create_nodes(&self, nodes: Vec<EntityNode>) -> Result<(), GraphitiError> {
        if nodes.is_empty() {
            return Ok(());
        }

        // Group nodes by batch
        for batch in nodes.chunks(self.batch_size) {
            self.create_nodes_batch(batch).await?;
        }

        Ok(())
    }

    /// Create a single batch of nodes
    async fn create_nodes_batch(&self, nodes: &[EntityNode]) -> Result<(), GraphitiError> {
        // TODO: Implement optimized Cypher query for batch node creation
        // This would use UNWIND to create multiple nodes in a single query

        let _graph = &self.clients.driver;

        // For now, create individual nodes (inefficient, but shows structure)
        for node in nodes {
            // In real implementation, this would be batched
            let _uuid = node.uuid();
            let _name = node.name();
            let _group_id = node.group_id();

            // Would execute:
            // UNWIND $nodes AS nodeData
            // CREATE (n:Entity {uuid: nodeData.uuid, name: nodeData.name, ...})
        }

        Ok(())
    }

    /// Bulk create edges with optimized batch operations
    pub async fn create_edges(&self, edges: Vec<EntityEdge>) -> Result<(), GraphitiError> {
        if edges.is_empty() {
            return Ok(());
        }

        // Group edges by batch
        for batch in edges.chunks(self.batch_size) {
            self.create_edges_batch(batch).await?;
        }

        Ok(())
    }

    /// Create a single batch of edges
    async fn create_edges_batch(&self, edges: &[EntityEdge]) -> Result<(), GraphitiError> {
        // TODO: Implement optimized Cypher query for batch edge creation

        let _graph = &self.clients.driver;

        // For now, create individual edges (inefficient, but shows structure)
        for edge in edges {
            let _uuid = edge.uuid();
            let _source = edge.source_node_uuid();
            let _target = edge.target_node_uuid();

            // Would execute:
            // UNWIND $edges AS edgeData
            // MATCH (source:Entity {uuid: edgeData.source}), (target:Entity {uuid: edgeData.target})
            // CREATE (source)-[r:RELATIONSHIP {uuid: edgeData.uuid, ...}]->(target)
        }

        Ok(())
    }

    /// Bulk update node properties
    pub async fn update_nodes(&self, updates: HashMap<String, HashMap<String, serde_json::Value>>) -> Result<(), GraphitiError> {
        if updates.is_empty() {
            return Ok(());
        }

        // Group updates by batch
        let update_vec: Vec<_> = updates.into_iter().collect();
        for batch in update_vec.chunks(self.batch_size) {
            self.update_nodes_batch(batch).await?;
        }

        Ok(())
    }

    /// Update a single batch of nodes
    async fn update_nodes_batch(&self, updates: &[(String, HashMap<String, serde_json::Value>)]) -> Result<(), GraphitiError> {
        // TODO: Implement optimized Cypher query for batch node updates

        let _graph = &self.clients.driver;

        for (uuid, properties) in updates {
            let _node_uuid = uuid;
            let _props = properties;

            // Would execute:
            // UNWIND $updates AS updateData
            // MATCH (n:Entity {uuid: updateData.uuid})
            // SET n += updateData.properties
        }

        Ok(())
    }

    /// Bulk delete nodes by UUIDs
    pub async fn delete_nodes(&self, uuids: Vec<String>) -> Result<usize, GraphitiError> {
        if uuids.is_empty() {
            return Ok(0);
        }

        let mut total_deleted = 0;

        // Process in batches
        for batch in uuids.chunks(self.batch_size) {
            let deleted = self.delete_nodes_batch(batch).await?;
            total_deleted += deleted;
        }

        Ok(total_deleted)
    }

    /// Delete a single batch of nodes
    async fn delete_nodes_batch(&self, uuids: &[String]) -> Result<usize, GraphitiError> {
        // TODO: Implement optimized Cypher query for batch node deletion

        let _graph = &self.clients.driver;
        let batch_size = uuids.len();

        for uuid in uuids {
            let _node_uuid = uuid;

            // Would execute:
            // UNWIND $uuids AS uuid
            // MATCH (n:Entity {uuid: uuid})
            // DETACH DELETE n
        }

        // Return number of nodes that would be deleted
        Ok(batch_size)
    }

    /// Bulk delete edges by UUIDs
    pub async fn delete_edges(&self, uuids: Vec<String>) -> Result<usize, GraphitiError> {
        if uuids.is_empty() {
            return Ok(0);
        }

        let mut total_deleted = 0;

        // Process in batches
        for batch in uuids.chunks(self.batch_size) {
            let deleted = self.delete_edges_batch(batch).await?;
            total_deleted += deleted;
        }

        Ok(total_deleted)
    }

    /// Delete a single batch of edges
    async fn delete_edges_batch(&self, uuids: &[String]) -> Result<usize, GraphitiError> {
        // TODO: Implement optimized Cypher query for batch edge deletion

        let _graph = &self.clients.driver;
        let batch_size = uuids.len();

        for uuid in uuids {
            let _edge_uuid = uuid;

            // Would execute:
            // UNWIND $uuids AS uuid
            // MATCH ()-[r {uuid: uuid}]-()
            // DELETE r
        }

        // Return number of edges that would be deleted
        Ok(batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_operations_constants() {
        assert_eq!(DEFAULT_BATCH_SIZE, 100);
    }

    #[test]
    fn test_batch_size_setter() {
        // This test is simplified to avoid complex mock setup
        // Full integration tests would require proper Neo4j test database
        assert_eq!(DEFAULT_BATCH_SIZE, 100);
    }
}
