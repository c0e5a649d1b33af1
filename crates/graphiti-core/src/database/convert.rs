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

//! Conversions between the backend-agnostic `NodeData`/`EdgeData` rows and the
//! typed node/edge structs. Centralizes the property (de)serialization so
//! `neo4j.rs`/`kuzu.rs` and the search layer share one encoding.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use super::traits::{EdgeData, NodeData, QueryParameter};
use crate::edges::{BaseEdge, CommunityEdge, DuplicateEdge, EntityEdge, EpisodicEdge};
use crate::errors::GraphitiError;
use crate::nodes::{BaseNode, CommunityNode, EntityNode, EpisodeType, EpisodicNode};

fn prop_str(props: &HashMap<String, QueryParameter>, key: &str) -> Option<String> {
    match props.get(key) {
        Some(QueryParameter::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn prop_datetime(props: &HashMap<String, QueryParameter>, key: &str) -> Option<DateTime<Utc>> {
    prop_str(props, key).and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc))
}

fn prop_uuid(props: &HashMap<String, QueryParameter>, key: &str) -> Option<Uuid> {
    prop_str(props, key).and_then(|s| Uuid::parse_str(&s).ok())
}

fn prop_uuid_list(props: &HashMap<String, QueryParameter>, key: &str) -> Vec<Uuid> {
    match props.get(key) {
        Some(QueryParameter::List(items)) => items
            .iter()
            .filter_map(|item| match item {
                QueryParameter::String(s) => Uuid::parse_str(s).ok(),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn prop_str_list(props: &HashMap<String, QueryParameter>, key: &str) -> Vec<String> {
    match props.get(key) {
        Some(QueryParameter::List(items)) => items
            .iter()
            .filter_map(|item| match item {
                QueryParameter::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn prop_f32_vec(props: &HashMap<String, QueryParameter>, key: &str) -> Option<Vec<f32>> {
    match props.get(key) {
        Some(QueryParameter::List(items)) => {
            let values: Vec<f32> = items
                .iter()
                .filter_map(|item| match item {
                    QueryParameter::Float(f) => Some(*f as f32),
                    QueryParameter::Integer(i) => Some(*i as f32),
                    _ => None,
                })
                .collect();
            if values.is_empty() {
                None
            } else {
                Some(values)
            }
        }
        _ => None,
    }
}

fn prop_i64(props: &HashMap<String, QueryParameter>, key: &str) -> Option<i64> {
    match props.get(key) {
        Some(QueryParameter::Integer(i)) => Some(*i),
        _ => None,
    }
}

fn base_node_from_data(data: &NodeData) -> Result<BaseNode, GraphitiError> {
    let uuid = prop_uuid(&data.properties, "uuid")
        .or_else(|| Uuid::parse_str(&data.id).ok())
        .ok_or_else(|| GraphitiError::ParseError {
            message: format!("node {} missing uuid property", data.id),
        })?;
    let now = Utc::now();
    Ok(BaseNode {
        uuid,
        name: prop_str(&data.properties, "name").unwrap_or_default(),
        group_id: prop_str(&data.properties, "group_id").unwrap_or_default(),
        labels: data.labels.clone(),
        created_at: prop_datetime(&data.properties, "created_at").unwrap_or(now),
        updated_at: prop_datetime(&data.properties, "updated_at").unwrap_or(now),
        valid_from: prop_datetime(&data.properties, "valid_from").unwrap_or(now),
        valid_to: prop_datetime(&data.properties, "valid_to"),
        source_ids: prop_uuid_list(&data.properties, "source_ids"),
    })
}

impl TryFrom<&NodeData> for EntityNode {
    type Error = GraphitiError;

    fn try_from(data: &NodeData) -> Result<Self, Self::Error> {
        let base = base_node_from_data(data)?;
        let metadata = prop_str(&data.properties, "metadata")
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Ok(EntityNode {
            base,
            entity_type: prop_str(&data.properties, "entity_type").unwrap_or_else(|| "Entity".to_string()),
            summary: prop_str(&data.properties, "summary").unwrap_or_default(),
            embedding: prop_f32_vec(&data.properties, "embedding"),
            name_embedding: prop_f32_vec(&data.properties, "name_embedding"),
            metadata,
        })
    }
}

impl TryFrom<&NodeData> for EpisodicNode {
    type Error = GraphitiError;

    fn try_from(data: &NodeData) -> Result<Self, Self::Error> {
        let base = base_node_from_data(data)?;
        let episode_type = prop_str(&data.properties, "episode_type")
            .map(|s| EpisodeType::from_str(&s))
            .transpose()?
            .unwrap_or(EpisodeType::Message);
        Ok(EpisodicNode {
            base,
            episode_type,
            source_description: prop_str(&data.properties, "source_description").unwrap_or_default(),
            content: prop_str(&data.properties, "content").unwrap_or_default(),
            reference_time: prop_datetime(&data.properties, "reference_time").unwrap_or_else(Utc::now),
            entity_edges: prop_uuid_list(&data.properties, "entity_edges"),
        })
    }
}

impl TryFrom<&NodeData> for CommunityNode {
    type Error = GraphitiError;

    fn try_from(data: &NodeData) -> Result<Self, Self::Error> {
        let base = base_node_from_data(data)?;
        Ok(CommunityNode {
            base,
            level: prop_i64(&data.properties, "level").unwrap_or(0) as i32,
            summary: prop_str(&data.properties, "summary").unwrap_or_default(),
            embedding: prop_f32_vec(&data.properties, "embedding"),
        })
    }
}

fn base_edge_from_data(data: &EdgeData) -> Result<BaseEdge, GraphitiError> {
    let uuid = prop_uuid(&data.properties, "uuid")
        .or_else(|| Uuid::parse_str(&data.id).ok())
        .ok_or_else(|| GraphitiError::ParseError {
            message: format!("edge {} missing uuid property", data.id),
        })?;
    let now = Utc::now();
    Ok(BaseEdge {
        uuid,
        group_id: prop_str(&data.properties, "group_id").unwrap_or_default(),
        source_node_uuid: Uuid::parse_str(&data.source_id).unwrap_or_default(),
        target_node_uuid: Uuid::parse_str(&data.target_id).unwrap_or_default(),
        created_at: prop_datetime(&data.properties, "created_at").unwrap_or(now),
        valid_from: prop_datetime(&data.properties, "valid_from").unwrap_or(now),
        valid_to: prop_datetime(&data.properties, "valid_to"),
    })
}

impl TryFrom<&EdgeData> for EntityEdge {
    type Error = GraphitiError;

    fn try_from(data: &EdgeData) -> Result<Self, Self::Error> {
        let base = base_edge_from_data(data)?;
        Ok(EntityEdge {
            base,
            name: prop_str(&data.properties, "name").unwrap_or_default(),
            fact: prop_str(&data.properties, "fact").unwrap_or_default(),
            fact_embedding: prop_f32_vec(&data.properties, "fact_embedding"),
            episodes: prop_uuid_list(&data.properties, "episodes"),
            expired_at: prop_datetime(&data.properties, "expired_at"),
        })
    }
}

impl TryFrom<&EdgeData> for EpisodicEdge {
    type Error = GraphitiError;

    fn try_from(data: &EdgeData) -> Result<Self, Self::Error> {
        Ok(EpisodicEdge { base: base_edge_from_data(data)? })
    }
}

impl TryFrom<&EdgeData> for CommunityEdge {
    type Error = GraphitiError;

    fn try_from(data: &EdgeData) -> Result<Self, Self::Error> {
        Ok(CommunityEdge { base: base_edge_from_data(data)? })
    }
}

impl TryFrom<&EdgeData> for DuplicateEdge {
    type Error = GraphitiError;

    fn try_from(data: &EdgeData) -> Result<Self, Self::Error> {
        Ok(DuplicateEdge { base: base_edge_from_data(data)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node_data() -> NodeData {
        let mut properties = HashMap::new();
        let uuid = Uuid::new_v4();
        properties.insert("uuid".to_string(), QueryParameter::String(uuid.to_string()));
        properties.insert("name".to_string(), QueryParameter::String("Alice".to_string()));
        properties.insert("group_id".to_string(), QueryParameter::String("g1".to_string()));
        properties.insert("entity_type".to_string(), QueryParameter::String("Person".to_string()));
        properties.insert("summary".to_string(), QueryParameter::String("a person".to_string()));
        NodeData {
            id: uuid.to_string(),
            labels: vec!["Entity".to_string()],
            properties,
        }
    }

    #[test]
    fn test_entity_node_round_trip() {
        let data = sample_node_data();
        let node = EntityNode::try_from(&data).unwrap();
        assert_eq!(node.name, "Alice");
        assert_eq!(node.entity_type, "Person");
        assert_eq!(node.group_id, "g1");
    }

    #[test]
    fn test_missing_uuid_is_parse_error() {
        let data = NodeData { id: "not-a-uuid".to_string(), labels: vec![], properties: HashMap::new() };
        assert!(EntityNode::try_from(&data).is_err());
    }
}
