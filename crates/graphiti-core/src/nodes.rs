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

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    database::{GraphDatabase, QueryParameter},
    errors::GraphitiError,
};

/// Reserved base-field names an entity type's attribute schema must not collide with (C8).
pub const RESERVED_ATTRIBUTE_NAMES: &[&str] = &[
    "id",
    "uuid",
    "name",
    "type",
    "group_id",
    "created_at",
    "updated_at",
    "embedding",
    "metadata",
    "valid_from",
    "valid_to",
    "source_ids",
    "entity_type",
    "summary",
    "episode_type",
    "content",
    "reference",
    "level",
];

/// Enumeration of episode content shapes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeType {
    /// A conversational turn, formatted "actor: content".
    Message,
    /// A free-standing document (article, note, report).
    Document,
    /// A discrete occurrence with no conversational framing (e.g. a calendar event).
    Event,
    /// A JSON string containing structured data.
    Json,
}

impl EpisodeType {
    pub fn from_str(s: &str) -> Result<Self, GraphitiError> {
        match s.to_lowercase().as_str() {
            "message" => Ok(EpisodeType::Message),
            "document" => Ok(EpisodeType::Document),
            "event" => Ok(EpisodeType::Event),
            "json" => Ok(EpisodeType::Json),
            _ => Err(GraphitiError::InvalidInput(format!(
                "Episode type: {} not implemented",
                s
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeType::Message => "message",
            EpisodeType::Document => "document",
            EpisodeType::Event => "event",
            EpisodeType::Json => "json",
        }
    }
}

/// Base trait for all node types in the graph
#[async_trait]
pub trait Node: Send + Sync {
    fn uuid(&self) -> Uuid;
    fn name(&self) -> &str;
    fn group_id(&self) -> &str;
    fn labels(&self) -> &[String];
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;
    fn valid_from(&self) -> DateTime<Utc>;
    fn valid_to(&self) -> Option<DateTime<Utc>>;
    fn source_ids(&self) -> &[Uuid];

    /// Save the node to the database
    async fn save(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError>;

    /// Delete the node from the database
    async fn delete(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError>;

    /// Get additional attributes as key-value pairs
    fn attributes(&self) -> HashMap<String, serde_json::Value>;
}

/// Fields shared by every node variant (C1/C3 §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseNode {
    pub uuid: Uuid,
    pub name: String,
    pub group_id: String,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub source_ids: Vec<Uuid>,
}

impl BaseNode {
    pub fn new(name: String, group_id: String) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            name,
            group_id,
            labels: Vec::new(),
            created_at: now,
            updated_at: now,
            valid_from: now,
            valid_to: None,
            source_ids: Vec::new(),
        }
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Delete node by group_id
    pub async fn delete_by_group_id(
        database: &dyn GraphDatabase,
        group_id: &str,
    ) -> Result<(), GraphitiError> {
        database
            .delete_by_group_id(group_id)
            .await
            .map_err(GraphitiError::DatabaseLayer)
    }
}

impl PartialEq for BaseNode {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl std::hash::Hash for BaseNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

fn embedding_properties(prefix: &str, embedding: &Option<Vec<f32>>) -> Option<(String, QueryParameter)> {
    embedding.as_ref().map(|v| {
        (
            prefix.to_string(),
            QueryParameter::List(
                v.iter()
                    .map(|x| QueryParameter::Float(*x as f64))
                    .collect(),
            ),
        )
    })
}

fn base_properties(base: &BaseNode) -> HashMap<String, QueryParameter> {
    let mut properties = HashMap::new();
    properties.insert("uuid".to_string(), QueryParameter::String(base.uuid.to_string()));
    properties.insert("name".to_string(), QueryParameter::String(base.name.clone()));
    properties.insert("group_id".to_string(), QueryParameter::String(base.group_id.clone()));
    properties.insert(
        "created_at".to_string(),
        QueryParameter::String(base.created_at.to_rfc3339()),
    );
    properties.insert(
        "updated_at".to_string(),
        QueryParameter::String(base.updated_at.to_rfc3339()),
    );
    properties.insert(
        "valid_from".to_string(),
        QueryParameter::String(base.valid_from.to_rfc3339()),
    );
    if let Some(valid_to) = base.valid_to {
        properties.insert("valid_to".to_string(), QueryParameter::String(valid_to.to_rfc3339()));
    }
    properties.insert(
        "source_ids".to_string(),
        QueryParameter::List(
            base.source_ids
                .iter()
                .map(|u| QueryParameter::String(u.to_string()))
                .collect(),
        ),
    );
    properties
}

async fn save_node(
    database: &dyn GraphDatabase,
    base: &BaseNode,
    properties: HashMap<String, QueryParameter>,
) -> Result<(), GraphitiError> {
    let uuid_str = base.uuid.to_string();
    if database
        .get_node(&uuid_str)
        .await
        .map_err(GraphitiError::DatabaseLayer)?
        .is_some()
    {
        database
            .update_node(&uuid_str, properties)
            .await
            .map_err(GraphitiError::DatabaseLayer)?;
    } else {
        database
            .create_node(base.labels.clone(), properties)
            .await
            .map_err(GraphitiError::DatabaseLayer)?;
    }
    Ok(())
}

/// Episodic node: an immutable ingested document with a valid-time anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicNode {
    #[serde(flatten)]
    pub base: BaseNode,
    pub episode_type: EpisodeType,
    pub source_description: String,
    pub content: String,
    pub reference_time: DateTime<Utc>,
    pub entity_edges: Vec<Uuid>,
}

impl std::ops::Deref for EpisodicNode {
    type Target = BaseNode;
    fn deref(&self) -> &BaseNode {
        &self.base
    }
}
impl std::ops::DerefMut for EpisodicNode {
    fn deref_mut(&mut self) -> &mut BaseNode {
        &mut self.base
    }
}

impl EpisodicNode {
    pub fn new(
        name: String,
        group_id: String,
        episode_type: EpisodeType,
        source_description: String,
        content: String,
        reference_time: DateTime<Utc>,
    ) -> Self {
        Self {
            base: BaseNode::new(name, group_id).with_labels(vec!["Episodic".to_string()]),
            episode_type,
            source_description,
            content,
            reference_time,
            entity_edges: Vec::new(),
        }
    }
}

#[async_trait]
impl Node for EpisodicNode {
    fn uuid(&self) -> Uuid {
        self.base.uuid
    }
    fn name(&self) -> &str {
        &self.base.name
    }
    fn group_id(&self) -> &str {
        &self.base.group_id
    }
    fn labels(&self) -> &[String] {
        &self.base.labels
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.base.created_at
    }
    fn updated_at(&self) -> DateTime<Utc> {
        self.base.updated_at
    }
    fn valid_from(&self) -> DateTime<Utc> {
        self.base.valid_from
    }
    fn valid_to(&self) -> Option<DateTime<Utc>> {
        self.base.valid_to
    }
    fn source_ids(&self) -> &[Uuid] {
        &self.base.source_ids
    }

    async fn save(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        let mut properties = base_properties(&self.base);
        properties.insert(
            "episode_type".to_string(),
            QueryParameter::String(self.episode_type.as_str().to_string()),
        );
        properties.insert(
            "source_description".to_string(),
            QueryParameter::String(self.source_description.clone()),
        );
        properties.insert("content".to_string(), QueryParameter::String(self.content.clone()));
        properties.insert(
            "reference_time".to_string(),
            QueryParameter::String(self.reference_time.to_rfc3339()),
        );
        properties.insert(
            "entity_edges".to_string(),
            QueryParameter::List(
                self.entity_edges
                    .iter()
                    .map(|u| QueryParameter::String(u.to_string()))
                    .collect(),
            ),
        );
        save_node(database, &self.base, properties).await
    }

    async fn delete(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        database
            .delete_node(&self.base.uuid.to_string())
            .await
            .map_err(GraphitiError::DatabaseLayer)
    }

    fn attributes(&self) -> HashMap<String, serde_json::Value> {
        let mut attrs = HashMap::new();
        attrs.insert(
            "episode_type".to_string(),
            serde_json::Value::String(self.episode_type.as_str().to_string()),
        );
        attrs.insert(
            "source_description".to_string(),
            serde_json::Value::String(self.source_description.clone()),
        );
        attrs.insert("content".to_string(), serde_json::Value::String(self.content.clone()));
        attrs.insert(
            "reference_time".to_string(),
            serde_json::Value::String(self.reference_time.to_rfc3339()),
        );
        attrs.insert(
            "entity_edges".to_string(),
            serde_json::to_value(&self.entity_edges).unwrap_or_default(),
        );
        attrs
    }
}

/// Entity node: a person, place, thing, or concept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityNode {
    #[serde(flatten)]
    pub base: BaseNode,
    /// Defaults to `"Entity"` when no classification was attempted or accepted.
    pub entity_type: String,
    pub summary: String,
    pub embedding: Option<Vec<f32>>,
    pub name_embedding: Option<Vec<f32>>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl std::ops::Deref for EntityNode {
    type Target = BaseNode;
    fn deref(&self) -> &BaseNode {
        &self.base
    }
}
impl std::ops::DerefMut for EntityNode {
    fn deref_mut(&mut self) -> &mut BaseNode {
        &mut self.base
    }
}

impl Default for EntityNode {
    fn default() -> Self {
        Self::new(String::new(), String::new(), String::new())
    }
}

impl EntityNode {
    pub fn new(name: String, group_id: String, summary: String) -> Self {
        Self {
            base: BaseNode::new(name, group_id).with_labels(vec!["Entity".to_string()]),
            entity_type: "Entity".to_string(),
            summary,
            embedding: None,
            name_embedding: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_entity_type(mut self, entity_type: String) -> Self {
        self.entity_type = entity_type;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Generate `name_embedding` via the embedder if not already populated.
    pub async fn generate_name_embedding(
        &mut self,
        embedder: &dyn crate::embedder::EmbedderClient,
    ) -> Result<(), GraphitiError> {
        if self.name_embedding.is_none() {
            let raw = embedder.create(&self.name).await?;
            self.name_embedding = Some(crate::helpers::normalize_l2(&raw));
        }
        Ok(())
    }

    /// Generate `embedding` (over `name + " " + summary`) via the embedder if not
    /// already populated, per C8.
    pub async fn generate_summary_embedding(
        &mut self,
        embedder: &dyn crate::embedder::EmbedderClient,
    ) -> Result<(), GraphitiError> {
        if self.embedding.is_none() {
            let text = format!("{} {}", self.name, self.summary);
            let raw = embedder.create(&text).await?;
            self.embedding = Some(crate::helpers::normalize_l2(&raw));
        }
        Ok(())
    }
}

#[async_trait]
impl Node for EntityNode {
    fn uuid(&self) -> Uuid {
        self.base.uuid
    }
    fn name(&self) -> &str {
        &self.base.name
    }
    fn group_id(&self) -> &str {
        &self.base.group_id
    }
    fn labels(&self) -> &[String] {
        &self.base.labels
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.base.created_at
    }
    fn updated_at(&self) -> DateTime<Utc> {
        self.base.updated_at
    }
    fn valid_from(&self) -> DateTime<Utc> {
        self.base.valid_from
    }
    fn valid_to(&self) -> Option<DateTime<Utc>> {
        self.base.valid_to
    }
    fn source_ids(&self) -> &[Uuid] {
        &self.base.source_ids
    }

    async fn save(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        let mut properties = base_properties(&self.base);
        properties.insert(
            "entity_type".to_string(),
            QueryParameter::String(self.entity_type.clone()),
        );
        properties.insert("summary".to_string(), QueryParameter::String(self.summary.clone()));
        if let Some((k, v)) = embedding_properties("embedding", &self.embedding) {
            properties.insert(k, v);
        }
        if let Some((k, v)) = embedding_properties("name_embedding", &self.name_embedding) {
            properties.insert(k, v);
        }
        properties.insert(
            "metadata".to_string(),
            QueryParameter::String(serde_json::to_string(&self.metadata).unwrap_or_default()),
        );
        save_node(database, &self.base, properties).await
    }

    async fn delete(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        database
            .delete_node(&self.base.uuid.to_string())
            .await
            .map_err(GraphitiError::DatabaseLayer)
    }

    fn attributes(&self) -> HashMap<String, serde_json::Value> {
        let mut attrs = HashMap::new();
        attrs.insert(
            "entity_type".to_string(),
            serde_json::Value::String(self.entity_type.clone()),
        );
        attrs.insert("summary".to_string(), serde_json::Value::String(self.summary.clone()));
        if let Some(ref embedding) = self.embedding {
            attrs.insert("embedding".to_string(), serde_json::to_value(embedding).unwrap_or_default());
        }
        if let Some(ref embedding) = self.name_embedding {
            attrs.insert(
                "name_embedding".to_string(),
                serde_json::to_value(embedding).unwrap_or_default(),
            );
        }
        attrs.insert(
            "metadata".to_string(),
            serde_json::to_value(&self.metadata).unwrap_or_default(),
        );
        attrs
    }
}

/// Community node: a derived grouping of strongly-connected entities (C11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityNode {
    #[serde(flatten)]
    pub base: BaseNode,
    pub level: i32,
    pub summary: String,
    pub embedding: Option<Vec<f32>>,
}

impl std::ops::Deref for CommunityNode {
    type Target = BaseNode;
    fn deref(&self) -> &BaseNode {
        &self.base
    }
}
impl std::ops::DerefMut for CommunityNode {
    fn deref_mut(&mut self) -> &mut BaseNode {
        &mut self.base
    }
}

impl CommunityNode {
    pub fn new(name: String, group_id: String, summary: String) -> Self {
        Self {
            base: BaseNode::new(name, group_id).with_labels(vec!["Community".to_string()]),
            level: 0,
            summary,
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Generate `embedding` (over `name + " " + summary`) via the embedder if not
    /// already populated, per C8.
    pub async fn generate_summary_embedding(
        &mut self,
        embedder: &dyn crate::embedder::EmbedderClient,
    ) -> Result<(), GraphitiError> {
        if self.embedding.is_none() {
            let text = format!("{} {}", self.name, self.summary);
            let raw = embedder.create(&text).await?;
            self.embedding = Some(crate::helpers::normalize_l2(&raw));
        }
        Ok(())
    }
}

#[async_trait]
impl Node for CommunityNode {
    fn uuid(&self) -> Uuid {
        self.base.uuid
    }
    fn name(&self) -> &str {
        &self.base.name
    }
    fn group_id(&self) -> &str {
        &self.base.group_id
    }
    fn labels(&self) -> &[String] {
        &self.base.labels
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.base.created_at
    }
    fn updated_at(&self) -> DateTime<Utc> {
        self.base.updated_at
    }
    fn valid_from(&self) -> DateTime<Utc> {
        self.base.valid_from
    }
    fn valid_to(&self) -> Option<DateTime<Utc>> {
        self.base.valid_to
    }
    fn source_ids(&self) -> &[Uuid] {
        &self.base.source_ids
    }

    async fn save(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        let mut properties = base_properties(&self.base);
        properties.insert("level".to_string(), QueryParameter::Integer(self.level as i64));
        properties.insert("summary".to_string(), QueryParameter::String(self.summary.clone()));
        if let Some((k, v)) = embedding_properties("embedding", &self.embedding) {
            properties.insert(k, v);
        }
        save_node(database, &self.base, properties).await
    }

    async fn delete(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        database
            .delete_node(&self.base.uuid.to_string())
            .await
            .map_err(GraphitiError::DatabaseLayer)
    }

    fn attributes(&self) -> HashMap<String, serde_json::Value> {
        let mut attrs = HashMap::new();
        attrs.insert("level".to_string(), serde_json::Value::from(self.level));
        attrs.insert("summary".to_string(), serde_json::Value::String(self.summary.clone()));
        if let Some(ref embedding) = self.embedding {
            attrs.insert("embedding".to_string(), serde_json::to_value(embedding).unwrap_or_default());
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_type_from_str() {
        assert_eq!(EpisodeType::from_str("message").unwrap(), EpisodeType::Message);
        assert_eq!(EpisodeType::from_str("json").unwrap(), EpisodeType::Json);
        assert_eq!(EpisodeType::from_str("document").unwrap(), EpisodeType::Document);
        assert_eq!(EpisodeType::from_str("event").unwrap(), EpisodeType::Event);
        assert!(EpisodeType::from_str("invalid").is_err());
    }

    #[test]
    fn test_base_node_creation() {
        let node = BaseNode::new("Test Node".to_string(), "group1".to_string());
        assert_eq!(node.name, "Test Node");
        assert_eq!(node.group_id, "group1");
        assert_eq!(node.created_at, node.updated_at);
        assert_eq!(node.valid_from, node.created_at);
        assert!(node.valid_to.is_none());
    }

    #[test]
    fn test_episodic_node_creation() {
        let node = EpisodicNode::new(
            "Episode 1".to_string(),
            "group1".to_string(),
            EpisodeType::Document,
            "Test source".to_string(),
            "Test content".to_string(),
            Utc::now(),
        );

        assert_eq!(Node::name(&node), "Episode 1");
        assert_eq!(node.episode_type, EpisodeType::Document);
        assert_eq!(node.content, "Test content");
    }

    #[test]
    fn test_entity_node_default_type_and_deref() {
        let node = EntityNode::new("Alice".to_string(), "group1".to_string(), "a person".to_string());
        assert_eq!(node.entity_type, "Entity");
        // deref access to base fields
        assert_eq!(node.group_id, "group1");
    }

    #[test]
    fn test_reserved_attribute_names_cover_entity_type() {
        assert!(RESERVED_ATTRIBUTE_NAMES.contains(&"entity_type"));
        assert!(RESERVED_ATTRIBUTE_NAMES.contains(&"valid_from"));
    }
}
