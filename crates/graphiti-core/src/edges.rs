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

/// Base trait for all edge types in the graph
#[async_trait]
pub trait Edge: Send + Sync {
    fn uuid(&self) -> Uuid;
    fn group_id(&self) -> &str;
    fn source_node_uuid(&self) -> Uuid;
    fn target_node_uuid(&self) -> Uuid;
    fn created_at(&self) -> DateTime<Utc>;
    fn valid_from(&self) -> DateTime<Utc>;
    fn valid_to(&self) -> Option<DateTime<Utc>>;

    /// Persist the edge, including its two endpoints, via the abstracted store.
    async fn save(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError>;

    /// Remove the edge from the store. Endpoints are untouched.
    async fn delete(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError>;

    fn attributes(&self) -> HashMap<String, serde_json::Value>;
}

/// Fields shared by every edge variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseEdge {
    pub uuid: Uuid,
    pub group_id: String,
    pub source_node_uuid: Uuid,
    pub target_node_uuid: Uuid,
    pub created_at: DateTime<Utc>,
    /// Start of the edge's valid-time window (C7 temporal reconciliation).
    pub valid_from: DateTime<Utc>,
    /// End of the edge's valid-time window; `None` while still current.
    pub valid_to: Option<DateTime<Utc>>,
}

impl BaseEdge {
    pub fn new(group_id: String, source_node_uuid: Uuid, target_node_uuid: Uuid) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            group_id,
            source_node_uuid,
            target_node_uuid,
            created_at: now,
            valid_from: now,
            valid_to: None,
        }
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_valid_from(mut self, valid_from: DateTime<Utc>) -> Self {
        self.valid_from = valid_from;
        self
    }

    /// Mark the edge expired as of `when`. Idempotent: only ever moves `valid_to` earlier.
    pub fn expire(&mut self, when: DateTime<Utc>) {
        self.valid_to = match self.valid_to {
            Some(existing) if existing <= when => Some(existing),
            _ => Some(when),
        };
    }

    pub fn is_current(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_to.map_or(true, |end| at < end)
    }
}

impl PartialEq for BaseEdge {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl std::hash::Hash for BaseEdge {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

fn base_properties(base: &BaseEdge) -> HashMap<String, QueryParameter> {
    let mut properties = HashMap::new();
    properties.insert("uuid".to_string(), QueryParameter::String(base.uuid.to_string()));
    properties.insert("group_id".to_string(), QueryParameter::String(base.group_id.clone()));
    properties.insert(
        "created_at".to_string(),
        QueryParameter::String(base.created_at.to_rfc3339()),
    );
    properties.insert(
        "valid_from".to_string(),
        QueryParameter::String(base.valid_from.to_rfc3339()),
    );
    if let Some(valid_to) = base.valid_to {
        properties.insert("valid_to".to_string(), QueryParameter::String(valid_to.to_rfc3339()));
    }
    properties
}

async fn save_edge(
    database: &dyn GraphDatabase,
    base: &BaseEdge,
    edge_type: &str,
    properties: HashMap<String, QueryParameter>,
) -> Result<(), GraphitiError> {
    let uuid_str = base.uuid.to_string();
    if database
        .get_edge(&uuid_str)
        .await
        .map_err(GraphitiError::DatabaseLayer)?
        .is_some()
    {
        database
            .update_edge(&uuid_str, properties)
            .await
            .map_err(GraphitiError::DatabaseLayer)?;
    } else {
        database
            .create_edge(
                &base.source_node_uuid.to_string(),
                &base.target_node_uuid.to_string(),
                edge_type,
                properties,
            )
            .await
            .map_err(GraphitiError::DatabaseLayer)?;
    }
    Ok(())
}

/// Episodic edge: connects an episode to an entity it mentions (MENTIONS).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicEdge {
    #[serde(flatten)]
    pub base: BaseEdge,
}

impl std::ops::Deref for EpisodicEdge {
    type Target = BaseEdge;
    fn deref(&self) -> &BaseEdge {
        &self.base
    }
}
impl std::ops::DerefMut for EpisodicEdge {
    fn deref_mut(&mut self) -> &mut BaseEdge {
        &mut self.base
    }
}

impl EpisodicEdge {
    pub fn new(group_id: String, episode_uuid: Uuid, entity_uuid: Uuid) -> Self {
        Self {
            base: BaseEdge::new(group_id, episode_uuid, entity_uuid),
        }
    }
}

#[async_trait]
impl Edge for EpisodicEdge {
    fn uuid(&self) -> Uuid {
        self.base.uuid
    }
    fn group_id(&self) -> &str {
        &self.base.group_id
    }
    fn source_node_uuid(&self) -> Uuid {
        self.base.source_node_uuid
    }
    fn target_node_uuid(&self) -> Uuid {
        self.base.target_node_uuid
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.base.created_at
    }
    fn valid_from(&self) -> DateTime<Utc> {
        self.base.valid_from
    }
    fn valid_to(&self) -> Option<DateTime<Utc>> {
        self.base.valid_to
    }

    async fn save(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        save_edge(database, &self.base, "MENTIONS", base_properties(&self.base)).await
    }

    async fn delete(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        database
            .delete_edge(&self.base.uuid.to_string())
            .await
            .map_err(GraphitiError::DatabaseLayer)
    }

    fn attributes(&self) -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }
}

/// Entity edge: a named, fact-bearing relationship between two entities (RELATES_TO).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEdge {
    #[serde(flatten)]
    pub base: BaseEdge,
    pub name: String,
    pub fact: String,
    pub fact_embedding: Option<Vec<f32>>,
    pub episodes: Vec<Uuid>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl std::ops::Deref for EntityEdge {
    type Target = BaseEdge;
    fn deref(&self) -> &BaseEdge {
        &self.base
    }
}
impl std::ops::DerefMut for EntityEdge {
    fn deref_mut(&mut self) -> &mut BaseEdge {
        &mut self.base
    }
}

impl EntityEdge {
    pub fn new(
        group_id: String,
        source_entity_uuid: Uuid,
        target_entity_uuid: Uuid,
        name: String,
        fact: String,
        valid_at: DateTime<Utc>,
    ) -> Self {
        Self {
            base: BaseEdge::new(group_id, source_entity_uuid, target_entity_uuid)
                .with_valid_from(valid_at),
            name,
            fact,
            fact_embedding: None,
            episodes: Vec::new(),
            expired_at: None,
        }
    }

    pub fn with_episodes(mut self, episodes: Vec<Uuid>) -> Self {
        self.episodes = episodes;
        self
    }

    pub fn with_expired_at(mut self, expired_at: DateTime<Utc>) -> Self {
        self.expired_at = Some(expired_at);
        self
    }

    pub fn with_invalid_at(mut self, invalid_at: DateTime<Utc>) -> Self {
        self.base.valid_to = Some(invalid_at);
        self
    }

    /// Invalidated edges carry an `expired_at` (write-time) distinct from `valid_to`
    /// (the fact's own end of truth), per C7's bitemporal reconciliation.
    pub fn invalidate(&mut self, invalid_at: DateTime<Utc>, expired_at: DateTime<Utc>) {
        self.base.expire(invalid_at);
        self.expired_at = Some(expired_at);
    }

    pub async fn generate_fact_embedding(
        &mut self,
        embedder: &dyn crate::embedder::EmbedderClient,
    ) -> Result<(), GraphitiError> {
        if self.fact_embedding.is_none() {
            let raw = embedder.create(&self.fact).await?;
            self.fact_embedding = Some(crate::helpers::normalize_l2(&raw));
        }
        Ok(())
    }
}

#[async_trait]
impl Edge for EntityEdge {
    fn uuid(&self) -> Uuid {
        self.base.uuid
    }
    fn group_id(&self) -> &str {
        &self.base.group_id
    }
    fn source_node_uuid(&self) -> Uuid {
        self.base.source_node_uuid
    }
    fn target_node_uuid(&self) -> Uuid {
        self.base.target_node_uuid
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.base.created_at
    }
    fn valid_from(&self) -> DateTime<Utc> {
        self.base.valid_from
    }
    fn valid_to(&self) -> Option<DateTime<Utc>> {
        self.base.valid_to
    }

    async fn save(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        let mut properties = base_properties(&self.base);
        properties.insert("name".to_string(), QueryParameter::String(self.name.clone()));
        properties.insert("fact".to_string(), QueryParameter::String(self.fact.clone()));
        properties.insert(
            "episodes".to_string(),
            QueryParameter::List(
                self.episodes
                    .iter()
                    .map(|u| QueryParameter::String(u.to_string()))
                    .collect(),
            ),
        );
        if let Some(expired_at) = self.expired_at {
            properties.insert(
                "expired_at".to_string(),
                QueryParameter::String(expired_at.to_rfc3339()),
            );
        }
        if let Some(ref embedding) = self.fact_embedding {
            properties.insert(
                "fact_embedding".to_string(),
                QueryParameter::List(embedding.iter().map(|x| QueryParameter::Float(*x as f64)).collect()),
            );
        }
        save_edge(database, &self.base, "RELATES_TO", properties).await
    }

    async fn delete(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        database
            .delete_edge(&self.base.uuid.to_string())
            .await
            .map_err(GraphitiError::DatabaseLayer)
    }

    fn attributes(&self) -> HashMap<String, serde_json::Value> {
        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), serde_json::Value::String(self.name.clone()));
        attrs.insert("fact".to_string(), serde_json::Value::String(self.fact.clone()));
        attrs.insert("episodes".to_string(), serde_json::to_value(&self.episodes).unwrap_or_default());
        attrs.insert(
            "valid_at".to_string(),
            serde_json::Value::String(self.base.valid_from.to_rfc3339()),
        );
        if let Some(expired_at) = self.expired_at {
            attrs.insert("expired_at".to_string(), serde_json::Value::String(expired_at.to_rfc3339()));
        }
        if let Some(invalid_at) = self.base.valid_to {
            attrs.insert("invalid_at".to_string(), serde_json::Value::String(invalid_at.to_rfc3339()));
        }
        attrs
    }
}

/// Community edge: membership of an entity in a derived community (HAS_MEMBER).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityEdge {
    #[serde(flatten)]
    pub base: BaseEdge,
}

impl std::ops::Deref for CommunityEdge {
    type Target = BaseEdge;
    fn deref(&self) -> &BaseEdge {
        &self.base
    }
}
impl std::ops::DerefMut for CommunityEdge {
    fn deref_mut(&mut self) -> &mut BaseEdge {
        &mut self.base
    }
}

impl CommunityEdge {
    /// `HAS_MEMBER` points from the community to the member it contains.
    pub fn new(group_id: String, community_uuid: Uuid, member_uuid: Uuid) -> Self {
        Self {
            base: BaseEdge::new(group_id, community_uuid, member_uuid),
        }
    }
}

#[async_trait]
impl Edge for CommunityEdge {
    fn uuid(&self) -> Uuid {
        self.base.uuid
    }
    fn group_id(&self) -> &str {
        &self.base.group_id
    }
    fn source_node_uuid(&self) -> Uuid {
        self.base.source_node_uuid
    }
    fn target_node_uuid(&self) -> Uuid {
        self.base.target_node_uuid
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.base.created_at
    }
    fn valid_from(&self) -> DateTime<Utc> {
        self.base.valid_from
    }
    fn valid_to(&self) -> Option<DateTime<Utc>> {
        self.base.valid_to
    }

    async fn save(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        save_edge(database, &self.base, "HAS_MEMBER", base_properties(&self.base)).await
    }

    async fn delete(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        database
            .delete_edge(&self.base.uuid.to_string())
            .await
            .map_err(GraphitiError::DatabaseLayer)
    }

    fn attributes(&self) -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }
}

/// Duplicate edge: records that one entity node has been merged into another
/// (IS_DUPLICATE_OF). `source_node_uuid` is the duplicate, `target_node_uuid`
/// is the surviving representative (C12 union-find).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateEdge {
    #[serde(flatten)]
    pub base: BaseEdge,
}

impl std::ops::Deref for DuplicateEdge {
    type Target = BaseEdge;
    fn deref(&self) -> &BaseEdge {
        &self.base
    }
}
impl std::ops::DerefMut for DuplicateEdge {
    fn deref_mut(&mut self) -> &mut BaseEdge {
        &mut self.base
    }
}

impl DuplicateEdge {
    pub fn new(group_id: String, duplicate_uuid: Uuid, representative_uuid: Uuid) -> Self {
        Self {
            base: BaseEdge::new(group_id, duplicate_uuid, representative_uuid),
        }
    }
}

#[async_trait]
impl Edge for DuplicateEdge {
    fn uuid(&self) -> Uuid {
        self.base.uuid
    }
    fn group_id(&self) -> &str {
        &self.base.group_id
    }
    fn source_node_uuid(&self) -> Uuid {
        self.base.source_node_uuid
    }
    fn target_node_uuid(&self) -> Uuid {
        self.base.target_node_uuid
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.base.created_at
    }
    fn valid_from(&self) -> DateTime<Utc> {
        self.base.valid_from
    }
    fn valid_to(&self) -> Option<DateTime<Utc>> {
        self.base.valid_to
    }

    async fn save(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        save_edge(database, &self.base, "IS_DUPLICATE_OF", base_properties(&self.base)).await
    }

    async fn delete(&self, database: &dyn GraphDatabase) -> Result<(), GraphitiError> {
        database
            .delete_edge(&self.base.uuid.to_string())
            .await
            .map_err(GraphitiError::DatabaseLayer)
    }

    fn attributes(&self) -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_edge_creation() {
        let source = Uuid::new_v4();
        let target = Uuid::new_v4();
        let edge = BaseEdge::new("group1".to_string(), source, target);

        assert_eq!(edge.group_id, "group1");
        assert_eq!(edge.source_node_uuid, source);
        assert_eq!(edge.target_node_uuid, target);
        assert!(edge.valid_to.is_none());
    }

    #[test]
    fn test_base_edge_expire_is_idempotent_toward_earliest() {
        let mut edge = BaseEdge::new("group1".to_string(), Uuid::new_v4(), Uuid::new_v4());
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(10);
        edge.expire(t2);
        edge.expire(t1);
        assert_eq!(edge.valid_to, Some(t1));
    }

    #[test]
    fn test_expire_never_precedes_valid_from() {
        let from = Utc::now();
        let mut edge = BaseEdge::new("group1".to_string(), Uuid::new_v4(), Uuid::new_v4());
        edge.valid_from = from;
        edge.expire(from + chrono::Duration::seconds(5));
        assert!(edge.valid_to.map_or(true, |to| to >= edge.valid_from));
    }

    #[test]
    fn test_entity_edge_creation() {
        let source = Uuid::new_v4();
        let target = Uuid::new_v4();
        let edge = EntityEdge::new(
            "group1".to_string(),
            source,
            target,
            "relationship".to_string(),
            "entity1 relates to entity2".to_string(),
            Utc::now(),
        );

        assert_eq!(edge.name, "relationship");
        assert_eq!(edge.fact, "entity1 relates to entity2");
        assert_eq!(edge.base.source_node_uuid, source);
        assert_eq!(edge.base.target_node_uuid, target);
    }

    #[test]
    fn test_episodic_edge_creation() {
        let episode = Uuid::new_v4();
        let entity = Uuid::new_v4();
        let edge = EpisodicEdge::new("group1".to_string(), episode, entity);

        assert_eq!(edge.base.source_node_uuid, episode);
        assert_eq!(edge.base.target_node_uuid, entity);
    }

    #[test]
    fn test_duplicate_edge_creation() {
        let dup = Uuid::new_v4();
        let rep = Uuid::new_v4();
        let edge = DuplicateEdge::new("group1".to_string(), dup, rep);
        assert_eq!(edge.source_node_uuid, dup);
        assert_eq!(edge.target_node_uuid, rep);
    }
}
