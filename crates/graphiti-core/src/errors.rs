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

use thiserror::Error;
use uuid::Uuid;

use crate::database::types::DatabaseError;

/// Base error type for Graphiti Core operations
#[derive(Debug, Error)]
pub enum GraphitiError {
    #[error("Database error: {0}")]
    Database(#[from] neo4rs::Error),

    #[error("Database error: {0}")]
    DatabaseLayer(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] sled::Error),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Staging store error: {0}")]
    StagingError(String),

    #[error("Edge {uuid} not found")]
    EdgeNotFound { uuid: Uuid },

    #[error("None of the edges for {uuids:?} were found")]
    EdgesNotFound { uuids: Vec<Uuid> },

    #[error("No edges found for group ids {group_ids:?}")]
    GroupsEdgesNotFound { group_ids: Vec<String> },

    #[error("No nodes found for group ids {group_ids:?}")]
    GroupsNodesNotFound { group_ids: Vec<String> },

    #[error("Node {uuid} not found")]
    NodeNotFound { uuid: Uuid },

    #[error("Search reranker error: {text}")]
    SearchReranker { text: String },

    #[error("{entity_type_attribute} cannot be used as an attribute for {entity_type} as it is a protected attribute name")]
    EntityTypeValidation {
        entity_type: String,
        entity_type_attribute: String,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A model-gateway or store call could not reach its peer (network, DNS, connection
    /// reset). Distinct from application-level `Http`/`Database` errors raised after a
    /// response was actually received.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// A model reply could not be parsed into the expected shape after repair was
    /// attempted.
    #[error("Failed to parse model reply: {message}")]
    ParseError { message: String },

    /// A structured reply parsed as JSON but failed schema validation.
    #[error("Model reply failed schema validation: {message}")]
    SchemaValidation { message: String },

    /// An optimistic write lost a race with a concurrent writer; retryable.
    #[error("Conflicting write for {uuid}")]
    Conflict { uuid: Uuid },

    /// An edge referenced an endpoint that failed to upsert in the same batch; the edge
    /// write is dropped but the batch continues.
    #[error("Edge {edge_uuid} references missing endpoint {missing_endpoint}")]
    DanglingReference {
        edge_uuid: Uuid,
        missing_endpoint: Uuid,
    },
}

/// LLM-specific error types
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimit,

    #[error("LLM refused to generate a response: {message}")]
    Refusal { message: String },

    #[error("LLM returned an empty response: {message}")]
    EmptyResponse { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Timeout error: {message}")]
    Timeout { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },
}

/// Result type alias for Graphiti operations
pub type GraphitiResult<T> = Result<T, GraphitiError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Maps an LLM-layer failure onto a `GraphitiError` per §7's taxonomy: failures
/// that are about reaching the model at all (network/transport/timeout) become
/// `Transport` so callers can retry at the component boundary; everything else
/// (rate limits, refusals, malformed replies) keeps its specific `Llm` variant.
pub fn translate_llm_error(err: LlmError) -> GraphitiError {
    match err {
        LlmError::NetworkError { message } => GraphitiError::Transport { message },
        LlmError::Timeout { message } => GraphitiError::Transport { message },
        LlmError::Http(e) => GraphitiError::Transport { message: e.to_string() },
        other => GraphitiError::Llm(other),
    }
}
