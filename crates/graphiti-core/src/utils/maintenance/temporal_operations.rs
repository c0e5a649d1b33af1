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

//! Temporal operations for graph maintenance

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    edges::EntityEdge,
    errors::GraphitiError,
    llm_client::models::Message as LlmMessage,
    llm_client::ModelSize,
    nodes::EpisodicNode,
    prompts::{extract_edge_dates, models::Message as PromptMessage},
    types::GraphitiClients,
};

fn to_llm_messages(messages: Vec<PromptMessage>) -> Vec<LlmMessage> {
    messages.into_iter().map(|m| LlmMessage::new(m.role, m.content)).collect()
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct EdgeDateResponse {
    valid_at: Option<String>,
    invalid_at: Option<String>,
}

/// Extract `valid_at`/`invalid_at` for a single fact from its source episode,
/// relative to that episode's `reference_time` (C7).
pub async fn extract_edge_dates(
    clients: &GraphitiClients,
    edge: &EntityEdge,
    episode: &EpisodicNode,
    _previous_episodes: &[EpisodicNode],
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), GraphitiError> {
    let mut context: HashMap<String, Value> = HashMap::new();
    context.insert("edges".to_string(), serde_json::to_value([&edge.fact]).unwrap_or_default());
    context.insert("reference_time".to_string(), Value::String(episode.reference_time.to_rfc3339()));

    let messages = to_llm_messages(extract_edge_dates::extract_dates(&context));
    let response = clients
        .llm_client
        .generate_response(&messages, None, None, ModelSize::Medium)
        .await
        .map_err(crate::errors::translate_llm_error)?;

    let parsed: EdgeDateResponse =
        serde_json::from_value(Value::Object(response.into_iter().collect())).unwrap_or_default();

    let valid_at = parsed.valid_at.as_deref().and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|dt| dt.with_timezone(&Utc));
    let invalid_at = parsed.invalid_at.as_deref().and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|dt| dt.with_timezone(&Utc));

    Ok((valid_at, invalid_at))
}

/// Determine if an edge is still valid as of `reference_time` (no `valid_to` in
/// the past relative to it).
pub fn is_edge_valid(edge: &EntityEdge, reference_time: DateTime<Utc>) -> bool {
    edge.is_current(reference_time)
}

/// Update edge temporal bounds, recording the write-time `expired_at` when the
/// fact's own end-of-truth (`invalid_at`) is set.
pub fn update_edge_temporal_bounds(
    edge: &mut EntityEdge,
    valid_at: Option<DateTime<Utc>>,
    invalid_at: Option<DateTime<Utc>>,
    current_time: DateTime<Utc>,
) {
    if let Some(valid_at) = valid_at {
        edge.base.valid_from = valid_at;
    }
    if let Some(invalid_at) = invalid_at {
        edge.invalidate(invalid_at, current_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_edge() -> EntityEdge {
        EntityEdge::new(
            "group1".to_string(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "KNOWS".to_string(),
            "fact".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn test_update_edge_temporal_bounds() {
        let mut edge = sample_edge();
        let now = Utc::now();

        update_edge_temporal_bounds(&mut edge, Some(now), Some(now), now);

        assert_eq!(edge.valid_from, now);
        assert_eq!(edge.valid_to, Some(now));
        assert_eq!(edge.expired_at, Some(now));
    }

    #[test]
    fn test_is_edge_valid_respects_valid_to() {
        let mut edge = sample_edge();
        let now = Utc::now();
        assert!(is_edge_valid(&edge, now));

        edge.base.expire(now);
        assert!(!is_edge_valid(&edge, now + chrono::Duration::seconds(1)));
    }
}
