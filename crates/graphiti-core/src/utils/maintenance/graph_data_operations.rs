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

//! Graph data operations for maintenance

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{errors::GraphitiError, nodes::EpisodicNode, types::GraphitiClients};

/// Episode window length for retrieving context
pub const EPISODE_WINDOW_LEN: usize = 10;

/// Retrieve the `last_n` episodes at or before `reference_time`, restricted to
/// `group_ids`, most recent first.
pub async fn retrieve_episodes(
    clients: &GraphitiClients,
    reference_time: DateTime<Utc>,
    last_n: usize,
    group_ids: &[String],
) -> Result<Vec<EpisodicNode>, GraphitiError> {
    let rows = clients
        .driver
        .find_nodes(Some("Episodic"), HashMap::new())
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    let mut episodes: Vec<EpisodicNode> = rows
        .iter()
        .filter_map(|row| EpisodicNode::try_from(row).ok())
        .filter(|episode| episode.reference_time <= reference_time)
        .filter(|episode| group_ids.is_empty() || group_ids.contains(&episode.group_id))
        .collect();

    episodes.sort_by(|a, b| b.reference_time.cmp(&a.reference_time));
    episodes.truncate(last_n);
    episodes.reverse();

    Ok(episodes)
}

/// Get episode context for processing
pub async fn get_episode_context(
    clients: &GraphitiClients,
    episode: &EpisodicNode,
    window_size: usize,
) -> Result<Vec<EpisodicNode>, GraphitiError> {
    retrieve_episodes(clients, episode.reference_time, window_size, &[episode.group_id.clone()]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_window_len() {
        assert_eq!(EPISODE_WINDOW_LEN, 10);
    }
}
