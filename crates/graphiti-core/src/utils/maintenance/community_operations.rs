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

//! Community operations for graph clustering and analysis

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

use crate::{
    database::GraphDatabase,
    edges::{CommunityEdge, Edge, EntityEdge},
    errors::GraphitiError,
    llm_client::models::Message as LlmMessage,
    llm_client::ModelSize,
    nodes::{CommunityNode, EntityNode, Node},
    prompts::{models::Message as PromptMessage, summarize_nodes},
    types::GraphitiClients,
};

const MAX_ITERATIONS: usize = 100;

/// Community detection result: a cluster of entity uuids sharing a label.
#[derive(Debug, Clone)]
pub struct Community {
    pub id: String,
    pub nodes: Vec<Uuid>,
    pub score: f64,
}

/// Community detection algorithms
#[derive(Debug, Clone)]
pub enum CommunityAlgorithm {
    Louvain,
    LabelPropagation,
    ConnectedComponents,
}

/// Build the `uuid -> [(neighbor_uuid, edge_count)]` projection over current
/// entity relationships in `group_id` (C2).
async fn build_neighbor_projection(
    database: &dyn GraphDatabase,
    group_id: &str,
) -> Result<(Vec<Uuid>, HashMap<Uuid, HashMap<Uuid, u64>>), GraphitiError> {
    let node_rows = database
        .find_nodes(Some("Entity"), HashMap::new())
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    let entity_uuids: Vec<Uuid> = node_rows
        .iter()
        .filter_map(|row| EntityNode::try_from(row).ok())
        .filter(|node| node.group_id == group_id)
        .map(|node| node.uuid)
        .collect();

    let known: std::collections::HashSet<Uuid> = entity_uuids.iter().copied().collect();

    let edge_rows = database
        .find_edges(None, None, Some("RELATES_TO"))
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    let mut projection: HashMap<Uuid, HashMap<Uuid, u64>> = HashMap::new();
    for row in &edge_rows {
        let Ok(edge) = EntityEdge::try_from(row) else { continue };
        if edge.group_id != group_id {
            continue;
        }
        if !known.contains(&edge.source_node_uuid) || !known.contains(&edge.target_node_uuid) {
            continue;
        }
        *projection
            .entry(edge.source_node_uuid)
            .or_default()
            .entry(edge.target_node_uuid)
            .or_insert(0) += 1;
        *projection
            .entry(edge.target_node_uuid)
            .or_default()
            .entry(edge.source_node_uuid)
            .or_insert(0) += 1;
    }

    Ok((entity_uuids, projection))
}

/// Detect communities in `group_id` via neighbor-weighted label propagation (C11).
pub async fn detect_communities(
    database: &dyn GraphDatabase,
    group_id: &str,
    _algorithm: CommunityAlgorithm,
) -> Result<Vec<Community>, GraphitiError> {
    let (entity_uuids, projection) = build_neighbor_projection(database, group_id).await?;
    if entity_uuids.is_empty() {
        return Ok(Vec::new());
    }

    let index_of: HashMap<Uuid, usize> =
        entity_uuids.iter().enumerate().map(|(i, u)| (*u, i)).collect();

    let mut labels: Vec<usize> = (0..entity_uuids.len()).collect();

    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        let snapshot = labels.clone();

        for (i, uuid) in entity_uuids.iter().enumerate() {
            let Some(neighbors) = projection.get(uuid) else { continue };
            if neighbors.is_empty() {
                continue;
            }

            let mut weight_by_label: HashMap<usize, u64> = HashMap::new();
            for (neighbor_uuid, edge_count) in neighbors {
                let Some(&neighbor_idx) = index_of.get(neighbor_uuid) else { continue };
                let neighbor_label = snapshot[neighbor_idx];
                *weight_by_label.entry(neighbor_label).or_insert(0) += edge_count;
            }
            if weight_by_label.is_empty() {
                continue;
            }

            let max_weight = *weight_by_label.values().max().unwrap();
            let best_label = weight_by_label
                .iter()
                .filter(|(_, &w)| w == max_weight)
                .map(|(&label, _)| label)
                .max()
                .unwrap();

            let current_label = snapshot[i];
            let new_label = if max_weight > 1 {
                best_label
            } else if best_label > current_label {
                best_label
            } else {
                current_label
            };

            if new_label != labels[i] {
                labels[i] = new_label;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    let mut clusters: HashMap<usize, Vec<Uuid>> = HashMap::new();
    for (i, uuid) in entity_uuids.iter().enumerate() {
        clusters.entry(labels[i]).or_default().push(*uuid);
    }

    let communities = clusters
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(label, members)| {
            let internal_edges: u64 = members
                .iter()
                .map(|uuid| {
                    projection
                        .get(uuid)
                        .map(|neighbors| {
                            neighbors
                                .iter()
                                .filter(|(n, _)| members.contains(n))
                                .map(|(_, c)| c)
                                .sum::<u64>()
                        })
                        .unwrap_or(0)
                })
                .sum::<u64>()
                / 2;
            let possible_edges = (members.len() * (members.len() - 1) / 2).max(1) as f64;
            Community {
                id: label.to_string(),
                nodes: members,
                score: internal_edges as f64 / possible_edges,
            }
        })
        .collect();

    Ok(communities)
}

fn to_llm_messages(messages: Vec<PromptMessage>) -> Vec<LlmMessage> {
    messages.into_iter().map(|m| LlmMessage::new(m.role, m.content)).collect()
}

#[derive(Debug, serde::Deserialize, Default)]
struct SummaryResponse {
    #[serde(default)]
    summary: String,
}

/// Summarize a community's member entities via pairwise reduction over the
/// node-summarization prompt (C8 summary-pair prompt).
async fn summarize_members(
    clients: &GraphitiClients,
    members: &[EntityNode],
) -> Result<String, GraphitiError> {
    let mut context: HashMap<String, Value> = HashMap::new();
    context.insert(
        "nodes".to_string(),
        serde_json::to_value(members.iter().map(|n| &n.summary).collect::<Vec<_>>())
            .unwrap_or_default(),
    );
    context.insert("context_messages".to_string(), Value::Array(Vec::new()));

    let messages = to_llm_messages(summarize_nodes::summarize(&context));
    let response = clients
        .llm_client
        .generate_response(&messages, None, None, ModelSize::Small)
        .await
        .map_err(crate::errors::translate_llm_error)?;
    let parsed: SummaryResponse =
        serde_json::from_value(Value::Object(response.into_iter().collect())).unwrap_or_default();

    Ok(parsed.summary)
}

/// Materialize detected communities as `CommunityNode`s with `HAS_MEMBER` edges,
/// generating each community's name and summary from its members (C11).
pub async fn update_community_assignments(
    clients: &GraphitiClients,
    communities: &[Community],
    group_id: &str,
) -> Result<(), GraphitiError> {
    for community in communities {
        let rows = clients.driver.get_nodes_by_uuids(
            &community.nodes.iter().map(|u| u.to_string()).collect::<Vec<_>>(),
        ).await.map_err(GraphitiError::DatabaseLayer)?;

        let members: Vec<EntityNode> = rows.iter().filter_map(|row| EntityNode::try_from(row).ok()).collect();
        if members.is_empty() {
            continue;
        }

        let summary = summarize_members(clients, &members).await.unwrap_or_default();
        let name = members
            .iter()
            .map(|m| m.name.as_str())
            .take(3)
            .collect::<Vec<_>>()
            .join(", ");

        let mut community_node = CommunityNode::new(name, group_id.to_string(), summary);
        community_node.generate_summary_embedding(clients.embedder.as_ref()).await.ok();
        community_node.save(clients.driver.as_ref()).await?;

        for member in &members {
            let edge = CommunityEdge::new(group_id.to_string(), community_node.uuid, member.uuid);
            edge.save(clients.driver.as_ref()).await?;
        }
    }

    Ok(())
}

/// Community statistics
#[derive(Debug, Clone, Default)]
pub struct CommunityStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub density: f64,
    pub modularity: f64,
}

/// Compute member/edge counts and density for one detected community.
pub async fn get_community_stats(
    database: &dyn GraphDatabase,
    community_id: &str,
    group_id: &str,
) -> Result<CommunityStats, GraphitiError> {
    let communities = detect_communities(database, group_id, CommunityAlgorithm::LabelPropagation).await?;
    let Some(community) = communities.iter().find(|c| c.id == community_id) else {
        return Ok(CommunityStats::default());
    };

    let (_, projection) = build_neighbor_projection(database, group_id).await?;
    let members: std::collections::HashSet<Uuid> = community.nodes.iter().copied().collect();

    let edge_count: u64 = community
        .nodes
        .iter()
        .map(|uuid| {
            projection
                .get(uuid)
                .map(|neighbors| neighbors.iter().filter(|(n, _)| members.contains(n)).map(|(_, c)| c).sum::<u64>())
                .unwrap_or(0)
        })
        .sum::<u64>()
        / 2;

    let node_count = community.nodes.len();
    let possible_edges = (node_count * (node_count.saturating_sub(1)) / 2).max(1) as f64;

    Ok(CommunityStats {
        node_count,
        edge_count: edge_count as usize,
        density: edge_count as f64 / possible_edges,
        modularity: community.score,
    })
}

/// Fold a single new entity into the existing community structure (incremental
/// counterpart to `detect_communities`/`update_community_assignments`): finds
/// the modal community among `entity`'s current neighbors and, if one exists,
/// merges the entity's summary in, regenerates the community's name/summary
/// embedding, and adds a `HAS_MEMBER` edge if it isn't already a member.
/// Returns the community uuid the entity was attached to, if any.
pub async fn update_community(
    clients: &GraphitiClients,
    entity: &EntityNode,
    group_id: &str,
) -> Result<Option<Uuid>, GraphitiError> {
    let relates_rows = clients
        .driver
        .find_edges(None, None, Some("RELATES_TO"))
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    let mut neighbor_uuids = std::collections::HashSet::new();
    for row in &relates_rows {
        let Ok(edge) = EntityEdge::try_from(row) else { continue };
        if edge.group_id != group_id {
            continue;
        }
        if edge.source_node_uuid == entity.uuid {
            neighbor_uuids.insert(edge.target_node_uuid);
        } else if edge.target_node_uuid == entity.uuid {
            neighbor_uuids.insert(edge.source_node_uuid);
        }
    }

    if neighbor_uuids.is_empty() {
        return Ok(None);
    }

    let member_rows = clients
        .driver
        .find_edges(None, None, Some("HAS_MEMBER"))
        .await
        .map_err(GraphitiError::DatabaseLayer)?;

    let mut community_votes: HashMap<Uuid, u64> = HashMap::new();
    let mut already_member_of: Option<Uuid> = None;
    for row in &member_rows {
        let Ok(edge) = CommunityEdge::try_from(row) else { continue };
        if edge.group_id != group_id {
            continue;
        }
        if edge.target_node_uuid == entity.uuid {
            already_member_of = Some(edge.source_node_uuid);
        }
        if neighbor_uuids.contains(&edge.target_node_uuid) {
            *community_votes.entry(edge.source_node_uuid).or_insert(0) += 1;
        }
    }

    let Some((&modal_community, _)) = community_votes.iter().max_by_key(|(_, &votes)| votes) else {
        return Ok(None);
    };

    if already_member_of == Some(modal_community) {
        return Ok(Some(modal_community));
    }

    let rows = clients
        .driver
        .get_nodes_by_uuids(&[modal_community.to_string()])
        .await
        .map_err(GraphitiError::DatabaseLayer)?;
    let Some(mut community_node) = rows.iter().find_map(|row| CommunityNode::try_from(row).ok()) else {
        return Ok(None);
    };

    let summary = summarize_members(clients, std::slice::from_ref(entity)).await.unwrap_or_default();
    community_node.summary = format!("{} {}", community_node.summary, summary).trim().to_string();
    community_node.name = format!("{}, {}", community_node.name, entity.name);
    community_node.embedding = None;
    community_node.generate_summary_embedding(clients.embedder.as_ref()).await.ok();
    community_node.save(clients.driver.as_ref()).await?;

    let edge = CommunityEdge::new(group_id.to_string(), community_node.uuid, entity.uuid);
    edge.save(clients.driver.as_ref()).await?;

    Ok(Some(community_node.uuid))
}

/// Find entity nodes whose relationships span more than one detected community.
pub async fn find_bridge_nodes(database: &dyn GraphDatabase, group_id: &str) -> Result<Vec<Uuid>, GraphitiError> {
    let communities = detect_communities(database, group_id, CommunityAlgorithm::LabelPropagation).await?;
    let (_, projection) = build_neighbor_projection(database, group_id).await?;

    let mut community_of: HashMap<Uuid, usize> = HashMap::new();
    for (idx, community) in communities.iter().enumerate() {
        for uuid in &community.nodes {
            community_of.insert(*uuid, idx);
        }
    }

    let mut bridges = Vec::new();
    for (uuid, neighbors) in &projection {
        let Some(&own_community) = community_of.get(uuid) else { continue };
        let spans_other = neighbors.keys().any(|n| {
            community_of.get(n).is_some_and(|&c| c != own_community)
        });
        if spans_other {
            bridges.push(*uuid);
        }
    }

    Ok(bridges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_community_stats_default() {
        let stats = CommunityStats::default();
        assert_eq!(stats.node_count, 0);
        assert_eq!(stats.edge_count, 0);
        assert_eq!(stats.density, 0.0);
        assert_eq!(stats.modularity, 0.0);
    }

    #[test]
    fn test_label_propagation_two_triangles() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let d = Uuid::new_v4();
        let e = Uuid::new_v4();
        let f = Uuid::new_v4();
        let g = Uuid::new_v4();

        let entity_uuids = vec![a, b, c, d, e, f, g];
        let mut projection: HashMap<Uuid, HashMap<Uuid, u64>> = HashMap::new();
        let mut link = |x: Uuid, y: Uuid, projection: &mut HashMap<Uuid, HashMap<Uuid, u64>>| {
            *projection.entry(x).or_default().entry(y).or_insert(0) += 1;
            *projection.entry(y).or_default().entry(x).or_insert(0) += 1;
        };
        link(a, b, &mut projection);
        link(a, c, &mut projection);
        link(b, c, &mut projection);
        link(d, e, &mut projection);
        link(d, f, &mut projection);
        link(e, f, &mut projection);

        let index_of: HashMap<Uuid, usize> =
            entity_uuids.iter().enumerate().map(|(i, u)| (*u, i)).collect();
        let mut labels: Vec<usize> = (0..entity_uuids.len()).collect();

        for _ in 0..MAX_ITERATIONS {
            let mut changed = false;
            let snapshot = labels.clone();
            for (i, uuid) in entity_uuids.iter().enumerate() {
                let Some(neighbors) = projection.get(uuid) else { continue };
                if neighbors.is_empty() {
                    continue;
                }
                let mut weight_by_label: HashMap<usize, u64> = HashMap::new();
                for (neighbor_uuid, edge_count) in neighbors {
                    let neighbor_idx = index_of[neighbor_uuid];
                    let neighbor_label = snapshot[neighbor_idx];
                    *weight_by_label.entry(neighbor_label).or_insert(0) += edge_count;
                }
                let max_weight = *weight_by_label.values().max().unwrap();
                let best_label = weight_by_label
                    .iter()
                    .filter(|(_, &w)| w == max_weight)
                    .map(|(&label, _)| label)
                    .max()
                    .unwrap();
                let current_label = snapshot[i];
                let new_label = if max_weight > 1 {
                    best_label
                } else if best_label > current_label {
                    best_label
                } else {
                    current_label
                };
                if new_label != labels[i] {
                    labels[i] = new_label;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        assert_eq!(labels[index_of[&a]], labels[index_of[&b]]);
        assert_eq!(labels[index_of[&b]], labels[index_of[&c]]);
        assert_eq!(labels[index_of[&d]], labels[index_of[&e]]);
        assert_eq!(labels[index_of[&e]], labels[index_of[&f]]);
        assert_ne!(labels[index_of[&a]], labels[index_of[&d]]);
        assert_eq!(labels[index_of[&g]], index_of[&g]);
    }
}
