//! The dependency service: edge lifecycle, cycle prevention, graph
//! queries, and derived freshness.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use grid_core::GridError;
use grid_data::{DataError, DependencyEdge, Repositories, StateRecord};
use grid_graph::{DependencyGraph, Direction, EdgeStatus, Freshness, GraphEdge, GraphError};

/// Outcome of `add_dependency`; `already_exists` marks the idempotent
/// case where the (from, output, to) triple was already present.
#[derive(Debug, Clone)]
pub struct AddDependencyResult {
    pub edge: DependencyEdge,
    pub already_exists: bool,
}

/// An edge with both endpoint logic ids eagerly loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSummary {
    pub edge: DependencyEdge,
    pub from_logic_id: String,
    pub to_logic_id: String,
}

/// One incoming edge in a status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingEdgeReport {
    pub edge_id: Uuid,
    pub from_state: Uuid,
    pub from_logic_id: String,
    pub from_output: String,
    pub to_input_name: String,
    pub status: EdgeStatus,
    pub in_digest: Option<String>,
    pub out_digest: Option<String>,
    pub last_in_at: Option<chrono::DateTime<Utc>>,
    pub last_out_at: Option<chrono::DateTime<Utc>>,
}

/// Aggregate freshness of a state plus its incoming edges, ordered
/// pending → unknown → dirty → clean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateStatusReport {
    pub guid: Uuid,
    pub logic_id: String,
    pub freshness: String,
    pub incoming: Vec<IncomingEdgeReport>,
}

pub struct DependencyService {
    repos: Repositories,
}

impl DependencyService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Declare an output→input dependency. Refs are GUIDs or logic ids;
    /// the input name defaults to `slug(producer)_slug(output)`. Cycles
    /// are predicted before any row is written; a duplicate triple
    /// returns the existing edge.
    pub async fn add_dependency(
        &self,
        from_ref: &str,
        from_output: &str,
        to_ref: &str,
        to_input_name: Option<&str>,
        mock_value: Option<serde_json::Value>,
    ) -> Result<AddDependencyResult, GridError> {
        if from_output.is_empty() {
            return Err(GridError::invalid_argument("from_output is empty"));
        }
        let from = self.resolve(from_ref).await?;
        let to = self.resolve(to_ref).await?;
        if from.guid == to.guid {
            return Err(GridError::invalid_argument(format!(
                "state '{}' cannot depend on itself",
                from.logic_id
            )));
        }

        if let Some(existing) = self
            .repos
            .edges
            .find(from.guid, from_output, to.guid)
            .await?
        {
            return Ok(AddDependencyResult {
                edge: existing,
                already_exists: true,
            });
        }

        let graph = self.graph().await?;
        if graph.would_create_cycle(from.guid, to.guid) {
            return Err(GridError::cycle_detected(format!(
                "adding '{}' -> '{}' would close a dependency cycle",
                from.logic_id, to.logic_id
            )));
        }

        let to_input_name = match to_input_name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{}_{}", slug(&from.logic_id), slug(from_output)),
        };
        let now = Utc::now();
        let (status, in_digest) = match &mock_value {
            Some(mock) => (EdgeStatus::Mock, Some(grid_fingerprint::compute(mock))),
            None => (EdgeStatus::Pending, None),
        };
        let edge = DependencyEdge {
            id: Uuid::now_v7(),
            from_state: from.guid,
            from_output: from_output.to_string(),
            to_state: to.guid,
            to_input_name,
            status,
            in_digest,
            out_digest: None,
            mock_value,
            last_in_at: None,
            last_out_at: None,
            created_at: now,
            updated_at: now,
        };
        match self.repos.edges.insert(&edge).await {
            Ok(()) => {
                info!(
                    from = %from.logic_id, output = from_output, to = %to.logic_id,
                    status = %edge.status, "dependency added"
                );
                Ok(AddDependencyResult {
                    edge,
                    already_exists: false,
                })
            }
            // Lost a race with an identical declaration; return theirs.
            Err(DataError::Conflict(_)) => {
                let existing = self
                    .repos
                    .edges
                    .find(from.guid, from_output, to.guid)
                    .await?
                    .ok_or_else(|| GridError::internal("conflicting edge vanished"))?;
                Ok(AddDependencyResult {
                    edge: existing,
                    already_exists: true,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_edge(&self, edge_id: Uuid) -> Result<DependencyEdge, GridError> {
        self.repos
            .edges
            .get(edge_id)
            .await?
            .ok_or_else(|| GridError::not_found(format!("edge {edge_id}")))
    }

    pub async fn remove_dependency(&self, edge_id: Uuid) -> Result<(), GridError> {
        if !self.repos.edges.delete(edge_id).await? {
            return Err(GridError::not_found(format!("edge {edge_id}")));
        }
        info!(%edge_id, "dependency removed");
        Ok(())
    }

    /// Incoming edges of a state (what it consumes).
    pub async fn list_dependencies(&self, state_ref: &str) -> Result<Vec<EdgeSummary>, GridError> {
        let state = self.resolve(state_ref).await?;
        let edges = self.repos.edges.list_incoming(state.guid).await?;
        self.summarize(edges).await
    }

    /// Outgoing edges of a state (who consumes it).
    pub async fn list_dependents(&self, state_ref: &str) -> Result<Vec<EdgeSummary>, GridError> {
        let state = self.resolve(state_ref).await?;
        let edges = self.repos.edges.list_outgoing(state.guid).await?;
        self.summarize(edges).await
    }

    pub async fn search_by_output(&self, output_key: &str) -> Result<Vec<EdgeSummary>, GridError> {
        let edges = self.repos.edges.search_by_output(output_key).await?;
        self.summarize(edges).await
    }

    /// Layered topological order from a state. Direction is
    /// case-insensitive, defaulting to downstream.
    pub async fn topological_order(
        &self,
        state_ref: &str,
        direction: Option<&str>,
    ) -> Result<Vec<Vec<Uuid>>, GridError> {
        let state = self.resolve(state_ref).await?;
        let direction = match direction {
            None => Direction::default(),
            Some(text) if text.is_empty() => Direction::default(),
            Some(text) => text
                .parse::<Direction>()
                .map_err(|e| GridError::invalid_argument(e.to_string()))?,
        };
        let graph = self.graph().await?;
        graph.layers(state.guid, direction).map_err(graph_error)
    }

    /// The consumer acknowledges the producer's current output: the edge
    /// digest pair converges and the edge goes clean.
    pub async fn mark_consumed(&self, edge_id: Uuid) -> Result<DependencyEdge, GridError> {
        let mut edge = self
            .repos
            .edges
            .get(edge_id)
            .await?
            .ok_or_else(|| GridError::not_found(format!("edge {edge_id}")))?;
        let now = Utc::now();
        match edge.status {
            EdgeStatus::Mock => {
                edge.last_in_at = Some(now);
            }
            _ => {
                let Some(out_digest) = edge.out_digest.clone() else {
                    return Err(GridError::failed_precondition(format!(
                        "producer has not published output '{}' yet",
                        edge.from_output
                    )));
                };
                edge.in_digest = Some(out_digest);
                edge.last_in_at = Some(now);
                edge.status = EdgeStatus::Clean;
            }
        }
        edge.updated_at = now;
        self.repos.edges.update(&edge).await?;
        Ok(edge)
    }

    /// Incoming edges with producer logic ids, ordered by reporting rank,
    /// plus the transitive freshness classification.
    pub async fn state_status(&self, state_ref: &str) -> Result<StateStatusReport, GridError> {
        let state = self.resolve(state_ref).await?;
        let mut incoming = self.repos.edges.list_incoming(state.guid).await?;
        incoming.sort_by_key(|e| (e.status.report_rank(), e.created_at));

        let mut reports = Vec::with_capacity(incoming.len());
        for edge in incoming {
            let from_logic_id = self
                .repos
                .states
                .get(edge.from_state)
                .await?
                .map(|s| s.logic_id)
                .unwrap_or_else(|| edge.from_state.to_string());
            reports.push(IncomingEdgeReport {
                edge_id: edge.id,
                from_state: edge.from_state,
                from_logic_id,
                from_output: edge.from_output,
                to_input_name: edge.to_input_name,
                status: edge.status,
                in_digest: edge.in_digest,
                out_digest: edge.out_digest,
                last_in_at: edge.last_in_at,
                last_out_at: edge.last_out_at,
            });
        }

        let freshness = self.graph().await?.freshness(state.guid);
        Ok(StateStatusReport {
            guid: state.guid,
            logic_id: state.logic_id,
            freshness: freshness.as_str().to_string(),
            incoming: reports,
        })
    }

    /// Transitive freshness alone, for callers that don't need the report.
    pub async fn freshness(&self, state_ref: &str) -> Result<Freshness, GridError> {
        let state = self.resolve(state_ref).await?;
        Ok(self.graph().await?.freshness(state.guid))
    }

    async fn resolve(&self, state_ref: &str) -> Result<StateRecord, GridError> {
        if let Ok(guid) = state_ref.parse::<Uuid>() {
            if let Some(state) = self.repos.states.get(guid).await? {
                return Ok(state);
            }
        }
        self.repos
            .states
            .get_by_logic_id(state_ref)
            .await?
            .ok_or_else(|| GridError::not_found(format!("state '{state_ref}'")))
    }

    /// Rebuild the kernel graph from the full edge set. Cheap at the
    /// expected corpus size; swap in an incremental build if that changes.
    async fn graph(&self) -> Result<DependencyGraph, GridError> {
        let edges = self.repos.edges.list_all().await?;
        DependencyGraph::build(edges.iter().map(|e| GraphEdge {
            from: e.from_state,
            to: e.to_state,
            status: e.status,
        }))
        .map_err(graph_error)
    }

    async fn summarize(
        &self,
        edges: Vec<DependencyEdge>,
    ) -> Result<Vec<EdgeSummary>, GridError> {
        let mut summaries = Vec::with_capacity(edges.len());
        for edge in edges {
            let from_logic_id = self
                .repos
                .states
                .get(edge.from_state)
                .await?
                .map(|s| s.logic_id)
                .unwrap_or_else(|| edge.from_state.to_string());
            let to_logic_id = self
                .repos
                .states
                .get(edge.to_state)
                .await?
                .map(|s| s.logic_id)
                .unwrap_or_else(|| edge.to_state.to_string());
            summaries.push(EdgeSummary {
                edge,
                from_logic_id,
                to_logic_id,
            });
        }
        Ok(summaries)
    }
}

fn graph_error(err: GraphError) -> GridError {
    match err {
        GraphError::CycleDetected => GridError::cycle_detected("dependency graph has a cycle"),
        GraphError::SelfLoop(guid) => {
            GridError::invalid_argument(format!("self-loop on state {guid}"))
        }
        GraphError::InvalidDirection(_) => GridError::invalid_argument(err.to_string()),
    }
}

/// Lowercase a name into `[a-z0-9_]`, collapsing runs of other characters
/// into single underscores.
fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_sep = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep && !out.is_empty() {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::slug;

    #[test]
    fn slug_lowercases_and_collapses() {
        assert_eq!(slug("Prod-Network"), "prod_network");
        assert_eq!(slug("vpc id"), "vpc_id");
        assert_eq!(slug("a--b__c"), "a_b_c");
        assert_eq!(slug("--edge--"), "edge");
        assert_eq!(slug("subnet_ids"), "subnet_ids");
    }
}
