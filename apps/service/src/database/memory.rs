use async_trait::async_trait;
use tokio::sync::RwLock;

use super::error::Result;
use super::models::{Node, ProbeResultsSummary, RegisteredNode, ResultFilter};
use super::repository::Repository;
use crate::monitoring::types::ProbeResult;

#[derive(Default)]
struct MemoryState {
    nodes: Vec<RegisteredNode>,
    results: Vec<ProbeResult>,
}

/// Process-local repository. Contents are lost when the process exits.
///
/// Unlike [`LibsqlRepository`](super::LibsqlRepository) this store does not
/// reject nodes sharing the same host, port and region.
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn add_node(&self, node: Node) -> Result<RegisteredNode> {
        let registered = RegisteredNode::register(node);
        self.state.write().await.nodes.push(registered.clone());
        Ok(registered)
    }

    async fn list_nodes(&self) -> Result<Vec<RegisteredNode>> {
        Ok(self.state.read().await.nodes.clone())
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<RegisteredNode>> {
        let state = self.state.read().await;
        Ok(state.nodes.iter().find(|node| node.node_id == node_id).cloned())
    }

    async fn list_enabled_nodes(&self) -> Result<Vec<RegisteredNode>> {
        let state = self.state.read().await;
        Ok(state.nodes.iter().filter(|node| node.enabled()).cloned().collect())
    }

    async fn add_probe_result(&self, result: &ProbeResult) -> Result<()> {
        self.state.write().await.results.push(result.clone());
        Ok(())
    }

    async fn list_probe_results(
        &self,
        filter: &ResultFilter,
        limit: Option<usize>,
    ) -> Result<Vec<ProbeResult>> {
        let state = self.state.read().await;

        // Newest insertion first, then a stable sort keeps that order for equal timestamps
        let mut matched: Vec<ProbeResult> =
            state.results.iter().rev().filter(|result| filter.matches(result)).cloned().collect();
        matched.sort_by(|a, b| b.checked_at.cmp(&a.checked_at));

        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn summarize_probe_results(&self, filter: &ResultFilter) -> Result<ProbeResultsSummary> {
        let state = self.state.read().await;
        Ok(ProbeResultsSummary::from_results(
            state.results.iter().filter(|result| filter.matches(result)),
        ))
    }

    async fn count_probe_results(&self) -> Result<u64> {
        Ok(self.state.read().await.results.len() as u64)
    }

    fn last_error(&self) -> Option<String> {
        None
    }
}
