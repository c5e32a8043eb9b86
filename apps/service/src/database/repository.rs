use async_trait::async_trait;

use super::error::Result;
use super::models::{Node, ProbeResultsSummary, RegisteredNode, ResultFilter};
use crate::monitoring::types::ProbeResult;

/// Storage for nodes and probe results.
///
/// Every implementation must give identical read semantics: node listings in
/// insertion order, result listings newest first by `checked_at` with ties
/// broken by the most recent insertion.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Register a node and assign it an identifier
    async fn add_node(&self, node: Node) -> Result<RegisteredNode>;

    /// All nodes, in insertion order
    async fn list_nodes(&self) -> Result<Vec<RegisteredNode>>;

    /// Look a node up by identifier
    async fn get_node(&self, node_id: &str) -> Result<Option<RegisteredNode>>;

    /// Nodes with `enabled` set, in insertion order
    async fn list_enabled_nodes(&self) -> Result<Vec<RegisteredNode>>;

    /// Append a probe result
    async fn add_probe_result(&self, result: &ProbeResult) -> Result<()>;

    /// Results matching `filter`, newest first, truncated to `limit`
    async fn list_probe_results(
        &self,
        filter: &ResultFilter,
        limit: Option<usize>,
    ) -> Result<Vec<ProbeResult>>;

    /// Aggregate over the results matching `filter`
    async fn summarize_probe_results(&self, filter: &ResultFilter) -> Result<ProbeResultsSummary>;

    /// Total number of stored results
    async fn count_probe_results(&self) -> Result<u64>;

    /// Most recent internal storage error, if any
    fn last_error(&self) -> Option<String>;
}
