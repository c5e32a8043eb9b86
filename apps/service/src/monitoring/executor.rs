use std::sync::Arc;
use std::time::Duration;

use super::checker::{ConnectOutcome, Connector};
use super::types::ProbeResult;
use crate::config::MAX_RETRY_COUNT;
use crate::database::models::RegisteredNode;

/// Probe executor - runs connectivity checks with immediate retries.
///
/// Each probe makes up to `retry_count + 1` attempts and stops at the first
/// `up`. Attempts are back to back, each with its own timeout, and the
/// returned latency is that of the last attempt only. Nothing is persisted.
pub struct ProbeExecutor {
    connector: Arc<dyn Connector>,
    timeout: Duration,
    retry_count: u8,
}

impl ProbeExecutor {
    /// `retry_count` is clamped to `0..=2`
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration, retry_count: u8) -> Self {
        Self { connector, timeout, retry_count: retry_count.min(MAX_RETRY_COUNT) }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_count(&self) -> u8 {
        self.retry_count
    }

    /// Probe `node` with the configured timeout
    pub async fn probe(&self, node: &RegisteredNode) -> ProbeResult {
        self.probe_with_timeout(node, self.timeout).await
    }

    pub async fn probe_with_timeout(&self, node: &RegisteredNode, timeout: Duration) -> ProbeResult {
        let attempts = u32::from(self.retry_count) + 1;
        let mut attempt = 1;

        loop {
            let result = self.attempt(node, timeout).await;

            if result.is_up() || attempt >= attempts {
                return result;
            }

            tracing::debug!(
                node_id = %node.node_id,
                attempt,
                error = result.error.as_deref().unwrap_or_default(),
                "Probe failed, retrying"
            );
            attempt += 1;
        }
    }

    async fn attempt(&self, node: &RegisteredNode, timeout: Duration) -> ProbeResult {
        match self.connector.connect(node.host(), node.port(), timeout).await {
            ConnectOutcome::Connected { latency_ms } => ProbeResult::up(&node.node_id, latency_ms),
            ConnectOutcome::Failed { reason, latency_ms } => {
                ProbeResult::down(&node.node_id, latency_ms, reason.reason())
            }
        }
    }
}
