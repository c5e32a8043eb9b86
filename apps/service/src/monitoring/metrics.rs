use chrono::{DateTime, Utc};
use serde::Serialize;

use super::scheduler::{MonitoringScheduler, SchedulerStatus};
use crate::database::models::round3;
use crate::database::{Repository, RepositoryError};

pub const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Point-in-time service counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceMetrics {
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_s: f64,
    pub nodes_total: usize,
    pub nodes_enabled: usize,
    pub probe_results_total: u64,
    pub last_repository_error: Option<String>,
    pub scheduler: SchedulerStatus,
}

impl ServiceMetrics {
    pub async fn collect(
        repository: &dyn Repository,
        scheduler: &MonitoringScheduler,
        started_at: DateTime<Utc>,
    ) -> Result<Self, RepositoryError> {
        let nodes = repository.list_nodes().await?;
        let probe_results_total = repository.count_probe_results().await?;
        let uptime = Utc::now().signed_duration_since(started_at);

        Ok(Self {
            service: SERVICE_NAME,
            version: SERVICE_VERSION,
            uptime_s: round3(uptime.num_milliseconds().max(0) as f64 / 1000.0),
            nodes_total: nodes.len(),
            nodes_enabled: nodes.iter().filter(|node| node.enabled()).count(),
            probe_results_total,
            last_repository_error: repository.last_error(),
            scheduler: scheduler.status(),
        })
    }
}
