pub mod checker;
/// Monitoring engine module - probes registered nodes
///
/// This module is responsible for:
/// - Measuring TCP connectivity through a pluggable connect primitive
/// - Retrying failed probes immediately, a bounded number of times
/// - Scheduling probe cycles and persisting their results
/// - Validating node fields
pub mod executor;
pub mod metrics;
pub mod scheduler;
pub mod types;
pub mod validation;

pub use checker::{BlockingConnector, ConnectFailure, ConnectOutcome, Connector, TcpConnector};
pub use executor::ProbeExecutor;
pub use metrics::ServiceMetrics;
pub use scheduler::{MonitoringScheduler, SchedulerError, SchedulerStatus};
pub use types::{ProbeResult, ProbeStatus};
