use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::ProbeExecutor;
use crate::config::normalize_interval;
use crate::database::models::{RegisteredNode, round3};
use crate::database::{Repository, RepositoryError};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Read-only view of the scheduler's lifecycle and reliability counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_s: f64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_cycle_duration_ms: Option<f64>,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    pub consecutive_failures: u64,
}

#[derive(Debug, Default)]
struct CycleState {
    last_run: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_cycle_duration_ms: Option<f64>,
    successful_cycles: u64,
    failed_cycles: u64,
    consecutive_failures: u64,
}

struct LoopTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Monitoring scheduler - probes every enabled node on a fixed interval.
///
/// Manual [`run_once`](Self::run_once) calls and the background loop share a
/// single lock, so at most one cycle runs at a time. Cycle failures never end
/// the loop; they are only counted and kept in `last_error`.
pub struct MonitoringScheduler {
    repository: Arc<dyn Repository>,
    executor: Arc<ProbeExecutor>,
    interval: Duration,
    run_lock: Mutex<()>,
    state: StdMutex<CycleState>,
    task: StdMutex<Option<LoopTask>>,
}

impl MonitoringScheduler {
    /// `interval_seconds` is clamped to at least one second
    pub fn new(
        repository: Arc<dyn Repository>,
        executor: Arc<ProbeExecutor>,
        interval_seconds: f64,
    ) -> Self {
        Self {
            repository,
            executor,
            interval: Duration::try_from_secs_f64(normalize_interval(interval_seconds))
                .unwrap_or(Duration::MAX),
            run_lock: Mutex::new(()),
            state: StdMutex::new(CycleState::default()),
            task: StdMutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn state(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn task(&self) -> MutexGuard<'_, Option<LoopTask>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn running(&self) -> bool {
        self.task().as_ref().is_some_and(|task| !task.handle.is_finished())
    }

    /// Launch the background loop. Does nothing if it is already running.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task();
        if task.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run_loop(token.clone()));
        *task = Some(LoopTask { token, handle });

        info!(interval_s = self.interval.as_secs_f64(), "Scheduler started");
    }

    /// Cancel the background loop and wait for it to exit.
    ///
    /// An idle wait is interrupted immediately; a cycle already in flight is
    /// allowed to finish. Does nothing if the loop is not running.
    pub async fn stop(&self) {
        let Some(LoopTask { token, handle }) = self.task().take() else {
            return;
        };

        token.cancel();
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!("Scheduler loop ended abnormally: {e}"),
        }

        info!("Scheduler stopped");
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            if token.is_cancelled() {
                break;
            }

            if let Err(e) = self.run_once(None).await {
                warn!("Scheduled probe cycle failed: {e}");
            }
        }
    }

    /// Run one probe cycle and persist its results.
    ///
    /// With `node_id` only that node is probed, whether or not it is enabled;
    /// otherwise every enabled node is. Returns the number of results stored.
    pub async fn run_once(&self, node_id: Option<&str>) -> Result<usize, SchedulerError> {
        let _guard = self.run_lock.lock().await;
        let start = Instant::now();

        let outcome = self.cycle(node_id).await;
        let duration_ms = round3(start.elapsed().as_secs_f64() * 1000.0);

        let mut state = self.state();
        state.last_cycle_duration_ms = Some(duration_ms);
        match &outcome {
            Ok(count) => {
                state.last_run = Some(Utc::now());
                state.last_error = None;
                state.successful_cycles += 1;
                state.consecutive_failures = 0;
                debug!(results = count, duration_ms, "Probe cycle complete");
            }
            Err(e) => {
                state.last_error = Some(e.to_string());
                state.failed_cycles += 1;
                state.consecutive_failures += 1;
            }
        }

        outcome
    }

    async fn cycle(&self, node_id: Option<&str>) -> Result<usize, SchedulerError> {
        let targets = self.targets(node_id).await?;

        for node in &targets {
            let result = self.executor.probe(node).await;
            self.repository.add_probe_result(&result).await?;
        }

        Ok(targets.len())
    }

    async fn targets(&self, node_id: Option<&str>) -> Result<Vec<RegisteredNode>, SchedulerError> {
        match node_id {
            Some(id) => match self.repository.get_node(id).await? {
                Some(node) => Ok(vec![node]),
                None => Err(SchedulerError::NodeNotFound(id.to_string())),
            },
            None => Ok(self.repository.list_enabled_nodes().await?),
        }
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.state().last_run
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    pub fn last_cycle_duration_ms(&self) -> Option<f64> {
        self.state().last_cycle_duration_ms
    }

    pub fn successful_cycles(&self) -> u64 {
        self.state().successful_cycles
    }

    pub fn failed_cycles(&self) -> u64 {
        self.state().failed_cycles
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.state().consecutive_failures
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self.running();
        let state = self.state();

        SchedulerStatus {
            running,
            interval_s: self.interval.as_secs_f64(),
            last_run: state.last_run,
            last_error: state.last_error.clone(),
            last_cycle_duration_ms: state.last_cycle_duration_ms,
            successful_cycles: state.successful_cycles,
            failed_cycles: state.failed_cycles,
            consecutive_failures: state.consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{Node, ProbeResultsSummary, ResultFilter};
    use crate::database::{MemoryRepository, error};
    use crate::monitoring::checker::{BlockingConnector, ConnectOutcome, Connector};
    use crate::monitoring::types::ProbeResult;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn always_up() -> Arc<dyn Connector> {
        Arc::new(BlockingConnector::new(|_, _, _| ConnectOutcome::Connected { latency_ms: 1.0 }))
    }

    fn scheduler(
        repository: Arc<dyn Repository>,
        connector: Arc<dyn Connector>,
        interval: f64,
    ) -> Arc<MonitoringScheduler> {
        let executor = Arc::new(ProbeExecutor::new(connector, Duration::from_millis(100), 0));
        Arc::new(MonitoringScheduler::new(repository, executor, interval))
    }

    async fn seeded_memory(enabled: &[bool]) -> (Arc<MemoryRepository>, Vec<RegisteredNode>) {
        let repository = Arc::new(MemoryRepository::new());
        let mut nodes = Vec::new();
        for (i, enabled) in enabled.iter().enumerate() {
            let port = 8000 + i as u16;
            let node = Node::new(&format!("node-{i}"), "127.0.0.1", port, "eu", *enabled).unwrap();
            nodes.push(repository.add_node(node).await.unwrap());
        }
        (repository, nodes)
    }

    /// Delegates to a memory store, failing result writes while `failing` is set
    struct FlakyRepository {
        inner: MemoryRepository,
        failing: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Repository for FlakyRepository {
        async fn add_node(&self, node: Node) -> error::Result<RegisteredNode> {
            self.inner.add_node(node).await
        }

        async fn list_nodes(&self) -> error::Result<Vec<RegisteredNode>> {
            self.inner.list_nodes().await
        }

        async fn get_node(&self, node_id: &str) -> error::Result<Option<RegisteredNode>> {
            self.inner.get_node(node_id).await
        }

        async fn list_enabled_nodes(&self) -> error::Result<Vec<RegisteredNode>> {
            self.inner.list_enabled_nodes().await
        }

        async fn add_probe_result(&self, result: &ProbeResult) -> error::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RepositoryError::Unavailable("disk full".into()));
            }
            self.inner.add_probe_result(result).await
        }

        async fn list_probe_results(
            &self,
            filter: &ResultFilter,
            limit: Option<usize>,
        ) -> error::Result<Vec<ProbeResult>> {
            self.inner.list_probe_results(filter, limit).await
        }

        async fn summarize_probe_results(
            &self,
            filter: &ResultFilter,
        ) -> error::Result<ProbeResultsSummary> {
            self.inner.summarize_probe_results(filter).await
        }

        async fn count_probe_results(&self) -> error::Result<u64> {
            self.inner.count_probe_results().await
        }

        fn last_error(&self) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn test_run_once_probes_enabled_nodes() {
        let (repository, _) = seeded_memory(&[true, false, true]).await;
        let scheduler = scheduler(repository.clone(), always_up(), 60.0);

        assert_eq!(scheduler.run_once(None).await.unwrap(), 2);
        assert_eq!(repository.count_probe_results().await.unwrap(), 2);

        let status = scheduler.status();
        assert!(!status.running);
        assert!(status.last_run.is_some());
        assert_eq!(status.last_error, None);
        assert_eq!(status.successful_cycles, 1);
        assert!(status.last_cycle_duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_run_once_single_node_ignores_enabled_flag() {
        let (repository, nodes) = seeded_memory(&[true, false]).await;
        let scheduler = scheduler(repository.clone(), always_up(), 60.0);

        assert_eq!(scheduler.run_once(Some(&nodes[1].node_id)).await.unwrap(), 1);

        let stored = repository.list_probe_results(&ResultFilter::new(), None).await.unwrap();
        assert_eq!(stored[0].node_id, nodes[1].node_id);
    }

    #[tokio::test]
    async fn test_unknown_node_is_reported() {
        let (repository, _) = seeded_memory(&[true]).await;
        let scheduler = scheduler(repository, always_up(), 60.0);

        let err = scheduler.run_once(Some("missing")).await.unwrap_err();

        assert!(matches!(err, SchedulerError::NodeNotFound(ref id) if id == "missing"));
        assert_eq!(scheduler.failed_cycles(), 1);
        assert_eq!(scheduler.last_error().as_deref(), Some("Node not found: missing"));
    }

    #[tokio::test]
    async fn test_empty_cycle_succeeds() {
        let scheduler = scheduler(Arc::new(MemoryRepository::new()), always_up(), 60.0);

        assert_eq!(scheduler.run_once(None).await.unwrap(), 0);
        assert_eq!(scheduler.successful_cycles(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cycles_do_not_overlap() {
        let (repository, _) = seeded_memory(&[true]).await;
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let connector = {
            let active = active.clone();
            let peak = peak.clone();
            BlockingConnector::new(move |_, _, _| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                active.fetch_sub(1, Ordering::SeqCst);
                ConnectOutcome::Connected { latency_ms: 100.0 }
            })
        };
        let scheduler = scheduler(repository.clone(), Arc::new(connector), 60.0);

        let (first, second) = tokio::join!(scheduler.run_once(None), scheduler.run_once(None));

        assert_eq!(first.unwrap() + second.unwrap(), 2);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.successful_cycles(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_counted_and_reset() {
        let repository = Arc::new(FlakyRepository {
            inner: MemoryRepository::new(),
            failing: AtomicBool::new(true),
        });
        repository.add_node(Node::new("n", "127.0.0.1", 80, "eu", true).unwrap()).await.unwrap();
        let scheduler = scheduler(repository.clone(), always_up(), 60.0);

        for _ in 0..2 {
            let err = scheduler.run_once(None).await.unwrap_err();
            assert!(matches!(err, SchedulerError::Repository(RepositoryError::Unavailable(_))));
        }

        let status = scheduler.status();
        assert_eq!(status.failed_cycles, 2);
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.last_run, None);
        assert_eq!(status.last_error.as_deref(), Some("Storage unavailable: disk full"));

        repository.failing.store(false, Ordering::SeqCst);
        scheduler.run_once(None).await.unwrap();

        let status = scheduler.status();
        assert_eq!(status.successful_cycles, 1);
        assert_eq!(status.failed_cycles, 2);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn test_stop_interrupts_long_interval() {
        let scheduler = scheduler(Arc::new(MemoryRepository::new()), always_up(), 30.0);

        scheduler.start();
        scheduler.start();
        assert!(scheduler.running());

        let started = Instant::now();
        scheduler.stop().await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!scheduler.running());
        assert_eq!(scheduler.successful_cycles(), 0);

        // Stopping twice is harmless
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_loop_runs_cycles_on_interval() {
        let (repository, _) = seeded_memory(&[true]).await;
        let scheduler = scheduler(repository.clone(), always_up(), 1.0);

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.stop().await;

        let stored = repository.count_probe_results().await.unwrap();
        assert!(stored >= 2, "expected at least two cycles, got {stored}");
        assert_eq!(scheduler.successful_cycles(), stored);
    }

    #[tokio::test]
    async fn test_loop_survives_failing_cycles() {
        let repository = Arc::new(FlakyRepository {
            inner: MemoryRepository::new(),
            failing: AtomicBool::new(true),
        });
        repository.add_node(Node::new("n", "127.0.0.1", 80, "eu", true).unwrap()).await.unwrap();
        let scheduler = scheduler(repository, always_up(), 1.0);

        scheduler.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(scheduler.running());
        assert!(scheduler.consecutive_failures() >= 2);
        scheduler.stop().await;
    }

    #[test]
    fn test_interval_is_clamped() {
        let s = scheduler(Arc::new(MemoryRepository::new()), always_up(), 0.2);
        assert_eq!(s.interval(), Duration::from_secs(1));

        let s = scheduler(Arc::new(MemoryRepository::new()), always_up(), -5.0);
        assert_eq!(s.interval(), Duration::from_secs(60));
    }
}
