use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use libsql::params::Params;
use libsql::{Connection, Row, Value, params};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::error::{RepositoryError, Result};
use super::migrations::{self, MigrationError};
use super::models::{Node, ProbeResultsSummary, RegisteredNode, ResultFilter};
use super::repository::Repository;
use crate::monitoring::types::ProbeResult;
use crate::pool::{LibsqlPool, build_pool};

/// Attempts per operation when the database reports lock contention
pub const MAX_ATTEMPTS: u32 = 3;

/// Pause between contended attempts
pub const RETRY_BACKOFF: Duration = Duration::from_millis(50);

const POOL_SIZE: usize = 4;

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CONSTRAINT: i32 = 19;

const NODE_COLUMNS: &str = "node_id, name, host, port, region, enabled";
const RESULT_COLUMNS: &str = "node_id, status, latency_ms, checked_at_ns, error";

/// Errors raised inside a single storage attempt
#[derive(Debug, Error)]
enum StoreError {
    #[error(transparent)]
    Sql(#[from] libsql::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// How the retry loop should react to a failed attempt
#[derive(Debug, PartialEq, Eq)]
enum Failure {
    Transient(String),
    Duplicate,
    Schema { found: i64, supported: i64 },
    Fatal(String),
}

fn classify_sql(error: &libsql::Error) -> Failure {
    let message = error.to_string();

    if let libsql::Error::SqliteFailure(code, detail) = error {
        match code & 0xff {
            SQLITE_BUSY | SQLITE_LOCKED => return Failure::Transient(detail.clone()),
            SQLITE_CONSTRAINT if detail.contains("UNIQUE") => return Failure::Duplicate,
            _ => {}
        }
    }

    if message.contains("UNIQUE constraint failed") {
        Failure::Duplicate
    } else if message.contains("database is locked") || message.contains("database table is locked")
    {
        Failure::Transient(message)
    } else {
        Failure::Fatal(message)
    }
}

impl StoreError {
    fn classify(&self) -> Failure {
        match self {
            StoreError::Sql(error) => classify_sql(error),
            StoreError::Migration(MigrationError::Store(error)) => classify_sql(error),
            StoreError::Migration(MigrationError::Incompatible { found, supported }) => {
                Failure::Schema { found: *found, supported: *supported }
            }
            StoreError::Corrupt(message) => Failure::Fatal(message.clone()),
        }
    }
}

/// Nanoseconds since the Unix epoch, or an error past the year 2262
fn to_nanos(timestamp: DateTime<Utc>) -> Result<i64> {
    timestamp.timestamp_nanos_opt().ok_or(RepositoryError::InvalidTimestamp(timestamp))
}

/// Like [`to_nanos`], saturating instead of failing; used for query bounds
fn bound_nanos(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_nanos_opt().unwrap_or(if timestamp.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

fn where_clause(filter: &ResultFilter) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if let Some(node_id) = &filter.node_id {
        conditions.push("node_id = ?");
        values.push(Value::Text(node_id.clone()));
    }
    if let Some(from) = filter.from {
        conditions.push("checked_at_ns >= ?");
        values.push(Value::Integer(bound_nanos(from)));
    }
    if let Some(to) = filter.to {
        conditions.push("checked_at_ns <= ?");
        values.push(Value::Integer(bound_nanos(to)));
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), values)
    }
}

fn row_to_node(row: &Row) -> std::result::Result<RegisteredNode, StoreError> {
    let port: i64 = row.get(3)?;
    let port = u16::try_from(port)
        .map_err(|_| StoreError::Corrupt(format!("port {port} out of range")))?;

    Ok(RegisteredNode {
        node_id: row.get(0)?,
        node: Node {
            name: row.get(1)?,
            host: row.get(2)?,
            port,
            region: row.get(4)?,
            enabled: row.get::<i64>(5)? != 0,
        },
    })
}

fn row_to_result(row: &Row) -> std::result::Result<ProbeResult, StoreError> {
    let status: String = row.get(1)?;

    Ok(ProbeResult {
        node_id: row.get(0)?,
        status: status.parse().map_err(StoreError::Corrupt)?,
        latency_ms: row.get(2)?,
        checked_at: Utc.timestamp_nanos(row.get::<i64>(3)?),
        error: row.get(4)?,
    })
}

/// Durable repository on a local libsql (SQLite) database file.
///
/// The schema is migrated on [`open`](Self::open). Nodes are unique per
/// (host, port, region). When `retention_per_node` is non-zero only that many
/// of the newest results are kept for each node.
///
/// Queries run on the calling task; libsql's local driver has no async I/O.
pub struct LibsqlRepository {
    pool: LibsqlPool,
    path: PathBuf,
    retention_per_node: u32,
    write_lock: Mutex<()>,
    last_error: StdMutex<Option<String>>,
}

impl fmt::Debug for LibsqlRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibsqlRepository")
            .field("path", &self.path)
            .field("retention_per_node", &self.retention_per_node)
            .finish()
    }
}

impl LibsqlRepository {
    /// Open the database at `path`, creating it and its parent directory if
    /// needed, and migrate it to the current schema.
    pub async fn open(path: impl AsRef<Path>, retention_per_node: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                RepositoryError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let database = libsql::Builder::new_local(&path).build().await.map_err(|e| {
            RepositoryError::Unavailable(format!("cannot open {}: {e}", path.display()))
        })?;
        let pool = build_pool(database, POOL_SIZE)
            .map_err(|e| RepositoryError::Unavailable(format!("connection pool: {e}")))?;

        let repository = Self {
            pool,
            path,
            retention_per_node,
            write_lock: Mutex::new(()),
            last_error: StdMutex::new(None),
        };

        let version = repository.initialize().await?;
        info!(
            path = %repository.path.display(),
            schema_version = version,
            retention_per_node,
            "Opened probe database"
        );

        Ok(repository)
    }

    /// Apply pending migrations, returning the schema version
    pub async fn initialize(&self) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        self.with_retry("initialize", |conn| async move {
            Ok(migrations::run_migrations(&conn).await?)
        })
        .await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn retention_per_node(&self) -> u32 {
        self.retention_per_node
    }

    fn record_error(&self, message: &str) {
        let mut last_error = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
        *last_error = Some(message.to_string());
    }

    /// Run `op` on a pooled connection, retrying while the database is locked.
    ///
    /// Gives up with [`RepositoryError::Unavailable`] after [`MAX_ATTEMPTS`]
    /// or on the first non-transient failure, remembering the message for
    /// [`Repository::last_error`].
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: Fn(Connection) -> Fut,
        Fut: Future<Output = std::result::Result<T, StoreError>>,
    {
        let mut attempt = 1;

        loop {
            let outcome = match self.pool.get().await {
                Ok(conn) => op(Connection::clone(&conn)).await.map_err(|e| e.classify()),
                Err(e) => Err(Failure::Fatal(format!("connection pool: {e}"))),
            };

            let message = match outcome {
                Ok(value) => return Ok(value),
                Err(Failure::Duplicate) => return Err(RepositoryError::Duplicate),
                Err(Failure::Schema { found, supported }) => {
                    let error = RepositoryError::SchemaIncompatible { found, supported };
                    self.record_error(&error.to_string());
                    return Err(error);
                }
                Err(Failure::Transient(message)) if attempt < MAX_ATTEMPTS => {
                    warn!(operation, attempt, "Database busy, retrying: {}", message);
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    attempt += 1;
                    continue;
                }
                Err(Failure::Transient(message)) => {
                    format!("{operation} failed after {attempt} attempts: {message}")
                }
                Err(Failure::Fatal(message)) => format!("{operation} failed: {message}"),
            };

            error!(operation, "{}", message);
            self.record_error(&message);
            return Err(RepositoryError::Unavailable(message));
        }
    }
}

#[async_trait]
impl Repository for LibsqlRepository {
    async fn add_node(&self, node: Node) -> Result<RegisteredNode> {
        let registered = RegisteredNode::register(node);
        let created_at = Utc::now().timestamp();
        let stored = &registered;

        let _guard = self.write_lock.lock().await;
        self.with_retry("add_node", move |conn| async move {
            conn.execute(
                "INSERT INTO nodes (node_id, name, host, port, region, enabled, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    stored.node_id.as_str(),
                    stored.node.name.as_str(),
                    stored.node.host.as_str(),
                    i64::from(stored.node.port),
                    stored.node.region.as_str(),
                    if stored.node.enabled { 1 } else { 0 },
                    created_at
                ],
            )
            .await?;
            Ok(())
        })
        .await?;

        debug!(node_id = %registered.node_id, "Registered node");
        Ok(registered)
    }

    async fn list_nodes(&self) -> Result<Vec<RegisteredNode>> {
        self.with_retry("list_nodes", |conn| async move {
            let mut rows = conn
                .query(&format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY id ASC"), ())
                .await?;
            let mut nodes = Vec::new();
            while let Some(row) = rows.next().await? {
                nodes.push(row_to_node(&row)?);
            }
            Ok(nodes)
        })
        .await
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<RegisteredNode>> {
        self.with_retry("get_node", move |conn| async move {
            let mut rows = conn
                .query(
                    &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE node_id = ?"),
                    params![node_id],
                )
                .await?;
            match rows.next().await? {
                Some(row) => Ok(Some(row_to_node(&row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list_enabled_nodes(&self) -> Result<Vec<RegisteredNode>> {
        self.with_retry("list_enabled_nodes", |conn| async move {
            let mut rows = conn
                .query(
                    &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE enabled = 1 ORDER BY id ASC"),
                    (),
                )
                .await?;
            let mut nodes = Vec::new();
            while let Some(row) = rows.next().await? {
                nodes.push(row_to_node(&row)?);
            }
            Ok(nodes)
        })
        .await
    }

    async fn add_probe_result(&self, result: &ProbeResult) -> Result<()> {
        let checked_at_ns = to_nanos(result.checked_at)?;
        let retention = i64::from(self.retention_per_node);

        let _guard = self.write_lock.lock().await;
        let pruned = self
            .with_retry("add_probe_result", move |conn| async move {
                let tx = conn.transaction().await?;
                tx.execute(
                    "INSERT INTO probe_results (node_id, status, latency_ms, checked_at_ns, error) VALUES (?, ?, ?, ?, ?)",
                    params![
                        result.node_id.as_str(),
                        result.status.as_str(),
                        result.latency_ms,
                        checked_at_ns,
                        result.error.clone()
                    ],
                )
                .await?;

                let mut pruned = 0;
                if retention > 0 {
                    pruned = tx
                        .execute(
                            "DELETE FROM probe_results WHERE node_id = ? AND id NOT IN (
                                SELECT id FROM probe_results WHERE node_id = ?
                                ORDER BY checked_at_ns DESC, id DESC LIMIT ?
                            )",
                            params![result.node_id.as_str(), result.node_id.as_str(), retention],
                        )
                        .await?;
                }

                tx.commit().await?;
                Ok(pruned)
            })
            .await?;

        if pruned > 0 {
            debug!(node_id = %result.node_id, pruned, "Pruned probe results beyond retention");
        }
        Ok(())
    }

    async fn list_probe_results(
        &self,
        filter: &ResultFilter,
        limit: Option<usize>,
    ) -> Result<Vec<ProbeResult>> {
        let (clause, mut values) = where_clause(filter);
        let mut sql =
            format!("SELECT {RESULT_COLUMNS} FROM probe_results{clause} ORDER BY checked_at_ns DESC, id DESC");
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }
        let (sql, values) = (&sql, &values);

        self.with_retry("list_probe_results", move |conn| async move {
            let mut rows = conn.query(sql, Params::Positional(values.clone())).await?;
            let mut results = Vec::new();
            while let Some(row) = rows.next().await? {
                results.push(row_to_result(&row)?);
            }
            Ok(results)
        })
        .await
    }

    async fn summarize_probe_results(&self, filter: &ResultFilter) -> Result<ProbeResultsSummary> {
        let (clause, values) = where_clause(filter);
        let sql = format!(
            "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'up' THEN 1 ELSE 0 END), 0),
                AVG(CASE WHEN status = 'up' THEN latency_ms END),
                MAX(checked_at_ns)
            FROM probe_results{clause}"
        );
        let (sql, values) = (&sql, &values);

        self.with_retry("summarize_probe_results", move |conn| async move {
            let mut rows = conn.query(sql, Params::Positional(values.clone())).await?;
            let Some(row) = rows.next().await? else {
                return Ok(ProbeResultsSummary::empty());
            };

            let total: i64 = row.get(0)?;
            let up: i64 = row.get(1)?;
            let avg_latency: Option<f64> = row.get(2)?;
            let last: Option<i64> = row.get(3)?;

            Ok(ProbeResultsSummary::from_aggregates(
                total.max(0) as u64,
                up.max(0) as u64,
                avg_latency,
                last.map(|ns| Utc.timestamp_nanos(ns)),
            ))
        })
        .await
    }

    async fn count_probe_results(&self) -> Result<u64> {
        self.with_retry("count_probe_results", |conn| async move {
            let mut rows = conn.query("SELECT COUNT(*) FROM probe_results", ()).await?;
            let count = match rows.next().await? {
                Some(row) => row.get::<i64>(0)?,
                None => 0,
            };
            Ok(count.max(0) as u64)
        })
        .await
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    async fn open(retention: u32) -> (TempDir, LibsqlRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = LibsqlRepository::open(dir.path().join("probes.db"), retention).await.unwrap();
        (dir, repo)
    }

    fn busy() -> libsql::Error {
        libsql::Error::SqliteFailure(SQLITE_BUSY, "database is locked".to_string())
    }

    #[test]
    fn test_classifies_contention_and_constraints() {
        assert!(matches!(classify_sql(&busy()), Failure::Transient(_)));
        assert!(matches!(
            classify_sql(&libsql::Error::SqliteFailure(
                SQLITE_LOCKED,
                "database table is locked".to_string()
            )),
            Failure::Transient(_)
        ));
        assert_eq!(
            classify_sql(&libsql::Error::SqliteFailure(
                2067,
                "UNIQUE constraint failed: nodes.host, nodes.port, nodes.region".to_string()
            )),
            Failure::Duplicate
        );
        assert!(matches!(
            classify_sql(&libsql::Error::SqliteFailure(
                SQLITE_CONSTRAINT,
                "NOT NULL constraint failed: nodes.name".to_string()
            )),
            Failure::Fatal(_)
        ));
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let (_dir, repo) = open(0).await;
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let value = repo
            .with_retry("flaky", move |_conn| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < MAX_ATTEMPTS - 1 {
                    Err(StoreError::Sql(busy()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        assert!(repo.last_error().is_none());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (_dir, repo) = open(0).await;
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let outcome: Result<()> = repo
            .with_retry("locked", move |_conn| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Sql(busy()))
            })
            .await;

        assert!(matches!(outcome, Err(RepositoryError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        assert!(repo.last_error().unwrap().contains("locked"));
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let (_dir, repo) = open(0).await;
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let outcome: Result<()> = repo
            .with_retry("broken", move |_conn| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Corrupt("bad row".to_string()))
            })
            .await;

        assert!(matches!(outcome, Err(RepositoryError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_and_writers() {
        let (_dir, repo) = open(3).await;
        let repo = std::sync::Arc::new(repo);

        let tasks: Vec<_> = (0..16u16)
            .map(|task| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    let mut failures = Vec::new();
                    for round in 0..40u16 {
                        let host = format!("10.{task}.{round}.1");
                        let node = Node::new("n", &host, 80, "eu", true).unwrap();
                        let node = match repo.add_node(node).await {
                            Ok(node) => node,
                            Err(e) => {
                                failures.push(e);
                                continue;
                            }
                        };
                        let filter = ResultFilter::new().node(&node.node_id);

                        let result = ProbeResult::up(&node.node_id, 1.0);
                        if let Err(e) = repo.add_probe_result(&result).await {
                            failures.push(e);
                        }
                        if let Err(e) = repo.list_probe_results(&filter, Some(5)).await {
                            failures.push(e);
                        }
                        if let Err(e) = repo.summarize_probe_results(&ResultFilter::new()).await {
                            failures.push(e);
                        }
                    }
                    failures
                })
            })
            .collect();

        let mut failures = Vec::new();
        for task in tasks {
            failures.extend(task.await.unwrap());
        }

        assert!(failures.is_empty(), "{} operations failed: {:?}", failures.len(), failures.first());
        assert_eq!(repo.last_error(), None);
        assert_eq!(repo.list_nodes().await.unwrap().len(), 16 * 40);
        assert_eq!(repo.count_probe_results().await.unwrap(), 16 * 40);
    }

    #[tokio::test]
    async fn test_duplicate_endpoint_is_rejected() {
        let (_dir, repo) = open(0).await;

        let first = repo.add_node(Node::new("a", "10.0.0.1", 443, "eu", true).unwrap()).await;
        assert!(first.is_ok());

        let second = repo.add_node(Node::new("b", "10.0.0.1", 443, "eu", true).unwrap()).await;
        assert_eq!(second, Err(RepositoryError::Duplicate));

        // Same endpoint in another region is a different node
        let other_region = repo.add_node(Node::new("c", "10.0.0.1", 443, "us", true).unwrap()).await;
        assert!(other_region.is_ok());

        assert_eq!(repo.list_nodes().await.unwrap().len(), 2);
        assert!(repo.last_error().is_none());
    }

    #[tokio::test]
    async fn test_nodes_keep_insertion_order() {
        let (_dir, repo) = open(0).await;
        let a = repo.add_node(Node::new("a", "h1", 1, "eu", true).unwrap()).await.unwrap();
        let b = repo.add_node(Node::new("b", "h2", 2, "eu", false).unwrap()).await.unwrap();
        let c = repo.add_node(Node::new("c", "h3", 3, "eu", true).unwrap()).await.unwrap();

        assert_eq!(repo.list_nodes().await.unwrap(), vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(repo.list_enabled_nodes().await.unwrap(), vec![a, c]);
        assert_eq!(repo.get_node(&b.node_id).await.unwrap(), Some(b));
        assert_eq!(repo.get_node("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_retention_keeps_newest() {
        let (_dir, repo) = open(1).await;

        repo.add_probe_result(&ProbeResult::up("n", 10.0).at(t0() + ChronoDuration::minutes(5)))
            .await
            .unwrap();
        // Inserted later but checked earlier, so it is the one pruned
        repo.add_probe_result(&ProbeResult::up("n", 20.0).at(t0())).await.unwrap();
        repo.add_probe_result(&ProbeResult::up("other", 30.0).at(t0())).await.unwrap();

        let kept = repo.list_probe_results(&ResultFilter::new().node("n"), None).await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].latency_ms, 10.0);
        assert_eq!(repo.count_probe_results().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unlimited_retention() {
        let (_dir, repo) = open(0).await;
        for i in 0..5 {
            repo.add_probe_result(&ProbeResult::up("n", i as f64).at(t0() + ChronoDuration::seconds(i)))
                .await
                .unwrap();
        }
        assert_eq!(repo.count_probe_results().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_window_order_and_ties() {
        let (_dir, repo) = open(0).await;
        repo.add_probe_result(&ProbeResult::up("n", 1.0).at(t0())).await.unwrap();
        repo.add_probe_result(&ProbeResult::up("n", 2.0).at(t0() + ChronoDuration::minutes(1)))
            .await
            .unwrap();
        repo.add_probe_result(&ProbeResult::up("n", 3.0).at(t0() + ChronoDuration::minutes(1)))
            .await
            .unwrap();
        repo.add_probe_result(&ProbeResult::up("n", 4.0).at(t0() + ChronoDuration::minutes(2)))
            .await
            .unwrap();

        let window = ResultFilter::new()
            .since(t0() + ChronoDuration::minutes(1))
            .until(t0() + ChronoDuration::minutes(2));
        let listed = repo.list_probe_results(&window, None).await.unwrap();
        let latencies: Vec<f64> = listed.iter().map(|r| r.latency_ms).collect();
        assert_eq!(latencies, vec![4.0, 3.0, 2.0]);

        let limited = repo.list_probe_results(&ResultFilter::new(), Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].latency_ms, 4.0);
    }

    #[tokio::test]
    async fn test_summary_of_mixed_results() {
        let (_dir, repo) = open(0).await;
        repo.add_probe_result(&ProbeResult::up("a", 10.0).at(t0())).await.unwrap();
        repo.add_probe_result(
            &ProbeResult::down("a", 1500.0, "timeout").at(t0() + ChronoDuration::minutes(1)),
        )
        .await
        .unwrap();
        repo.add_probe_result(&ProbeResult::up("a", 30.0).at(t0() + ChronoDuration::minutes(2)))
            .await
            .unwrap();

        let summary = repo.summarize_probe_results(&ResultFilter::new().node("a")).await.unwrap();
        assert_eq!(summary.total_checks, 3);
        assert_eq!(summary.up_checks, 2);
        assert_eq!(summary.down_checks, 1);
        assert_eq!(summary.availability_pct, 66.667);
        assert_eq!(summary.avg_latency_ms, Some(20.0));
        assert_eq!(summary.last_checked_at, Some(t0() + ChronoDuration::minutes(2)));

        let empty = repo.summarize_probe_results(&ResultFilter::new().node("b")).await.unwrap();
        assert_eq!(empty, ProbeResultsSummary::empty());
    }

    #[tokio::test]
    async fn test_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("probes.db");

        let (node, result) = {
            let repo = LibsqlRepository::open(&path, 0).await.unwrap();
            let node = repo.add_node(Node::new("a", "h", 80, "us", true).unwrap()).await.unwrap();
            let result = ProbeResult::down(node.node_id.clone(), 12.5, "connection refused");
            repo.add_probe_result(&result).await.unwrap();
            (node, result)
        };

        let repo = LibsqlRepository::open(&path, 0).await.unwrap();
        assert_eq!(repo.list_nodes().await.unwrap(), vec![node]);
        assert_eq!(repo.list_probe_results(&ResultFilter::new(), None).await.unwrap(), vec![result]);
    }

    #[tokio::test]
    async fn test_refuses_newer_schema_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probes.db");
        {
            let repo = LibsqlRepository::open(&path, 0).await.unwrap();
            let conn = repo.pool.get().await.unwrap();
            conn.execute(
                "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
                params![migrations::SCHEMA_VERSION + 1, 0i64, "newer"],
            )
            .await
            .unwrap();
        }

        match LibsqlRepository::open(&path, 0).await {
            Err(RepositoryError::SchemaIncompatible { found, supported }) => {
                assert_eq!(found, migrations::SCHEMA_VERSION + 1);
                assert_eq!(supported, migrations::SCHEMA_VERSION);
            }
            other => panic!("expected incompatible schema, got {other:?}"),
        }
    }
}
