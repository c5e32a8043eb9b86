use libsql::Connection;
use thiserror::Error;

/// Schema version - increment when adding a migration
pub const SCHEMA_VERSION: i64 = 3;

/// One schema step. Statements must be safe to re-run.
struct Migration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

/// Ordered migration table, one entry per version up to [`SCHEMA_VERSION`]
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema",
        statements: &[
            "CREATE TABLE IF NOT EXISTS nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                region TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS probe_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL,
                status TEXT NOT NULL,
                latency_ms REAL NOT NULL,
                checked_at_ns INTEGER NOT NULL,
                error TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_probe_results_node_checked_at
                ON probe_results(node_id, checked_at_ns DESC, id DESC)",
        ],
    },
    Migration {
        version: 2,
        description: "Unique node endpoint per region",
        statements: &[
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_host_port_region
                ON nodes(host, port, region)",
        ],
    },
    Migration {
        version: 3,
        description: "Index probe results by check time",
        statements: &[
            "CREATE INDEX IF NOT EXISTS idx_probe_results_checked_at
                ON probe_results(checked_at_ns DESC, id DESC)",
        ],
    },
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database schema version {found} is newer than supported version {supported}")]
    Incompatible { found: i64, supported: i64 },

    #[error("Migration query failed: {0}")]
    Store(#[from] libsql::Error),
}

/// Bring the schema up to [`SCHEMA_VERSION`], returning the resulting version.
///
/// Refuses to touch a database whose recorded version is ahead of this build.
pub async fn run_migrations(conn: &Connection) -> Result<i64, MigrationError> {
    // Create schema_migrations table first (tracks applied migrations)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version > SCHEMA_VERSION {
        return Err(MigrationError::Incompatible {
            found: current_version,
            supported: SCHEMA_VERSION,
        });
    }

    if current_version == SCHEMA_VERSION {
        tracing::debug!("Database schema is up to date (version {})", current_version);
        return Ok(current_version);
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
        apply(conn, migration).await?;
    }

    Ok(SCHEMA_VERSION)
}

/// Get current schema version from database
pub async fn get_current_version(conn: &Connection) -> Result<i64, libsql::Error> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i64> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Run one migration and record it, all inside a single transaction
async fn apply(conn: &Connection, migration: &Migration) -> Result<(), libsql::Error> {
    let tx = conn.transaction().await?;

    for statement in migration.statements {
        tx.execute(statement, ()).await?;
    }

    tx.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![migration.version, chrono::Utc::now().timestamp(), migration.description],
    )
    .await?;

    tx.commit().await?;

    tracing::info!("Applied migration v{}: {}", migration.version, migration.description);
    Ok(())
}
