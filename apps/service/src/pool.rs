use std::time::Duration;

use deadpool::managed::{self, Pool, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError};

/// How long a connection waits on a locked database before reporting busy
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands out connections to one local libsql database
pub struct LibsqlManager {
    database: Database,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

/// Per-connection settings. WAL lets readers run alongside the single writer.
async fn configure(conn: &Connection) -> Result<(), LibsqlError> {
    let pragmas = [
        format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT.as_millis()),
        "PRAGMA journal_mode = WAL".to_string(),
    ];

    for pragma in &pragmas {
        // Both pragmas report their new value as a row
        let mut rows = conn.query(pragma, ()).await?;
        while rows.next().await?.is_some() {}
    }
    Ok(())
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn = self.database.connect()?;
        configure(&conn).await?;
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        conn.query("SELECT 1", ()).await?.next().await?.ok_or(LibsqlError::QueryReturnedNoRows)?;
        Ok(())
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;

pub fn build_pool(database: Database, max_size: usize) -> Result<LibsqlPool, managed::BuildError> {
    Pool::builder(LibsqlManager::new(database)).max_size(max_size).build()
}
