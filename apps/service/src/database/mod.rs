/// Storage layer for nodes and probe results
///
/// Two interchangeable backends implement [`Repository`]: an in-process
/// [`MemoryRepository`] and a durable, schema-versioned [`LibsqlRepository`].

pub mod error;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod repository;
pub mod sqlite;

pub use error::RepositoryError;
pub use memory::MemoryRepository;
pub use models::{Node, ProbeResultsSummary, RegisteredNode, ResultFilter};
pub use repository::Repository;
pub use sqlite::LibsqlRepository;

use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};

/// Build the repository selected by `config`
pub async fn open_repository(config: &StorageConfig) -> Result<Arc<dyn Repository>, RepositoryError> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage; data is lost on exit");
            Ok(Arc::new(MemoryRepository::new()))
        }
        StorageBackend::Sqlite => {
            let repository =
                LibsqlRepository::open(&config.path, config.retention_per_node).await?;
            Ok(Arc::new(repository))
        }
    }
}
