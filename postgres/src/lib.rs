//! `PostgreSQL` storage backend for the Boxoffice platform.
//!
//! Implements the `boxoffice-core` store traits over sqlx. The locking
//! discipline the core relies on maps directly onto `PostgreSQL`
//! primitives:
//!
//! - Inventory transactions take `SELECT ... FOR UPDATE` on the event
//!   row, so same-event operations serialize and the availability check
//!   and decrement commit atomically
//! - Queue transactions take a transaction-scoped advisory lock; row
//!   locks alone cannot serialize position assignment against concurrent
//!   inserts
//!
//! Serialization failures, deadlocks and lock timeouts map to
//! [`StoreError::Conflict`] so the core's conflict retry can absorb them.
//!
//! # Example
//!
//! ```ignore
//! use boxoffice_core::config::BoxofficeConfig;
//! use boxoffice_postgres::{MIGRATOR, PostgresInventoryStore, connect};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BoxofficeConfig::from_env();
//!     let pool = connect(&config.postgres).await?;
//!     MIGRATOR.run(&pool).await?;
//!     let store = PostgresInventoryStore::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

use boxoffice_core::config::PostgresSettings;
use boxoffice_core::error::StoreError;

mod inventory;
mod queue;

pub use inventory::PostgresInventoryStore;
pub use queue::PostgresQueueStore;

/// Embedded schema migrations, applied with `MIGRATOR.run(&pool)`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Opens a connection pool from the given settings.
///
/// Migrations are not applied here; run [`MIGRATOR`] during startup.
///
/// # Errors
///
/// Returns [`StoreError::Database`] when the database is unreachable.
pub async fn connect(settings: &PostgresSettings) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(settings.connect_timeout))
        .connect(&settings.url)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

    tracing::info!(
        max_connections = settings.max_connections,
        "postgres pool opened"
    );
    Ok(pool)
}

/// Maps a sqlx error onto the core taxonomy. Aborts that clear on retry
/// (serialization failure, deadlock, lock timeout) become conflicts;
/// everything else is a hard database fault.
pub(crate) fn map_db_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(code) = db.code() {
            // serialization_failure, deadlock_detected, lock_not_available
            if matches!(code.as_ref(), "40001" | "40P01" | "55P03") {
                metrics::counter!("boxoffice_db_conflicts_total").increment(1);
                return StoreError::Conflict(db.message().to_string());
            }
        }
    }
    StoreError::Database(err.to_string())
}
