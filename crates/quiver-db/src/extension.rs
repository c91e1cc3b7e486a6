//! Engine extension loading

use crate::engine::{Connection, Database};
use crate::error::{DbError, DbResult};
use crate::pool::ConnectionPool;
use crate::transaction::Lease;
use quiver_query::value::is_plain_identifier;
use tracing::info;

impl<D: Database> ConnectionPool<D> {
    /// `INSTALL name` then `LOAD EXTENSION name` on a pooled connection.
    ///
    /// Checkout failures propagate unchanged; engine failures become
    /// [`DbError::ExtensionLoadFailed`].
    pub async fn load_extension(&self, name: &str) -> DbResult<()> {
        if !is_plain_identifier(name) {
            return Err(DbError::ExtensionLoadFailed {
                name: name.to_string(),
                reason: "extension names must be plain identifiers".to_string(),
            });
        }

        let mut lease = Lease::acquire(self).await?;
        let conn = lease.connection()?;
        for statement in [format!("INSTALL {}", name), format!("LOAD EXTENSION {}", name)] {
            if let Err(err) = conn.run(&statement).await {
                lease.release();
                return Err(DbError::ExtensionLoadFailed {
                    name: name.to_string(),
                    reason: err.to_string(),
                });
            }
        }
        lease.release();

        info!(extension = name, "loaded extension");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::test_support::MemoryDatabase;

    #[tokio::test]
    async fn test_load_extension_runs_install_then_load() {
        let db = MemoryDatabase::new();
        let pool = ConnectionPool::new(db.clone(), PoolConfig::new(1))
            .await
            .unwrap();

        pool.load_extension("algo").await.unwrap();

        assert_eq!(db.statements(), vec!["INSTALL algo", "LOAD EXTENSION algo"]);
        assert_eq!(pool.status().available, 1);
    }

    #[tokio::test]
    async fn test_engine_failure_maps_to_extension_error() {
        let db = MemoryDatabase::new();
        db.fail_statement("LOAD EXTENSION vector", "unknown extension");
        let pool = ConnectionPool::new(db.clone(), PoolConfig::new(1))
            .await
            .unwrap();

        let err = pool.load_extension("vector").await.unwrap_err();

        assert_eq!(
            err,
            DbError::ExtensionLoadFailed {
                name: "vector".into(),
                reason: "Engine error: unknown extension".into(),
            }
        );
        assert_eq!(pool.status().available, 1);
    }

    #[tokio::test]
    async fn test_rejects_non_identifier_names() {
        let db = MemoryDatabase::new();
        let pool = ConnectionPool::new(db.clone(), PoolConfig::new(1))
            .await
            .unwrap();

        let err = pool.load_extension("algo; DROP").await.unwrap_err();

        assert!(matches!(err, DbError::ExtensionLoadFailed { .. }));
        assert!(db.statements().is_empty());
        assert_eq!(db.opened(), 0);
    }
}
