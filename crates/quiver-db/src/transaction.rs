//! Scoped execution on pooled connections
//!
//! ```rust,ignore
//! pool.with_transaction(|conn| {
//!     Box::pin(async move {
//!         conn.run("CREATE (:Note {title: 'a'})").await?;
//!         conn.run("CREATE (:Note {title: 'b'})").await?;
//!         Ok(())
//!     })
//! })
//! .await?;
//! ```

use crate::engine::{Connection, Database, QueryOutput};
use crate::error::{DbError, DbResult};
use crate::pool::{ConnectionPool, PooledConnection};
use futures::future::BoxFuture;
use quiver_query::{Fragment, QueryStructure};
use tracing::{debug, warn};

/// A checked-out connection that goes back to the pool via
/// [`release`](Lease::release). Dropped without release (the caller's future
/// was cancelled mid-operation), the connection is discarded.
pub(crate) struct Lease<'p, D: Database> {
    pool: &'p ConnectionPool<D>,
    conn: Option<PooledConnection<D::Connection>>,
}

impl<'p, D: Database> Lease<'p, D> {
    pub(crate) async fn acquire(pool: &'p ConnectionPool<D>) -> DbResult<Lease<'p, D>> {
        let conn = pool.checkout().await?;
        Ok(Self {
            pool,
            conn: Some(conn),
        })
    }

    pub(crate) fn connection(&mut self) -> DbResult<&mut D::Connection> {
        match self.conn.as_mut() {
            Some(conn) => Ok(&mut **conn),
            None => Err(DbError::ConnectionPoolExhausted),
        }
    }

    pub(crate) fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn);
        }
    }
}

impl<D: Database> Drop for Lease<'_, D> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(connection = %conn.id(), "operation abandoned, discarding connection");
            self.pool.discard(conn);
        }
    }
}

async fn rollback<C: Connection>(conn: &mut C, cause: &DbError) {
    if let Err(err) = conn.run("ROLLBACK").await {
        warn!(error = %err, cause = %cause, "rollback failed, reporting original error");
    }
}

impl<D: Database> ConnectionPool<D> {
    /// Run `body` on one pooled connection, returning the connection on
    /// every path.
    pub async fn with_connection<T, F>(&self, body: F) -> DbResult<T>
    where
        F: for<'c> FnOnce(&'c mut D::Connection) -> BoxFuture<'c, DbResult<T>>,
    {
        let mut lease = Lease::acquire(self).await?;
        let result = body(lease.connection()?).await;
        lease.release();
        result
    }

    /// Run `body` inside `BEGIN` / `COMMIT` on one pinned connection.
    ///
    /// Every statement the body issues goes through the connection it is
    /// given. If the body fails the transaction is rolled back and the body's
    /// error is returned as [`DbError::TransactionFailed`]; a rollback error
    /// is logged and never replaces it. BEGIN and COMMIT failures are
    /// reported the same way. The connection is checked in exactly once.
    pub async fn with_transaction<T, F>(&self, body: F) -> DbResult<T>
    where
        F: for<'c> FnOnce(&'c mut D::Connection) -> BoxFuture<'c, DbResult<T>>,
    {
        let mut lease = Lease::acquire(self).await?;
        let conn = lease.connection()?;

        if let Err(err) = conn.run("BEGIN").await {
            lease.release();
            return Err(DbError::transaction("BEGIN failed", err));
        }
        debug!("transaction started");

        let result = body(&mut *conn).await;
        let outcome = match result {
            Ok(value) => match conn.run("COMMIT").await {
                Ok(()) => {
                    debug!("transaction committed");
                    Ok(value)
                }
                Err(err) => {
                    rollback(&mut *conn, &err).await;
                    Err(DbError::transaction("COMMIT failed", err))
                }
            },
            Err(err) => {
                rollback(&mut *conn, &err).await;
                debug!(error = %err, "transaction rolled back");
                Err(DbError::transaction(err.to_string(), err))
            }
        };

        lease.release();
        outcome
    }

    /// Execute a compiled or raw fragment on a pooled connection.
    pub async fn execute(&self, fragment: &Fragment) -> DbResult<QueryOutput> {
        let mut lease = Lease::acquire(self).await?;
        let result = lease.connection()?.execute_fragment(fragment).await;
        lease.release();
        result
    }

    /// Validate and compile `structure`, then execute it. Invalid structures
    /// fail before any connection is taken.
    pub async fn execute_structure(&self, structure: &QueryStructure) -> DbResult<QueryOutput> {
        let fragment = Fragment::from_structure(structure.clone())?;
        self.execute(&fragment).await
    }
}
