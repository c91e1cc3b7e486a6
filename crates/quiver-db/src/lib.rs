//! Pooled, transactional execution of Quiver queries
//!
//! This crate runs fragments produced by `quiver-query` against any graph
//! engine that implements the [`Database`] and [`Connection`] traits.
//!
//! ## Features
//!
//! - **Bounded pool**: lazy creation up to `max_connections`, pre-warm to
//!   `min_connections`, LIFO reuse of idle connections
//! - **Fair waiting**: saturated checkouts queue FIFO, are handed connections
//!   directly on check-in, and time out after `checkout_timeout_ms`
//! - **Transactions**: `with_transaction` pins one connection for
//!   BEGIN/COMMIT and rolls back on failure without masking the cause
//! - **Extensions**: configured engine extensions are loaded at construction
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quiver_db::{ConnectionPool, PoolConfig};
//! use quiver_query::{NodePattern, QueryBuilder};
//!
//! let pool = ConnectionPool::new(engine, PoolConfig::new(4)).await?;
//!
//! let query = QueryBuilder::new()
//!     .matching([NodePattern::new("n").label("Note")])
//!     .returning(["n.title"])
//!     .build()?;
//! let output = pool.execute(&query).await?;
//!
//! pool.drain();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod extension;
pub mod pool;
pub mod transaction;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

// Re-exports
pub use config::PoolConfig;
pub use engine::{Connection, Database, QueryOutput};
pub use error::{DbError, DbResult};
pub use pool::{ConnectionId, ConnectionPool, PoolStatus, PooledConnection};
