//! Structured Cypher queries for Quiver
//!
//! This crate turns declaratively built query pieces into one validated,
//! fully parameterized query string. It never touches a database.
//!
//! ## Pipeline
//!
//! ```text
//! QueryBuilder / Clause ──▶ QueryStructure ──validate──▶ compile ──▶ Fragment
//!                                  ▲                                    │
//!                                  └──────────── Combiner ◀─────────────┘
//! ```
//!
//! - **Clause model** ([`ir`]): a closed sum type of every supported clause
//! - **Structure** ([`structure`]): ordered, scoped clauses plus ordering,
//!   required-clause and alias checks
//! - **Compiler** ([`render`]): one template per clause, scope tokens, and
//!   literal hoisting into `$p1`, `$p2`, ...
//! - **Combiner** ([`combine`]): kind-aware merging of fragments with
//!   parameter-conflict detection
//!
//! ## Usage
//!
//! ```rust
//! use quiver_query::{Combiner, Fragment, NodePattern, QueryBuilder};
//! use serde_json::json;
//!
//! let names = QueryBuilder::new()
//!     .matching([NodePattern::new("u").label("User").property("id", json!(1))])
//!     .returning(["u.name"])
//!     .build()?;
//! let emails = Fragment::raw("MATCH (u:User) RETURN u.email", Default::default());
//!
//! let mut combiner = Combiner::new();
//! combiner.add(&names)?;
//! combiner.add(&emails)?;
//!
//! let query = combiner.build()?;
//! assert_eq!(query.text(), "MATCH (u:User {id: $p1}) RETURN u.name, u.email");
//! # Ok::<(), quiver_query::QueryError>(())
//! ```

pub mod builder;
pub mod combine;
pub mod error;
pub mod fragment;
pub mod ir;
pub mod render;
pub mod structure;
pub mod syntax;
pub mod value;

// Re-exports
pub use builder::QueryBuilder;
pub use combine::Combiner;
pub use error::{QueryError, QueryResult};
pub use fragment::Fragment;
pub use ir::{
    Clause, ClauseCategory, EdgeDirection, NodePattern, OrderItem, OrderedClause, PatternElement,
    ProjectionItem, RelationshipPattern, Scope, SetItem,
};
pub use render::compile;
pub use structure::QueryStructure;
pub use value::{Expr, Params, Value};
