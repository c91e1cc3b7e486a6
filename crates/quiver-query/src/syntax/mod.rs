//! Minimal grammar for unstructured fragments.
//!
//! Raw text only reaches the combiner through this module. It recognizes a
//! small, documented subset of Cypher and fails loudly on everything else.

mod common;
mod cypher;

pub use cypher::parse_raw;
