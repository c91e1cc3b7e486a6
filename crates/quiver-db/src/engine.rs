//! Engine binding traits
//!
//! The pool and executor only need two capabilities from a graph engine:
//! opening a connection, and running text on one. Result decoding is left
//! to the caller; [`QueryOutput`] is the raw cursor handed over.

use crate::error::DbResult;
use async_trait::async_trait;
use quiver_query::{Fragment, Params, Value};
use serde::{Deserialize, Serialize};

/// Rows returned by one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryOutput {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().filter_map(|row| row.get(index)).collect())
    }
}

/// One execution channel. Never shared between callers.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Execute parameterized query text.
    async fn execute(&mut self, text: &str, parameters: &Params) -> DbResult<QueryOutput>;

    /// Run a control statement such as `BEGIN` or `INSTALL algo`.
    async fn run(&mut self, statement: &str) -> DbResult<()>;

    async fn execute_fragment(&mut self, fragment: &Fragment) -> DbResult<QueryOutput> {
        self.execute(fragment.text(), fragment.parameters()).await
    }
}

/// Database-level handle, shared by every connection the pool opens.
#[async_trait]
pub trait Database: Send + Sync + 'static {
    type Connection: Connection;

    async fn open_connection(&self) -> DbResult<Self::Connection>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_lookup() {
        let output = QueryOutput::new(
            vec!["name".into(), "age".into()],
            vec![vec![json!("ada"), json!(36)], vec![json!("alan"), json!(41)]],
        );

        assert_eq!(output.len(), 2);
        assert_eq!(output.column("age"), Some(vec![&json!(36), &json!(41)]));
        assert!(output.column("missing").is_none());
    }
}
