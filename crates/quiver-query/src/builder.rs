//! Fluent construction of query structures.
//!
//! ```rust
//! use quiver_query::{NodePattern, QueryBuilder};
//! use serde_json::json;
//!
//! let fragment = QueryBuilder::new()
//!     .matching([NodePattern::new("u").label("User").property("id", json!(7))])
//!     .filter("u.age > $min", ["u"])
//!     .param("min", json!(18))
//!     .returning(["u.name"])
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(
//!     fragment.text(),
//!     "MATCH (u:User {id: $p1}) WHERE u.age > $min RETURN u.name"
//! );
//! ```

use crate::error::QueryResult;
use crate::fragment::Fragment;
use crate::ir::{Clause, OrderItem, PatternElement, ProjectionItem, Scope, SetItem};
use crate::render::compile;
use crate::structure::QueryStructure;
use crate::value::{Expr, Params, Value};
use tracing::debug;

/// Appends clauses to a [`QueryStructure`] in the current scope.
///
/// Nothing is checked until [`build`](QueryBuilder::build), which validates
/// and compiles in one step.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    structure: QueryStructure,
    parameters: Params,
    scope: Scope,
    union_branches: u32,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, clause: Clause) -> Self {
        self.structure.add_clause_in(clause, self.scope);
        self
    }

    pub fn matching<P: Into<PatternElement>>(self, patterns: impl IntoIterator<Item = P>) -> Self {
        self.push(Clause::Match {
            patterns: patterns.into_iter().map(Into::into).collect(),
            optional: false,
        })
    }

    pub fn optional_matching<P: Into<PatternElement>>(
        self,
        patterns: impl IntoIterator<Item = P>,
    ) -> Self {
        self.push(Clause::Match {
            patterns: patterns.into_iter().map(Into::into).collect(),
            optional: true,
        })
    }

    /// WHERE over the given aliases.
    pub fn filter<A: Into<String>>(
        self,
        condition: impl Into<String>,
        aliases: impl IntoIterator<Item = A>,
    ) -> Self {
        self.filter_with(condition, aliases, Params::new())
    }

    /// WHERE carrying its own parameter bindings.
    pub fn filter_with<A: Into<String>>(
        self,
        condition: impl Into<String>,
        aliases: impl IntoIterator<Item = A>,
        parameters: Params,
    ) -> Self {
        self.push(Clause::Where {
            condition: condition.into(),
            referenced_aliases: aliases.into_iter().map(Into::into).collect(),
            parameters,
        })
    }

    /// Bind a caller parameter, replacing any earlier binding of `key`.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn create<P: Into<PatternElement>>(self, patterns: impl IntoIterator<Item = P>) -> Self {
        self.push(Clause::Create {
            patterns: patterns.into_iter().map(Into::into).collect(),
        })
    }

    pub fn merge(self, pattern: impl Into<PatternElement>) -> Self {
        self.merge_with(pattern, Vec::new(), Vec::new())
    }

    /// MERGE with `ON CREATE SET` / `ON MATCH SET` assignments.
    pub fn merge_with(
        self,
        pattern: impl Into<PatternElement>,
        on_create: Vec<SetItem>,
        on_match: Vec<SetItem>,
    ) -> Self {
        let non_empty = |items: Vec<SetItem>| (!items.is_empty()).then_some(items);
        self.push(Clause::Merge {
            pattern: pattern.into(),
            on_create: non_empty(on_create),
            on_match: non_empty(on_match),
            referenced_aliases: Vec::new(),
        })
    }

    pub fn set(
        self,
        alias: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<Expr>,
    ) -> Self {
        self.push(Clause::Set(SetItem::new(alias, property, value)))
    }

    pub fn remove(self, alias: impl Into<String>, property: impl Into<String>) -> Self {
        self.push(Clause::Remove {
            alias: alias.into(),
            property: property.into(),
        })
    }

    pub fn delete<A: Into<String>>(self, aliases: impl IntoIterator<Item = A>) -> Self {
        self.push(Clause::Delete {
            aliases: aliases.into_iter().map(Into::into).collect(),
            detach: false,
        })
    }

    pub fn detach_delete<A: Into<String>>(self, aliases: impl IntoIterator<Item = A>) -> Self {
        self.push(Clause::Delete {
            aliases: aliases.into_iter().map(Into::into).collect(),
            detach: true,
        })
    }

    pub fn returning<I: Into<ProjectionItem>>(self, items: impl IntoIterator<Item = I>) -> Self {
        self.push(Clause::Return {
            items: items.into_iter().map(Into::into).collect(),
            distinct: false,
        })
    }

    pub fn returning_distinct<I: Into<ProjectionItem>>(
        self,
        items: impl IntoIterator<Item = I>,
    ) -> Self {
        self.push(Clause::Return {
            items: items.into_iter().map(Into::into).collect(),
            distinct: true,
        })
    }

    pub fn with<I: Into<ProjectionItem>>(self, items: impl IntoIterator<Item = I>) -> Self {
        self.push(Clause::With {
            items: items.into_iter().map(Into::into).collect(),
            where_condition: None,
        })
    }

    /// `WITH items WHERE condition`
    pub fn with_filter<I: Into<ProjectionItem>>(
        self,
        items: impl IntoIterator<Item = I>,
        condition: impl Into<String>,
    ) -> Self {
        self.push(Clause::With {
            items: items.into_iter().map(Into::into).collect(),
            where_condition: Some(condition.into()),
        })
    }

    pub fn order_by(self, items: impl IntoIterator<Item = OrderItem>) -> Self {
        self.push(Clause::OrderBy {
            items: items.into_iter().collect(),
        })
    }

    pub fn skip(self, n: u64) -> Self {
        self.push(Clause::Skip(n))
    }

    pub fn limit(self, n: u64) -> Self {
        self.push(Clause::Limit(n))
    }

    pub fn unwind(self, list: impl Into<Expr>, alias: impl Into<String>) -> Self {
        self.push(Clause::Unwind {
            list: list.into(),
            alias: alias.into(),
        })
    }

    /// `CALL procedure(args) [YIELD ...]`
    pub fn call<Y: Into<String>>(
        self,
        procedure: impl Into<String>,
        args: Vec<Expr>,
        yields: impl IntoIterator<Item = Y>,
    ) -> Self {
        let yields: Vec<String> = yields.into_iter().map(Into::into).collect();
        self.push(Clause::Call {
            procedure: procedure.into(),
            args,
            yields: (!yields.is_empty()).then_some(yields),
        })
    }

    /// Close the current branch with `UNION [ALL]` and continue in a new
    /// union branch.
    pub fn union(mut self, all: bool) -> Self {
        self = self.push(Clause::Union { all });
        self.union_branches += 1;
        self.scope = Scope::Union {
            branch: self.union_branches,
            all,
        };
        self
    }

    /// `FOREACH (variable IN list | updates)`
    pub fn foreach(
        self,
        variable: impl Into<String>,
        list: impl Into<Expr>,
        updates: Vec<Clause>,
    ) -> Self {
        self.push(Clause::Foreach {
            variable: variable.into(),
            list: list.into(),
            updates,
        })
    }

    /// Append subsequent clauses to `scope`.
    pub fn in_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn structure(&self) -> &QueryStructure {
        &self.structure
    }

    pub fn into_structure(self) -> QueryStructure {
        self.structure
    }

    /// Validate and compile.
    pub fn build(self) -> QueryResult<Fragment> {
        debug!(clauses = self.structure.len(), "building query");
        compile(&self.structure, self.parameters)
    }
}
