//! Clause model: the structured intermediate representation of a query.
//!
//! Every supported clause is a variant of [`Clause`]. Clauses never carry
//! rendered text; the compiler turns them into Cypher only after the
//! enclosing [`QueryStructure`](crate::structure::QueryStructure) validates.

use crate::value::{projection_source, Expr, Params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Patterns
// ============================================================================

/// Property map attached to a node or relationship pattern.
pub type PropertyMap = BTreeMap<String, Expr>;

/// Node pattern: `(alias:Label {key: value})`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePattern {
    pub alias: String,
    pub label: Option<String>,
    pub properties: Option<PropertyMap>,
}

impl NodePattern {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            label: None,
            properties: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a property constraint. Plain values become hoisted literals.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.properties
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Direction of a relationship pattern, relative to `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EdgeDirection {
    /// `(from)-[]->(to)`
    #[default]
    Out,
    /// `(from)<-[]-(to)`
    In,
    /// `(from)-[]-(to)`
    Undirected,
}

/// Relationship pattern between two aliased nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPattern {
    pub alias: Option<String>,
    pub rel_type: Option<String>,
    pub properties: Option<PropertyMap>,
    pub from: String,
    pub to: String,
    pub direction: EdgeDirection,
}

impl RelationshipPattern {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            alias: None,
            rel_type: None,
            properties: None,
            from: from.into(),
            to: to.into(),
            direction: EdgeDirection::Out,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn rel_type(mut self, rel_type: impl Into<String>) -> Self {
        self.rel_type = Some(rel_type.into());
        self
    }

    pub fn direction(mut self, direction: EdgeDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.properties
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// One comma-separated element of a MATCH/CREATE/MERGE pattern list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatternElement {
    Node(NodePattern),
    Relationship(RelationshipPattern),
}

impl PatternElement {
    /// Identity used when merging pattern lists. Anonymous relationships
    /// have none and are never collapsed.
    pub fn alias(&self) -> Option<&str> {
        match self {
            PatternElement::Node(node) => Some(&node.alias),
            PatternElement::Relationship(rel) => rel.alias.as_deref(),
        }
    }

    /// Aliases brought into scope by this element.
    pub fn defined_aliases(&self) -> Vec<&str> {
        match self {
            PatternElement::Node(node) => vec![node.alias.as_str()],
            PatternElement::Relationship(rel) => {
                let mut aliases = vec![rel.from.as_str(), rel.to.as_str()];
                if let Some(alias) = &rel.alias {
                    aliases.push(alias);
                }
                aliases
            }
        }
    }
}

impl From<NodePattern> for PatternElement {
    fn from(node: NodePattern) -> Self {
        PatternElement::Node(node)
    }
}

impl From<RelationshipPattern> for PatternElement {
    fn from(rel: RelationshipPattern) -> Self {
        PatternElement::Relationship(rel)
    }
}

// ============================================================================
// Clause payloads
// ============================================================================

/// Projection item of a RETURN or WITH clause: `expression [AS alias]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionItem {
    pub expression: String,
    pub alias: Option<String>,
    /// Alias this item reads from, checked by alias validation.
    pub source_alias: Option<String>,
}

impl ProjectionItem {
    /// Item whose source alias is inferred from the expression: `u`,
    /// `u.name`, `count(u)` and `toLower(u.name)` all read `u`.
    pub fn field(expression: impl Into<String>) -> Self {
        let expression = expression.into();
        let source_alias = projection_source(&expression);
        Self {
            expression,
            alias: None,
            source_alias,
        }
    }

    /// Free-form expression with no alias dependency.
    pub fn expr(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            alias: None,
            source_alias: None,
        }
    }

    pub fn from_alias(mut self, source_alias: impl Into<String>) -> Self {
        self.source_alias = Some(source_alias.into());
        self
    }

    pub fn as_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl From<&str> for ProjectionItem {
    fn from(expression: &str) -> Self {
        ProjectionItem::field(expression)
    }
}

/// ORDER BY item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub expression: String,
    pub descending: bool,
}

impl OrderItem {
    pub fn asc(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            descending: false,
        }
    }

    pub fn desc(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            descending: true,
        }
    }
}

/// Property assignment used by SET and MERGE ... ON CREATE/ON MATCH SET
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetItem {
    pub alias: String,
    pub property: String,
    pub value: Expr,
}

impl SetItem {
    pub fn new(alias: impl Into<String>, property: impl Into<String>, value: impl Into<Expr>) -> Self {
        Self {
            alias: alias.into(),
            property: property.into(),
            value: value.into(),
        }
    }
}

// ============================================================================
// Clauses
// ============================================================================

/// Category of a clause; drives ordering validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseCategory {
    Read,
    Write,
    Result,
    /// Pipeline boundaries (WITH) and loops (FOREACH)
    Control,
}

/// A single query clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    Match {
        patterns: Vec<PatternElement>,
        optional: bool,
    },
    Where {
        condition: String,
        referenced_aliases: Vec<String>,
        parameters: Params,
    },
    Create {
        patterns: Vec<PatternElement>,
    },
    Merge {
        pattern: PatternElement,
        on_create: Option<Vec<SetItem>>,
        on_match: Option<Vec<SetItem>>,
        referenced_aliases: Vec<String>,
    },
    Delete {
        aliases: Vec<String>,
        detach: bool,
    },
    Set(SetItem),
    Remove {
        alias: String,
        property: String,
    },
    Return {
        items: Vec<ProjectionItem>,
        distinct: bool,
    },
    With {
        items: Vec<ProjectionItem>,
        where_condition: Option<String>,
    },
    OrderBy {
        items: Vec<OrderItem>,
    },
    Skip(u64),
    Limit(u64),
    Unwind {
        list: Expr,
        alias: String,
    },
    Call {
        procedure: String,
        args: Vec<Expr>,
        yields: Option<Vec<String>>,
    },
    Union {
        all: bool,
    },
    Foreach {
        variable: String,
        list: Expr,
        updates: Vec<Clause>,
    },
}

impl Clause {
    pub fn category(&self) -> ClauseCategory {
        match self {
            Clause::Match { .. } | Clause::Where { .. } | Clause::Unwind { .. } | Clause::Call { .. } => {
                ClauseCategory::Read
            }
            Clause::Create { .. }
            | Clause::Merge { .. }
            | Clause::Delete { .. }
            | Clause::Set(_)
            | Clause::Remove { .. } => ClauseCategory::Write,
            Clause::Return { .. }
            | Clause::OrderBy { .. }
            | Clause::Skip(_)
            | Clause::Limit(_)
            | Clause::Union { .. } => ClauseCategory::Result,
            Clause::With { .. } | Clause::Foreach { .. } => ClauseCategory::Control,
        }
    }

    /// Clause keyword, used in validation messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Clause::Match { optional: true, .. } => "OPTIONAL MATCH",
            Clause::Match { .. } => "MATCH",
            Clause::Where { .. } => "WHERE",
            Clause::Create { .. } => "CREATE",
            Clause::Merge { .. } => "MERGE",
            Clause::Delete { detach: true, .. } => "DETACH DELETE",
            Clause::Delete { .. } => "DELETE",
            Clause::Set(_) => "SET",
            Clause::Remove { .. } => "REMOVE",
            Clause::Return { .. } => "RETURN",
            Clause::With { .. } => "WITH",
            Clause::OrderBy { .. } => "ORDER BY",
            Clause::Skip(_) => "SKIP",
            Clause::Limit(_) => "LIMIT",
            Clause::Unwind { .. } => "UNWIND",
            Clause::Call { .. } => "CALL",
            Clause::Union { .. } => "UNION",
            Clause::Foreach { .. } => "FOREACH",
        }
    }

    /// Whether the clause mutates the graph, for the write-then-read rule.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Clause::Foreach { .. }) || self.category() == ClauseCategory::Write
    }

    /// Aliases this clause brings into scope.
    pub fn defined_aliases(&self) -> Vec<String> {
        match self {
            Clause::Match { patterns, .. } | Clause::Create { patterns } => patterns
                .iter()
                .flat_map(|p| p.defined_aliases())
                .map(str::to_string)
                .collect(),
            Clause::Merge { pattern, .. } => pattern
                .defined_aliases()
                .into_iter()
                .map(str::to_string)
                .collect(),
            Clause::Unwind { alias, .. } => vec![alias.clone()],
            Clause::Call {
                yields: Some(yields),
                ..
            } => yields.clone(),
            Clause::With { items, .. } | Clause::Return { items, .. } => {
                items.iter().filter_map(|i| i.alias.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Aliases this clause reads and which must be defined elsewhere.
    pub fn used_aliases(&self) -> Vec<String> {
        match self {
            Clause::Where {
                referenced_aliases, ..
            }
            | Clause::Merge {
                referenced_aliases, ..
            } => referenced_aliases.clone(),
            Clause::Set(item) => vec![item.alias.clone()],
            Clause::Remove { alias, .. } => vec![alias.clone()],
            Clause::Delete { aliases, .. } => aliases.clone(),
            Clause::Return { items, .. } | Clause::With { items, .. } => {
                items.iter().filter_map(|i| i.source_alias.clone()).collect()
            }
            Clause::Foreach {
                variable, updates, ..
            } => {
                let local: Vec<String> = updates
                    .iter()
                    .flat_map(|c| c.defined_aliases())
                    .chain(std::iter::once(variable.clone()))
                    .collect();
                updates
                    .iter()
                    .flat_map(|c| c.used_aliases())
                    .filter(|a| !local.contains(a))
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// Scopes
// ============================================================================

/// Nesting context of a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Scope {
    #[default]
    Main,
    /// `CALL { ... }` subquery
    Subquery(u32),
    /// Branch of a UNION; branches after the first are introduced by
    /// `UNION` (or `UNION ALL` when `all` is set).
    Union { branch: u32, all: bool },
    Foreach(u32),
    With(u32),
}

/// A clause with its position and scope in a structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedClause {
    pub order: usize,
    pub clause: Clause,
    pub scope: Scope,
}
