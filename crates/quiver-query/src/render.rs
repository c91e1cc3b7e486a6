//! Cypher compiler.
//!
//! Renders a validated [`QueryStructure`] into query text plus parameters:
//! - One fixed template per clause kind
//! - Scope transitions (`CALL {`, `}`, `UNION`) between clauses
//! - Literal hoisting into sequential `$p1`, `$p2`, ... parameters

use crate::error::QueryResult;
use crate::fragment::Fragment;
use crate::ir::{
    Clause, EdgeDirection, NodePattern, OrderItem, PatternElement, ProjectionItem, PropertyMap,
    RelationshipPattern, Scope, SetItem,
};
use crate::structure::QueryStructure;
use crate::value::{escape_identifier, merge_params, Expr, Params};
use std::collections::BTreeSet;

/// Mutable state threaded through rendering.
struct RenderContext {
    params: Params,
    hoisted: BTreeSet<String>,
    counter: usize,
}

impl RenderContext {
    fn new(params: Params) -> Self {
        Self {
            params,
            hoisted: BTreeSet::new(),
            counter: 0,
        }
    }

    /// Bind a literal to the next free `pN` name and return its placeholder.
    fn hoist(&mut self, value: &serde_json::Value) -> String {
        loop {
            self.counter += 1;
            let name = format!("p{}", self.counter);
            if !self.params.contains_key(&name) {
                self.params.insert(name.clone(), value.clone());
                self.hoisted.insert(name.clone());
                return format!("${}", name);
            }
        }
    }

    fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Literal(value) => self.hoist(value),
            Expr::Param(name) => format!("${}", name),
            Expr::Raw(text) => text.clone(),
        }
    }
}

/// Validate `structure` and compile it with the given caller parameters.
///
/// Bindings carried by WHERE clauses are merged into `parameters` first;
/// hoisted literal names never shadow them.
pub fn compile(structure: &QueryStructure, mut parameters: Params) -> QueryResult<Fragment> {
    structure.validate()?;

    for entry in structure.clauses() {
        if let Clause::Where {
            parameters: bound, ..
        } = &entry.clause
        {
            merge_params(&mut parameters, bound)?;
        }
    }

    let mut ctx = RenderContext::new(parameters);
    let mut parts: Vec<String> = Vec::new();
    let mut previous_scope = Scope::Main;
    let mut previous_was_union = false;

    for entry in structure.clauses() {
        if entry.scope != previous_scope {
            parts.extend(transition(previous_scope, entry.scope, previous_was_union));
            previous_scope = entry.scope;
        }
        parts.push(render_clause(&entry.clause, &mut ctx));
        previous_was_union = matches!(entry.clause, Clause::Union { .. });
    }

    if matches!(previous_scope, Scope::Subquery(_)) {
        parts.push("}".to_string());
    }

    Ok(Fragment::compiled(
        parts.join(" "),
        ctx.params,
        ctx.hoisted,
        structure.clone(),
    ))
}

/// Tokens emitted when moving from one scope to the next.
fn transition(from: Scope, to: Scope, previous_was_union: bool) -> Vec<String> {
    let mut tokens = Vec::new();

    if matches!(from, Scope::Subquery(_)) {
        tokens.push("}".to_string());
    }

    match to {
        Scope::Subquery(_) => tokens.push("CALL {".to_string()),
        Scope::Union { branch, all } if branch > 0 && !previous_was_union => {
            tokens.push(if all { "UNION ALL" } else { "UNION" }.to_string());
        }
        _ => {}
    }
    tokens
}

fn render_clause(clause: &Clause, ctx: &mut RenderContext) -> String {
    match clause {
        Clause::Match { patterns, optional } => {
            let keyword = if *optional { "OPTIONAL MATCH " } else { "MATCH " };
            format!("{}{}", keyword, render_patterns(patterns, ctx))
        }
        Clause::Where { condition, .. } => format!("WHERE {}", condition),
        Clause::Create { patterns } => format!("CREATE {}", render_patterns(patterns, ctx)),
        Clause::Merge {
            pattern,
            on_create,
            on_match,
            ..
        } => {
            let mut text = format!("MERGE {}", render_pattern(pattern, ctx));
            if let Some(items) = on_create.as_ref().filter(|items| !items.is_empty()) {
                text.push_str(" ON CREATE SET ");
                text.push_str(&render_set_items(items, ctx));
            }
            if let Some(items) = on_match.as_ref().filter(|items| !items.is_empty()) {
                text.push_str(" ON MATCH SET ");
                text.push_str(&render_set_items(items, ctx));
            }
            text
        }
        Clause::Delete { aliases, detach } => {
            let keyword = if *detach { "DETACH DELETE " } else { "DELETE " };
            format!("{}{}", keyword, aliases.join(", "))
        }
        Clause::Set(item) => format!("SET {}", render_set_item(item, ctx)),
        Clause::Remove { alias, property } => {
            format!("REMOVE {}.{}", alias, escape_identifier(property))
        }
        Clause::Return { items, distinct } => {
            let keyword = if *distinct { "RETURN DISTINCT " } else { "RETURN " };
            format!("{}{}", keyword, render_projection(items))
        }
        Clause::With {
            items,
            where_condition,
        } => {
            let mut text = format!("WITH {}", render_projection(items));
            if let Some(condition) = where_condition {
                text.push_str(" WHERE ");
                text.push_str(condition);
            }
            text
        }
        Clause::OrderBy { items } => format!("ORDER BY {}", render_order(items)),
        Clause::Skip(n) => format!("SKIP {}", n),
        Clause::Limit(n) => format!("LIMIT {}", n),
        Clause::Unwind { list, alias } => format!("UNWIND {} AS {}", ctx.expr(list), alias),
        Clause::Call {
            procedure,
            args,
            yields,
        } => {
            let args = args
                .iter()
                .map(|a| ctx.expr(a))
                .collect::<Vec<_>>()
                .join(", ");
            let mut text = format!("CALL {}({})", procedure, args);
            if let Some(yields) = yields.as_ref().filter(|y| !y.is_empty()) {
                text.push_str(" YIELD ");
                text.push_str(&yields.join(", "));
            }
            text
        }
        Clause::Union { all } => if *all { "UNION ALL" } else { "UNION" }.to_string(),
        Clause::Foreach {
            variable,
            list,
            updates,
        } => {
            let list = ctx.expr(list);
            let body = updates
                .iter()
                .map(|u| render_clause(u, ctx))
                .collect::<Vec<_>>()
                .join(" ");
            format!("FOREACH ({} IN {} | {})", variable, list, body)
        }
    }
}

// ============================================================================
// Patterns
// ============================================================================

fn render_patterns(patterns: &[PatternElement], ctx: &mut RenderContext) -> String {
    patterns
        .iter()
        .map(|p| render_pattern(p, ctx))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_pattern(pattern: &PatternElement, ctx: &mut RenderContext) -> String {
    match pattern {
        PatternElement::Node(node) => render_node(node, ctx),
        PatternElement::Relationship(rel) => render_relationship(rel, ctx),
    }
}

fn render_node(node: &NodePattern, ctx: &mut RenderContext) -> String {
    let mut text = format!("({}", node.alias);
    if let Some(label) = &node.label {
        text.push(':');
        text.push_str(&escape_identifier(label));
    }
    if let Some(props) = &node.properties {
        text.push_str(&render_properties(props, ctx));
    }
    text.push(')');
    text
}

fn render_relationship(rel: &RelationshipPattern, ctx: &mut RenderContext) -> String {
    let mut inner = rel.alias.clone().unwrap_or_default();
    if let Some(rel_type) = &rel.rel_type {
        inner.push(':');
        inner.push_str(&escape_identifier(rel_type));
    }
    if let Some(props) = &rel.properties {
        inner.push_str(&render_properties(props, ctx));
    }

    let (left, right) = match rel.direction {
        EdgeDirection::Out => ("-", "->"),
        EdgeDirection::In => ("<-", "-"),
        EdgeDirection::Undirected => ("-", "-"),
    };
    format!("({}){}[{}]{}({})", rel.from, left, inner, right, rel.to)
}

/// ` {key: $p1, other: $p2}` in key order; empty maps render nothing.
fn render_properties(props: &PropertyMap, ctx: &mut RenderContext) -> String {
    if props.is_empty() {
        return String::new();
    }
    let rendered = props
        .iter()
        .map(|(key, value)| format!("{}: {}", escape_identifier(key), ctx.expr(value)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(" {{{}}}", rendered)
}

// ============================================================================
// Items
// ============================================================================

fn render_set_item(item: &SetItem, ctx: &mut RenderContext) -> String {
    format!(
        "{}.{} = {}",
        item.alias,
        escape_identifier(&item.property),
        ctx.expr(&item.value)
    )
}

fn render_set_items(items: &[SetItem], ctx: &mut RenderContext) -> String {
    items
        .iter()
        .map(|i| render_set_item(i, ctx))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_projection(items: &[ProjectionItem]) -> String {
    items
        .iter()
        .map(|item| match &item.alias {
            Some(alias) => format!("{} AS {}", item.expression, alias),
            None => item.expression.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_order(items: &[OrderItem]) -> String {
    items
        .iter()
        .map(|item| {
            if item.descending {
                format!("{} DESC", item.expression)
            } else {
                item.expression.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
