//! Values, parameter maps and clause expressions.
//!
//! Literals travel as `serde_json::Value`. Any literal that ends up inside a
//! rendered clause is hoisted into a generated parameter, so compiled text
//! never inlines user data.

use crate::error::{QueryError, QueryResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use serde_json::Value;

/// Parameter bindings keyed by name (without the leading `$`).
pub type Params = HashMap<String, Value>;

/// A value-position expression inside a clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Literal value, hoisted into a generated `$pN` parameter when rendered.
    Literal(Value),
    /// Reference to a caller-supplied parameter, rendered as `$name`.
    Param(String),
    /// Expression text rendered verbatim (e.g. `u.visits + 1`).
    Raw(String),
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Expr::Raw(text.into())
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

/// Compare two parameter values for conflict detection.
///
/// Structural equality first; values that differ structurally but share the
/// same canonical text (e.g. differently-ordered objects) still match.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || a.to_string() == b.to_string()
}

/// Insert a single binding, failing if the key is already bound to a
/// different value.
pub fn bind_param(params: &mut Params, key: &str, value: &Value) -> QueryResult<()> {
    match params.get(key) {
        Some(existing) if !values_equal(existing, value) => Err(QueryError::conflict(key)),
        Some(_) => Ok(()),
        None => {
            params.insert(key.to_string(), value.clone());
            Ok(())
        }
    }
}

/// Merge `incoming` into `target` with conflict detection.
///
/// On conflict `target` is left unchanged.
pub fn merge_params(target: &mut Params, incoming: &Params) -> QueryResult<()> {
    let mut keys: Vec<&String> = incoming.keys().collect();
    keys.sort();

    for key in &keys {
        if let Some(existing) = target.get(key.as_str()) {
            if !values_equal(existing, &incoming[key.as_str()]) {
                return Err(QueryError::conflict(key.as_str()));
            }
        }
    }

    for key in keys {
        target
            .entry(key.clone())
            .or_insert_with(|| incoming[key.as_str()].clone());
    }
    Ok(())
}

/// Whether `name` can be rendered without quoting.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Blank out the contents of quoted strings, keeping byte offsets.
pub(crate) fn mask_literals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                    out.push(c);
                    continue;
                }
                out.extend(std::iter::repeat(' ').take(c.len_utf8()));
            }
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
    out
}

/// Words that can precede an alias inside a projection without being one.
const PROJECTION_KEYWORDS: &[&str] = &[
    "distinct", "true", "false", "null", "and", "or", "xor", "not", "in", "is", "case", "when",
    "then", "else", "end",
];

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_]\w*").expect("identifier pattern is valid"));

/// First alias a projection expression reads from.
///
/// Skips function names, property keys, parameters, keywords and quoted
/// text: `count(u)` and `toLower(u.name)` both read `u`, while `count(*)`
/// and `'label'` read nothing.
pub fn projection_source(expression: &str) -> Option<String> {
    let masked = mask_literals(expression);
    IDENT_RE.find_iter(&masked).find_map(|m| {
        let attached = masked[..m.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c == '.' || c == '$' || c == '`' || c.is_ascii_alphanumeric() || c == '_');
        let called = masked[m.end()..].trim_start().starts_with('(');
        let keyword = PROJECTION_KEYWORDS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(m.as_str()));

        (!attached && !called && !keyword).then(|| m.as_str().to_string())
    })
}

/// Quote a label, relationship type or property key for Cypher.
///
/// Plain identifiers pass through; anything else is wrapped in backticks
/// with embedded backticks doubled.
pub fn escape_identifier(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}
