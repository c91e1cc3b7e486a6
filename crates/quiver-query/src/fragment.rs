//! Immutable units of query text with their parameter bindings.

use crate::combine::Combiner;
use crate::error::QueryResult;
use crate::render::compile;
use crate::structure::QueryStructure;
use crate::syntax::parse_raw;
use crate::value::{merge_params, Params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Compiled or raw query text plus parameters.
///
/// When `structure` is present, `text` was rendered from it and the two
/// always agree; fragments are never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    text: String,
    parameters: Params,
    structure: Option<QueryStructure>,
    /// Names of parameters generated by literal hoisting.
    #[serde(default)]
    hoisted: BTreeSet<String>,
}

impl Fragment {
    /// Unstructured fragment from caller-authored text.
    pub fn raw(text: impl Into<String>, parameters: Params) -> Self {
        Self {
            text: text.into(),
            parameters,
            structure: None,
            hoisted: BTreeSet::new(),
        }
    }

    /// Validate and compile a structure with no extra parameters.
    pub fn from_structure(structure: QueryStructure) -> QueryResult<Self> {
        compile(&structure, Params::new())
    }

    pub(crate) fn compiled(
        text: String,
        parameters: Params,
        hoisted: BTreeSet<String>,
        structure: QueryStructure,
    ) -> Self {
        Self {
            text,
            parameters,
            structure: Some(structure),
            hoisted,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &Params {
        &self.parameters
    }

    pub fn structure(&self) -> Option<&QueryStructure> {
        self.structure.as_ref()
    }

    pub fn is_structured(&self) -> bool {
        self.structure.is_some()
    }

    /// Parameters supplied by the caller, excluding hoisted literals.
    pub fn caller_parameters(&self) -> Params {
        self.parameters
            .iter()
            .filter(|(key, _)| !self.hoisted.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn into_parts(self) -> (String, Params) {
        (self.text, self.parameters)
    }

    /// Combine two fragments.
    ///
    /// When either side is structured and every raw side fits the raw
    /// grammar, both are merged clause-by-clause through a [`Combiner`] and
    /// the result is validated and recompiled. Otherwise the texts are
    /// concatenated and the parameter maps merged, failing on conflicting
    /// bindings.
    pub fn merged(&self, other: &Fragment) -> QueryResult<Fragment> {
        let structured = self.is_structured() || other.is_structured();
        let raw_sides_parse = [self, other]
            .into_iter()
            .filter(|f| !f.is_structured())
            .all(|f| parse_raw(&f.text).is_ok());

        if structured && raw_sides_parse {
            let mut combiner = Combiner::new();
            combiner.add(self)?;
            combiner.add(other)?;
            return combiner.build();
        }
        if structured {
            debug!("raw side outside the merge grammar, concatenating text");
        }

        let mut parameters = self.parameters.clone();
        merge_params(&mut parameters, &other.parameters)?;

        let text = match (self.text.trim(), other.text.trim()) {
            ("", rhs) => rhs.to_string(),
            (lhs, "") => lhs.to_string(),
            (lhs, rhs) => format!("{} {}", lhs, rhs),
        };
        Ok(Fragment::raw(text, parameters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::ir::{Clause, NodePattern, ProjectionItem};
    use serde_json::json;

    fn params(pairs: &[(&str, serde_json::Value)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_raw_fragment() {
        let fragment = Fragment::raw("MATCH (n) RETURN n", Params::new());
        assert!(!fragment.is_structured());
        assert_eq!(fragment.text(), "MATCH (n) RETURN n");
    }

    #[test]
    fn test_merged_raw_concatenates() {
        let a = Fragment::raw("MATCH (n:User)", params(&[("id", json!(5))]));
        let b = Fragment::raw("RETURN n", params(&[("id", json!(5))]));

        let merged = a.merged(&b).unwrap();
        assert_eq!(merged.text(), "MATCH (n:User) RETURN n");
        assert_eq!(merged.parameters().len(), 1);
        assert!(!merged.is_structured());
    }

    #[test]
    fn test_merged_raw_conflict() {
        let a = Fragment::raw("MATCH (n:User {id: $id})", params(&[("id", json!(5))]));
        let b = Fragment::raw("RETURN n", params(&[("id", json!(7))]));

        assert_eq!(a.merged(&b).unwrap_err(), QueryError::conflict("id"));
    }

    #[test]
    fn test_merged_structured_recompiles() {
        let mut first = QueryStructure::new();
        first.add_clause(Clause::Match {
            patterns: vec![NodePattern::new("u").label("User").property("id", json!(1)).into()],
            optional: false,
        });
        first.add_clause(Clause::Return {
            items: vec![ProjectionItem::field("u.name")],
            distinct: false,
        });

        let mut second = QueryStructure::new();
        second.add_clause(Clause::Match {
            patterns: vec![NodePattern::new("u").label("User").property("id", json!(2)).into()],
            optional: false,
        });
        second.add_clause(Clause::Return {
            items: vec![ProjectionItem::field("u.email")],
            distinct: false,
        });

        let a = Fragment::from_structure(first).unwrap();
        let b = Fragment::from_structure(second).unwrap();
        // Both carry a hoisted `p1` with different values; that is not a conflict
        assert_eq!(a.parameters()["p1"], json!(1));
        assert_eq!(b.parameters()["p1"], json!(2));

        let merged = a.merged(&b).unwrap();
        assert!(merged.is_structured());
        assert_eq!(
            merged.text(),
            "MATCH (u:User {id: $p1}) RETURN u.name, u.email"
        );
        assert_eq!(merged.parameters()["p1"], json!(1));
    }

    #[test]
    fn test_merged_structured_with_raw_goes_through_combiner() {
        let mut structure = QueryStructure::new();
        structure.add_clause(Clause::Match {
            patterns: vec![NodePattern::new("u").label("User").into()],
            optional: false,
        });
        structure.add_clause(Clause::Return {
            items: vec![ProjectionItem::field("u.name")],
            distinct: false,
        });
        let names = Fragment::from_structure(structure).unwrap();
        let emails = Fragment::raw("MATCH (u:User) RETURN u.email", Params::new());

        let merged = names.merged(&emails).unwrap();
        assert!(merged.is_structured());
        assert_eq!(merged.text(), "MATCH (u:User) RETURN u.name, u.email");

        let reversed = emails.merged(&names).unwrap();
        assert_eq!(reversed.text(), "MATCH (u:User) RETURN u.email, u.name");
    }

    #[test]
    fn test_merged_with_unparseable_raw_concatenates() {
        let mut structure = QueryStructure::new();
        structure.add_clause(Clause::Match {
            patterns: vec![NodePattern::new("u").label("User").into()],
            optional: false,
        });
        let matched = Fragment::from_structure(structure).unwrap();
        let write = Fragment::raw("SET u.seen = true", Params::new());

        let merged = matched.merged(&write).unwrap();
        assert!(!merged.is_structured());
        assert_eq!(merged.text(), "MATCH (u:User) SET u.seen = true");
    }

    #[test]
    fn test_caller_parameters_exclude_hoisted() {
        let mut structure = QueryStructure::new();
        structure.add_clause(Clause::Match {
            patterns: vec![NodePattern::new("u").property("id", json!(1)).into()],
            optional: false,
        });
        structure.add_clause(Clause::Where {
            condition: "u.age > $min".into(),
            referenced_aliases: vec!["u".into()],
            parameters: params(&[("min", json!(18))]),
        });
        structure.add_clause(Clause::Return {
            items: vec![ProjectionItem::field("u")],
            distinct: false,
        });

        let fragment = Fragment::from_structure(structure).unwrap();
        assert_eq!(fragment.parameters().len(), 2);
        let caller = fragment.caller_parameters();
        assert_eq!(caller.len(), 1);
        assert_eq!(caller["min"], json!(18));
    }
}
