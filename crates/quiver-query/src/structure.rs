//! Ordered, scoped clause sequence and its structural validation.

use crate::error::{QueryError, QueryResult};
use crate::ir::{Clause, ClauseCategory, OrderedClause, Scope};
use crate::value::is_plain_identifier;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// An ordered list of scoped clauses.
///
/// Append/replace only: `order` always equals the clause's index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStructure {
    clauses: Vec<OrderedClause>,
}

/// Per-scope state tracked while checking clause ordering.
#[derive(Default)]
struct ScopeState {
    closed_by: Option<&'static str>,
    last_was_mutation: bool,
}

impl QueryStructure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a clause to the main scope.
    pub fn add_clause(&mut self, clause: Clause) {
        self.add_clause_in(clause, Scope::Main);
    }

    /// Append a clause to the given scope at the next order index.
    pub fn add_clause_in(&mut self, clause: Clause, scope: Scope) {
        let order = self.clauses.len();
        self.clauses.push(OrderedClause {
            order,
            clause,
            scope,
        });
    }

    /// Replace the clause at `index`, keeping its order.
    pub fn replace_clause(&mut self, index: usize, clause: Clause, scope: Scope) -> QueryResult<()> {
        let len = self.clauses.len();
        let slot = self.clauses.get_mut(index).ok_or_else(|| {
            QueryError::compilation(format!(
                "cannot replace clause {} in a structure of {} clauses",
                index, len
            ))
        })?;
        slot.clause = clause;
        slot.scope = scope;
        Ok(())
    }

    pub fn clauses(&self) -> &[OrderedClause] {
        &self.clauses
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Every alias defined anywhere in the structure.
    pub fn defined_aliases(&self) -> BTreeSet<String> {
        self.clauses
            .iter()
            .flat_map(|c| c.clause.defined_aliases())
            .collect()
    }

    /// Check ordering, required-clause and alias rules.
    ///
    /// Pure: no I/O happens here or before it succeeds.
    pub fn validate(&self) -> QueryResult<()> {
        self.validate_ordering()?;
        self.validate_required_clause()?;
        self.validate_foreach_bodies()?;
        self.validate_alias_names()?;
        self.validate_aliases()
    }

    fn validate_ordering(&self) -> QueryResult<()> {
        let mut scopes: HashMap<Scope, ScopeState> = HashMap::new();

        for entry in &self.clauses {
            let state = scopes.entry(entry.scope).or_default();
            let clause = &entry.clause;
            let category = clause.category();

            if let Some(closer) = state.closed_by {
                if matches!(category, ClauseCategory::Read | ClauseCategory::Write) {
                    return Err(QueryError::compilation(format!(
                        "{} at position {} follows {} in {:?} scope; no read or write clause may follow a result clause",
                        clause.kind(),
                        entry.order,
                        closer,
                        entry.scope
                    )));
                }
            }

            if state.last_was_mutation && category == ClauseCategory::Read {
                return Err(QueryError::compilation(format!(
                    "{} at position {} directly follows a write clause in {:?} scope; separate them with WITH",
                    clause.kind(),
                    entry.order,
                    entry.scope
                )));
            }

            if category == ClauseCategory::Result && state.closed_by.is_none() {
                state.closed_by = Some(clause.kind());
            }
            state.last_was_mutation = clause.is_mutation();
        }
        Ok(())
    }

    fn validate_required_clause(&self) -> QueryResult<()> {
        if self.clauses.is_empty() {
            return Ok(());
        }
        let has_body = self.clauses.iter().any(|c| {
            matches!(
                c.clause.category(),
                ClauseCategory::Read | ClauseCategory::Write
            )
        });
        if has_body {
            Ok(())
        } else {
            Err(QueryError::compilation(
                "query contains no read or write clause",
            ))
        }
    }

    fn validate_foreach_bodies(&self) -> QueryResult<()> {
        for entry in &self.clauses {
            if let Clause::Foreach { updates, .. } = &entry.clause {
                if updates.is_empty() {
                    return Err(QueryError::compilation(format!(
                        "FOREACH at position {} has an empty body",
                        entry.order
                    )));
                }
                if let Some(bad) = updates
                    .iter()
                    .find(|c| c.category() != ClauseCategory::Write && !c.is_mutation())
                {
                    return Err(QueryError::compilation(format!(
                        "FOREACH at position {} may only contain write clauses, found {}",
                        entry.order,
                        bad.kind()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Aliases are rendered verbatim, so each must be a plain identifier.
    fn validate_alias_names(&self) -> QueryResult<()> {
        fn collect(clause: &Clause, names: &mut BTreeSet<String>) {
            names.extend(clause.defined_aliases());
            names.extend(clause.used_aliases());
            if let Clause::Foreach {
                variable, updates, ..
            } = clause
            {
                names.insert(variable.clone());
                for update in updates {
                    collect(update, names);
                }
            }
        }

        let mut names = BTreeSet::new();
        for entry in &self.clauses {
            collect(&entry.clause, &mut names);
        }

        let invalid: Vec<String> = names
            .into_iter()
            .filter(|name| !is_plain_identifier(name))
            .collect();
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(QueryError::compilation(format!(
                "aliases must be plain identifiers: {}",
                invalid.join(", ")
            )))
        }
    }

    fn validate_aliases(&self) -> QueryResult<()> {
        let defined: HashSet<String> = self.defined_aliases().into_iter().collect();

        let undefined: BTreeSet<String> = self
            .clauses
            .iter()
            .flat_map(|c| c.clause.used_aliases())
            .filter(|alias| !defined.contains(alias))
            .collect();

        if undefined.is_empty() {
            Ok(())
        } else {
            Err(QueryError::compilation(format!(
                "undefined aliases: {}",
                undefined.into_iter().collect::<Vec<_>>().join(", ")
            )))
        }
    }
}
