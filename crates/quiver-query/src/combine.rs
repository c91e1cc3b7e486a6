//! Kind-aware merging of fragments into one structure.
//!
//! Merge rules, applied per incoming clause within its own scope:
//! - MATCH: pattern elements are unioned into the first MATCH with the same
//!   `optional` flag; an incoming element whose alias already exists is dropped.
//!   A MATCH with no partner goes ahead of the scope's first result clause
//! - WHERE: conditions are conjoined as `(C1) AND (C2)`, aliases and
//!   parameters unioned; a first WHERE is placed right after the last MATCH
//! - RETURN: items are appended unless their expression is already returned;
//!   the first clause's `distinct` flag is kept
//! - everything else is appended in order

use crate::error::QueryResult;
use crate::fragment::Fragment;
use crate::ir::{Clause, ClauseCategory, OrderedClause, PatternElement, ProjectionItem, Scope};
use crate::render::compile;
use crate::structure::QueryStructure;
use crate::syntax::parse_raw;
use crate::value::{merge_params, Params};
use std::collections::HashSet;
use tracing::debug;

/// Accumulates fragments and compiles them into one.
#[derive(Debug, Clone, Default)]
pub struct Combiner {
    structure: QueryStructure,
    parameters: Params,
}

impl Combiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a fragment into the accumulated structure.
    ///
    /// Unstructured fragments go through the raw-text grammar first. A
    /// failing `add` leaves the combiner unchanged.
    pub fn add(&mut self, fragment: &Fragment) -> QueryResult<()> {
        let (incoming, incoming_params) = match fragment.structure() {
            Some(structure) => (structure.clone(), fragment.caller_parameters()),
            None => {
                debug!(text = %fragment.text(), "parsing unstructured fragment");
                (parse_raw(fragment.text())?, fragment.parameters().clone())
            }
        };

        let mut structure = self.structure.clone();
        let mut parameters = self.parameters.clone();
        merge_params(&mut parameters, &incoming_params)?;

        for entry in incoming.clauses() {
            structure = merge_clause(structure, &mut parameters, entry)?;
        }

        debug!(
            clauses = structure.len(),
            parameters = parameters.len(),
            "merged fragment"
        );
        self.structure = structure;
        self.parameters = parameters;
        Ok(())
    }

    /// Validate and compile everything added so far.
    pub fn build(&self) -> QueryResult<Fragment> {
        compile(&self.structure, self.parameters.clone())
    }

    pub fn structure(&self) -> &QueryStructure {
        &self.structure
    }

    pub fn parameters(&self) -> &Params {
        &self.parameters
    }
}

fn merge_clause(
    mut structure: QueryStructure,
    parameters: &mut Params,
    entry: &OrderedClause,
) -> QueryResult<QueryStructure> {
    let scope = entry.scope;

    match &entry.clause {
        Clause::Match { patterns, optional } => {
            let existing = find_in_scope(&structure, scope, |clause| match clause {
                Clause::Match {
                    patterns,
                    optional: o,
                } if o == optional => Some(patterns.clone()),
                _ => None,
            });
            match existing {
                Some((index, current)) => {
                    let merged = union_patterns(current, patterns);
                    structure.replace_clause(
                        index,
                        Clause::Match {
                            patterns: merged,
                            optional: *optional,
                        },
                        scope,
                    )?;
                }
                None => {
                    structure = insert_before_first_result(structure, entry.clause.clone(), scope)
                }
            }
        }
        Clause::Where {
            condition,
            referenced_aliases,
            parameters: bound,
        } => {
            merge_params(parameters, bound)?;
            let existing = find_in_scope(&structure, scope, |clause| match clause {
                Clause::Where {
                    condition,
                    referenced_aliases,
                    parameters,
                } => Some((condition.clone(), referenced_aliases.clone(), parameters.clone())),
                _ => None,
            });
            match existing {
                Some((index, (current, mut aliases, mut merged_params))) => {
                    for alias in referenced_aliases {
                        if !aliases.contains(alias) {
                            aliases.push(alias.clone());
                        }
                    }
                    merge_params(&mut merged_params, bound)?;
                    debug!(index, "conjoining WHERE conditions");
                    structure.replace_clause(
                        index,
                        Clause::Where {
                            condition: format!("({}) AND ({})", current, condition),
                            referenced_aliases: aliases,
                            parameters: merged_params,
                        },
                        scope,
                    )?;
                }
                None => structure = insert_after_last_match(structure, entry.clause.clone(), scope),
            }
        }
        Clause::Return { items, distinct } => {
            let existing = find_in_scope(&structure, scope, |clause| match clause {
                Clause::Return { items, distinct } => Some((items.clone(), *distinct)),
                _ => None,
            });
            match existing {
                Some((index, (current, first_distinct))) => {
                    let merged = union_items(current, items);
                    structure.replace_clause(
                        index,
                        Clause::Return {
                            items: merged,
                            distinct: first_distinct,
                        },
                        scope,
                    )?;
                }
                None => structure.add_clause_in(
                    Clause::Return {
                        items: items.clone(),
                        distinct: *distinct,
                    },
                    scope,
                ),
            }
        }
        other => structure.add_clause_in(other.clone(), scope),
    }

    Ok(structure)
}

/// First clause in `scope` for which `pick` yields a value.
fn find_in_scope<T>(
    structure: &QueryStructure,
    scope: Scope,
    pick: impl Fn(&Clause) -> Option<T>,
) -> Option<(usize, T)> {
    structure
        .clauses()
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.scope == scope)
        .find_map(|(index, entry)| pick(&entry.clause).map(|value| (index, value)))
}

fn union_patterns(mut current: Vec<PatternElement>, incoming: &[PatternElement]) -> Vec<PatternElement> {
    let mut seen: HashSet<String> = current
        .iter()
        .filter_map(|p| p.alias().map(str::to_string))
        .collect();

    for pattern in incoming {
        if let Some(alias) = pattern.alias() {
            if !seen.insert(alias.to_string()) {
                debug!(alias, "dropping duplicate pattern");
                continue;
            }
        }
        current.push(pattern.clone());
    }
    current
}

fn union_items(mut current: Vec<ProjectionItem>, incoming: &[ProjectionItem]) -> Vec<ProjectionItem> {
    for item in incoming {
        if !current.iter().any(|c| c.expression == item.expression) {
            current.push(item.clone());
        }
    }
    current
}

/// Place `clause` right after the last MATCH of `scope`, or at the end of
/// the structure when the scope has no MATCH.
fn insert_after_last_match(structure: QueryStructure, clause: Clause, scope: Scope) -> QueryStructure {
    let anchor = structure
        .clauses()
        .iter()
        .rposition(|entry| entry.scope == scope && matches!(entry.clause, Clause::Match { .. }));

    match anchor {
        Some(anchor) => insert_at(structure, anchor + 1, clause, scope),
        None => append(structure, clause, scope),
    }
}

/// Place a read clause ahead of the first result clause of `scope`, so a
/// MATCH arriving after a RETURN was accumulated still precedes it.
fn insert_before_first_result(structure: QueryStructure, clause: Clause, scope: Scope) -> QueryStructure {
    let anchor = structure
        .clauses()
        .iter()
        .position(|entry| entry.scope == scope && entry.clause.category() == ClauseCategory::Result);

    match anchor {
        Some(anchor) => insert_at(structure, anchor, clause, scope),
        None => append(structure, clause, scope),
    }
}

fn append(mut structure: QueryStructure, clause: Clause, scope: Scope) -> QueryStructure {
    structure.add_clause_in(clause, scope);
    structure
}

/// Rebuild `structure` with `clause` at `position`.
fn insert_at(structure: QueryStructure, position: usize, clause: Clause, scope: Scope) -> QueryStructure {
    let mut rebuilt = QueryStructure::new();
    let mut pending = Some(clause);
    for (index, entry) in structure.clauses().iter().enumerate() {
        if index == position {
            if let Some(clause) = pending.take() {
                rebuilt.add_clause_in(clause, scope);
            }
        }
        rebuilt.add_clause_in(entry.clause.clone(), entry.scope);
    }
    if let Some(clause) = pending {
        rebuilt.add_clause_in(clause, scope);
    }
    rebuilt
}
