//! Raw Cypher fragment parser.
//!
//! Recognizes a deliberately small subset:
//! - `MATCH` / `OPTIONAL MATCH` with node patterns and relationship chains
//! - `WHERE` conditions (kept verbatim, aliases extracted from `alias.` prefixes)
//! - `RETURN [DISTINCT]` with `alias`, `alias.prop`, `fn(alias[.prop])` items
//!
//! Anything else is rejected with a positioned error rather than guessed at.

use crate::error::{QueryError, QueryResult};
use crate::ir::{
    Clause, EdgeDirection, NodePattern, PatternElement, ProjectionItem, PropertyMap,
    RelationshipPattern,
};
use crate::structure::QueryStructure;
use crate::syntax::common::{format_errors, ident, kw, line_col, name, value_parser, Extra};
use crate::value::{mask_literals, Expr, Params};
use chumsky::prelude::*;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// `alias.` at a word start that is not itself a property access
static ALIAS_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\w.$`])([A-Za-z_]\w*)\.").expect("alias prefix pattern is valid")
});

/// Clause keywords that raw fragments cannot carry.
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "CREATE", "MERGE", "SET", "DELETE", "DETACH", "REMOVE", "WITH", "UNWIND", "CALL", "UNION",
    "ORDER", "SKIP", "LIMIT", "FOREACH",
];

/// Parse raw fragment text into a structure.
pub fn parse_raw(input: &str) -> QueryResult<QueryStructure> {
    let sections = split_sections(input)?;
    let mut structure = QueryStructure::new();

    for section in &sections {
        let clause = match section.kind {
            SectionKind::Match { optional } => {
                let chains = parse_section(pattern_list_parser(), section, input)?;
                Clause::Match {
                    patterns: pattern_elements(chains, section, input)?,
                    optional,
                }
            }
            SectionKind::Where => where_clause(section, input)?,
            SectionKind::Return => {
                let (distinct, items) = parse_section(return_body_parser(), section, input)?;
                if items.iter().any(|item| item.expression == "*") {
                    return Err(positioned(
                        input,
                        section.keyword_at,
                        "RETURN * cannot be merged; list the returned items",
                    ));
                }
                Clause::Return { items, distinct }
            }
        };
        structure.add_clause(clause);
    }

    debug!(
        clauses = structure.len(),
        "parsed raw fragment into structure"
    );
    Ok(structure)
}

// ============================================================================
// Section splitting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Match { optional: bool },
    Where,
    Return,
}

impl SectionKind {
    fn keyword(self) -> &'static str {
        match self {
            SectionKind::Match { optional: true } => "OPTIONAL MATCH",
            SectionKind::Match { optional: false } => "MATCH",
            SectionKind::Where => "WHERE",
            SectionKind::Return => "RETURN",
        }
    }
}

#[derive(Debug)]
struct Section<'src> {
    kind: SectionKind,
    body: &'src str,
    /// Byte offset of `body` within the input
    offset: usize,
    /// Byte offset of the keyword within the input
    keyword_at: usize,
}

struct KeywordHit {
    kind: SectionKind,
    start: usize,
    end: usize,
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Split input at top-level clause keywords.
///
/// Keywords inside quotes, backticks or brackets, and words used as
/// property keys or labels, are not clause boundaries.
fn split_sections(input: &str) -> QueryResult<Vec<Section<'_>>> {
    let bytes = input.as_bytes();
    let mut hits: Vec<KeywordHit> = Vec::new();
    let mut quote: Option<u8> = None;
    let mut depth: i32 = 0;
    let mut previous_word: Option<&str> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if let Some(q) = quote {
            if b == b'\\' && q != b'`' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match b {
            b'\'' | b'"' | b'`' => {
                quote = Some(b);
                i += 1;
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            _ => {}
        }

        if !is_word_byte(b) {
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && is_word_byte(bytes[i]) {
            i += 1;
        }
        let word = &input[start..i];
        let attached = start > 0 && matches!(bytes[start - 1], b'.' | b'$' | b':');

        if depth == 0 && !attached && !word.as_bytes()[0].is_ascii_digit() {
            let upper = word.to_ascii_uppercase();
            match upper.as_str() {
                "MATCH" => hits.push(KeywordHit {
                    kind: SectionKind::Match { optional: false },
                    start,
                    end: i,
                }),
                "WHERE" => hits.push(KeywordHit {
                    kind: SectionKind::Where,
                    start,
                    end: i,
                }),
                "RETURN" => hits.push(KeywordHit {
                    kind: SectionKind::Return,
                    start,
                    end: i,
                }),
                "OPTIONAL" => match following_match(input, i) {
                    Some(end) => {
                        hits.push(KeywordHit {
                            kind: SectionKind::Match { optional: true },
                            start,
                            end,
                        });
                        i = end;
                    }
                    None => return Err(unsupported(input, start, "OPTIONAL")),
                },
                "WITH"
                    if previous_word.is_some_and(|w| {
                        w.eq_ignore_ascii_case("STARTS") || w.eq_ignore_ascii_case("ENDS")
                    }) => {}
                other if UNSUPPORTED_KEYWORDS.contains(&other) => {
                    return Err(unsupported(input, start, other));
                }
                _ => {}
            }
        }
        previous_word = Some(word);
    }

    let first = match hits.first() {
        Some(hit) => hit,
        None => {
            return Err(QueryError::compilation(
                "raw fragment has no MATCH clause (line 1, column 1)",
            ))
        }
    };

    let leading = &input[..first.start];
    if !leading.trim().is_empty() || !matches!(first.kind, SectionKind::Match { .. }) {
        let at = input.len() - input.trim_start().len();
        let (line, column) = line_col(input, at);
        return Err(QueryError::compilation(format!(
            "raw fragment must start with MATCH or OPTIONAL MATCH (line {}, column {})",
            line, column
        )));
    }

    let sections = hits
        .iter()
        .enumerate()
        .map(|(n, hit)| {
            let end = hits.get(n + 1).map_or(input.len(), |next| next.start);
            Section {
                kind: hit.kind,
                body: &input[hit.end..end],
                offset: hit.end,
                keyword_at: hit.start,
            }
        })
        .collect();
    Ok(sections)
}

/// End offset of a `MATCH` word following `OPTIONAL` at `from`.
fn following_match(input: &str, from: usize) -> Option<usize> {
    let rest = &input[from..];
    let skipped = rest.len() - rest.trim_start().len();
    if skipped == 0 {
        return None;
    }
    let start = from + skipped;
    let end = start + 5;
    let word = input.get(start..end)?;
    let boundary = input.as_bytes().get(end).map_or(true, |b| !is_word_byte(*b));
    (word.eq_ignore_ascii_case("MATCH") && boundary).then_some(end)
}

fn positioned(input: &str, offset: usize, message: &str) -> QueryError {
    let (line, column) = line_col(input, offset);
    QueryError::compilation(format!("{} at line {}, column {}", message, line, column))
}

fn unsupported(input: &str, offset: usize, keyword: &str) -> QueryError {
    let (line, column) = line_col(input, offset);
    QueryError::compilation(format!(
        "unsupported clause {} in raw fragment at line {}, column {}; only MATCH, OPTIONAL MATCH, WHERE and RETURN are recognized",
        keyword, line, column
    ))
}

fn parse_section<'src, T>(
    parser: impl Parser<'src, &'src str, T, Extra<'src>>,
    section: &Section<'src>,
    input: &str,
) -> QueryResult<T> {
    parser
        .then_ignore(end())
        .parse(section.body)
        .into_result()
        .map_err(|errs| {
            QueryError::compilation(format!(
                "invalid {} section:\n{}",
                section.kind.keyword(),
                format_errors(&errs, input, section.offset)
            ))
        })
}

// ============================================================================
// WHERE
// ============================================================================

fn where_clause(section: &Section<'_>, input: &str) -> QueryResult<Clause> {
    let condition = section.body.trim();
    if condition.is_empty() {
        return Err(positioned(
            input,
            section.keyword_at,
            "WHERE without a condition",
        ));
    }

    let masked = mask_literals(condition);
    let mut referenced_aliases: Vec<String> = Vec::new();
    for caps in ALIAS_PREFIX_RE.captures_iter(&masked) {
        let alias = caps[1].to_string();
        if !referenced_aliases.contains(&alias) {
            referenced_aliases.push(alias);
        }
    }

    Ok(Clause::Where {
        condition: condition.to_string(),
        referenced_aliases,
        parameters: Params::new(),
    })
}

// ============================================================================
// MATCH patterns
// ============================================================================

#[derive(Debug, Clone)]
struct NodePart {
    alias: Option<String>,
    label: Option<String>,
    properties: Vec<(String, Expr)>,
}

#[derive(Debug, Clone)]
struct EdgePart {
    alias: Option<String>,
    rel_type: Option<String>,
    properties: Vec<(String, Expr)>,
    direction: EdgeDirection,
}

fn properties_block<'src>(
) -> impl Parser<'src, &'src str, Vec<(String, Expr)>, Extra<'src>> + Clone {
    let property = name()
        .padded()
        .then_ignore(just(':'))
        .padded()
        .then(value_parser())
        .labelled("property like id: 42");

    just('{')
        .padded()
        .ignore_then(
            property
                .separated_by(just(',').padded())
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(just('}').padded())
        .or_not()
        .map(|opt| opt.unwrap_or_default())
}

fn node_parser<'src>() -> impl Parser<'src, &'src str, NodePart, Extra<'src>> + Clone {
    let alias = ident().padded().or_not();
    let label = just(':').padded().ignore_then(name()).or_not();

    just('(')
        .padded()
        .ignore_then(alias)
        .then(label)
        .then(properties_block())
        .then_ignore(just(')').padded())
        .map(|((alias, label), properties)| NodePart {
            alias,
            label,
            properties,
        })
}

fn edge_parser<'src>() -> impl Parser<'src, &'src str, EdgePart, Extra<'src>> + Clone {
    let inner = just('[')
        .padded()
        .ignore_then(ident().padded().or_not())
        .then(just(':').padded().ignore_then(name()).or_not())
        .then(properties_block())
        .then_ignore(just(']').padded())
        .labelled("relationship like [r:KNOWS]");

    let edge = move |direction: EdgeDirection| {
        move |((alias, rel_type), properties): ((Option<String>, Option<String>), Vec<(String, Expr)>)| {
            EdgePart {
                alias,
                rel_type,
                properties,
                direction,
            }
        }
    };

    let incoming = just("<-")
        .padded()
        .ignore_then(inner.clone())
        .then_ignore(just('-').padded())
        .map(edge(EdgeDirection::In))
        .labelled("incoming relationship like <-[:KNOWS]-");

    let outgoing = just('-')
        .padded()
        .ignore_then(inner.clone())
        .then_ignore(just("->").padded())
        .map(edge(EdgeDirection::Out))
        .labelled("outgoing relationship like -[:KNOWS]->");

    let undirected = just('-')
        .padded()
        .ignore_then(inner)
        .then_ignore(just('-').padded())
        .map(edge(EdgeDirection::Undirected))
        .labelled("undirected relationship like -[:KNOWS]-");

    choice((incoming, outgoing, undirected))
}

/// A node followed by zero or more relationship hops
type Chain = (NodePart, Vec<(EdgePart, NodePart)>);

/// Comma-separated pattern chains: `(a:A)-[:R]->(b), (c)`
fn pattern_list_parser<'src>() -> impl Parser<'src, &'src str, Vec<Chain>, Extra<'src>> {
    node_parser()
        .then(edge_parser().then(node_parser()).repeated().collect::<Vec<_>>())
        .separated_by(just(',').padded())
        .at_least(1)
        .collect::<Vec<_>>()
        .padded()
}

fn pattern_elements(
    chains: Vec<Chain>,
    section: &Section<'_>,
    input: &str,
) -> QueryResult<Vec<PatternElement>> {
    let mut elements = Vec::new();
    for (first, rest) in chains {
        let hops = rest.into_iter().map(|(edge, node)| Some((edge, named(node)?)));
        let rest = hops.collect::<Option<Vec<_>>>();
        match (named(first), rest) {
            (Some(first), Some(rest)) => elements.extend(chain_elements(first, rest)),
            _ => {
                return Err(positioned(
                    input,
                    section.keyword_at,
                    "anonymous node patterns cannot be merged; give every node in the MATCH an alias",
                ))
            }
        }
    }
    Ok(elements)
}

/// A node whose alias is known to be present
struct NamedNode {
    alias: String,
    label: Option<String>,
    properties: Vec<(String, Expr)>,
}

fn named(node: NodePart) -> Option<NamedNode> {
    let alias = node.alias?;
    Some(NamedNode {
        alias,
        label: node.label,
        properties: node.properties,
    })
}

fn property_map(properties: Vec<(String, Expr)>) -> Option<PropertyMap> {
    if properties.is_empty() {
        None
    } else {
        Some(properties.into_iter().collect())
    }
}

/// Flatten a chain into node and relationship elements.
///
/// Nodes inside a chain only get their own element when they carry a label
/// or properties; the relationship already defines their alias.
fn chain_elements(first: NamedNode, rest: Vec<(EdgePart, NamedNode)>) -> Vec<PatternElement> {
    let standalone = rest.is_empty();
    let mut elements = Vec::new();

    let mut previous = first.alias.clone();
    push_node(&mut elements, first, standalone);
    for (edge, node) in rest {
        elements.push(PatternElement::Relationship(RelationshipPattern {
            alias: edge.alias,
            rel_type: edge.rel_type,
            properties: property_map(edge.properties),
            from: previous,
            to: node.alias.clone(),
            direction: edge.direction,
        }));
        previous = node.alias.clone();
        push_node(&mut elements, node, false);
    }
    elements
}

fn push_node(elements: &mut Vec<PatternElement>, node: NamedNode, always: bool) {
    if always || node.label.is_some() || !node.properties.is_empty() {
        elements.push(PatternElement::Node(NodePattern {
            alias: node.alias,
            label: node.label,
            properties: property_map(node.properties),
        }));
    }
}

// ============================================================================
// RETURN
// ============================================================================

fn projection_parser<'src>() -> impl Parser<'src, &'src str, ProjectionItem, Extra<'src>> {
    // alias or alias.property
    let field = ident()
        .then(just('.').ignore_then(name()).or_not())
        .map(|(alias, prop)| {
            let expression = match &prop {
                Some(p) => format!("{}.{}", alias, p),
                None => alias.clone(),
            };
            (expression, Some(alias))
        });

    // fn(alias[.prop]), fn(*) or fn()
    let argument = choice((
        just('*').padded().to(("*".to_string(), None)),
        field.clone().padded(),
    ))
    .or_not();
    let call = ident()
        .then_ignore(just('(').padded())
        .then(argument)
        .then_ignore(just(')'))
        .map(|(function, argument)| match argument {
            Some((inner, source)) => (format!("{}({})", function, inner), source),
            None => (format!("{}()", function), None),
        });

    // Accepted here so the caller can reject it with a clearer message
    let star = just('*').to(("*".to_string(), None));

    let as_alias = kw("AS").ignore_then(ident()).or_not();

    choice((star, call, field))
        .padded()
        .then(as_alias)
        .map(|((expression, source_alias), alias)| ProjectionItem {
            expression,
            alias,
            source_alias,
        })
}

fn return_body_parser<'src>(
) -> impl Parser<'src, &'src str, (bool, Vec<ProjectionItem>), Extra<'src>> {
    kw("DISTINCT")
        .or_not()
        .map(|d| d.is_some())
        .then(
            projection_parser()
                .separated_by(just(',').padded())
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .padded()
}
