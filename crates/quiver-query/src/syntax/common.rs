//! Shared parser primitives for the raw-fragment grammar.

use crate::value::Expr;
use chumsky::extra;
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;
use serde_json::Value;

/// Extra type for parsers - uses Rich errors for better messages
pub type Extra<'src> = extra::Err<Rich<'src, char>>;

// ============================================================================
// Primitive parsers
// ============================================================================

/// Identifier: letter or underscore, then alphanumerics and underscores
pub fn ident<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    any()
        .filter(|c: &char| c.is_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_alphanumeric() || *c == '_')
                .repeated(),
        )
        .to_slice()
        .map(|s: &str| s.to_string())
        .labelled("identifier")
}

/// Backtick-quoted name: `Odd Label`, with doubled backticks unescaped
pub fn quoted_name<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    just('`')
        .ignore_then(
            none_of("`")
                .ignored()
                .or(just("``").ignored())
                .repeated()
                .to_slice()
                .map(|s: &str| s.replace("``", "`")),
        )
        .then_ignore(just('`'))
        .labelled("quoted name")
}

/// Label, relationship type or property key
pub fn name<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    ident().or(quoted_name())
}

/// Parser for single-quoted string literals: 'value'
pub fn single_quoted_string<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    just('\'')
        .ignore_then(
            none_of("'")
                .repeated()
                .to_slice()
                .map(|s: &str| s.to_string()),
        )
        .then_ignore(just('\''))
        .labelled("single-quoted string")
}

/// Parser for double-quoted string literals: "value"
pub fn double_quoted_string<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    just('"')
        .ignore_then(
            none_of("\"")
                .repeated()
                .to_slice()
                .map(|s: &str| s.to_string()),
        )
        .then_ignore(just('"'))
        .labelled("double-quoted string")
}

/// Parser for string literals (single or double quoted)
pub fn string_literal<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    single_quoted_string()
        .or(double_quoted_string())
        .labelled("string literal")
}

/// Case-insensitive keyword; the whole word must match.
pub fn kw<'src>(keyword: &'static str) -> impl Parser<'src, &'src str, (), Extra<'src>> + Clone {
    any()
        .filter(|c: &char| c.is_alphanumeric() || *c == '_')
        .repeated()
        .at_least(1)
        .to_slice()
        .try_map(move |s: &str, span| {
            if s.eq_ignore_ascii_case(keyword) {
                Ok(())
            } else {
                Err(Rich::custom(span, format!("expected keyword '{}'", keyword)))
            }
        })
        .padded()
}

// ============================================================================
// Value parsing
// ============================================================================

/// Property value: `$param`, string, number, boolean or null.
///
/// Parameters become [`Expr::Param`]; everything else is a literal that the
/// compiler hoists.
pub fn value_parser<'src>() -> impl Parser<'src, &'src str, Expr, Extra<'src>> + Clone {
    let string = string_literal().map(Value::String);

    let number = just('-')
        .or_not()
        .then(
            any()
                .filter(|c: &char| c.is_ascii_digit())
                .repeated()
                .at_least(1),
        )
        .then(
            just('.')
                .then(any().filter(|c: &char| c.is_ascii_digit()).repeated())
                .or_not(),
        )
        .to_slice()
        .try_map(|s: &str, span: SimpleSpan| {
            if s.contains('.') {
                let f: f64 = s
                    .parse()
                    .map_err(|_| Rich::custom(span, "invalid float literal"))?;
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| Rich::custom(span, "invalid float (NaN or Infinity)"))
            } else {
                s.parse::<i64>()
                    .map(|n| Value::Number(n.into()))
                    .map_err(|_| Rich::custom(span, "integer overflow"))
            }
        });

    let boolean = choice((
        kw("true").to(Value::Bool(true)),
        kw("false").to(Value::Bool(false)),
    ));

    let null = kw("null").to(Value::Null);

    let param = just('$').ignore_then(ident()).map(Expr::Param);

    choice((
        param,
        choice((string, number, boolean, null)).map(Expr::Literal),
    ))
    .padded()
    .labelled("value like 'text', 42, true or $param")
}

// ============================================================================
// Diagnostics
// ============================================================================

/// 1-based line and column of a byte offset.
pub fn line_col(input: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(input.len());
    let before = &input[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

/// Format chumsky errors against the full input.
///
/// `base` is the byte offset of the parsed slice within `input`.
pub fn format_errors(errs: &[Rich<'_, char>], input: &str, base: usize) -> String {
    errs.iter()
        .map(|e| {
            let (line, column) = line_col(input, base + e.span().start);

            let found = e
                .found()
                .map_or("end of input".to_string(), |c| format!("'{}'", c));

            format!(
                "Line {}, column {}: {} (found {})",
                line,
                column,
                e.reason(),
                found
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
