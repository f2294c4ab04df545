//! Schema extraction: source table and column roles of the base query.
//!
//! Column roles are positional: the first projected column is the time
//! axis, the second is the value, everything after is a dimension. Queries
//! must already project in that order.

use std::sync::LazyLock;

use anomdash_core::{BaseQuery, Column, ColumnRole, ColumnSchema, SchemaError};
use regex::Regex;

use crate::kql;

/// Leading table reference of a pipeline, optionally qualified with
/// `cluster(...)` / `database(...)` and optionally bracket-quoted.
static TABLE_HEAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*(?:cluster\(\s*(?:'[^']*'|"[^"]*")\s*\)\s*\.\s*)?(?:database\(\s*(?:'[^']*'|"[^"]*")\s*\)\s*\.\s*)?(?:\[\s*(?:'(?P<sq>[^']+)'|"(?P<dq>[^"]+)")\s*\]|(?P<id>[A-Za-z_][A-Za-z0-9_]*))"#,
    )
    .expect("table pattern is valid")
});

/// Tabular operators and statements that can start a query without
/// reading from a table.
const NON_TABLE_HEADS: &[&str] = &[
    "alias", "cluster", "database", "datatable", "declare", "evaluate", "externaldata",
    "external_table", "find", "let", "materialize", "materialized_view", "pattern", "print",
    "range", "restrict", "search", "set", "table", "union", "view",
];

/// Resolve the table the base query reads from.
///
/// Leading `let` statements are skipped. Without a catalog the first token
/// of the final pipeline must be a table reference and not a `let` name. With a catalog the leading reference is accepted only if the
/// catalog knows it; otherwise the first token anywhere in the query that
/// names a catalog table wins.
pub fn extract_table(query: &str, catalog: Option<&[String]>) -> Result<String, SchemaError> {
    let text = kql::normalize(query);
    if text.is_empty() {
        return Err(SchemaError::EmptyQuery);
    }

    let (preamble, body) = kql::split_statements(&text);
    let head = leading_table(&body).filter(|h| !binds(&preamble, h));

    match catalog {
        None => head.ok_or(SchemaError::NoTableFound),
        Some(tables) => {
            if let Some(head) = head.filter(|h| tables.iter().any(|t| t == h)) {
                return Ok(head);
            }
            text.split(|c: char| c.is_whitespace() || c == '|')
                .map(str::trim)
                .find(|token| tables.iter().any(|t| t == token))
                .map(str::to_string)
                .ok_or(SchemaError::NoTableFound)
        }
    }
}

/// Whether one of `statements` is `let name = ...`.
fn binds(statements: &[String], name: &str) -> bool {
    statements.iter().any(|statement| {
        statement
            .strip_prefix("let")
            .filter(|rest| rest.starts_with(char::is_whitespace))
            .and_then(|rest| rest.split('=').next())
            .is_some_and(|bound| bound.trim() == name)
    })
}

fn leading_table(text: &str) -> Option<String> {
    let caps = TABLE_HEAD_RE.captures(text)?;
    let rest = &text[caps.get(0)?.end()..];
    let rest = rest.trim_start();
    if !(rest.is_empty() || rest.starts_with('|')) {
        return None;
    }
    if let Some(quoted) = caps.name("sq").or_else(|| caps.name("dq")) {
        return Some(quoted.as_str().to_string());
    }
    let id = caps.name("id")?.as_str();
    if NON_TABLE_HEADS.contains(&id) {
        None
    } else {
        Some(id.to_string())
    }
}

/// Assign roles to projected columns by position.
pub fn classify(columns: &[String]) -> Result<ColumnSchema, SchemaError> {
    if columns.len() < 2 {
        return Err(SchemaError::InsufficientColumns(columns.len()));
    }
    let columns = columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let role = match i {
                0 => ColumnRole::Time,
                1 => ColumnRole::Value,
                _ => ColumnRole::Dimension,
            };
            Column::new(name.clone(), role)
        })
        .collect();
    ColumnSchema::new(columns)
}

/// Table and column schema of the base query.
///
/// `columns` are the projected output columns in emitted order, as
/// reported by the query service.
pub fn extract(
    query: &str,
    columns: &[String],
    catalog: Option<&[String]>,
) -> Result<(BaseQuery, ColumnSchema), SchemaError> {
    let table = extract_table(query, catalog)?;
    let schema = classify(columns)?;
    Ok((
        BaseQuery {
            text: kql::normalize(query),
            table,
        },
        schema,
    ))
}
