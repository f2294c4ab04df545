//! Textual KQL composition.
//!
//! The base query is split into its leading `let` statements and its final
//! tabular expression. The statements are hoisted ahead of every derived
//! query; the expression is an opaque prefix that stages are only ever
//! appended to.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

/// Step used when the data does not reveal a sampling interval.
pub const DEFAULT_STEP: &str = "1d";

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

static TIMESPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)?(d|h|m|s|ms)$").expect("timespan pattern is valid"));

/// Words that cannot be used as bare column or table names.
const KEYWORDS: &[&str] = &[
    "and", "as", "by", "contains", "datatable", "extend", "false", "from", "has", "in", "let",
    "on", "or", "print", "project", "range", "step", "summarize", "to", "true", "where", "with",
];

/// A `let`-prefixed pipeline: `let a = ...; let b = ...; source | stage | stage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// Statements copied verbatim from the user's query.
    preamble: Vec<String>,
    lets: Vec<(String, String)>,
    source: String,
    stages: Vec<String>,
}

impl Pipeline {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            preamble: Vec::new(),
            lets: Vec::new(),
            source: source.into(),
            stages: Vec::new(),
        }
    }

    /// Emit `statements` first, ahead of any binding.
    pub fn prelude(mut self, statements: &[String]) -> Self {
        self.preamble.extend(statements.iter().cloned());
        self
    }

    /// Add a `let name = expr;` statement ahead of the pipeline.
    pub fn bind(mut self, name: &str, expr: impl Into<String>) -> Self {
        self.lets.push((name.to_string(), expr.into()));
        self
    }

    /// Append a `| stage` to the pipeline.
    pub fn pipe(mut self, stage: impl Into<String>) -> Self {
        self.stages.push(stage.into());
        self
    }

    /// Source and stages without the `let` statements.
    pub fn body(&self) -> String {
        let mut out = self.source.clone();
        for stage in &self.stages {
            out.push_str("\n| ");
            out.push_str(stage);
        }
        out
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for statement in &self.preamble {
            out.push_str(statement);
            out.push_str(";\n");
        }
        for (name, expr) in &self.lets {
            out.push_str(&format!("let {name} = {expr};\n"));
        }
        out.push_str(&self.body());
        out
    }
}

/// Quote a column or table name when it is not a bare identifier.
pub fn ident(name: &str) -> String {
    if IDENT_RE.is_match(name) && !KEYWORDS.contains(&name) {
        name.to_string()
    } else {
        format!("['{}']", name.replace('\\', "\\\\").replace('\'', "\\'"))
    }
}

/// Remove `//` line comments outside string literals.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None if c == '/' && chars.peek() == Some(&'/') => {
                while chars.peek().is_some_and(|&n| n != '\n') {
                    chars.next();
                }
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

/// Normalize a user query so stages can be appended to it: comments and
/// blank lines removed, trailing `;` dropped.
pub fn normalize(query: &str) -> String {
    let stripped = strip_comments(query);
    let joined = stripped
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    joined.trim().trim_end_matches(';').trim_end().to_string()
}

/// Split a query at top-level `;` into its leading statements and the
/// final tabular expression.
///
/// Separators inside string literals or brackets do not split. Statements
/// come back trimmed, without the `;`.
pub fn split_statements(query: &str) -> (Vec<String>, String) {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = query.chars();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    while let Some(c) = chars.next() {
        current.push(c);
        match quote {
            Some(q) => {
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                ';' if depth == 0 => {
                    current.pop();
                    let statement = current.trim();
                    if !statement.is_empty() {
                        statements.push(statement.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
        }
    }

    let mut body = current.trim().to_string();
    if body.is_empty() {
        body = statements.pop().unwrap_or_default();
    }
    (statements, body)
}

pub fn is_timespan(literal: &str) -> bool {
    TIMESPAN_RE.is_match(literal)
}

/// Format an interval as a single-unit KQL timespan literal.
///
/// Uses the largest unit that divides the interval exactly. A zero
/// interval falls back to [`DEFAULT_STEP`].
pub fn format_timespan(interval: Duration) -> String {
    let millis = interval.as_millis();
    if millis == 0 {
        return DEFAULT_STEP.to_string();
    }
    if millis % 1000 != 0 {
        return format!("{millis}ms");
    }
    let secs = millis / 1000;
    if secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs % 3_600 == 0 {
        format!("{}h", secs / 3_600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_render() {
        let text = Pipeline::new("T")
            .bind("n", "5")
            .pipe("take n")
            .pipe("project a")
            .render();
        assert_eq!(text, "let n = 5;\nT\n| take n\n| project a");
    }

    #[test]
    fn test_prelude_precedes_bindings() {
        let text = Pipeline::new("T")
            .prelude(&["let cutoff = ago(7d)".to_string()])
            .bind("n", "5")
            .pipe("take n")
            .render();
        assert_eq!(text, "let cutoff = ago(7d);\nlet n = 5;\nT\n| take n");
    }

    #[test]
    fn test_split_statements() {
        let (lets, body) = split_statements("let cutoff = ago(7d);\nRequests | where Timestamp > cutoff");
        assert_eq!(lets, vec!["let cutoff = ago(7d)"]);
        assert_eq!(body, "Requests | where Timestamp > cutoff");

        let (lets, body) = split_statements("Requests | where Url == 'a;b'");
        assert!(lets.is_empty());
        assert_eq!(body, "Requests | where Url == 'a;b'");

        let (lets, body) = split_statements("let f = (x: long) { x + 1; };\nlet g = 2;\nT | extend y = f(g);");
        assert_eq!(lets, vec!["let f = (x: long) { x + 1; }", "let g = 2"]);
        assert_eq!(body, "T | extend y = f(g)");
    }

    #[test]
    fn test_ident_quotes_when_needed() {
        assert_eq!(ident("Region"), "Region");
        assert_eq!(ident("Request Count"), "['Request Count']");
        assert_eq!(ident("by"), "['by']");
        assert_eq!(ident("it's"), "['it\\'s']");
    }

    #[test]
    fn test_strip_comments_keeps_strings() {
        let query = "T // all rows\n| where Url == 'https://x' // only x";
        assert_eq!(strip_comments(query), "T \n| where Url == 'https://x' ");
    }

    #[test]
    fn test_normalize() {
        let query = "\n// requests\nRequests\n\n| project Timestamp, Count;\n";
        assert_eq!(normalize(query), "Requests\n| project Timestamp, Count");
    }

    #[test]
    fn test_format_timespan() {
        assert_eq!(format_timespan(Duration::from_secs(0)), "1d");
        assert_eq!(format_timespan(Duration::from_secs(86_400 * 2)), "2d");
        assert_eq!(format_timespan(Duration::from_secs(3_600)), "1h");
        assert_eq!(format_timespan(Duration::from_secs(90 * 60)), "90m");
        assert_eq!(format_timespan(Duration::from_secs(45)), "45s");
        assert_eq!(format_timespan(Duration::from_millis(1_500)), "1500ms");
    }

    #[test]
    fn test_is_timespan() {
        assert!(is_timespan("1h"));
        assert!(is_timespan("1.5d"));
        assert!(is_timespan("250ms"));
        assert!(!is_timespan("1d 2h"));
        assert!(!is_timespan("h"));
    }
}
