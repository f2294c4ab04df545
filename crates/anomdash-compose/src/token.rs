//! Substitution tokens resolved by the dashboard service at render time.
//!
//! Tokens use the `${name}` form, optionally with a format suffix
//! (`${name:singlequote}`). Names are plain identifiers so they can be
//! matched one-to-one against variable names.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

/// Name of the anomaly sensitivity control and its token.
pub const THRESHOLD_VARIABLE: &str = "AnomalyThreshold";

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::[A-Za-z]+)?\}").expect("token pattern is valid")
});

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("name pattern is valid"));

pub fn render(name: &str) -> String {
    format!("${{{name}}}")
}

/// Token with a value format, e.g. `singlequote` for multi-value lists.
pub fn render_formatted(name: &str, format: &str) -> String {
    format!("${{{name}:{format}}}")
}

/// All token names referenced by `text`, sorted.
pub fn scan(text: &str) -> BTreeSet<String> {
    TOKEN_RE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// Names a dimension variable may not take: the threshold control and the
/// service's built-in `__` variables.
pub fn is_reserved(name: &str) -> bool {
    name == THRESHOLD_VARIABLE || name.starts_with("__")
}
