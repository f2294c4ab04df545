//! Kusto v1 REST response frames.
//!
//! A v1 response is `{"Tables": [{"TableName", "Columns", "Rows"}, ...]}`.
//! The primary result is the first table; trailing tables carry query
//! status and are ignored here.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    #[serde(rename = "Tables", default)]
    pub tables: Vec<ResultTable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultTable {
    #[serde(rename = "TableName", default)]
    pub name: String,
    #[serde(rename = "Columns", default)]
    pub columns: Vec<ResultColumn>,
    #[serde(rename = "Rows", default)]
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultColumn {
    #[serde(rename = "ColumnName")]
    pub name: String,
    #[serde(rename = "DataType", alias = "ColumnType", default)]
    pub data_type: String,
}

impl QueryResponse {
    pub fn primary(self) -> Option<ResultTable> {
        self.tables.into_iter().next()
    }
}

impl ResultTable {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Non-null cells of one column rendered as strings, in row order.
    pub fn strings(&self, column: usize) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter_map(cell_to_string)
            .collect()
    }
}

pub fn cell_to_string(cell: &Value) -> Option<String> {
    match cell {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Parse a Kusto timespan cell: `[-][d.]hh:mm:ss[.fffffff]`.
///
/// Negative spans yield `None`.
pub fn parse_timespan(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.starts_with('-') {
        return None;
    }

    let mut parts = text.split(':');
    let (first, minutes, seconds) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let (days, hours) = match first.split_once('.') {
        Some((d, h)) => (d.parse::<u64>().ok()?, h.parse::<u64>().ok()?),
        None => (0, first.parse::<u64>().ok()?),
    };
    let minutes: u64 = minutes.parse().ok()?;

    let (whole, fraction) = match seconds.split_once('.') {
        Some((w, f)) => (w, f),
        None => (seconds, ""),
    };
    let whole: u64 = whole.parse().ok()?;
    if hours > 23 || minutes > 59 || whole > 59 {
        return None;
    }

    // Up to 7 fractional digits (100ns ticks).
    let nanos = if fraction.is_empty() {
        0
    } else {
        if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let padded = format!("{fraction:0<9}");
        padded.parse::<u32>().ok()?
    };

    let secs = days * 86_400 + hours * 3_600 + minutes * 60 + whole;
    Some(Duration::new(secs, nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primary_table() {
        let body = r#"{
            "Tables": [
                {
                    "TableName": "Table_0",
                    "Columns": [
                        {"ColumnName": "Timestamp", "DataType": "DateTime"},
                        {"ColumnName": "Region", "DataType": "String"}
                    ],
                    "Rows": [["2024-01-01T00:00:00Z", "US"], ["2024-01-01T01:00:00Z", null], ["2024-01-01T02:00:00Z", "EU"]]
                },
                {"TableName": "Table_1", "Columns": [], "Rows": []}
            ]
        }"#;
        let response: QueryResponse = serde_json::from_str(body).unwrap();
        let table = response.primary().unwrap();
        assert_eq!(table.name, "Table_0");
        assert_eq!(table.column_names(), vec!["Timestamp", "Region"]);
        let region = table.column_index("Region").unwrap();
        assert_eq!(table.strings(region), vec!["US", "EU"]);
    }

    #[test]
    fn test_numeric_cells_render_as_strings() {
        assert_eq!(cell_to_string(&serde_json::json!(42)), Some("42".to_string()));
        assert_eq!(cell_to_string(&serde_json::json!(true)), Some("true".to_string()));
        assert_eq!(cell_to_string(&Value::Null), None);
    }

    #[test]
    fn test_parse_timespan() {
        assert_eq!(parse_timespan("01:00:00"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_timespan("00:05:00"), Some(Duration::from_secs(300)));
        assert_eq!(
            parse_timespan("1.02:03:04.5"),
            Some(Duration::new(86_400 + 2 * 3600 + 3 * 60 + 4, 500_000_000))
        );
        assert_eq!(parse_timespan("7.00:00:00"), Some(Duration::from_secs(7 * 86_400)));
        assert_eq!(parse_timespan("00:00:00.0010000"), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_parse_timespan_rejects_garbage() {
        assert_eq!(parse_timespan("-01:00:00"), None);
        assert_eq!(parse_timespan("1h"), None);
        assert_eq!(parse_timespan("01:61:00"), None);
        assert_eq!(parse_timespan(""), None);
    }
}
