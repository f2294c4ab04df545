//! Shared types used across anomdash crates.
//!
//! The dashboard is a small dependency graph: panels reference queries by
//! [`QueryKey`], queries reference variables through substitution tokens.
//! Nothing here holds a pointer into anything else, so every cross
//! reference can be checked as a standalone pass.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::SchemaError;

// ── Columns ────────────────────────────────────────────────────────

/// Role a projected column plays in the analysed series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Time,
    Value,
    Dimension,
}

impl ColumnRole {
    pub fn label(&self) -> &'static str {
        match self {
            ColumnRole::Time => "TIME",
            ColumnRole::Value => "VALUE",
            ColumnRole::Dimension => "DIMENSION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub role: ColumnRole,
}

impl Column {
    pub fn new(name: impl Into<String>, role: ColumnRole) -> Self {
        Self { name: name.into(), role }
    }
}

/// Ordered output columns of the base query.
///
/// Always exactly one `Time` column (first), one `Value` column (second),
/// then zero or more `Dimension` columns, with unique names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Column>", into = "Vec<Column>")]
pub struct ColumnSchema {
    columns: Vec<Column>,
}

impl ColumnSchema {
    /// Validate the column layout and wrap it.
    pub fn new(columns: Vec<Column>) -> Result<Self, SchemaError> {
        if columns.len() < 2 {
            return Err(SchemaError::InsufficientColumns(columns.len()));
        }
        for (i, column) in columns.iter().enumerate() {
            let expected = match i {
                0 => ColumnRole::Time,
                1 => ColumnRole::Value,
                _ => ColumnRole::Dimension,
            };
            if column.role != expected {
                return Err(SchemaError::InvalidLayout(format!(
                    "column {i} ({}) must be {}, found {}",
                    column.name,
                    expected.label(),
                    column.role.label()
                )));
            }
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(SchemaError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(Self { columns })
    }

    pub fn time(&self) -> &str {
        &self.columns[0].name
    }

    pub fn value(&self) -> &str {
        &self.columns[1].name
    }

    /// Dimension column names in projection order.
    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.columns[2..].iter().map(|c| c.name.as_str())
    }

    pub fn dimension_count(&self) -> usize {
        self.columns.len() - 2
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
}

impl TryFrom<Vec<Column>> for ColumnSchema {
    type Error = SchemaError;

    fn try_from(columns: Vec<Column>) -> Result<Self, Self::Error> {
        Self::new(columns)
    }
}

impl From<ColumnSchema> for Vec<Column> {
    fn from(schema: ColumnSchema) -> Self {
        schema.columns
    }
}

/// The user's query plus the table it reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseQuery {
    pub text: String,
    pub table: String,
}

// ── Queries ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Decomposition,
    Anomaly,
    SegmentCount,
    SegmentBreakdown,
    /// Decomposition and anomaly markers of one selected segment.
    SegmentSeries,
    /// Anomaly counts per combination of all dimension values.
    Combination,
}

impl QueryKind {
    pub fn label(&self) -> &'static str {
        match self {
            QueryKind::Decomposition => "decomposition",
            QueryKind::Anomaly => "anomaly",
            QueryKind::SegmentCount => "segment_count",
            QueryKind::SegmentBreakdown => "segment_breakdown",
            QueryKind::SegmentSeries => "segment_series",
            QueryKind::Combination => "combination",
        }
    }

    /// Whether one query of this kind exists per dimension.
    pub fn is_per_dimension(&self) -> bool {
        matches!(
            self,
            QueryKind::SegmentCount | QueryKind::SegmentBreakdown | QueryKind::SegmentSeries
        )
    }
}

/// Identifier panels use to reference a synthesized query.
///
/// Per-dimension queries are keyed by column name, never by position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    pub kind: QueryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
}

impl QueryKey {
    pub fn global(kind: QueryKind) -> Self {
        Self { kind, dimension: None }
    }

    pub fn for_dimension(kind: QueryKind, dimension: impl Into<String>) -> Self {
        Self {
            kind,
            dimension: Some(dimension.into()),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dimension {
            Some(dim) => write!(f, "{}({dim})", self.kind.label()),
            None => f.write_str(self.kind.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedQuery {
    pub kind: QueryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    pub text: String,
}

impl SynthesizedQuery {
    pub fn key(&self) -> QueryKey {
        QueryKey {
            kind: self.kind,
            dimension: self.dimension.clone(),
        }
    }
}

// ── Variables ──────────────────────────────────────────────────────

/// Where a dashboard control gets its selectable values from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum VariableSource {
    /// Fixed presets; `default` is the initially selected one.
    StaticList { values: Vec<String>, default: String },
    /// Values come from a distinct-values query run by the dashboard
    /// service. `values` holds an optional preview fetched at build time.
    Query {
        query: String,
        #[serde(default)]
        values: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub label: String,
    #[serde(flatten)]
    pub source: VariableSource,
    pub multi_value: bool,
}

impl Variable {
    pub fn is_query(&self) -> bool {
        matches!(self.source, VariableSource::Query { .. })
    }
}

// ── Layout ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelKind {
    Timeseries,
    BarChart,
    Table,
}

impl PanelKind {
    /// Plugin id used by the dashboard service.
    pub fn plugin_id(&self) -> &'static str {
        match self {
            PanelKind::Timeseries => "timeseries",
            PanelKind::BarChart => "barchart",
            PanelKind::Table => "table",
        }
    }
}

/// Position on the 24-column dashboard grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPos {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub id: u32,
    pub title: String,
    pub kind: PanelKind,
    pub query_refs: Vec<QueryKey>,
    pub grid_pos: GridPos,
    /// Variable the dashboard service repeats this panel over, one copy per
    /// selected value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: u32,
    pub title: String,
    pub grid_pos: GridPos,
    pub panels: Vec<Panel>,
}

// ── Dashboard ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub uid: String,
    pub title: String,
    pub variables: Vec<Variable>,
    pub rows: Vec<Row>,
    /// Every query owned by the dashboard; panels hold keys into this set.
    pub queries: Vec<SynthesizedQuery>,
}

impl Dashboard {
    pub fn query(&self, key: &QueryKey) -> Option<&SynthesizedQuery> {
        self.queries.iter().find(|q| q.kind == key.kind && q.dimension == key.dimension)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn panels(&self) -> impl Iterator<Item = &Panel> {
        self.rows.iter().flat_map(|r| r.panels.iter())
    }

    /// Service-neutral document: rows of panels with inlined query text.
    pub fn document(&self) -> Value {
        let variables: Vec<Value> = self
            .variables
            .iter()
            .map(|v| {
                let mut out = json!({
                    "name": v.name,
                    "multiValue": v.multi_value,
                });
                match &v.source {
                    VariableSource::StaticList { values, .. } => {
                        out["type"] = json!("custom");
                        out["source"] = json!("static_list");
                        out["values"] = json!(values);
                    }
                    VariableSource::Query { query, .. } => {
                        out["type"] = json!("query");
                        out["source"] = json!("query");
                        out["query"] = json!(query);
                    }
                }
                out
            })
            .collect();

        let rows: Vec<Value> = self
            .rows
            .iter()
            .map(|row| {
                let panels: Vec<Value> = row
                    .panels
                    .iter()
                    .map(|panel| {
                        let targets: Vec<Value> = panel
                            .query_refs
                            .iter()
                            .enumerate()
                            .map(|(i, key)| {
                                json!({
                                    "refId": ref_id(i),
                                    "queryText": self.query(key).map(|q| q.text.as_str()),
                                })
                            })
                            .collect();
                        let mut out = json!({
                            "title": panel.title,
                            "type": panel.kind.plugin_id(),
                            "gridPos": panel.grid_pos,
                            "targets": targets,
                        });
                        if let Some(repeat) = &panel.repeat {
                            out["repeat"] = json!(repeat);
                        }
                        out
                    })
                    .collect();
                json!({ "title": row.title, "panels": panels })
            })
            .collect();

        json!({
            "uid": self.uid,
            "title": self.title,
            "variables": variables,
            "rows": rows,
        })
    }
}

/// Target reference id for the `index`-th query of a panel: A, B, ..., Z, AA, AB, ...
pub fn ref_id(index: usize) -> String {
    let mut n = index;
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
