//! Query synthesis: the fixed family of analytical queries derived from
//! the base query.
//!
//! Leading `let` statements of the base query are hoisted ahead of every
//! derived query. Each query then starts from the final tabular expression
//! and appends stages:
//!
//! - `Decomposition`: series construction over the value column, then
//!   `series_decompose` into baseline / seasonal / trend / residual.
//! - `Anomaly`: the decomposition series plus `series_decompose_anomalies`
//!   scored against the `${AnomalyThreshold}` token.
//! - `SegmentCount` (per dimension): anomalous timestamps joined back to the
//!   base rows and counted per dimension value.
//! - `SegmentBreakdown` (per dimension): the base rows filtered to the
//!   selected values of that dimension, scored per segment.
//! - `SegmentSeries` (per dimension): decomposition and anomaly markers of
//!   the base rows restricted to the selected values of that dimension.
//! - `Combination` (two or more dimensions): anomalous timestamps counted
//!   per combination of all dimension values.
//!
//! Output is a pure function of the inputs.

use anomdash_core::{ColumnSchema, QueryKind, SynthesisError, SynthesizedQuery};

use crate::kql::{self, Pipeline, ident};
use crate::token::{self, THRESHOLD_VARIABLE};

/// Column and binding names the synthesized queries introduce. Source
/// columns with these names would be shadowed.
const GENERATED_NAMES: &[&str] = &[
    "Value",
    "Baseline",
    "Seasonal",
    "Trend",
    "Residual",
    "Anomalies",
    "AnomalyScore",
    "ExpectedValue",
    "AnomalyValue",
    "AnomalyCount",
    "Segment",
    "min_t",
    "max_t",
    "anomalies",
];

/// Builds the derived queries for one series step.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    step: String,
}

impl Synthesizer {
    /// `step` is the `make-series` bin size as a KQL timespan literal.
    pub fn new(step: impl Into<String>) -> Result<Self, SynthesisError> {
        let step = step.into();
        if !kql::is_timespan(&step) {
            return Err(SynthesisError::InvalidStep(step));
        }
        Ok(Self { step })
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    /// Derive all queries: decomposition, anomaly, then segment count,
    /// breakdown and series for each dimension in schema order, and finally
    /// the combination count when there are several dimensions.
    pub fn synthesize(
        &self,
        base_query: &str,
        schema: &ColumnSchema,
    ) -> Result<Vec<SynthesizedQuery>, SynthesisError> {
        check_names(schema)?;

        let normalized = kql::normalize(base_query);
        let (preamble, base) = kql::split_statements(&normalized);
        let series = SeriesQueries {
            preamble: &preamble,
            base: &base,
            time: ident(schema.time()),
            value: ident(schema.value()),
            step: &self.step,
        };

        let mut queries = Vec::with_capacity(3 + 3 * schema.dimension_count());
        queries.push(SynthesizedQuery {
            kind: QueryKind::Decomposition,
            dimension: None,
            text: series.decomposition().render(),
        });
        queries.push(SynthesizedQuery {
            kind: QueryKind::Anomaly,
            dimension: None,
            text: series.anomaly().render(),
        });

        for dimension in schema.dimensions() {
            queries.push(SynthesizedQuery {
                kind: QueryKind::SegmentCount,
                dimension: Some(dimension.to_string()),
                text: series.segment_count(dimension).render(),
            });
            queries.push(SynthesizedQuery {
                kind: QueryKind::SegmentBreakdown,
                dimension: Some(dimension.to_string()),
                text: series.segment_breakdown(dimension).render(),
            });
            queries.push(SynthesizedQuery {
                kind: QueryKind::SegmentSeries,
                dimension: Some(dimension.to_string()),
                text: series.segment_series(dimension).render(),
            });
        }

        if schema.dimension_count() > 1 {
            let dimensions: Vec<&str> = schema.dimensions().collect();
            queries.push(SynthesizedQuery {
                kind: QueryKind::Combination,
                dimension: None,
                text: series.combination(&dimensions).render(),
            });
        }

        tracing::debug!(count = queries.len(), step = %self.step, "synthesized queries");
        Ok(queries)
    }
}

fn check_names(schema: &ColumnSchema) -> Result<(), SynthesisError> {
    if GENERATED_NAMES.contains(&schema.time()) {
        return Err(SynthesisError::ReservedName(schema.time().to_string()));
    }
    for dimension in schema.dimensions() {
        if token::is_reserved(dimension) || GENERATED_NAMES.contains(&dimension) {
            return Err(SynthesisError::ReservedName(dimension.to_string()));
        }
        if !token::is_valid_name(dimension) {
            return Err(SynthesisError::InvalidName(dimension.to_string()));
        }
    }
    Ok(())
}

struct SeriesQueries<'a> {
    preamble: &'a [String],
    base: &'a str,
    time: String,
    value: String,
    step: &'a str,
}

impl SeriesQueries<'_> {
    fn threshold(&self) -> String {
        format!("todouble({})", token::render(THRESHOLD_VARIABLE))
    }

    /// Base query with the series time bounds bound as `min_t` / `max_t`.
    fn bounded(&self) -> Pipeline {
        Pipeline::new(self.base)
            .prelude(self.preamble)
            .bind(
                "min_t",
                format!("toscalar({} | summarize min({}))", self.base, self.time),
            )
            .bind(
                "max_t",
                format!("toscalar({} | summarize max({}))", self.base, self.time),
            )
    }

    fn make_series(&self, by: Option<&str>) -> String {
        let mut stage = format!(
            "make-series Value = avg(todouble({})) on {} from min_t to max_t step {}",
            self.value, self.time, self.step
        );
        if let Some(dimension) = by {
            stage.push_str(&format!(" by Segment = tostring({})", ident(dimension)));
        }
        stage
    }

    fn score_anomalies(&self) -> String {
        format!(
            "extend (Anomalies, AnomalyScore, ExpectedValue) = series_decompose_anomalies(Value, {}, -1, 'linefit')",
            self.threshold()
        )
    }

    /// Shared prefix of decomposition and anomaly queries.
    fn decomposed(&self) -> Pipeline {
        self.bounded()
            .pipe(self.make_series(None))
            .pipe("extend (Baseline, Seasonal, Trend, Residual) = series_decompose(Value, -1, 'linefit')")
    }

    fn decomposition(&self) -> Pipeline {
        self.decomposed()
            .pipe(format!(
                "mv-expand {} to typeof(datetime), Value to typeof(real), Baseline to typeof(real), \
                 Seasonal to typeof(real), Trend to typeof(real), Residual to typeof(real)",
                self.time
            ))
            .pipe(format!(
                "project {}, Value, Baseline, Seasonal, Trend, Residual",
                self.time
            ))
    }

    fn anomaly(&self) -> Pipeline {
        self.decomposed()
            .pipe(self.score_anomalies())
            .pipe(format!(
                "mv-expand {} to typeof(datetime), Value to typeof(real), Anomalies to typeof(int), \
                 AnomalyScore to typeof(real), ExpectedValue to typeof(real)",
                self.time
            ))
            .pipe("extend AnomalyValue = iff(Anomalies != 0, Value, real(null))")
            .pipe(format!(
                "project {}, AnomalyValue, AnomalyScore, ExpectedValue, Anomalies",
                self.time
            ))
    }

    /// Base rows at anomalous timestamps.
    fn anomalous_rows(&self) -> Pipeline {
        self.bounded()
            .bind("anomalies", self.anomaly().body())
            .pipe(format!(
                "join kind=inner (anomalies | where Anomalies != 0 | project {time}) on {time}",
                time = self.time
            ))
    }

    fn segment_count(&self, dimension: &str) -> Pipeline {
        let dim = ident(dimension);
        self.anomalous_rows()
            .pipe(format!("summarize AnomalyCount = count() by {dim} = tostring({dim})"))
            .pipe("sort by AnomalyCount desc")
    }

    fn combination(&self, dimensions: &[&str]) -> Pipeline {
        let keys = dimensions
            .iter()
            .map(|d| {
                let dim = ident(d);
                format!("{dim} = tostring({dim})")
            })
            .collect::<Vec<_>>()
            .join(", ");
        self.anomalous_rows()
            .pipe(format!("summarize AnomalyCount = count() by {keys}"))
            .pipe("sort by AnomalyCount desc")
    }

    fn segment_series(&self, dimension: &str) -> Pipeline {
        let selected = token::render_formatted(dimension, "singlequote");
        self.bounded()
            .pipe(format!("where tostring({}) in ({selected})", ident(dimension)))
            .pipe(self.make_series(None))
            .pipe("extend (Baseline, Seasonal, Trend, Residual) = series_decompose(Value, -1, 'linefit')")
            .pipe(self.score_anomalies())
            .pipe(format!(
                "mv-expand {} to typeof(datetime), Value to typeof(real), Baseline to typeof(real), \
                 Trend to typeof(real), Anomalies to typeof(int)",
                self.time
            ))
            .pipe("extend AnomalyValue = iff(Anomalies != 0, Value, real(null))")
            .pipe(format!("project {}, Value, Baseline, Trend, AnomalyValue", self.time))
    }

    fn segment_breakdown(&self, dimension: &str) -> Pipeline {
        let selected = token::render_formatted(dimension, "singlequote");
        self.bounded()
            .pipe(format!("where tostring({}) in ({selected})", ident(dimension)))
            .pipe(self.make_series(Some(dimension)))
            .pipe(self.score_anomalies())
            .pipe(format!(
                "mv-expand {} to typeof(datetime), Value to typeof(real), Anomalies to typeof(int), \
                 AnomalyScore to typeof(real), ExpectedValue to typeof(real)",
                self.time
            ))
            .pipe("where Anomalies != 0")
            .pipe(format!(
                "project {}, Segment, Value, ExpectedValue, AnomalyScore",
                self.time
            ))
            .pipe(format!("sort by {} desc", self.time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::classify;

    fn schema(cols: &[&str]) -> ColumnSchema {
        classify(&cols.iter().map(|c| c.to_string()).collect::<Vec<_>>()).unwrap()
    }

    const BASE: &str = "Requests | project Timestamp, RequestCount, Region";

    #[test]
    fn test_decomposition_text() {
        let queries = Synthesizer::new("1h")
            .unwrap()
            .synthesize(BASE, &schema(&["Timestamp", "RequestCount"]))
            .unwrap();
        let expected = "\
let min_t = toscalar(Requests | project Timestamp, RequestCount, Region | summarize min(Timestamp));
let max_t = toscalar(Requests | project Timestamp, RequestCount, Region | summarize max(Timestamp));
Requests | project Timestamp, RequestCount, Region
| make-series Value = avg(todouble(RequestCount)) on Timestamp from min_t to max_t step 1h
| extend (Baseline, Seasonal, Trend, Residual) = series_decompose(Value, -1, 'linefit')
| mv-expand Timestamp to typeof(datetime), Value to typeof(real), Baseline to typeof(real), Seasonal to typeof(real), Trend to typeof(real), Residual to typeof(real)
| project Timestamp, Value, Baseline, Seasonal, Trend, Residual";
        assert_eq!(queries[0].kind, QueryKind::Decomposition);
        assert_eq!(queries[0].text, expected);
    }

    #[test]
    fn test_anomaly_extends_decomposition() {
        let queries = Synthesizer::new("1h")
            .unwrap()
            .synthesize(BASE, &schema(&["Timestamp", "RequestCount"]))
            .unwrap();
        let anomaly = &queries[1];
        assert_eq!(anomaly.kind, QueryKind::Anomaly);
        assert!(anomaly.text.contains("series_decompose(Value, -1, 'linefit')"));
        assert!(anomaly.text.contains(
            "series_decompose_anomalies(Value, todouble(${AnomalyThreshold}), -1, 'linefit')"
        ));
        assert!(anomaly.text.ends_with("| project Timestamp, AnomalyValue, AnomalyScore, ExpectedValue, Anomalies"));
    }

    #[test]
    fn test_segment_queries_per_dimension() {
        let queries = Synthesizer::new("5m")
            .unwrap()
            .synthesize(BASE, &schema(&["Timestamp", "RequestCount", "Region", "Host"]))
            .unwrap();
        let kinds: Vec<(QueryKind, Option<&str>)> = queries
            .iter()
            .map(|q| (q.kind, q.dimension.as_deref()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (QueryKind::Decomposition, None),
                (QueryKind::Anomaly, None),
                (QueryKind::SegmentCount, Some("Region")),
                (QueryKind::SegmentBreakdown, Some("Region")),
                (QueryKind::SegmentSeries, Some("Region")),
                (QueryKind::SegmentCount, Some("Host")),
                (QueryKind::SegmentBreakdown, Some("Host")),
                (QueryKind::SegmentSeries, Some("Host")),
                (QueryKind::Combination, None),
            ]
        );

        let count = &queries[2].text;
        assert!(count.contains("let anomalies = Requests"));
        assert!(count.contains("| summarize AnomalyCount = count() by Region = tostring(Region)"));
        assert!(!count.contains("${Region"));

        let breakdown = &queries[3].text;
        assert!(breakdown.contains("| where tostring(Region) in (${Region:singlequote})"));
        assert!(breakdown.contains("by Segment = tostring(Region)"));
        assert!(!breakdown.contains("${Host"));

        let series = &queries[4].text;
        assert!(series.contains("| where tostring(Region) in (${Region:singlequote})"));
        assert!(series.contains("series_decompose(Value, -1, 'linefit')"));
        assert!(series.ends_with("| project Timestamp, Value, Baseline, Trend, AnomalyValue"));

        let combination = &queries[8].text;
        assert!(combination.contains(
            "| summarize AnomalyCount = count() by Region = tostring(Region), Host = tostring(Host)"
        ));
        assert!(!combination.contains("${Region"));
    }

    #[test]
    fn test_single_dimension_has_no_combination() {
        let queries = Synthesizer::new("1h")
            .unwrap()
            .synthesize(BASE, &schema(&["Timestamp", "RequestCount", "Region"]))
            .unwrap();
        assert_eq!(queries.len(), 5);
        assert!(queries.iter().all(|q| q.kind != QueryKind::Combination));
    }

    #[test]
    fn test_let_statements_are_hoisted() {
        let base = "let cutoff = ago(7d);\nRequests | where Timestamp > cutoff | project Timestamp, RequestCount, Region";
        let queries = Synthesizer::new("1h")
            .unwrap()
            .synthesize(base, &schema(&["Timestamp", "RequestCount", "Region"]))
            .unwrap();

        for query in &queries {
            assert!(query.text.starts_with("let cutoff = ago(7d);\nlet min_t = toscalar(Requests |"));
            assert_eq!(query.text.matches("let cutoff").count(), 1);
            assert!(!query.text.contains("toscalar(let "));
        }
        let count = &queries[2].text;
        assert!(count.contains("let anomalies = Requests | where Timestamp > cutoff"));
    }

    #[test]
    fn test_deterministic() {
        let schema = schema(&["Timestamp", "RequestCount", "Region"]);
        let synth = Synthesizer::new("1d").unwrap();
        let first = synth.synthesize(BASE, &schema).unwrap();
        let second = synth.synthesize(BASE, &schema).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_quotes_awkward_column_names() {
        let queries = Synthesizer::new("1h")
            .unwrap()
            .synthesize("T", &schema(&["event time", "Count"]))
            .unwrap();
        assert!(queries[0].text.contains("on ['event time'] from min_t"));
    }

    #[test]
    fn test_reserved_dimension() {
        let err = Synthesizer::new("1h")
            .unwrap()
            .synthesize(BASE, &schema(&["Timestamp", "RequestCount", "AnomalyThreshold"]))
            .unwrap_err();
        assert_eq!(err, SynthesisError::ReservedName("AnomalyThreshold".into()));

        let err = Synthesizer::new("1h")
            .unwrap()
            .synthesize(BASE, &schema(&["Timestamp", "RequestCount", "__from"]))
            .unwrap_err();
        assert_eq!(err, SynthesisError::ReservedName("__from".into()));
    }

    #[test]
    fn test_invalid_dimension_name() {
        let err = Synthesizer::new("1h")
            .unwrap()
            .synthesize(BASE, &schema(&["Timestamp", "RequestCount", "Data Center"]))
            .unwrap_err();
        assert_eq!(err, SynthesisError::InvalidName("Data Center".into()));
    }

    #[test]
    fn test_invalid_step() {
        assert_eq!(
            Synthesizer::new("1d 2h").unwrap_err(),
            SynthesisError::InvalidStep("1d 2h".into())
        );
    }
}
