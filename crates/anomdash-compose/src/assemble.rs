//! Dashboard assembly: rows of panels bound to synthesized queries.
//!
//! Layout is fixed: an overview row overlaying the decomposition and the
//! anomaly markers, then one row per dimension with a bar chart of anomaly
//! counts, a drill-down table and a series panel repeated per selected
//! value. With several dimensions a last row counts anomalies per
//! combination of values. Panels are placed left to right on a 24-unit
//! grid and wrap when the next one does not fit.

use std::sync::LazyLock;

use anomdash_core::{
    AssemblyError, Dashboard, GridPos, Panel, PanelKind, QueryKey, QueryKind, Row, SynthesizedQuery,
    Variable,
};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::token;
use crate::validate::validate;

pub const GRID_WIDTH: u32 = 24;

/// Height of a row header.
const ROW_HEIGHT: u32 = 1;

/// Grafana caps dashboard uids at 40 characters.
const MAX_UID_LEN: usize = 40;

/// Hex digits of the title hash appended to truncated uids.
const UID_HASH_LEN: usize = 8;

static UID_UNSAFE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_]+").expect("uid pattern is valid"));

/// Fixed `(width, height)` per panel kind.
pub fn panel_size(kind: PanelKind) -> (u32, u32) {
    match kind {
        PanelKind::Timeseries => (GRID_WIDTH, 9),
        PanelKind::BarChart => (GRID_WIDTH / 2, 8),
        PanelKind::Table => (GRID_WIDTH / 2, 8),
    }
}

/// Running position and id allocation while laying out the grid.
#[derive(Debug)]
struct GridCursor {
    x: u32,
    y: u32,
    line_height: u32,
    next_id: u32,
}

impl GridCursor {
    fn new() -> Self {
        Self {
            x: 0,
            y: 0,
            line_height: 0,
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn finish_line(&mut self) {
        if self.x > 0 {
            self.y += self.line_height;
            self.x = 0;
            self.line_height = 0;
        }
    }

    fn row(&mut self) -> GridPos {
        self.finish_line();
        let pos = GridPos {
            x: 0,
            y: self.y,
            w: GRID_WIDTH,
            h: ROW_HEIGHT,
        };
        self.y += ROW_HEIGHT;
        pos
    }

    fn place(&mut self, kind: PanelKind) -> GridPos {
        let (w, h) = panel_size(kind);
        if self.x + w > GRID_WIDTH {
            self.finish_line();
        }
        let pos = GridPos { x: self.x, y: self.y, w, h };
        self.x += w;
        self.line_height = self.line_height.max(h);
        pos
    }

    fn start_row(&mut self, title: impl Into<String>) -> Row {
        let grid_pos = self.row();
        Row {
            id: self.allocate_id(),
            title: title.into(),
            grid_pos,
            panels: Vec::new(),
        }
    }

    fn panel(&mut self, title: impl Into<String>, kind: PanelKind, query_refs: Vec<QueryKey>) -> Panel {
        let grid_pos = self.place(kind);
        Panel {
            id: self.allocate_id(),
            title: title.into(),
            kind,
            query_refs,
            grid_pos,
            repeat: None,
        }
    }
}

/// Compose variables and queries into a dashboard and check that every
/// cross reference resolves.
pub fn assemble(
    title: &str,
    variables: Vec<Variable>,
    queries: Vec<SynthesizedQuery>,
) -> Result<Dashboard, AssemblyError> {
    let require = |key: QueryKey| -> Result<QueryKey, AssemblyError> {
        if queries.iter().any(|q| q.kind == key.kind && q.dimension == key.dimension) {
            Ok(key)
        } else {
            Err(AssemblyError::MissingQuery(key))
        }
    };

    let decomposition = require(QueryKey::global(QueryKind::Decomposition))?;
    let anomaly = require(QueryKey::global(QueryKind::Anomaly))?;

    let mut dimensions: Vec<&str> = Vec::new();
    for query in queries.iter().filter(|q| q.kind.is_per_dimension()) {
        if let Some(dimension) = query.dimension.as_deref() {
            if !dimensions.contains(&dimension) {
                dimensions.push(dimension);
            }
        }
    }

    let mut grid = GridCursor::new();
    let mut rows = Vec::with_capacity(2 + dimensions.len());

    let mut overview = grid.start_row("Overview");
    overview.panels.push(grid.panel(
        "Series Decomposition & Anomalies",
        PanelKind::Timeseries,
        vec![decomposition, anomaly],
    ));
    rows.push(overview);

    for dimension in &dimensions {
        let count = require(QueryKey::for_dimension(QueryKind::SegmentCount, *dimension))?;
        let breakdown = require(QueryKey::for_dimension(QueryKind::SegmentBreakdown, *dimension))?;
        let series = require(QueryKey::for_dimension(QueryKind::SegmentSeries, *dimension))?;

        let mut row = grid.start_row(format!("Segments by {dimension}"));
        row.panels.push(grid.panel(
            format!("Anomaly Count by {dimension}"),
            PanelKind::BarChart,
            vec![count],
        ));
        row.panels.push(grid.panel(
            format!("Anomalies for {dimension} = {}", token::render(dimension)),
            PanelKind::Table,
            vec![breakdown],
        ));
        let mut repeated = grid.panel(
            format!("{dimension} - {}", token::render(dimension)),
            PanelKind::Timeseries,
            vec![series],
        );
        repeated.repeat = Some(dimension.to_string());
        row.panels.push(repeated);
        rows.push(row);
    }

    if dimensions.len() > 1 {
        let combination = require(QueryKey::global(QueryKind::Combination))?;
        let mut row = grid.start_row("Segment Combinations");
        row.panels.push(grid.panel(
            "Anomaly Count by Combination",
            PanelKind::Table,
            vec![combination],
        ));
        rows.push(row);
    }

    let dashboard = Dashboard {
        uid: dashboard_uid(title),
        title: title.to_string(),
        variables,
        rows,
        queries,
    };

    validate(&dashboard)?;

    info!(
        title = %dashboard.title,
        rows = dashboard.rows.len(),
        panels = dashboard.panels().count(),
        variables = dashboard.variables.len(),
        "dashboard assembled"
    );
    Ok(dashboard)
}

/// Stable uid derived from the title: lowercase ASCII, other runs collapsed
/// to `-`. Slugs that do not fit keep a prefix and gain a hash of the full
/// title, so long titles sharing a prefix stay distinct.
pub fn dashboard_uid(title: &str) -> String {
    let lowered = title.to_lowercase();
    let slug = UID_UNSAFE_RE.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        return "anomdash".to_string();
    }
    if slug.len() <= MAX_UID_LEN {
        return slug.to_string();
    }

    let digest = hex::encode(Sha256::digest(title.as_bytes()));
    let prefix = slug[..MAX_UID_LEN - UID_HASH_LEN - 1].trim_end_matches('-');
    format!("{prefix}-{}", &digest[..UID_HASH_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use anomdash_core::config::ThresholdConfig;

    use crate::planner::plan;
    use crate::schema::classify;
    use crate::synth::Synthesizer;

    fn build(cols: &[&str]) -> Result<Dashboard, AssemblyError> {
        let schema = classify(&cols.iter().map(|c| c.to_string()).collect::<Vec<_>>()).unwrap();
        let queries = Synthesizer::new("1h")
            .unwrap()
            .synthesize("Requests | take 100", &schema)
            .unwrap();
        let variables = plan(&schema, "Requests", &ThresholdConfig::default());
        assemble("Requests", variables, queries)
    }

    #[test]
    fn test_overview_only_without_dimensions() {
        let dashboard = build(&["Timestamp", "Count"]).unwrap();
        assert_eq!(dashboard.rows.len(), 1);
        let overview = &dashboard.rows[0];
        assert_eq!(overview.title, "Overview");
        assert_eq!(overview.panels.len(), 1);
        assert_eq!(
            overview.panels[0].query_refs,
            vec![
                QueryKey::global(QueryKind::Decomposition),
                QueryKey::global(QueryKind::Anomaly)
            ]
        );
        assert_eq!(dashboard.variables.len(), 1);
    }

    #[test]
    fn test_layout_wraps_and_ids_are_sequential() {
        let dashboard = build(&["Timestamp", "Count", "Region", "Host"]).unwrap();
        let rows = &dashboard.rows;
        assert_eq!(rows.len(), 4);

        assert_eq!(rows[0].grid_pos, GridPos { x: 0, y: 0, w: 24, h: 1 });
        assert_eq!(rows[0].panels[0].grid_pos, GridPos { x: 0, y: 1, w: 24, h: 9 });

        assert_eq!(rows[1].title, "Segments by Region");
        assert_eq!(rows[1].grid_pos.y, 10);
        assert_eq!(rows[1].panels[0].grid_pos, GridPos { x: 0, y: 11, w: 12, h: 8 });
        assert_eq!(rows[1].panels[1].grid_pos, GridPos { x: 12, y: 11, w: 12, h: 8 });
        assert_eq!(rows[1].panels[2].grid_pos, GridPos { x: 0, y: 19, w: 24, h: 9 });

        assert_eq!(rows[2].title, "Segments by Host");
        assert_eq!(rows[2].grid_pos.y, 28);
        assert_eq!(rows[2].panels[0].grid_pos.y, 29);

        assert_eq!(rows[3].title, "Segment Combinations");
        assert_eq!(rows[3].grid_pos.y, 46);
        assert_eq!(
            rows[3].panels[0].query_refs,
            vec![QueryKey::global(QueryKind::Combination)]
        );

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.id);
            ids.extend(row.panels.iter().map(|p| p.id));
        }
        assert_eq!(ids, (1..=12).collect::<Vec<u32>>());
    }

    #[test]
    fn test_series_panel_repeats_per_value() {
        let dashboard = build(&["Timestamp", "Count", "Region"]).unwrap();
        assert_eq!(dashboard.rows.len(), 2);
        let series = &dashboard.rows[1].panels[2];
        assert_eq!(series.title, "Region - ${Region}");
        assert_eq!(series.kind, PanelKind::Timeseries);
        assert_eq!(series.repeat.as_deref(), Some("Region"));
        assert_eq!(
            series.query_refs,
            vec![QueryKey::for_dimension(QueryKind::SegmentSeries, "Region")]
        );
        assert!(dashboard.rows[1].panels[..2].iter().all(|p| p.repeat.is_none()));
    }

    #[test]
    fn test_missing_combination_is_reported() {
        let schema = classify(&["T", "V", "Region", "Host"].map(String::from)).unwrap();
        let mut queries = Synthesizer::new("1h").unwrap().synthesize("Tbl", &schema).unwrap();
        queries.retain(|q| q.kind != QueryKind::Combination);
        let variables = plan(&schema, "Tbl", &ThresholdConfig::default());
        assert_eq!(
            assemble("Tbl", variables, queries).unwrap_err(),
            AssemblyError::MissingQuery(QueryKey::global(QueryKind::Combination))
        );
    }

    #[test]
    fn test_missing_breakdown_is_reported() {
        let schema = classify(&["T".to_string(), "V".to_string(), "Region".to_string()]).unwrap();
        let mut queries = Synthesizer::new("1h").unwrap().synthesize("Tbl", &schema).unwrap();
        queries.retain(|q| q.kind != QueryKind::SegmentBreakdown);
        let variables = plan(&schema, "Tbl", &ThresholdConfig::default());
        assert_eq!(
            assemble("Tbl", variables, queries).unwrap_err(),
            AssemblyError::MissingQuery(QueryKey::for_dimension(QueryKind::SegmentBreakdown, "Region"))
        );
    }

    #[test]
    fn test_missing_anomaly_is_reported() {
        let schema = classify(&["T".to_string(), "V".to_string()]).unwrap();
        let mut queries = Synthesizer::new("1h").unwrap().synthesize("Tbl", &schema).unwrap();
        queries.retain(|q| q.kind != QueryKind::Anomaly);
        assert_eq!(
            assemble("Tbl", Vec::new(), queries).unwrap_err(),
            AssemblyError::MissingQuery(QueryKey::global(QueryKind::Anomaly))
        );
    }

    #[test]
    fn test_dashboard_uid() {
        assert_eq!(dashboard_uid("Requests"), "requests");
        assert_eq!(dashboard_uid("  Storm Events / 2024!"), "storm-events-2024");
        assert_eq!(dashboard_uid("***"), "anomdash");
        assert_eq!(dashboard_uid("Événements Paris"), "v-nements-paris");
        assert!(dashboard_uid("Données 東京").is_ascii());
    }

    #[test]
    fn test_long_titles_keep_distinct_uids() {
        let prefix = "Storage account latency across every production region";
        let a = dashboard_uid(&format!("{prefix} (west)"));
        let b = dashboard_uid(&format!("{prefix} (east)"));
        assert_ne!(a, b);
        assert!(a.len() <= 40 && b.len() <= 40);
        assert!(a.starts_with("storage-account-latency"));
        assert_eq!(a, dashboard_uid(&format!("{prefix} (west)")));
    }
}
