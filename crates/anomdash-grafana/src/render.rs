//! Dashboard → Grafana dashboard model.
//!
//! Rows become `row` panels followed by their children in one flat
//! `panels` array. Every target queries the Azure Data Explorer
//! datasource in raw KQL mode.

use anomdash_core::{AnomdashConfig, Dashboard, Panel, PanelKind, Row, Variable, VariableSource, ref_id};
use serde_json::{Value, json};

pub const DATASOURCE_TYPE: &str = "grafana-azure-data-explorer-datasource";

const SCHEMA_VERSION: u32 = 39;

/// Value Grafana uses for the "All" option of a multi-value control.
const ALL_VALUE: &str = "$__all";

/// Copies of a repeated panel placed side by side before wrapping.
const MAX_PER_ROW: u32 = 6;

/// Deployment details the neutral dashboard does not carry.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub datasource_uid: String,
    pub database: String,
    pub time_from: String,
    pub time_to: String,
}

impl RenderOptions {
    pub fn from_config(config: &AnomdashConfig) -> Self {
        Self {
            datasource_uid: config.grafana.datasource_uid.clone(),
            database: config.kusto.database.clone(),
            time_from: config.dashboard.time_from.clone(),
            time_to: config.dashboard.time_to.clone(),
        }
    }

    fn datasource(&self) -> Value {
        json!({ "type": DATASOURCE_TYPE, "uid": self.datasource_uid })
    }
}

/// The dashboard model, without the save envelope.
pub fn render_dashboard(dashboard: &Dashboard, opts: &RenderOptions) -> Value {
    let mut panels = Vec::new();
    for row in &dashboard.rows {
        panels.push(render_row(row));
        panels.extend(row.panels.iter().map(|p| render_panel(p, dashboard, opts)));
    }

    let variables: Vec<Value> = dashboard
        .variables
        .iter()
        .map(|v| render_variable(v, opts))
        .collect();

    json!({
        "uid": dashboard.uid,
        "title": dashboard.title,
        "tags": ["anomaly-detection"],
        "timezone": "browser",
        "schemaVersion": SCHEMA_VERSION,
        "editable": true,
        "refresh": "",
        "time": { "from": opts.time_from, "to": opts.time_to },
        "templating": { "list": variables },
        "panels": panels,
    })
}

/// Request body for `POST /api/dashboards/db`.
pub fn save_envelope(model: Value, folder_uid: Option<&str>, overwrite: bool) -> Value {
    let mut body = json!({
        "dashboard": model,
        "overwrite": overwrite,
        "message": "generated by anomdash",
    });
    if let Some(folder_uid) = folder_uid {
        body["folderUid"] = json!(folder_uid);
    }
    body
}

fn render_row(row: &Row) -> Value {
    json!({
        "type": "row",
        "id": row.id,
        "title": row.title,
        "collapsed": false,
        "gridPos": row.grid_pos,
        "panels": [],
    })
}

fn render_panel(panel: &Panel, dashboard: &Dashboard, opts: &RenderOptions) -> Value {
    let result_format = match panel.kind {
        PanelKind::Timeseries => "time_series",
        PanelKind::BarChart | PanelKind::Table => "table",
    };

    let targets: Vec<Value> = panel
        .query_refs
        .iter()
        .enumerate()
        .filter_map(|(i, key)| dashboard.query(key).map(|q| (i, q)))
        .map(|(i, query)| {
            json!({
                "refId": ref_id(i),
                "datasource": opts.datasource(),
                "database": opts.database,
                "queryType": "KQL",
                "querySource": "raw",
                "rawMode": true,
                "resultFormat": result_format,
                "query": query.text,
            })
        })
        .collect();

    let mut out = json!({
        "type": panel.kind.plugin_id(),
        "id": panel.id,
        "title": panel.title,
        "gridPos": panel.grid_pos,
        "datasource": opts.datasource(),
        "targets": targets,
        "fieldConfig": { "defaults": {}, "overrides": [] },
    });

    match panel.kind {
        PanelKind::Timeseries => {
            out["fieldConfig"]["defaults"]["custom"] = json!({
                "drawStyle": "line",
                "lineInterpolation": "linear",
                "lineWidth": 1,
                "fillOpacity": 0,
                "pointSize": 5,
                "showPoints": "auto",
            });
            out["fieldConfig"]["overrides"] = json!([{
                "matcher": { "id": "byName", "options": "AnomalyValue" },
                "properties": [
                    { "id": "custom.drawStyle", "value": "points" },
                    { "id": "custom.pointSize", "value": 8 },
                    { "id": "color", "value": { "mode": "fixed", "fixedColor": "red" } }
                ]
            }]);
            out["options"] = json!({
                "legend": { "displayMode": "list", "placement": "bottom", "showLegend": true },
                "tooltip": { "mode": "multi", "sort": "none" },
            });
        }
        PanelKind::BarChart => {
            out["options"] = json!({
                "orientation": "auto",
                "stacking": "none",
                "showValue": "auto",
                "legend": { "displayMode": "list", "placement": "bottom", "showLegend": false },
            });
        }
        PanelKind::Table => {
            out["options"] = json!({ "showHeader": true, "cellHeight": "sm" });
        }
    }

    if let Some(variable) = &panel.repeat {
        out["repeat"] = json!(variable);
        out["repeatDirection"] = json!("h");
        out["maxPerRow"] = json!(MAX_PER_ROW);
    }
    out
}

pub fn render_variable(variable: &Variable, opts: &RenderOptions) -> Value {
    match &variable.source {
        VariableSource::Query { query, values } => {
            let mut options = vec![option("All", ALL_VALUE, true)];
            options.extend(values.iter().map(|v| option(v, v, false)));
            json!({
                "type": "query",
                "name": variable.name,
                "label": variable.label,
                "datasource": opts.datasource(),
                "query": query,
                "definition": query,
                "refresh": 1,
                "sort": 1,
                "multi": variable.multi_value,
                "includeAll": true,
                "current": { "text": ["All"], "value": [ALL_VALUE] },
                "options": options,
                "hide": 0,
            })
        }
        VariableSource::StaticList { values, default } => {
            let options: Vec<Value> = values.iter().map(|v| option(v, v, v == default)).collect();
            json!({
                "type": "custom",
                "name": variable.name,
                "label": variable.label,
                "query": values.join(","),
                "multi": variable.multi_value,
                "includeAll": false,
                "current": { "text": default, "value": default },
                "options": options,
                "hide": 0,
            })
        }
    }
}

fn option(text: &str, value: &str, selected: bool) -> Value {
    json!({ "text": text, "value": value, "selected": selected })
}
