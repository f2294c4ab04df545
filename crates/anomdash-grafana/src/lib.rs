//! anomdash-grafana — renders assembled dashboards as Grafana models and
//! saves them through the HTTP API.

pub mod publisher;
pub mod render;

pub use publisher::GrafanaPublisher;
pub use render::{RenderOptions, render_dashboard, save_envelope};
