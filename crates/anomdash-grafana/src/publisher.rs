//! Publishing through the Grafana HTTP API.

use std::time::Duration;

use anomdash_core::config::GrafanaConfig;
use anomdash_core::{ConfigError, Dashboard, PublishError, PublishReceipt, Publisher, ServiceFuture};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use crate::render::{RenderOptions, render_dashboard, save_envelope};

/// Successful `POST /api/dashboards/db` response.
#[derive(Debug, Deserialize)]
struct SaveResponse {
    uid: String,
    url: String,
    #[serde(default)]
    version: Option<u64>,
}

pub struct GrafanaPublisher {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
    folder_uid: Option<String>,
    overwrite: bool,
    render: RenderOptions,
}

impl GrafanaPublisher {
    pub fn new(config: &GrafanaConfig, render: RenderOptions) -> Result<Self, ConfigError> {
        let api_token = config
            .api_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing("grafana.api_token"))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "grafana",
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_token,
            folder_uid: config.folder_uid.clone(),
            overwrite: config.overwrite,
            render,
        })
    }

    /// Full save request body for `dashboard`.
    pub fn request_body(&self, dashboard: &Dashboard) -> serde_json::Value {
        save_envelope(
            render_dashboard(dashboard, &self.render),
            self.folder_uid.as_deref(),
            self.overwrite,
        )
    }

    async fn save(&self, dashboard: &Dashboard) -> Result<PublishReceipt, PublishError> {
        let url = format!("{}/api/dashboards/db", self.base_url);
        debug!(%url, uid = %dashboard.uid, "saving dashboard");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&self.request_body(dashboard))
            .send()
            .await
            .map_err(|e| PublishError::Unreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let saved: SaveResponse = resp.json().await.map_err(|e| PublishError::Rejected {
            status: status.as_u16(),
            body: format!("unreadable response: {e}"),
        })?;
        let receipt = PublishReceipt {
            url: format!("{}{}", self.base_url, saved.url),
            uid: saved.uid,
            version: saved.version,
        };
        info!(url = %receipt.url, version = ?receipt.version, "dashboard saved");
        Ok(receipt)
    }
}

fn status_error(status: StatusCode, body: String) -> PublishError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PublishError::AuthFailure(body),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => PublishError::Conflict(body),
        _ => PublishError::Rejected {
            status: status.as_u16(),
            body,
        },
    }
}

impl Publisher for GrafanaPublisher {
    fn publish<'a>(&'a self, dashboard: &'a Dashboard) -> ServiceFuture<'a, PublishReceipt, PublishError> {
        Box::pin(self.save(dashboard))
    }
}
