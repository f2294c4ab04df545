//! Azure Data Explorer client over the v1 REST endpoints.

use std::time::Duration;

use anomdash_compose::kql::{Pipeline, split_statements};
use anomdash_core::config::KustoConfig;
use anomdash_core::{ConfigError, ExternalError, QueryService, ServiceFuture};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::auth::{Authenticator, ClientCredentials};
use crate::response::{QueryResponse, ResultTable, parse_timespan};

/// Cap on distinct values fetched to preview a dimension control.
pub const MAX_DISTINCT_VALUES: usize = 1000;

#[derive(Serialize)]
struct QueryRequest<'a> {
    db: &'a str,
    csl: &'a str,
}

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Query,
    Management,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Endpoint::Query => "v1/rest/query",
            Endpoint::Management => "v1/rest/mgmt",
        }
    }
}

pub struct KustoClient {
    http: reqwest::Client,
    cluster: String,
    database: String,
    auth: Authenticator,
}

impl KustoClient {
    pub fn new(
        cluster: impl Into<String>,
        database: impl Into<String>,
        auth: Authenticator,
        timeout: Duration,
    ) -> Result<Self, ExternalError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalError::QueryFailure(format!("http client: {e}")))?;
        Ok(Self {
            http,
            cluster: cluster.into().trim_end_matches('/').to_string(),
            database: database.into(),
            auth,
        })
    }

    /// Client for the configured cluster. Credentials must be either all
    /// present (client secret flow) or all absent (anonymous).
    pub fn from_config(config: &KustoConfig) -> Result<Self, ConfigError> {
        let auth = match (&config.tenant_id, &config.client_id, &config.client_secret) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Authenticator::client_secret(
                ClientCredentials {
                    tenant_id: tenant_id.clone(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                },
                &config.cluster,
            ),
            (None, None, None) => Authenticator::Anonymous,
            _ => {
                return Err(ConfigError::Invalid {
                    field: "kusto",
                    reason: "tenant_id, client_id and client_secret must be set together".to_string(),
                });
            }
        };
        Self::new(
            config.cluster.clone(),
            config.database.clone(),
            auth,
            Duration::from_secs(config.timeout_secs),
        )
        .map_err(|e| ConfigError::Invalid {
            field: "kusto",
            reason: e.to_string(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Run a query and return its primary result table.
    pub async fn query(&self, csl: &str) -> Result<ResultTable, ExternalError> {
        self.execute(Endpoint::Query, csl).await
    }

    /// Run a management command (`.show ...`).
    pub async fn management(&self, csl: &str) -> Result<ResultTable, ExternalError> {
        self.execute(Endpoint::Management, csl).await
    }

    #[instrument(skip(self, csl), fields(database = %self.database))]
    async fn execute(&self, endpoint: Endpoint, csl: &str) -> Result<ResultTable, ExternalError> {
        let url = format!("{}/{}", self.cluster, endpoint.path());
        debug!(%url, csl, "executing");

        let mut request = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&QueryRequest {
                db: &self.database,
                csl,
            });
        if let Some(token) = self.auth.bearer(&self.http).await? {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| ExternalError::QueryFailure(format!("request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let parsed: QueryResponse = resp
            .json()
            .await
            .map_err(|e| ExternalError::QueryFailure(format!("response parse error: {e}")))?;
        parsed
            .primary()
            .ok_or_else(|| ExternalError::QueryFailure("response has no result table".to_string()))
    }
}

fn status_error(status: StatusCode, body: &str) -> ExternalError {
    let message = error_message(body).unwrap_or_else(|| body.to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ExternalError::AuthFailure(format!("status {status}: {message}"))
        }
        _ => ExternalError::QueryFailure(format!("status {status}: {message}")),
    }
}

/// `error.message` of a Kusto error body, when it is one.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("@message")
        .or_else(|| error.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

/// `['name']`, valid for any column or table name.
fn quoted(name: &str) -> String {
    format!("['{}']", name.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn distinct_values_csl(table: &str, column: &str) -> String {
    let (table, column) = (quoted(table), quoted(column));
    format!(
        "{table}\n| where isnotnull({column})\n| distinct {column}\n| sort by {column} asc\n| take {MAX_DISTINCT_VALUES}"
    )
}

/// Gap between the two most recent distinct timestamps of `query`.
///
/// Rows sharing a timestamp (one per dimension value) collapse first, so
/// the gap is never zero. Leading `let` statements stay in front.
fn sample_interval_csl(query: &str, time_column: &str) -> String {
    let (preamble, body) = split_statements(query);
    let time = quoted(time_column);
    Pipeline::new(body)
        .prelude(&preamble)
        .pipe(format!("where isnotnull({time})"))
        .pipe(format!("summarize by {time}"))
        .pipe(format!("sort by {time} desc"))
        .pipe(format!("extend NextTimestamp = next({time})"))
        .pipe("where isnotnull(NextTimestamp)")
        .pipe("take 1")
        .pipe(format!("project TimeDifference = {time} - NextTimestamp"))
        .render()
}

impl QueryService for KustoClient {
    fn list_tables(&self) -> ServiceFuture<'_, Vec<String>, ExternalError> {
        Box::pin(async move {
            let table = self.management(".show tables | project TableName").await?;
            let column = table.column_index("TableName").unwrap_or(0);
            Ok(table.strings(column))
        })
    }

    fn list_columns<'a>(&'a self, query: &'a str) -> ServiceFuture<'a, Vec<String>, ExternalError> {
        Box::pin(async move {
            let table = self.query(&format!("{query}\n| take 0")).await?;
            Ok(table.column_names())
        })
    }

    fn list_distinct_values<'a>(
        &'a self,
        table: &'a str,
        column: &'a str,
    ) -> ServiceFuture<'a, Vec<String>, ExternalError> {
        Box::pin(async move {
            let result = self.query(&distinct_values_csl(table, column)).await?;
            Ok(result.strings(0))
        })
    }

    fn sample_interval<'a>(
        &'a self,
        query: &'a str,
        time_column: &'a str,
    ) -> ServiceFuture<'a, Option<Duration>, ExternalError> {
        Box::pin(async move {
            let result = self.query(&sample_interval_csl(query, time_column)).await?;
            let interval = result.strings(0).first().and_then(|cell| parse_timespan(cell));
            debug!(?interval, "sampled interval");
            Ok(interval)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KustoConfig {
        KustoConfig {
            cluster: "https://help.kusto.windows.net/".into(),
            database: "Samples".into(),
            tenant_id: None,
            client_id: None,
            client_secret: None,
            verify_table: true,
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_from_config_anonymous() {
        let client = KustoClient::from_config(&config()).unwrap();
        assert_eq!(client.cluster, "https://help.kusto.windows.net");
        assert_eq!(client.database(), "Samples");
        assert!(matches!(client.auth, Authenticator::Anonymous));
    }

    #[test]
    fn test_from_config_partial_credentials() {
        let mut cfg = config();
        cfg.client_id = Some("app".into());
        assert!(matches!(
            KustoClient::from_config(&cfg),
            Err(ConfigError::Invalid { field: "kusto", .. })
        ));
    }

    #[test]
    fn test_status_mapping() {
        let body = r#"{"error":{"code":"Forbidden","message":"Principal is not authorized"}}"#;
        assert_eq!(
            status_error(StatusCode::FORBIDDEN, body),
            ExternalError::AuthFailure("status 403 Forbidden: Principal is not authorized".into())
        );
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "Syntax error"),
            ExternalError::QueryFailure(m) if m.ends_with("Syntax error")
        ));
    }

    #[test]
    fn test_quoted_names() {
        assert_eq!(quoted("Region"), "['Region']");
        assert_eq!(quoted("it's"), r"['it\'s']");
    }

    #[test]
    fn test_sample_interval_csl() {
        let csl = sample_interval_csl("Requests | project Timestamp, Count, Region", "Timestamp");
        assert!(csl.starts_with("Requests | project Timestamp, Count, Region\n| where isnotnull(['Timestamp'])"));
        // One row per timestamp before neighbours are compared.
        let distinct = csl.find("| summarize by ['Timestamp']").unwrap();
        assert!(distinct < csl.find("next(['Timestamp'])").unwrap());
        assert!(csl.ends_with("project TimeDifference = ['Timestamp'] - NextTimestamp"));
    }

    #[test]
    fn test_sample_interval_csl_keeps_let_statements_first() {
        let csl = sample_interval_csl(
            "let cutoff = ago(7d);\nRequests | where Timestamp > cutoff",
            "Timestamp",
        );
        assert!(csl.starts_with("let cutoff = ago(7d);\nRequests | where Timestamp > cutoff\n| where"));
        assert!(!csl.contains("(let "));
    }

    #[test]
    fn test_distinct_values_csl_is_bounded() {
        let csl = distinct_values_csl("Requests", "Region");
        assert!(csl.starts_with("['Requests']\n| where isnotnull(['Region'])"));
        assert!(csl.ends_with("| take 1000"));
    }
}
