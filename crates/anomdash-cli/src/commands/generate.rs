use std::path::Path;

use anomdash_compose::{GenerateRequest, build_dashboard, generate};
use anomdash_core::{AnomdashConfig, GenerateError};
use anomdash_grafana::{GrafanaPublisher, RenderOptions, render_dashboard, save_envelope};
use anomdash_kusto::KustoClient;
use anyhow::Context;
use tracing::{info, warn};

use crate::GenerateArgs;

pub async fn run(args: GenerateArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let request = GenerateRequest::from_config(&config);
    let kusto = KustoClient::from_config(&config.kusto)?;
    let render = RenderOptions::from_config(&config);

    if args.dry_run {
        let dashboard = build_dashboard(&request, &kusto).await.map_err(stage_error)?;
        let body = save_envelope(
            render_dashboard(&dashboard, &render),
            config.grafana.folder_uid.as_deref(),
            config.grafana.overwrite,
        );
        match &args.output {
            Some(path) => write_body(path, &body)?,
            None => println!("{}", serde_json::to_string_pretty(&body)?),
        }
        return Ok(());
    }

    let publisher = GrafanaPublisher::new(&config.grafana, render)?;
    match generate(&request, &kusto, &publisher).await {
        Ok(outcome) => {
            if let Some(path) = &args.output {
                write_body(path, &publisher.request_body(&outcome.dashboard))?;
            }
            println!("✓ Dashboard published: {}", outcome.receipt.url);
            Ok(())
        }
        Err(err) => {
            if let (Some(dashboard), Some(path)) = (err.dashboard(), &args.output) {
                write_body(path, &publisher.request_body(dashboard))?;
                warn!(path = %path.display(), "publish failed, dashboard saved for retry");
            }
            Err(stage_error(err))
        }
    }
}

/// Config file plus command-line overrides, validated.
fn load_config(args: &GenerateArgs) -> anyhow::Result<AnomdashConfig> {
    let mut config = AnomdashConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut AnomdashConfig, args: &GenerateArgs) {
    if let Some(query) = &args.query {
        config.dashboard.base_query = query.clone();
    }
    if let Some(title) = &args.title {
        config.dashboard.title = Some(title.clone());
    }
    if let Some(step) = &args.step {
        config.dashboard.step = Some(step.clone());
    }
    if let Some(tenant_id) = &args.tenant_id {
        config.kusto.tenant_id = Some(tenant_id.clone());
    }
    if let Some(client_id) = &args.client_id {
        config.kusto.client_id = Some(client_id.clone());
    }
    if let Some(secret) = &args.client_secret {
        config.kusto.client_secret = Some(secret.clone());
    }
    if let Some(token) = &args.grafana_token {
        config.grafana.api_token = Some(token.clone());
    }
}

fn write_body(path: &Path, body: &serde_json::Value) -> anyhow::Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(body)?)
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "dashboard written");
    Ok(())
}

fn stage_error(err: GenerateError) -> anyhow::Error {
    let stage = err.stage();
    anyhow::Error::new(err).context(format!("{stage} stage failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const CONFIG: &str = r#"
[kusto]
cluster = "https://help.kusto.windows.net"
database = "Samples"

[grafana]
url = "http://grafana:3000"
datasource_uid = "adx"

[dashboard]
base_query = "StormEvents | project StartTime, DamageProperty, State"
"#;

    fn args(config: PathBuf) -> GenerateArgs {
        GenerateArgs {
            config,
            query: None,
            title: None,
            step: None,
            dry_run: true,
            output: None,
            tenant_id: None,
            client_id: None,
            client_secret: None,
            grafana_token: None,
        }
    }

    #[test]
    fn test_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anomdash.toml");
        std::fs::write(&path, CONFIG).unwrap();

        let mut args = args(path);
        args.query = Some("Requests | project Timestamp, Count".into());
        args.step = Some("5m".into());
        args.grafana_token = Some("t0k".into());

        let config = load_config(&args).unwrap();
        assert_eq!(config.dashboard.base_query, "Requests | project Timestamp, Count");
        assert_eq!(config.dashboard.step.as_deref(), Some("5m"));
        assert_eq!(config.grafana.api_token.as_deref(), Some("t0k"));
        assert_eq!(config.kusto.database, "Samples");
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&args(dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn test_stage_in_error_message() {
        let err = stage_error(GenerateError::from(anomdash_core::SchemaError::NoTableFound));
        assert_eq!(err.to_string(), "schema stage failed");
        assert!(format!("{err:#}").contains("schema error:"));
    }

    #[test]
    fn test_write_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.json");
        write_body(&path, &serde_json::json!({"dashboard": {"uid": "x"}})).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["dashboard"]["uid"], "x");
    }
}
