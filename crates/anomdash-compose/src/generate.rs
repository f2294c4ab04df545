//! End-to-end pipeline: base query in, assembled (and optionally published)
//! dashboard out.
//!
//! Stages run strictly in order and the first failure stops the run:
//! request validation, schema extraction, query synthesis, variable planning, assembly with
//! closure validation, publishing. Collaborators are injected.

use std::collections::HashMap;

use anomdash_core::config::ThresholdConfig;
use anomdash_core::{
    AnomdashConfig, Dashboard, GenerateError, PublishReceipt, Publisher, QueryService, VariableSource,
};
use futures_util::future::try_join_all;
use tracing::{debug, info, warn};

use crate::assemble::assemble;
use crate::kql::{self, DEFAULT_STEP};
use crate::planner::plan;
use crate::schema;
use crate::synth::Synthesizer;

/// Everything a run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub base_query: String,
    /// Dashboard title; the source table name when absent.
    pub title: Option<String>,
    /// Fixed `make-series` step; sampled from the data when absent.
    pub step: Option<String>,
    /// Resolve the source table against the service's table list.
    pub verify_table: bool,
    pub threshold: ThresholdConfig,
}

impl GenerateRequest {
    pub fn new(base_query: impl Into<String>) -> Self {
        Self {
            base_query: base_query.into(),
            title: None,
            step: None,
            verify_table: true,
            threshold: ThresholdConfig::default(),
        }
    }

    pub fn from_config(config: &AnomdashConfig) -> Self {
        Self {
            base_query: config.dashboard.base_query.clone(),
            title: config.dashboard.title.clone(),
            step: config.dashboard.step.clone(),
            verify_table: config.kusto.verify_table,
            threshold: config.threshold.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub dashboard: Dashboard,
    pub receipt: PublishReceipt,
}

/// Run every stage up to and including assembly. Nothing is published.
pub async fn build_dashboard<Q>(request: &GenerateRequest, service: &Q) -> Result<Dashboard, GenerateError>
where
    Q: QueryService + ?Sized,
{
    request.threshold.validate()?;

    let catalog = if request.verify_table {
        Some(service.list_tables().await?)
    } else {
        None
    };
    let table = schema::extract_table(&request.base_query, catalog.as_deref())?;
    debug!(%table, "source table resolved");

    let base_query = kql::normalize(&request.base_query);
    let columns = service.list_columns(&base_query).await?;
    let (base, column_schema) = schema::extract(&request.base_query, &columns, catalog.as_deref())?;
    info!(
        table = %base.table,
        time = column_schema.time(),
        value = column_schema.value(),
        dimensions = column_schema.dimension_count(),
        "schema extracted"
    );

    let step = match &request.step {
        Some(step) => step.clone(),
        None => match service.sample_interval(&base.text, column_schema.time()).await? {
            Some(interval) if interval.is_zero() => {
                warn!(default = DEFAULT_STEP, "sampled interval is zero, using default step");
                DEFAULT_STEP.to_string()
            }
            Some(interval) => kql::format_timespan(interval),
            None => {
                warn!(default = DEFAULT_STEP, "fewer than two rows to sample, using default step");
                DEFAULT_STEP.to_string()
            }
        },
    };
    let synthesizer = Synthesizer::new(step)?;
    let queries = synthesizer.synthesize(&base.text, &column_schema)?;
    debug!(step = synthesizer.step(), queries = queries.len(), "queries synthesized");

    let mut variables = plan(&column_schema, &base.table, &request.threshold);

    // Preview values for the dimension controls.
    let dimensions: Vec<&str> = column_schema.dimensions().collect();
    let previews = try_join_all(
        dimensions
            .iter()
            .map(|dimension| service.list_distinct_values(&base.table, *dimension)),
    )
    .await?;
    let mut by_name: HashMap<&str, Vec<String>> = dimensions.into_iter().zip(previews).collect();
    for variable in &mut variables {
        if let VariableSource::Query { values, .. } = &mut variable.source {
            if let Some(fetched) = by_name.remove(variable.name.as_str()) {
                *values = fetched;
            }
        }
    }

    let title = request.title.clone().unwrap_or_else(|| base.table.clone());
    Ok(assemble(&title, variables, queries)?)
}

/// Build the dashboard and publish it.
///
/// A publish failure still hands back the assembled dashboard inside
/// [`GenerateError::Publish`].
pub async fn generate<Q, P>(
    request: &GenerateRequest,
    service: &Q,
    publisher: &P,
) -> Result<GenerateOutcome, GenerateError>
where
    Q: QueryService + ?Sized,
    P: Publisher + ?Sized,
{
    let dashboard = build_dashboard(request, service).await?;
    match publisher.publish(&dashboard).await {
        Ok(receipt) => {
            info!(url = %receipt.url, uid = %receipt.uid, "dashboard published");
            Ok(GenerateOutcome { dashboard, receipt })
        }
        Err(source) => Err(GenerateError::Publish {
            source,
            dashboard: Box::new(dashboard),
        }),
    }
}
