//! Error taxonomy for dashboard generation.
//!
//! One enum per pipeline stage. [`GenerateError`] wraps them so the caller
//! can report which stage failed.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Dashboard, QueryKey};

/// Malformed or unrecognized base query shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("base query is empty")]
    EmptyQuery,

    #[error("query does not begin with a recognizable table reference")]
    NoTableFound,

    #[error("query projects {0} column(s); a time column and a value column are required")]
    InsufficientColumns(usize),

    #[error("column {0} is projected more than once")]
    DuplicateColumn(String),

    #[error("invalid column layout: {0}")]
    InvalidLayout(String),
}

/// The derived queries cannot be built for this schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("dimension {0} collides with a reserved substitution name")]
    ReservedName(String),

    #[error("dimension {0} cannot be used as a substitution token name")]
    InvalidName(String),

    #[error("invalid series step {0:?}; expected a timespan literal such as 1h or 15m")]
    InvalidStep(String),
}

/// Referential integrity failure inside an assembled dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("no {0} query was synthesized")]
    MissingQuery(QueryKey),

    #[error("panel {panel:?} references unknown query {key}")]
    DanglingQueryRef { panel: String, key: QueryKey },

    #[error("token ${{{0}}} has no matching variable")]
    UnboundToken(String),

    #[error("variable {0} is not referenced by any query")]
    UnusedVariable(String),

    #[error("variable {0} is declared more than once")]
    DuplicateVariable(String),
}

/// Failure reported by the query-execution collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalError {
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("query failed: {0}")]
    QueryFailure(String),
}

/// Failure reported by the dashboard service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("dashboard service rejected credentials: {0}")]
    AuthFailure(String),

    #[error("dashboard already exists or changed concurrently: {0}")]
    Conflict(String),

    #[error("dashboard service unreachable: {0}")]
    Unreachable(String),

    #[error("dashboard rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A failed run, tagged by the stage that failed.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("query service error: {0}")]
    External(#[from] ExternalError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Publishing failed; the assembled dashboard is kept for a retry.
    #[error("publish error: {source}")]
    Publish {
        source: PublishError,
        dashboard: Box<Dashboard>,
    },
}

impl GenerateError {
    pub fn stage(&self) -> &'static str {
        match self {
            GenerateError::Schema(_) => "schema",
            GenerateError::Synthesis(_) => "synthesis",
            GenerateError::Assembly(_) => "assembly",
            GenerateError::External(_) => "query service",
            GenerateError::Config(_) => "config",
            GenerateError::Publish { .. } => "publish",
        }
    }

    /// The assembled dashboard, when the failure happened after assembly.
    pub fn dashboard(&self) -> Option<&Dashboard> {
        match self {
            GenerateError::Publish { dashboard, .. } => Some(dashboard.as_ref()),
            _ => None,
        }
    }
}
