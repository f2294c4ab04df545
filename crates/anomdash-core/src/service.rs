//! Collaborator seams: the query service used to introspect the base query
//! and the dashboard service the finished document is published to.
//!
//! Both are injected into the pipeline so it can run against in-memory
//! fakes in tests.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExternalError, PublishError};
use crate::types::Dashboard;

/// Boxed future alias for collaborator calls.
pub type ServiceFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Read-only introspection against the query service.
///
/// Every call is idempotent, so independent calls may run concurrently.
pub trait QueryService: Send + Sync {
    /// Names of all tables in the configured database.
    fn list_tables(&self) -> ServiceFuture<'_, Vec<String>, ExternalError>;

    /// Output column names of `query`, in projection order.
    fn list_columns<'a>(&'a self, query: &'a str) -> ServiceFuture<'a, Vec<String>, ExternalError>;

    /// Distinct values of `column` in `table`, rendered as strings.
    fn list_distinct_values<'a>(
        &'a self,
        table: &'a str,
        column: &'a str,
    ) -> ServiceFuture<'a, Vec<String>, ExternalError>;

    /// Gap between the two most recent timestamps of `query`, if it has at
    /// least two rows.
    fn sample_interval<'a>(
        &'a self,
        query: &'a str,
        time_column: &'a str,
    ) -> ServiceFuture<'a, Option<Duration>, ExternalError>;
}

/// What the dashboard service reports after accepting a dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub url: String,
    pub uid: String,
    pub version: Option<u64>,
}

/// Creates or replaces a dashboard in a single all-or-nothing request.
pub trait Publisher: Send + Sync {
    fn publish<'a>(&'a self, dashboard: &'a Dashboard) -> ServiceFuture<'a, PublishReceipt, PublishError>;
}
