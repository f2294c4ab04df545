//! anomdash-core — shared model for turning one time-series query into an
//! anomaly dashboard.

pub mod config;
pub mod error;
pub mod service;
pub mod types;

pub use config::AnomdashConfig;
pub use error::*;
pub use service::{PublishReceipt, Publisher, QueryService, ServiceFuture};
pub use types::*;
