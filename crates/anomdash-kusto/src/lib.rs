//! anomdash-kusto — Azure Data Explorer as the query service behind schema
//! introspection, interval sampling and dimension previews.

pub mod auth;
pub mod client;
pub mod response;

pub use auth::{Authenticator, ClientCredentials};
pub use client::KustoClient;
