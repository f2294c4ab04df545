//! anomdash-compose — derives the anomaly-analysis queries, controls and
//! layout from one base query and checks that the result is closed.

pub mod assemble;
pub mod generate;
pub mod kql;
pub mod planner;
pub mod schema;
pub mod synth;
pub mod token;
pub mod validate;

pub use assemble::{assemble, dashboard_uid};
pub use generate::{GenerateOutcome, GenerateRequest, build_dashboard, generate};
pub use synth::Synthesizer;
pub use validate::validate;
