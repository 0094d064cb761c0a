// crates/server/src/jobs/mod.rs
//! Built-in jobs shipped with the server.
//!
//! Provides:
//! - `ticker` - counts steps with progress messages, honours stop requests
//! - `questionnaire` - walks through every kind of interaction request

pub mod questionnaire;
pub mod ticker;

use backdesk_core::{Job, JobCatalog};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use questionnaire::Questionnaire;
pub use ticker::{Ticker, TickerParams};

/// Catalog with every built-in job registered.
pub fn builtin_catalog() -> JobCatalog {
    let mut catalog = JobCatalog::new();
    catalog.register(
        ticker::KIND,
        "Count steps at a fixed interval, logging progress",
        |params: &Value| Ok(Box::new(Ticker::new(parse_params(params)?)) as Box<dyn Job>),
    );
    catalog.register(
        questionnaire::KIND,
        "Ask a confirmation, a name and a passphrase, then report",
        |params: &Value| Ok(Box::new(Questionnaire::new(parse_params(params)?)) as Box<dyn Job>),
    );
    catalog
}

/// `null` or a missing body means "all defaults".
fn parse_params<T: DeserializeOwned + Default>(params: &Value) -> Result<T, String> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).map_err(|err| err.to_string())
}
