pub mod airlock;
pub mod backoff;
pub mod baseline;
pub mod config;
pub mod digest;
pub mod error;
pub mod freshness;
pub mod ingest;
pub mod io;
pub mod paths;
pub mod pipeline;
pub mod schedule;
pub mod snapshot;
pub mod store;
pub mod types;

pub use error::{AirlockError, Result};
