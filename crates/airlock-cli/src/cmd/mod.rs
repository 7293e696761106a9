pub mod config;
pub mod crawl;
pub mod diff;
pub mod digest;
pub mod evaluate;
pub mod freshness;
pub mod ingest;
pub mod init;
pub mod queue;
pub mod reconcile;
pub mod resolve;
pub mod schedule;
