pub mod actors;
pub mod api;
pub mod cache;
pub mod config;
pub mod ingest;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod query;
pub mod store;
pub mod utils;
pub mod validation;
