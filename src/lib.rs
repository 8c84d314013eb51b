pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod profile;
pub mod table;

pub mod config;

// Layered boundaries for application ports and infrastructure adapters
pub mod app;
pub mod infra;
