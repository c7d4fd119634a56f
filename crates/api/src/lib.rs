//! HTTP API for document ingestion: configuration, processors, routes and
//! service lifecycle.

pub mod app;
pub mod config;
pub mod processing;
pub mod runtime;

pub use config::Settings;
pub use runtime::Runtime;
