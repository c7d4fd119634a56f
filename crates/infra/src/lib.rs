//! Infrastructure layer: Redis-backed ingestion queue and background workers.

pub mod queue;
pub mod workers;

#[cfg(test)]
mod integration_tests;
