//! Infrastructure-backed ingestion queues.
//!
//! The queue contract and the in-memory backend live in `copilot-ingestion`.
//! This module provides the Redis Streams backend.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisIngestionQueue;
