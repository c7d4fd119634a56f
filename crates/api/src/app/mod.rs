//! HTTP application wiring (Axum router + shared state).
//!
//! - `state.rs`: what handlers get injected (queue, status reader, processor)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: multipart parsing and response bodies
//! - `errors.rs`: consistent JSON error responses

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod state;

pub use state::{AppState, IngestionServices};

/// Build the full HTTP router around already-constructed services.
pub fn build_app(state: Arc<AppState>) -> Router {
    let body_limit = state.max_upload_bytes;

    routes::router().layer(
        ServiceBuilder::new()
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(Extension(state)),
    )
}
