use axum::{routing::get, Router};

pub mod documents;
pub mod system;

/// Router for every public endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .nest("/documents", documents::router())
}
