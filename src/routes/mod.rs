mod health;
mod metrics;
mod process;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/process", post(process::process_frame))
        .route("/health_check", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}
