use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::collector::Collector;

pub fn router(collector: Arc<Collector>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .with_state(collector)
}

pub async fn serve(listener: TcpListener, collector: Arc<Collector>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "serving metrics");
    }
    axum::serve(listener, router(collector)).await
}

/// Every request runs one scrape. A failed scrape still answers, with the
/// counters and `scrape_success` at 0 but no labelled samples.
async fn metrics(State(collector): State<Arc<Collector>>) -> Response {
    if let Err(e) = collector.scrape().await {
        debug!(error = %e, "serving failed scrape");
    }

    match collector.metrics().encode() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}
