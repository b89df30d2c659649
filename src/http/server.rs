//! axum server for the counter.

use crate::storage::CounterStore;
use crate::{Error, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

type SharedStore = Arc<dyn CounterStore>;

/// Builds the counter router over `store`.
pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/inc", get(increment))
        .route("/count", get(count))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

/// Binds `host:port` and serves until Ctrl-C, then closes the store.
///
/// # Errors
///
/// Returns [`Error::StorageUnavailable`] if the runtime cannot start or the
/// address cannot be bound.
pub fn serve(store: SharedStore, host: &str, port: u16) -> Result<()> {
    let rt = tokio::runtime::Runtime::new().map_err(|e| Error::unavailable("http_runtime", e))?;
    let addr = format!("{host}:{port}");
    let app = router(Arc::clone(&store));

    rt.block_on(async {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::unavailable("http_bind", format!("{addr}: {e}")))?;
        tracing::info!(addr = %addr, backend = store.backend_name(), "Counter server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Ctrl-C handler failed");
                }
            })
            .await
            .map_err(|e| Error::unavailable("http_serve", e))
    })?;

    tracing::info!("Counter server stopped");
    store.close()
}

async fn increment(State(store): State<SharedStore>) -> Response {
    match tokio::task::spawn_blocking(move || store.increment()).await {
        Ok(Ok(())) => Json(serde_json::json!({ "status": "ok" })).into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(e) => error_response(&Error::unavailable("increment", e)),
    }
}

async fn count(State(store): State<SharedStore>) -> Response {
    match tokio::task::spawn_blocking(move || store.read()).await {
        Ok(Ok(value)) => Json(serde_json::json!({ "count": value })).into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(e) => error_response(&Error::unavailable("count", e)),
    }
}

fn error_response(e: &Error) -> Response {
    let status = if e.is_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    tracing::warn!(status = status.as_u16(), error = %e, "Counter request failed");
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}
