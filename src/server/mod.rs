//! HTTP surface for pollers.
//!
//! - `GET /keywords/next`: one keyword per call, wrapped in the
//!   `{code, msg, data}` envelope pollers already parse
//! - `GET /health`: store reachability and row counts
//! - `GET /metrics`: Prometheus text

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};

use crate::dispatch::DispatchService;
use crate::metrics::export_metrics;
use crate::queue::FastQueue;
use crate::storage::KeywordStore;

#[derive(Clone)]
pub struct AppState {
    dispatch: DispatchService,
    store: KeywordStore,
    queue: Arc<dyn FastQueue>,
}

impl AppState {
    pub fn new(dispatch: DispatchService, store: KeywordStore, queue: Arc<dyn FastQueue>) -> Self {
        Self {
            dispatch,
            store,
            queue,
        }
    }
}

/// Response envelope: `code` 0 on success, 1 on failure.
#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    code: u8,
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct KeywordList {
    keywords: Vec<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/keywords/next", get(next_keyword))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Binds `bind_addr` and serves until `shutdown` resolves.
pub async fn serve<F>(state: AppState, bind_addr: &str, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn next_keyword(State(state): State<AppState>) -> Response {
    match state.dispatch.next().await {
        Ok(Some(outcome)) => no_store(
            StatusCode::OK,
            Envelope {
                code: 0,
                msg: "ok".to_string(),
                data: Some(KeywordList {
                    keywords: vec![outcome.keyword],
                }),
            },
        ),
        Ok(None) => no_store(
            StatusCode::OK,
            Envelope {
                code: 0,
                msg: "empty".to_string(),
                data: Some(KeywordList {
                    keywords: Vec::new(),
                }),
            },
        ),
        Err(e) => {
            error!(error = %e, "Dispatch failed");
            no_store(
                StatusCode::SERVICE_UNAVAILABLE,
                Envelope::<KeywordList> {
                    code: 1,
                    msg: e.to_string(),
                    data: None,
                },
            )
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    queue_backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unread: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// The fast tier is optional for serving, so only the store decides the
/// status code.
async fn health(State(state): State<AppState>) -> Response {
    let queue_depth = state.queue.len().await.ok();

    match state.store.stats().await {
        Ok(stats) => no_store(
            StatusCode::OK,
            HealthBody {
                status: "ok",
                queue_backend: state.queue.backend(),
                queue_depth,
                unread: Some(stats.unread),
                error: None,
            },
        ),
        Err(e) => no_store(
            StatusCode::SERVICE_UNAVAILABLE,
            HealthBody {
                status: "unavailable",
                queue_backend: state.queue.backend(),
                queue_depth,
                unread: None,
                error: Some(e.to_string()),
            },
        ),
    }
}

async fn metrics() -> Response {
    let mut response = export_metrics().into_response();
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

fn no_store<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
