//! HTTP surface: `GET /proxy` and a liveness probe

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header::CONTENT_DISPOSITION;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use super::error::ProxyError;
use super::pipeline::{Pipeline, ProxyRequest, X_CACHE_STATUS};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProxyQuery {
    url: Option<String>,
    filename: Option<String>,
}

/// Every response, errors and preflights included, is readable cross-origin
pub fn build_router(pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::permissive().expose_headers([CONTENT_DISPOSITION, X_CACHE_STATUS]);

    Router::new()
        .route("/proxy", get(proxy))
        .route("/healthz", get(healthz))
        .with_state(pipeline)
        .layer(cors)
}

async fn proxy(State(pipeline): State<Arc<Pipeline>>, Query(query): Query<ProxyQuery>) -> Response {
    let Some(url) = query.url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) else {
        return ProxyError::MissingUrl.into_response();
    };
    let filename = query
        .filename
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty());
    let request = ProxyRequest { url, filename };

    // A panic inside the pipeline becomes a 500 instead of a dropped connection
    let task = tokio::spawn(async move {
        let result = pipeline.serve(&request).await;
        (request, result)
    });

    match task.await {
        Ok((_, Ok(response))) => response,
        Ok((request, Err(e))) => {
            warn!(url = %request.url, status = e.status_code().as_u16(), error = %e, "Proxy request failed");
            e.into_response()
        }
        Err(e) => {
            error!(error = %e, "Proxy task failed");
            ProxyError::unexpected(e).into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}
