//! Token service endpoints.
//!
//! JSON in, JSON out, CORS-permissive. Malformed bodies surface as the
//! same structured failure shape as signing errors (status 500), so
//! wrapping callers only ever parse one error format.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::request::RequestParams;
use crate::service::ServiceState;

pub fn router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/token", get(token_get).post(token_post))
        .fallback(not_found)
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

pub async fn serve(state: Arc<ServiceState>, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("token service listening on {}", listener.local_addr()?);
    info!("health check:   GET  /health");
    info!("token (POST):   POST /token");
    info!("token (GET):    GET  /token?url=...&query=...");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Permissive CORS on every response; preflights short-circuit to 200.
async fn cors(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return with_cors_headers(StatusCode::OK.into_response());
    }
    with_cors_headers(next.run(req).await)
}

fn with_cors_headers(mut res: Response) -> Response {
    let headers = res.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    res
}

/// Never blocks on capture: reports the current readiness state as-is.
async fn health(State(state): State<Arc<ServiceState>>) -> Response {
    Json(json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
        "hasEncryptionInstance": state.engine().registry().is_captured(),
    }))
    .into_response()
}

async fn token_post(State(state): State<Arc<ServiceState>>, body: String) -> Response {
    // Parsed by hand so a malformed body is a structured 500, not a
    // framework-shaped 400
    let params: RequestParams = match serde_json::from_str(&body) {
        Ok(params) => params,
        Err(e) => {
            warn!("rejecting malformed token request body: {e}");
            return failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("invalid request body: {e}"),
            );
        }
    };
    respond(&state, params).await
}

async fn token_get(
    State(state): State<Arc<ServiceState>>,
    Query(raw): Query<HashMap<String, String>>,
) -> Response {
    let url = raw.get("url").cloned();
    let query = match raw.get("query") {
        Some(encoded) => match serde_json::from_str::<BTreeMap<String, String>>(encoded) {
            Ok(query) => Some(query),
            // Not JSON — treat the flat query-string parameters (minus
            // `url`) as the request's query map
            Err(_) => Some(
                raw.iter()
                    .filter(|(k, _)| k.as_str() != "url")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        },
        None => None,
    };
    respond(&state, RequestParams { url, query }).await
}

async fn respond(state: &ServiceState, params: RequestParams) -> Response {
    let mut request = params.into_request();
    // Normalize up front so the echoed query shows what was dispatched
    request.ensure_caver();
    let url = request.url.clone();
    let query = request.query.clone();

    info!("token request: url={url}");
    match state.handle(request).await {
        Ok(token) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "token": token,
                "url": url,
                "query": query,
            })),
        )
            .into_response(),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn not_found() -> Response {
    failure(StatusCode::NOT_FOUND, "Endpoint not found")
}

fn failure(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": error.into() })),
    )
        .into_response()
}
