//! HTTP surface.

use std::sync::Arc;

use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use log::{error, warn};

use crate::pipeline::Pipeline;
use crate::request::{self, QueryParams};
use crate::response::cors;
use crate::Error;

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/{file}",
            // `get` alone would also answer HEAD with a full render
            get(render_image)
                .head(method_not_allowed)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .fallback(not_found)
        .with_state(pipeline)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn render_image(
    State(pipeline): State<Arc<Pipeline>>,
    Path(file): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let Some(path) = request::parse_path(&file) else {
        return not_found().await.into_response();
    };
    let query = QueryParams::parse(query.as_deref());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    match pipeline.handle(path, &query, user_agent).await {
        Ok(image) => image.into_response(),
        Err(e) => error_response(&file, e),
    }
}

fn error_response(file: &str, err: Error) -> Response {
    if err.is_render_failure() {
        error!("request for {} failed: {}", file, err);
    } else {
        warn!("request for {} rejected: {}", file, err);
    }
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut headers = HeaderMap::new();
    cors(&mut headers);
    (status, headers, err.body()).into_response()
}

async fn preflight() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    cors(&mut headers);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    (StatusCode::NO_CONTENT, headers)
}

async fn method_not_allowed() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    cors(&mut headers);
    (StatusCode::METHOD_NOT_ALLOWED, headers, "405")
}

async fn not_found() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    cors(&mut headers);
    (StatusCode::NOT_FOUND, headers, "404")
}
