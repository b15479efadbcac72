// Storage HTTP API.
//
// Routes (under the configured prefix, `/api` by default):
//   GET    {prefix}/settings            read settings document
//   PUT    {prefix}/settings            replace settings document
//   GET    {prefix}/environments/{id}   read environment document
//   PUT    {prefix}/environments/{id}   replace environment document
//   DELETE {prefix}/environments/{id}   delete environment document
//
// Plus `/runtime-config.js`, `/healthz`, and an optional static asset
// fallback for everything else.

use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{
        header::{self, HeaderValue},
        Request, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use mocksmith_common::runtime::{render_runtime_script, RuntimeInjection, RUNTIME_SCRIPT_PATH};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::DaemonConfig;
use crate::store::{FileStore, JsonFormat, StoreError};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_SCOPE: ();
}

/// True while a request handler runs under the panic middleware, whose
/// panics are answered with a 500 instead of stopping the process.
pub fn in_request_scope() -> bool {
    REQUEST_SCOPE.try_with(|_| ()).is_ok()
}

#[derive(Clone)]
struct ApiState {
    store: FileStore,
}

#[derive(Debug, Default, Deserialize)]
pub struct WriteQuery {
    pub pretty: Option<String>,
}

impl WriteQuery {
    fn format(&self) -> JsonFormat {
        JsonFormat::from_pretty_flag(self.pretty.as_deref())
    }
}

#[derive(Debug)]
pub enum ApiError {
    /// 404 with an empty body.
    NotFound,
    /// 400 with a `{message}` body.
    BadRequest(String),
    /// 500 with a generic `{message}` body; detail is logged only.
    Internal(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { .. } => Self::NotFound,
            other => Self::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND.into_response(),
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
            }
            Self::Internal(error) => {
                error!(error = ?error, "storage request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "internal storage error" })),
                )
                    .into_response()
            }
        }
    }
}

/// Full daemon router: storage API, runtime script, health check,
/// static fallback and middleware.
pub fn router(config: &DaemonConfig) -> Router {
    let mut app = Router::new()
        .route("/healthz", get(healthz))
        .route(RUNTIME_SCRIPT_PATH, get(runtime_script_handler(&config.api_prefix)))
        .merge(storage_router(FileStore::new(config), &config.api_prefix));

    if let Some(static_dir) = config.static_dir.as_ref().filter(|dir| dir.is_dir()) {
        info!(static_dir = %static_dir.display(), "serving static client assets");
        let index = ServeFile::new(static_dir.join("index.html"));
        app = app.fallback_service(
            ServeDir::new(static_dir).append_index_html_on_directories(true).fallback(index),
        );
    }

    apply_middleware(app, config.body_limit_bytes)
}

/// Storage routes only, rooted at `prefix`.
pub fn storage_router(store: FileStore, prefix: &str) -> Router {
    Router::new()
        .route(&format!("{prefix}/settings"), get(get_settings).put(put_settings))
        .route(
            &format!("{prefix}/environments/{{id}}"),
            get(get_environment).put(put_environment).delete(delete_environment),
        )
        .with_state(ApiState { store })
}

pub fn apply_middleware(router: Router, body_limit_bytes: usize) -> Router {
    router
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(middleware::from_fn(panic_handler))
        .layer(middleware::from_fn(request_context_middleware))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

fn runtime_script_handler(
    prefix: &str,
) -> impl Fn() -> std::future::Ready<Response> + Clone + Send + Sync + 'static {
    // A root mount still has to read as networked on the client side.
    let base = if prefix.is_empty() { "/" } else { prefix };
    let script = render_runtime_script(&RuntimeInjection::networked(base));
    move || {
        let response = (
            [
                (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            script.clone(),
        )
            .into_response();
        std::future::ready(response)
    }
}

async fn get_settings(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.store.read_settings().await?))
}

async fn put_settings(
    State(state): State<ApiState>,
    Query(query): Query<WriteQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let settings = parse_body(&body)?;
    state.store.write_settings(&settings, query.format()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_environment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.store.read_environment(&id).await?))
}

async fn put_environment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<WriteQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let environment = parse_body(&body)?;
    if !environment.is_object() {
        return Err(ApiError::BadRequest("environment body must be a JSON object".into()));
    }
    state.store.write_environment(&id, &environment, query.format()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_environment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_environment(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::BadRequest("request body is required".into()));
    }
    serde_json::from_slice(body).map_err(|error| {
        warn!(error = %error, "rejected request body");
        ApiError::BadRequest("request body must be valid JSON".into())
    })
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    let handling = REQUEST_SCOPE.scope((), next.run(request)).in_current_span();
    match tokio::spawn(handling).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "storage handler panicked");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "message": "internal error" })))
                .into_response()
        }
    }
}

/// Tags every request with an id (echoed when the caller sent one) and
/// runs it inside a span carrying that id.
async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let span = info_span!(
        "storage_request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let started_at = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let latency_ms = started_at.elapsed().as_millis() as u64;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let status = response.status().as_u16();
    span.in_scope(|| {
        if response.status().is_server_error() {
            warn!(status, latency_ms, "request failed");
        } else {
            info!(status, latency_ms, "request completed");
        }
    });
    response
}
