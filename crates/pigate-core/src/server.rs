//! HTTP surface — axum router over the [`Dispatcher`].
//!
//! The router owns no logic of its own. A guard middleware admits each
//! non-public request (authentication + rate limit) and stores the
//! admitted [`Call`] in the request extensions; handlers hand that call and
//! the decoded [`ToolCall`] to the dispatcher and map [`GatewayError`]
//! kinds onto status codes.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use crate::auth::{Admitted, Call};
use crate::daemon::ShutdownSignal;
use crate::dispatch::{CallMeta, Dispatcher};
use crate::error::{ErrorKind, GatewayError};
use crate::tools::{ToolCall, ToolDescriptor};

/// Shared state accessible to all route handlers.
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Exact request paths served without admission.
    pub public_paths: Vec<String>,
}

impl AppState {
    fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| p == path)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub git_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolsResponse {
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    target: Option<String>,
}

/// Build the router with all routes and the admission guard.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/.well-known/mcp/tools", get(handle_list_tools))
        .route("/tools", post(handle_call))
        .route("/tools/{name}", post(handle_named_call))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), guard))
        .with_state(state)
}

/// Serve on `listener` until a shutdown signal arrives.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<(), std::io::Error> {
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("HTTP server shutting down");
        })
        .await
}

/// A [`GatewayError`] rendered as `{error, kind}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::PolicyDenied => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidArguments => StatusCode::BAD_REQUEST,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Remote | ErrorKind::Agent => StatusCode::BAD_GATEWAY,
        ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let body = ErrorResponse {
            error: self.0.to_string(),
            kind,
        };
        let mut response = (status_for(kind), Json(body)).into_response();
        if kind == ErrorKind::Unauthorized {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

// ── Middleware ──────────────────────────────────────────────────────────

async fn guard(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    if state.is_public(req.uri().path()) {
        return next.run(req).await;
    }

    let source = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let admitted = state.dispatcher.admit(CallMeta {
        authorization,
        source,
    });
    match admitted {
        Ok(call) => {
            req.extensions_mut().insert(call);
            next.run(req).await
        }
        Err(err) => ApiError(err).into_response(),
    }
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::build_info::VERSION.to_string(),
        git_hash: crate::build_info::GIT_HASH.to_string(),
    })
}

async fn handle_list_tools(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<ToolsResponse> {
    Json(ToolsResponse {
        tools: state.dispatcher.list_tools(query.target.as_deref()),
    })
}

async fn handle_call(
    State(state): State<Arc<AppState>>,
    Extension(call): Extension<Call<Admitted>>,
    body: Result<Json<ToolCall>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(tool) = body.map_err(rejection)?;
    let response = state.dispatcher.dispatch(&call, tool).await?;
    Ok(Json(response))
}

async fn handle_named_call(
    State(state): State<Arc<AppState>>,
    Extension(call): Extension<Call<Admitted>>,
    Path(name): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(arguments) = body.map_err(rejection)?;
    let response = state
        .dispatcher
        .dispatch(&call, ToolCall::new(name, arguments))
        .await?;
    Ok(Json(response))
}

fn rejection(err: JsonRejection) -> ApiError {
    ApiError(GatewayError::InvalidArguments(err.body_text()))
}
