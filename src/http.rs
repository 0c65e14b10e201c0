//! HTTP surface over the tag gateway.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::gateway::{GatewayError, TagGateway};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    gateway: Arc<TagGateway>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (StatusCode::NOT_FOUND, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Create the HTTP router. The route table is static; every operation the
/// API supports is enumerated here.
fn create_router(gateway: Arc<TagGateway>, shutdown: Arc<watch::Sender<bool>>) -> Router {
    let state = AppState { gateway, shutdown };

    Router::new()
        .route("/handlers", get(list_handlers))
        .route("/handlers/:name/tags", get(list_handler_tags))
        .route("/handlers/:name/tags/:tag", get(get_tag).post(set_tag))
        .route("/handlers/:name/config", get(handler_config))
        .route("/events", get(list_events))
        .route("/get", get(query_action))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn list_handlers(State(state): State<AppState>) -> Json<Vec<&'static str>> {
    Json(state.gateway.handlers())
}

async fn list_handler_tags(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<String>>, GatewayError> {
    state.gateway.handler_tags(&name).map(Json)
}

async fn get_tag(
    State(state): State<AppState>,
    Path((name, tag)): Path<(String, String)>,
) -> Result<Response, GatewayError> {
    let tag = state.gateway.get_tag(&name, &tag)?;
    Ok(Json(tag).into_response())
}

#[derive(Debug, Deserialize, Default)]
struct SetValueParams {
    value: Option<u16>,
}

async fn set_tag(
    State(state): State<AppState>,
    Path((name, tag)): Path<(String, String)>,
    Query(query): Query<SetValueParams>,
    form: Option<Form<SetValueParams>>,
) -> Response {
    let value = form.and_then(|f| f.value).or(query.value);
    let Some(value) = value else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing 'value' parameter" })),
        )
            .into_response();
    };

    match state.gateway.set_tag(&name, &tag, value) {
        Ok(tag) => Json(tag).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handler_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    state.gateway.handler_config(&name).map(Json)
}

async fn list_events(State(state): State<AppState>) -> Response {
    Json(state.gateway.events()).into_response()
}

async fn health() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// The `/get?action=...` convenience surface.
async fn query_action(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let Some(action) = params.get("action") else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing 'action' parameter" })),
        )
            .into_response();
    };

    match action.as_str() {
        "getJson" => Json(state.gateway.all_tags_json()).into_response(),
        "listTags" => Json(state.gateway.grouped_tags()).into_response(),
        "setTag" => {
            // Every non-action parameter is a tag=value pair
            let mut results = serde_json::Map::new();
            for (tag, raw) in params.iter().filter(|(k, _)| k.as_str() != "action") {
                let outcome = match raw.parse::<u16>() {
                    Ok(value) => match state.gateway.set_tag_by_name(tag, value) {
                        Ok(tag) => json!(tag.value),
                        Err(e) => json!({ "error": e.to_string() }),
                    },
                    Err(_) => json!({ "error": format!("Invalid value '{}'", raw) }),
                };
                results.insert(tag.clone(), outcome);
            }
            Json(serde_json::Value::Object(results)).into_response()
        }
        "stopServer" => {
            info!("Stop requested through the API");
            let _ = state.shutdown.send(true);
            (StatusCode::OK, "Close").into_response()
        }
        other => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("Unknown action '{}'", other) })),
        )
            .into_response(),
    }
}

/// HTTP server over the gateway.
pub struct HttpServer {
    gateway: Arc<TagGateway>,
    listen_addr: SocketAddr,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl HttpServer {
    pub fn new(
        gateway: Arc<TagGateway>,
        listen_addr: SocketAddr,
        shutdown_tx: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            gateway,
            listen_addr,
            shutdown_tx,
        }
    }

    /// Build the router without binding, for tests.
    pub fn router(gateway: Arc<TagGateway>, shutdown_tx: Arc<watch::Sender<bool>>) -> Router {
        create_router(gateway, shutdown_tx)
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.gateway, self.shutdown_tx);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(addr = %self.listen_addr, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
