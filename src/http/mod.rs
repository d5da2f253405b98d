/**
 * HTTP transport: SSE streams per watched kind, health, CORS
 */
pub mod wire;

pub use wire::EventFormat;

use crate::error::Error;
use crate::k8s::relay::WatchKind;
use crate::k8s::relay::config::KEEP_ALIVE_SECONDS;
use crate::relay_service::RelayService;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use k8s_openapi::serde_json::{Map, Value, json};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AppState {
    pub relay: RelayService,
    pub format: EventFormat,
}

/// Build the application router
pub fn router(relay: RelayService, format: EventFormat, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/deployments", get(deployments))
        .route("/watch/{kind}", get(watch_kind))
        .route("/healthz", get(healthz))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { relay, format })
}

/// CORS for the given origins; empty or `*` allows any origin
#[must_use]
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET]);
    if allowed_origins.is_empty() || allowed_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("⚠️  Ignoring invalid allowed origin {:?}: {}", origin, e);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn deployments(State(state): State<AppState>) -> Response {
    stream_kind(&state, WatchKind::Deployments)
}

async fn watch_kind(State(state): State<AppState>, Path(kind): Path<String>) -> Response {
    match kind.parse::<WatchKind>() {
        Ok(kind) => stream_kind(&state, kind),
        Err(Error::UnknownKind(name)) => {
            (StatusCode::NOT_FOUND, format!("unknown workload kind: {name}")).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

fn stream_kind(state: &AppState, kind: WatchKind) -> Response {
    let session = match state.relay.open_session(kind) {
        Ok(session) => session,
        Err(Error::UnknownKind(kind)) => {
            return (StatusCode::NOT_FOUND, format!("{kind} is not being watched")).into_response();
        }
        Err(e) => return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    };

    info!("🔌 Client subscribed to {} ({})", kind, session.id());
    let format = state.format;
    let events = session.map(move |event| format.encode(&event).map(|payload| Event::default().data(payload)));

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECONDS)))
        .into_response()
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let kinds: Map<String, Value> = state
        .relay
        .kinds()
        .into_iter()
        .map(|kind| {
            (
                kind.to_string(),
                json!({
                    "subscribers": state.relay.subscriber_count(kind),
                    "objects": state.relay.object_count(kind),
                }),
            )
        })
        .collect();

    Json(json!({ "status": "ok", "kinds": kinds }))
}
