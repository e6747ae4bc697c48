//! Axum router and all HTTP handlers for sld-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers so the scenario tests in `tests/` can drive the bare
//! router.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use sld_runtime::ServiceError;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::{
    api_types::{ErrorResponse, HealthResponse, OrdersResponse, PlaceOrderRequest},
    state::{uptime_secs, AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/orders", get(list_orders).post(place_order))
        .route("/v1/orders/pending", get(list_pending))
        .route("/v1/orders/:id", get(get_order))
        .route("/v1/orders/:id/cancel", post(cancel_order))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn error_response(err: ServiceError) -> Response {
    let (status, code) = match &err {
        ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
        ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        ServiceError::NotPending { .. } => (StatusCode::CONFLICT, "not_pending"),
        ServiceError::Engine(_) => (StatusCode::CONFLICT, "conflict"),
        ServiceError::Startup(_) | ServiceError::Repository(_) => {
            warn!(error = %err, "request failed on storage");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };
    (
        status,
        Json(ErrorResponse {
            code: code.to_string(),
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            uptime_secs: uptime_secs(),
            running_instances: st.orders.engine().running().await,
        }),
    )
}

// ---------------------------------------------------------------------------
// /v1/orders
// ---------------------------------------------------------------------------

pub(crate) async fn place_order(
    State(st): State<Arc<AppState>>,
    Json(req): Json<PlaceOrderRequest>,
) -> Response {
    match st.orders.place(req.into()).await {
        Ok(order) => (StatusCode::CREATED, Json(order)).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn list_orders(State(st): State<Arc<AppState>>) -> Response {
    match st.orders.list_all().await {
        Ok(orders) => (StatusCode::OK, Json(OrdersResponse { orders })).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn list_pending(State(st): State<Arc<AppState>>) -> Response {
    match st.orders.list_pending().await {
        Ok(orders) => (StatusCode::OK, Json(OrdersResponse { orders })).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn get_order(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match st.orders.get(&id).await {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn cancel_order(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match st.orders.cancel(&id).await {
        Ok(order) => (StatusCode::OK, Json(order)).into_response(),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Order(_) => "order",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
