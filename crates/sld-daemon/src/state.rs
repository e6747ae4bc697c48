//! Shared runtime state for sld-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The order service owns
//! the instances; this module only relays its update feed onto the SSE bus.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sld_runtime::OrderService;
use sld_schemas::OrderUpdate;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Order(OrderUpdate),
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub orders: OrderService,
}

impl AppState {
    pub fn new(orders: OrderService) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "sld-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            orders,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Seconds since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    })
}

/// Forward every order update from the service onto the SSE bus.
///
/// Ends when the service's update channel closes.
pub fn spawn_update_relay(
    mut updates: broadcast::Receiver<OrderUpdate>,
    bus: broadcast::Sender<BusMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(u) => {
                    let _ = bus.send(BusMsg::Order(u));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "order update relay lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
