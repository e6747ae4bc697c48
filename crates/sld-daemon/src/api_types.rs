//! Request and response types for the sld-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests and the CLI.  No business logic lives here.

use serde::{Deserialize, Serialize};
use sld_schemas::{NewOrder, Order};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Order instances currently listening for signals.
    pub running_instances: usize,
}

// ---------------------------------------------------------------------------
// /v1/orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub security: String,
    pub trigger_price: f64,
    pub quantity: i64,
}

impl From<PlaceOrderRequest> for NewOrder {
    fn from(r: PlaceOrderRequest) -> Self {
        NewOrder {
            security: r.security,
            trigger_price: r.trigger_price,
            quantity: r.quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersResponse {
    pub orders: Vec<Order>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// "validation" | "not_found" | "not_pending" | "conflict" | "unavailable"
    pub code: String,
    pub error: String,
}
