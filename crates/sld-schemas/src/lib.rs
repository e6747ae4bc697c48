//! sld-schemas
//!
//! Shared wire and storage types for the stop-loss order lifecycle:
//! orders, their status, price events from the upstream stream, and the
//! handle used to address a live order instance.
//!
//! No I/O lives here. Every other crate in the workspace depends on this one.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

/// Persisted lifecycle status of a stop-loss order.
///
/// Legal transitions are `Pending -> Executed | Cancelled | Failed`.
/// Every status other than `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Executed,
    Cancelled,
    /// Execution retries were exhausted. **Terminal.**
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Executed => "EXECUTED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownStatus> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "EXECUTED" => Ok(OrderStatus::Executed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }

    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid order status: {0}")]
pub struct UnknownStatus(pub String);

// ---------------------------------------------------------------------------
// ExecutionHandle
// ---------------------------------------------------------------------------

/// Opaque address of a live order instance, used for signal delivery.
///
/// Written to the order row at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionHandle(String);

impl ExecutionHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The canonical handle for an order: `stop-loss-<order id>`.
    pub fn for_order(order_id: &str) -> Self {
        Self(format!("stop-loss-{order_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// A persisted stop-loss order row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub security: String,
    pub trigger_price: f64,
    pub quantity: i64,
    pub status: OrderStatus,
    pub placed_at: DateTime<Utc>,
    pub execution_handle: Option<ExecutionHandle>,
}

// ---------------------------------------------------------------------------
// NewOrder (intake)
// ---------------------------------------------------------------------------

/// Intake payload from the outer layer. The core assigns id, timestamp and
/// the initial `Pending` status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub security: String,
    pub trigger_price: f64,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderValidationError {
    #[error("security must not be empty")]
    EmptySecurity,
    #[error("trigger price must be a positive finite number, got {0}")]
    InvalidTriggerPrice(f64),
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i64),
}

impl NewOrder {
    pub fn validate(&self) -> Result<(), OrderValidationError> {
        if self.security.trim().is_empty() {
            return Err(OrderValidationError::EmptySecurity);
        }
        if !self.trigger_price.is_finite() || self.trigger_price <= 0.0 {
            return Err(OrderValidationError::InvalidTriggerPrice(self.trigger_price));
        }
        if self.quantity <= 0 {
            return Err(OrderValidationError::InvalidQuantity(self.quantity));
        }
        Ok(())
    }

    /// Validate and materialise a `Pending` order with a fresh UUID id.
    pub fn into_order(self, placed_at: DateTime<Utc>) -> Result<Order, OrderValidationError> {
        self.validate()?;
        Ok(Order {
            id: Uuid::new_v4().to_string(),
            security: self.security.trim().to_string(),
            trigger_price: self.trigger_price,
            quantity: self.quantity,
            status: OrderStatus::Pending,
            placed_at,
            execution_handle: None,
        })
    }
}

// ---------------------------------------------------------------------------
// PriceEvent
// ---------------------------------------------------------------------------

/// One price tick from the upstream stream. Ephemeral; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEvent {
    pub security: String,
    pub price: f64,
}

// ---------------------------------------------------------------------------
// OrderUpdate (status feed)
// ---------------------------------------------------------------------------

/// Published after every persisted status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub security: String,
    pub status: OrderStatus,
    pub ts_utc: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Retry classification
// ---------------------------------------------------------------------------

/// Implemented by error types that can tell a retry driver whether another
/// attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intake(security: &str, trigger_price: f64, quantity: i64) -> NewOrder {
        NewOrder {
            security: security.to_string(),
            trigger_price,
            quantity,
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            OrderStatus::Pending,
            OrderStatus::Executed,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
        ] {
            assert_eq!(OrderStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(OrderStatus::parse("pending").is_err());
    }

    #[test]
    fn only_pending_is_live() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Executed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
    }

    #[test]
    fn status_serializes_screaming() {
        let json = serde_json::to_string(&OrderStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
    }

    #[test]
    fn handle_is_derived_from_order_id() {
        let h = ExecutionHandle::for_order("abc");
        assert_eq!(h.as_str(), "stop-loss-abc");
        assert_eq!(serde_json::to_string(&h).unwrap(), "\"stop-loss-abc\"");
    }

    #[test]
    fn intake_rejects_bad_fields() {
        assert_eq!(
            intake("  ", 10.0, 1).validate(),
            Err(OrderValidationError::EmptySecurity)
        );
        assert!(matches!(
            intake("AAPL", 0.0, 1).validate(),
            Err(OrderValidationError::InvalidTriggerPrice(_))
        ));
        assert!(matches!(
            intake("AAPL", f64::NAN, 1).validate(),
            Err(OrderValidationError::InvalidTriggerPrice(_))
        ));
        assert_eq!(
            intake("AAPL", 149.0, 0).validate(),
            Err(OrderValidationError::InvalidQuantity(0))
        );
    }

    #[test]
    fn into_order_starts_pending_without_handle() {
        let now = Utc::now();
        let o = intake(" AAPL ", 149.0, 10).into_order(now).unwrap();
        assert_eq!(o.security, "AAPL");
        assert_eq!(o.status, OrderStatus::Pending);
        assert_eq!(o.placed_at, now);
        assert!(o.execution_handle.is_none());
        assert!(Uuid::parse_str(&o.id).is_ok());
    }
}
