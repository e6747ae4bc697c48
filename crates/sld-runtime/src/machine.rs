//! Order state machine.
//!
//! # Design
//!
//! Explicit, I/O-free state for one stop-loss order. The instance loop asks
//! the machine what a signal means ([`OrderMachine::on_price`],
//! [`OrderMachine::on_cancel`]) and reports what actually happened in
//! storage through [`OrderMachine::apply`]. The machine can be rebuilt from a
//! persisted row at any time ([`OrderMachine::rehydrate`]), so nothing about
//! an order's progress lives only in memory.
//!
//! ```text
//!   Pending ──PriceAccepted──► Triggering ──ExecutionSucceeded──► Executed
//!      │                           │
//!      │                           └──────ExecutionFailed───────► Failed
//!      │
//!      └──────────Cancelled (also from Triggering)──────────────► Cancelled
//! ```
//!
//! `Triggering` is never persisted; a crash while triggering rehydrates as
//! `Pending`.

use sld_schemas::{Order, OrderStatus, PriceEvent};

// ---------------------------------------------------------------------------
// MachineState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineState {
    Pending,
    /// A qualifying price was accepted and execution is in flight.
    Triggering,
    Executed,
    Cancelled,
    Failed,
}

impl MachineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Cancelled | Self::Failed)
    }

    fn from_status(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Pending => Self::Pending,
            OrderStatus::Executed => Self::Executed,
            OrderStatus::Cancelled => Self::Cancelled,
            OrderStatus::Failed => Self::Failed,
        }
    }
}

// ---------------------------------------------------------------------------
// Events and decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineEvent {
    PriceAccepted,
    ExecutionSucceeded,
    /// Execution gave up and `Failed` was persisted.
    ExecutionFailed,
    /// `Cancelled` was persisted (by this instance or by the cancel path).
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OtherSecurity,
    AboveTrigger,
    NotPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceDecision {
    Ignore(IgnoreReason),
    Trigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDecision {
    Ignore,
    PersistCancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: MachineState,
    pub event: MachineEvent,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal order transition: {:?} + {:?}",
            self.from, self.event
        )
    }
}

impl std::error::Error for TransitionError {}

// ---------------------------------------------------------------------------
// OrderMachine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrderMachine {
    pub order_id: String,
    pub security: String,
    pub trigger_price: f64,
    pub quantity: i64,
    state: MachineState,
}

impl OrderMachine {
    /// Rebuild from a persisted row.
    pub fn rehydrate(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            security: order.security.clone(),
            trigger_price: order.trigger_price,
            quantity: order.quantity,
            state: MachineState::from_status(order.status),
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn on_price(&self, ev: &PriceEvent) -> PriceDecision {
        if ev.security != self.security {
            return PriceDecision::Ignore(IgnoreReason::OtherSecurity);
        }
        if self.state != MachineState::Pending {
            return PriceDecision::Ignore(IgnoreReason::NotPending);
        }
        if ev.price <= self.trigger_price {
            PriceDecision::Trigger
        } else {
            PriceDecision::Ignore(IgnoreReason::AboveTrigger)
        }
    }

    pub fn on_cancel(&self) -> CancelDecision {
        if self.is_terminal() {
            CancelDecision::Ignore
        } else {
            CancelDecision::PersistCancel
        }
    }

    /// Adopt a status read from storage. Storage wins: a terminal persisted
    /// status overrides whatever the machine believed. A persisted `Pending`
    /// leaves the in-memory state alone.
    pub fn observe(&mut self, status: OrderStatus) {
        if status.is_terminal() {
            self.state = MachineState::from_status(status);
        }
    }

    pub fn apply(&mut self, event: MachineEvent) -> Result<(), TransitionError> {
        use MachineState::*;

        self.state = match (self.state, event) {
            (Pending, MachineEvent::PriceAccepted) => Triggering,
            (Triggering, MachineEvent::ExecutionSucceeded) => Executed,
            (Triggering, MachineEvent::ExecutionFailed) => Failed,
            (Pending | Triggering, MachineEvent::Cancelled) => Cancelled,
            (from, event) => return Err(TransitionError { from, event }),
        };
        Ok(())
    }
}
