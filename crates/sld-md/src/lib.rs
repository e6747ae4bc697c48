//! sld-md
//!
//! Price stream gateway: turns one unreliable upstream websocket into an
//! ordered sequence of [`PriceEvent`]s on a bounded queue.
//!
//! - one live connection at a time, reconnecting with capped exponential
//!   backoff that resets after every successful connect
//! - undecodable messages are dropped and logged
//! - events are delivered in receipt order within a session; a full queue
//!   stalls the reader (backpressure)
//!
//! The gateway never writes to storage and knows nothing about orders.

pub mod backoff;
pub mod decode;
pub mod gateway;

pub use backoff::Backoff;
pub use decode::decode_price_event;
pub use gateway::{GatewayConfig, PriceStreamGateway};

pub use sld_schemas::PriceEvent;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("stream read failed: {0}")]
    Read(String),

    #[error("stream closed by peer")]
    Closed,

    #[error("undecodable price message: {0}")]
    Decode(String),
}
