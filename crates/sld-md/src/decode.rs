use sld_schemas::PriceEvent;

use crate::StreamError;

/// Decode one upstream message: a JSON object `{"security": .., "price": ..}`.
///
/// Unknown fields are ignored. The security must be non-empty and the price
/// finite and positive.
pub fn decode_price_event(raw: &str) -> Result<PriceEvent, StreamError> {
    let ev: PriceEvent =
        serde_json::from_str(raw).map_err(|e| StreamError::Decode(e.to_string()))?;

    if ev.security.trim().is_empty() {
        return Err(StreamError::Decode("empty security".to_string()));
    }
    if !ev.price.is_finite() || ev.price <= 0.0 {
        return Err(StreamError::Decode(format!(
            "price must be positive, got {}",
            ev.price
        )));
    }
    Ok(PriceEvent {
        security: ev.security.trim().to_string(),
        price: ev.price,
    })
}
