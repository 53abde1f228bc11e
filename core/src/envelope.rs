//! Wire envelope for events on the durable stream.
//!
//! The envelope is the event's own JSON object with one extra top-level
//! field, `correlationId`, assigned by the publisher. Consumers strip the
//! field and re-validate the remainder, so anything that reaches the
//! processor satisfies the same schema as the ingestion boundary.

use crate::event::Event;
use crate::validation::{EventValidator, ValidationError};
use serde_json::Value;
use thiserror::Error;

/// Top-level key carrying the correlation id.
pub const CORRELATION_ID_FIELD: &str = "correlationId";

/// Errors decoding or encoding an envelope.
#[derive(Error, Debug, Clone)]
pub enum EnvelopeError {
    /// Payload is not JSON.
    #[error("payload is not valid JSON: {0}")]
    Json(String),

    /// Payload has no string `correlationId`.
    #[error("payload has no correlationId")]
    MissingCorrelationId,

    /// Remaining payload is not a valid event.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Event could not be serialized.
    #[error("failed to encode event: {0}")]
    Encode(String),
}

/// An event plus the correlation id it travels with.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Correlation id assigned at publish time.
    pub correlation_id: String,
    /// The event.
    pub event: Event,
}

impl EventEnvelope {
    /// Wrap an event.
    #[must_use]
    pub fn new(event: Event, correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            event,
        }
    }

    /// Serialize to the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if the event cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        encode(&self.event, &self.correlation_id)
    }

    /// Parse and validate a wire payload.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is not JSON, lacks a correlation
    /// id, or does not validate as an event.
    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let mut value: Value =
            serde_json::from_slice(payload).map_err(|e| EnvelopeError::Json(e.to_string()))?;

        let correlation_id = match value
            .as_object_mut()
            .and_then(|object| object.remove(CORRELATION_ID_FIELD))
        {
            Some(Value::String(id)) => id,
            _ => return Err(EnvelopeError::MissingCorrelationId),
        };

        let event = EventValidator::new().validate_one(&value)?;
        Ok(Self {
            correlation_id,
            event,
        })
    }
}

/// Serialize `event` with `correlation_id` attached, without cloning it.
///
/// # Errors
///
/// Returns [`EnvelopeError::Encode`] if the event cannot be serialized.
pub fn encode(event: &Event, correlation_id: &str) -> Result<Vec<u8>, EnvelopeError> {
    let mut value = serde_json::to_value(event).map_err(|e| EnvelopeError::Encode(e.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.insert(
            CORRELATION_ID_FIELD.to_string(),
            Value::String(correlation_id.to_string()),
        );
    }
    serde_json::to_vec(&value).map_err(|e| EnvelopeError::Encode(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_event() -> Value {
        json!({
            "eventId": "ttk_top_9",
            "timestamp": "2025-09-02T08:00:00Z",
            "source": "tiktok",
            "funnelStage": "top",
            "eventType": "like",
            "data": {
                "user": { "userId": "t9", "username": "viewer", "followers": 3 },
                "engagement": {
                    "watchTime": 12.5,
                    "percentageWatched": 80,
                    "device": "iOS",
                    "country": "DE",
                    "videoId": "vid_1"
                }
            }
        })
    }

    #[test]
    fn encode_then_decode_preserves_event_and_correlation() {
        let event = EventValidator::new()
            .validate_one(&raw_event())
            .expect("valid event");
        let bytes = encode(&event, "corr-1").expect("encodable");

        let wire: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(wire["correlationId"], "corr-1");
        assert_eq!(wire["eventId"], "ttk_top_9");

        let decoded = EventEnvelope::decode(&bytes).expect("decodable");
        assert_eq!(decoded.correlation_id, "corr-1");
        assert_eq!(decoded.event, event);
    }

    #[test]
    fn decode_requires_correlation_id() {
        let bytes = serde_json::to_vec(&raw_event()).expect("json");
        assert!(matches!(
            EventEnvelope::decode(&bytes),
            Err(EnvelopeError::MissingCorrelationId)
        ));
    }

    #[test]
    fn decode_rejects_garbage_and_invalid_events() {
        assert!(matches!(
            EventEnvelope::decode(b"{not json"),
            Err(EnvelopeError::Json(_))
        ));

        let mut raw = raw_event();
        raw["correlationId"] = json!("corr-2");
        raw["data"]["engagement"]["device"] = json!("Windows");
        let bytes = serde_json::to_vec(&raw).expect("json");
        assert!(matches!(
            EventEnvelope::decode(&bytes),
            Err(EnvelopeError::Invalid(_))
        ));
    }
}
