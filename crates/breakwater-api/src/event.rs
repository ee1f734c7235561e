//! Provider event envelope parsing.
//!
//! Payment providers wrap the interesting object in an envelope of the
//! shape `{"id": ..., "type": ..., "data": {"object": {...}}}`. Some test
//! tooling and smaller providers send the fields flat at the top level,
//! so parsing falls back to the envelope root when `data.object` is
//! absent.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Errors from parsing an event envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventParseError {
    /// Body was not valid JSON.
    #[error("invalid JSON body: {0}")]
    Json(String),

    /// A required envelope field was absent.
    #[error("missing envelope field: {0}")]
    MissingField(&'static str),
}

/// A verified provider event, parsed from the raw body.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    /// Provider-assigned event ID (e.g. `evt_1`).
    pub id: String,
    /// Event type string driving handler dispatch.
    pub event_type: String,
    /// The wrapped payment object.
    pub object: Value,
}

/// Payment fields extracted from the event object.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentDetails {
    /// Provider-side object ID; falls back to the event ID when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Amount in the currency's minor unit.
    pub amount: i64,
    /// ISO 4217 currency code.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Caller-supplied metadata attached at payment creation.
    #[serde(default)]
    pub metadata: PaymentMetadata,
}

/// Metadata the platform attaches when creating a payment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentMetadata {
    /// Booking the payment settles.
    #[serde(default)]
    pub booking_id: Option<Uuid>,
}

fn default_currency() -> String {
    "usd".to_string()
}

impl PaymentEvent {
    /// Parses an event from the raw request body.
    ///
    /// # Errors
    ///
    /// Returns `EventParseError` for non-JSON bodies or envelopes missing
    /// `id` or `type`.
    pub fn parse(raw: &[u8]) -> Result<Self, EventParseError> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| EventParseError::Json(e.to_string()))?;

        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or(EventParseError::MissingField("id"))?
            .to_string();

        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EventParseError::MissingField("type"))?
            .to_string();

        let nested = value
            .get("data")
            .and_then(|d| d.get("object"))
            .filter(|object| object.is_object())
            .cloned();
        let object = nested.unwrap_or(value);

        Ok(Self { id, event_type, object })
    }

    /// Deserializes the payment fields from the event object.
    ///
    /// # Errors
    ///
    /// Returns `EventParseError::Json` when the object lacks required
    /// payment fields (e.g. `amount`).
    pub fn payment(&self) -> Result<PaymentDetails, EventParseError> {
        serde_json::from_value(self.object.clone()).map_err(|e| EventParseError::Json(e.to_string()))
    }
}
