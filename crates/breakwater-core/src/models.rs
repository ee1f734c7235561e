//! Core domain models and strongly-typed identifiers.
//!
//! Defines webhook event records, payment transactions, bookings, and
//! newtype ID wrappers for compile-time type safety, together with the
//! database serialization glue.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed webhook event identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. Assigned when an
/// inbound delivery is first persisted; the provider's own event ID lives in
/// `source_event_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for EventId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for EventId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed payment transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// Creates a new random transaction ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TransactionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for TransactionId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for TransactionId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for TransactionId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed booking identifier.
///
/// Bookings are owned by the wider platform; this subsystem only touches
/// their payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(pub Uuid);

impl BookingId {
    /// Creates a new random booking ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for BookingId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for BookingId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for BookingId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for BookingId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Record of one inbound webhook delivery.
///
/// Created on first sight of an event, mutated once when processing
/// completes (success or terminal failure), never deleted by this
/// subsystem.
///
/// # Idempotency
///
/// `idempotency_key` carries a unique index. A second insert with the same
/// key fails with a duplicate-constraint violation, which the ingestion
/// path interprets as "already seen" rather than as an error.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEventRecord {
    /// Unique identifier for this delivery record.
    pub id: EventId,

    /// Provider that sent the webhook (e.g. "stripe").
    pub provider: String,

    /// Provider event type (e.g. "payment.succeeded").
    pub event_type: String,

    /// Provider-assigned event ID, used for natural deduplication.
    pub source_event_id: String,

    /// Derived deduplication key: `{provider}_{source_event_id}`.
    pub idempotency_key: String,

    /// Raw request body exactly as received.
    ///
    /// Kept byte-for-byte because the signature was computed over these
    /// bytes; re-serialization would invalidate it.
    pub payload: Vec<u8>,

    /// Signature header value as received.
    pub signature: String,

    /// When processing completed successfully.
    pub processed_at: Option<DateTime<Utc>>,

    /// Last processing failure, if any.
    pub processing_error: Option<String>,

    /// Number of failed processing runs for this event.
    pub retry_count: i32,

    /// When the delivery was first recorded.
    pub created_at: DateTime<Utc>,
}

impl WebhookEventRecord {
    /// Creates a record for a freshly received delivery.
    pub fn new(
        provider: String,
        event_type: String,
        source_event_id: String,
        payload: Vec<u8>,
        signature: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        let idempotency_key = format!("{provider}_{source_event_id}");

        Self {
            id: EventId::new(),
            provider,
            event_type,
            source_event_id,
            idempotency_key,
            payload,
            signature,
            processed_at: None,
            processing_error: None,
            retry_count: 0,
            created_at,
        }
    }
}

/// Terminal state of a recorded payment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Payment captured successfully.
    Succeeded,
    /// Payment attempt failed.
    Failed,
    /// Previously captured payment was refunded.
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Refunded => write!(f, "refunded"),
        }
    }
}

impl sqlx::Type<PgDb> for PaymentStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for PaymentStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            _ => Err(format!("invalid payment status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for PaymentStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Durable side effect created by processing a payment event.
///
/// `idempotency_key` mirrors the originating event's key and carries a
/// unique index, guaranteeing at most one transaction row per external
/// event regardless of how many times the provider re-delivers it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentTransaction {
    /// Unique identifier for this transaction record.
    pub id: TransactionId,

    /// Payment provider name.
    pub provider: String,

    /// Provider-side object ID (e.g. a payment intent ID).
    pub external_id: String,

    /// Deduplication key mirroring the originating event's key.
    pub idempotency_key: String,

    /// Amount in the currency's minor unit.
    pub amount_cents: i64,

    /// ISO 4217 currency code, lowercase.
    pub currency: String,

    /// Current status of the payment.
    pub status: PaymentStatus,

    /// Booking this payment settles, when the provider supplied one.
    pub booking_id: Option<BookingId>,

    /// When this record was created.
    pub created_at: DateTime<Utc>,

    /// When this record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Payment lifecycle of a booking, as visible to this subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingPaymentState {
    /// Awaiting payment.
    Pending,
    /// Paid in full.
    Paid,
    /// Last payment attempt failed.
    Failed,
    /// Payment was refunded.
    Refunded,
}

impl fmt::Display for BookingPaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Paid => write!(f, "paid"),
            Self::Failed => write!(f, "failed"),
            Self::Refunded => write!(f, "refunded"),
        }
    }
}

impl sqlx::Type<PgDb> for BookingPaymentState {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for BookingPaymentState {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            _ => Err(format!("invalid booking payment state: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for BookingPaymentState {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// Minimal view of a booking.
///
/// The wider platform owns bookings; Breakwater reads and writes only the
/// payment status.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Booking {
    /// Unique identifier for this booking.
    pub id: BookingId,

    /// Current payment state.
    pub payment_status: BookingPaymentState,

    /// When this booking was created.
    pub created_at: DateTime<Utc>,

    /// When this booking was last updated.
    pub updated_at: DateTime<Utc>,
}
