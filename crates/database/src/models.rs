//! Database models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user in the system, identified by a UUID.
///
/// A user is "activated" once both `activated_at` and `expires_at` are set;
/// until then the row only carries an identity (phone number) and whatever
/// profile fields the user has submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    /// UUID string.
    pub id: String,
    /// Login phone number; unique when present.
    pub phone_number: Option<String>,
    /// One-time login code, cleared after a successful login.
    pub verification_code: Option<String>,
    /// Expiry of the pending login code.
    pub verification_code_expires_at: Option<DateTime<Utc>>,
    /// Display name.
    pub name: String,
    /// "male", "female", or empty when not yet submitted.
    pub gender: String,
    /// Birth date, used for the fortune reading.
    pub birth_date: Option<DateTime<Utc>>,
    /// Traditional two-hour slot, pinyin ("zi" through "hai").
    pub birth_time: String,
    /// Free-text birth place.
    pub birth_place: String,
    /// The question the user first came with.
    pub initial_question: String,
    /// Opaque JSON blob (precomputed chart data, etc).
    pub metadata: Option<String>,
    /// Soft-disable flag; a disabled account cannot log in or chat.
    pub is_active: bool,
    /// When the entitlement was granted.
    pub activated_at: Option<DateTime<Utc>>,
    /// When the entitlement lapses.
    pub expires_at: Option<DateTime<Utc>>,
    /// Chat-turn quota for the current entitlement.
    pub max_conversations: i64,
    /// Chat turns consumed so far; only ever incremented.
    pub used_conversations: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single chat turn (user question or assistant answer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    /// UUID string.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// "user" or "assistant".
    pub role: String,
    /// Turn text.
    pub content: String,
    /// Whether the keyword classifier judged the turn on-topic.
    pub is_on_topic: bool,
    /// Creation timestamp; context assembly orders by this ascending.
    pub created_at: DateTime<Utc>,
}

/// An allow-list row granting free auto-activation to a phone number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ActivationEntry {
    /// UUID string.
    pub id: String,
    /// Allow-listed phone number.
    pub phone_number: String,
    /// Who added the entry.
    pub activated_by: Option<String>,
    /// Free-text notes.
    pub notes: Option<String>,
    /// Entries can be switched off without being deleted.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A payment order; the source of truth mapping a vendor callback
/// back to the user it pays for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    /// Order number (TJG-prefixed).
    pub id: String,
    /// Paying user.
    pub user_id: String,
    /// Plan purchased ("weekly" or "yearly").
    pub plan_id: String,
    /// Price in fen (1/100 yuan).
    pub amount_cents: i64,
    /// "alipay" or "wechat".
    pub payment_method: String,
    /// "pending", "paid", or "failed".
    pub status: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When the vendor confirmed payment.
    pub paid_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Status value for a freshly created order.
    pub const PENDING: &'static str = "pending";
    /// Status value after a verified successful callback.
    pub const PAID: &'static str = "paid";
    /// Status value after a verified failed callback.
    pub const FAILED: &'static str = "failed";
}
