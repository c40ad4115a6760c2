//! Identifiers and small shared types used across every broker crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The reserved account id recorded against requests that could not be
/// dispatched to any real account.
pub const NO_ACCOUNT_ID: &str = "no-account";

/// Opaque account identifier. Stored as `TEXT` in the `accounts` table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(text: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(text).map(Self)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AccountId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Identifier for a row in the `requests` table. Auto-assigned by storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub i64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a pending OAuth flow session, not an account.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Default provider quota tier when none is given explicitly.
pub const DEFAULT_TIER: i32 = 1;

/// Default priority assigned to a newly added account (lower = higher priority).
pub const DEFAULT_PRIORITY: i32 = 50;

/// Default session window: 5 hours, in milliseconds.
pub const DEFAULT_SESSION_WINDOW_MS: i64 = 5 * 60 * 60 * 1000;

/// The two mutually exclusive credential shapes an [`Account`] may hold.
///
/// Exactly one variant is ever populated for a given account: either an
/// `api_key` or a `refresh_token`, never both, never neither.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialShape {
    ApiKey {
        api_key: String,
    },
    OAuth {
        refresh_token: String,
        access_token: String,
        /// Epoch milliseconds.
        expires_at: i64,
    },
}

/// Runtime, in-memory view of a durable account row. The account repository
/// (`broker-storage`) owns the persisted form; this value type is what
/// flows through the load balancer, token manager, and dispatcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub provider: String,
    pub credential: CredentialShape,
    pub priority: i32,
    pub paused: bool,
    pub tier: i32,
    pub custom_endpoint: Option<String>,
    pub model_mappings: Option<std::collections::HashMap<String, String>>,
    pub request_count: i64,
    pub total_requests: i64,
    pub session_request_count: i64,
    /// Epoch milliseconds.
    pub session_start: Option<i64>,
    /// Epoch milliseconds.
    pub rate_limited_until: Option<i64>,
    /// Epoch milliseconds.
    pub last_used_at: Option<i64>,
    pub last_error: Option<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
}

impl Account {
    /// True iff this account is eligible for candidate ranking: not
    /// paused, not marked `reauth_required`, and not currently within a
    /// rate-limit cooldown window. Says nothing about access token
    /// expiry — a healthy account can still hold an expired token, and
    /// that gets handled separately, by the token manager's refresh path.
    pub fn is_healthy(&self, now_ms: i64) -> bool {
        !self.paused
            && self.last_error.as_deref() != Some("reauth_required")
            && !self.is_rate_limited(now_ms)
    }

    pub fn is_rate_limited(&self, now_ms: i64) -> bool {
        matches!(self.rate_limited_until, Some(until) if until > now_ms)
    }
}

/// One row of the `requests` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: Option<RequestId>,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub method: String,
    pub path: String,
    /// Textual account id, or [`NO_ACCOUNT_ID`] when no candidate existed.
    pub account_id: String,
    pub status_code: Option<i32>,
    pub response_time_ms: Option<i64>,
    pub error: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub cache_read_input_tokens: Option<i64>,
    pub cache_creation_input_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cost_usd: Option<f64>,
    pub model: Option<String>,
}

impl RequestRecord {
    pub fn new(timestamp_ms: i64, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp: timestamp_ms,
            method: method.into(),
            path: path.into(),
            account_id: NO_ACCOUNT_ID.to_string(),
            status_code: None,
            response_time_ms: None,
            error: None,
            input_tokens: None,
            output_tokens: None,
            cache_read_input_tokens: None,
            cache_creation_input_tokens: None,
            total_tokens: None,
            cost_usd: None,
            model: None,
        }
    }
}
