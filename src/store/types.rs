//! Store data types
//!
//! Conversation messages, the on-disk/on-wire envelopes, and the tagged
//! results store operations return.

use crate::error::{Error, Result};
use crate::profile::candidate::parse_timestamp;
use crate::profile::field::deserialize_timestamp;
use crate::profile::migrate::{is_legacy, migrate_legacy};
use crate::profile::Profile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Who produced a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// One entry of a user's append-only conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    /// Create a message stamped with the current time
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            role,
            content: content.into(),
        }
    }
}

/// Stable sort by timestamp; equal timestamps keep append order.
pub fn sort_messages(messages: &mut [ConversationMessage]) {
    messages.sort_by_key(|m| m.timestamp);
}

/// Profile snapshot with its metadata envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEnvelope {
    pub user_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub last_updated: DateTime<Utc>,
    pub profile: Profile,
}

impl ProfileEnvelope {
    /// Decode a stored profile document.
    ///
    /// Accepts the current envelope, an envelope wrapping a legacy-layout
    /// profile, and a bare legacy profile. A missing or unreadable
    /// `last_updated` is taken as the Unix epoch so any dated snapshot
    /// outranks it.
    pub fn from_json(user_id: &str, value: Value) -> Result<Self> {
        let last_updated = value
            .get("last_updated")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or_default();

        let (body, stored_user) = match value.get("profile") {
            Some(body) => (body, value.get("user_id").and_then(Value::as_str)),
            None if is_legacy(&value) => (&value, None),
            None => {
                return Err(Error::Schema(
                    "profile document has no profile section".to_string(),
                ))
            }
        };

        let profile = if is_legacy(body) {
            tracing::info!("Migrating legacy profile layout for user {}", user_id);
            migrate_legacy(body)
        } else {
            Profile::deserialize(body)?
        };

        Ok(Self {
            user_id: stored_user.unwrap_or(user_id).to_string(),
            last_updated,
            profile,
        })
    }
}

/// Full conversation snapshot as sent to the primary backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEnvelope {
    pub user_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub last_updated: DateTime<Utc>,
    pub messages: Vec<ConversationMessage>,
}

/// Storage tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Remote memory service
    Primary,
    /// Filesystem cache
    Local,
}

/// Outcome of a write against one tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierStatus {
    /// Write recorded
    Stored,
    /// Tier not configured
    Disabled,
    /// Write failed with the given reason
    Failed(String),
}

impl TierStatus {
    pub fn is_stored(&self) -> bool {
        matches!(self, TierStatus::Stored)
    }
}

impl fmt::Display for TierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierStatus::Stored => write!(f, "stored"),
            TierStatus::Disabled => write!(f, "disabled"),
            TierStatus::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Per-tier result of a successful save.
///
/// A save succeeds when at least one tier stored the snapshot. When the
/// primary tier did not, the store is running degraded and callers may want
/// to log it, but they can keep operating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub primary: TierStatus,
    pub local: TierStatus,
}

impl SaveReport {
    /// True when a configured tier failed to store the snapshot
    pub fn is_degraded(&self) -> bool {
        matches!(self.primary, TierStatus::Failed(_)) || matches!(self.local, TierStatus::Failed(_))
    }
}

/// Result of a read that distinguishes "no data" from "could not tell".
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// A record was found. `tier` is where the served value came from
    /// (`Local` also when the cache held data the primary lacked);
    /// `degraded` is set when the primary tier failed and the value came
    /// from the fallback.
    Found { value: T, tier: Tier, degraded: bool },
    /// Neither tier has a record for the user
    NotFound { degraded: bool },
    /// Data integrity could not be established (local tier errored and the
    /// primary tier did not answer)
    Unavailable { reason: String },
}

impl<T> Lookup<T> {
    /// The found value, if any
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found { .. })
    }

    pub fn is_degraded(&self) -> bool {
        match self {
            Lookup::Found { degraded, .. } | Lookup::NotFound { degraded } => *degraded,
            Lookup::Unavailable { .. } => true,
        }
    }

    /// Transform the found value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found { value, tier, degraded } => Lookup::Found {
                value: f(value),
                tier,
                degraded,
            },
            Lookup::NotFound { degraded } => Lookup::NotFound { degraded },
            Lookup::Unavailable { reason } => Lookup::Unavailable { reason },
        }
    }
}
