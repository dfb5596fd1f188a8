//! Primary memory backend interface
//!
//! The primary tier is an external memory service addressed per user. It
//! stores opaque JSON documents and can answer free-text queries with the
//! documents it holds plus summaries it derived from them.
//!
//! ```text
//! ProfileStore ──memorize(doc, scope)──▶ MemoryBackend
//!              ◀──retrieve(query, scope)── { documents, records }
//! ```

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a stored document holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// A `ProfileEnvelope`
    Profile,
    /// A `ConversationEnvelope`
    Conversation,
}

/// A document sent to or returned by the memory service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    pub kind: DocumentKind,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub content: serde_json::Value,
}

impl MemoryDocument {
    pub fn new(kind: DocumentKind, user_id: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            kind,
            user_id: user_id.into(),
            created_at: Utc::now(),
            content,
        }
    }
}

/// Addressing for backend calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserScope {
    pub user_id: String,
    /// Agent identity the memories belong to, if the service partitions by agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl UserScope {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            agent_id: None,
        }
    }
}

/// A free-text memory item derived by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub summary: String,
    #[serde(default)]
    pub score: f64,
}

/// Answer to a retrieve call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrieveResult {
    #[serde(default)]
    pub documents: Vec<MemoryDocument>,
    #[serde(default)]
    pub records: Vec<MemoryRecord>,
}

impl RetrieveResult {
    /// Newest document of `kind` belonging to `user_id`
    pub fn newest(&self, kind: DocumentKind, user_id: &str) -> Option<&MemoryDocument> {
        self.documents
            .iter()
            .filter(|d| d.kind == kind && d.user_id == user_id)
            .max_by_key(|d| d.created_at)
    }
}

/// Acknowledgement of a memorize call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorizeAck {
    /// Service-side identifier (task or document id)
    pub id: String,
}

/// Pluggable primary tier.
///
/// Implementations must be safe to share across tasks; `ProfileStore` holds
/// one behind an `Arc`.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Store a document for the scoped user
    async fn memorize(&self, document: MemoryDocument, scope: &UserScope) -> Result<MemorizeAck>;

    /// Search the scoped user's memories
    async fn retrieve(&self, query: &str, scope: &UserScope) -> Result<RetrieveResult>;

    /// Readiness probe
    async fn health(&self) -> Result<()>;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}
