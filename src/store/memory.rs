//! Process-local memory backend
//!
//! Keeps the newest memorized document of each kind per user in a
//! `tokio::sync::RwLock` map; readers only ever want the newest snapshot,
//! so older ones are replaced. Useful when embedding the store without a memory service and as
//! the primary tier in tests, where `set_offline` simulates an outage.

use super::backend::{
    DocumentKind, MemorizeAck, MemoryBackend, MemoryDocument, MemoryRecord, RetrieveResult,
    UserScope,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory primary tier
pub struct InMemoryBackend {
    documents: Arc<RwLock<HashMap<String, Vec<MemoryDocument>>>>,
    offline: AtomicBool,
}

impl InMemoryBackend {
    /// Create a new empty backend
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every call fail with `Error::Backend` until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of documents held for a user (at most one per kind)
    pub async fn document_count(&self, user_id: &str) -> usize {
        self.documents
            .read()
            .await
            .get(user_id)
            .map_or(0, Vec::len)
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Backend("in-memory backend is offline".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Conversation messages whose text mentions the query
fn matching_records(docs: &[MemoryDocument], query: &str) -> Vec<MemoryRecord> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    let Some(latest) = docs
        .iter()
        .filter(|d| d.kind == DocumentKind::Conversation)
        .max_by_key(|d| d.created_at)
    else {
        return Vec::new();
    };

    latest
        .content
        .get("messages")
        .and_then(|m| m.as_array())
        .into_iter()
        .flatten()
        .filter_map(|m| m.get("content").and_then(|c| c.as_str()))
        .filter(|text| text.to_lowercase().contains(&needle))
        .map(|text| MemoryRecord {
            summary: text.to_string(),
            score: 1.0,
        })
        .collect()
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    async fn memorize(&self, document: MemoryDocument, scope: &UserScope) -> Result<MemorizeAck> {
        self.ensure_online()?;
        let mut documents = self.documents.write().await;
        let user_docs = documents.entry(scope.user_id.clone()).or_default();
        match user_docs.iter_mut().find(|d| d.kind == document.kind) {
            Some(existing) if existing.created_at > document.created_at => {
                tracing::debug!(
                    "Ignoring {:?} snapshot for {} older than the stored one",
                    document.kind,
                    scope.user_id
                );
            }
            Some(existing) => *existing = document,
            None => user_docs.push(document),
        }
        Ok(MemorizeAck {
            id: Uuid::new_v4().to_string(),
        })
    }

    async fn retrieve(&self, query: &str, scope: &UserScope) -> Result<RetrieveResult> {
        self.ensure_online()?;
        let docs = self.documents.read().await;
        let Some(user_docs) = docs.get(&scope.user_id) else {
            return Ok(RetrieveResult::default());
        };
        Ok(RetrieveResult {
            documents: user_docs.clone(),
            records: matching_records(user_docs, query),
        })
    }

    async fn health(&self) -> Result<()> {
        self.ensure_online()
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
