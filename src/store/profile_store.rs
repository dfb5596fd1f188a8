//! Dual-tier profile and conversation store
//!
//! Writes go to the primary memory backend first and are always written
//! through to the local cache. Reads ask the primary tier and fall back to
//! the cache when it has no document or fails. A failure of one tier
//! degrades the store (logged, reported in the result) but only a failure of
//! every configured tier is an error.
//!
//! After an outage the tiers can disagree: writes made while the primary
//! was down only reached the cache. Reads therefore consult both tiers when
//! both answer. The newer profile envelope wins, and conversation logs are
//! combined so no message held by either tier is dropped.
//!
//! Callers must not issue concurrent writes for the same user:
//! `append_message` is a read-modify-write of the whole log.

use super::backend::{DocumentKind, MemoryBackend, MemoryDocument, RetrieveResult, UserScope};
use super::cache::{cache_key, LocalCache};
use super::http::HttpBackend;
use super::types::{
    sort_messages, ConversationEnvelope, ConversationMessage, Lookup, ProfileEnvelope, Role,
    SaveReport, Tier, TierStatus,
};
use crate::config::ProfileMemoryConfig;
use crate::error::{Error, Result};
use crate::profile::Profile;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// What the primary tier said about a read
enum PrimaryRead<T> {
    Hit(T),
    /// Answered, but holds no document for the user
    Miss,
    Failed(String),
    Disabled,
}

/// Combine the primary answer with the local read (`None` = no cache tier).
///
/// When both tiers hold a value, `reconcile(primary, local)` picks what is
/// served and the tier it is attributed to.
fn resolve<T>(
    user_id: &str,
    what: &str,
    primary: PrimaryRead<T>,
    local: Option<Result<Option<T>>>,
    reconcile: impl FnOnce(T, T) -> (T, Tier),
) -> Lookup<T> {
    let (answered, primary_error) = match primary {
        PrimaryRead::Hit(value) => {
            let (value, tier) = match local {
                Some(Ok(Some(cached))) => reconcile(value, cached),
                Some(Err(e)) => {
                    tracing::warn!("Local {} for {} unreadable, using primary: {}", what, user_id, e);
                    (value, Tier::Primary)
                }
                _ => (value, Tier::Primary),
            };
            return Lookup::Found {
                value,
                tier,
                degraded: false,
            };
        }
        PrimaryRead::Miss => (true, None),
        PrimaryRead::Failed(reason) => (false, Some(reason)),
        PrimaryRead::Disabled => (false, None),
    };
    let degraded = primary_error.is_some();

    match local {
        Some(Ok(Some(value))) => {
            if degraded {
                tracing::warn!("Serving {} for {} from local cache (primary unavailable)", what, user_id);
            }
            Lookup::Found {
                value,
                tier: Tier::Local,
                degraded,
            }
        }
        Some(Ok(None)) => Lookup::NotFound { degraded },
        Some(Err(e)) if answered => {
            tracing::warn!("Local {} for {} unreadable: {}", what, user_id, e);
            Lookup::NotFound { degraded: true }
        }
        Some(Err(e)) => {
            let reason = match primary_error {
                Some(p) => format!("primary: {}; local: {}", p, e),
                None => format!("local: {}", e),
            };
            tracing::error!("Cannot load {} for {}: {}", what, user_id, reason);
            Lookup::Unavailable { reason }
        }
        None => match primary_error {
            Some(p) => Lookup::Unavailable {
                reason: format!("primary: {}", p),
            },
            None => Lookup::NotFound { degraded: false },
        },
    }
}

fn tier_status(result: Result<()>) -> TierStatus {
    match result {
        Ok(()) => TierStatus::Stored,
        Err(e) => TierStatus::Failed(e.to_string()),
    }
}

/// The newer of two profile snapshots; ties go to the primary tier.
fn newer_profile(primary: ProfileEnvelope, local: ProfileEnvelope) -> (ProfileEnvelope, Tier) {
    if local.last_updated > primary.last_updated {
        tracing::info!(
            "Local profile for {} is newer than the primary copy ({} > {})",
            local.user_id,
            local.last_updated,
            primary.last_updated
        );
        (local, Tier::Local)
    } else {
        (primary, Tier::Primary)
    }
}

/// The primary log plus every message only the local log holds.
///
/// Messages are matched by timestamp, role and content, counting
/// duplicates, so a message present in both logs appears once per copy.
fn union_logs(
    mut primary: Vec<ConversationMessage>,
    local: Vec<ConversationMessage>,
) -> (Vec<ConversationMessage>, Tier) {
    let mut seen: HashMap<(DateTime<Utc>, Role, &str), usize> = HashMap::new();
    for message in &primary {
        *seen
            .entry((message.timestamp, message.role, message.content.as_str()))
            .or_default() += 1;
    }

    let mut local_only = Vec::new();
    for message in &local {
        match seen.get_mut(&(message.timestamp, message.role, message.content.as_str())) {
            Some(count) if *count > 0 => *count -= 1,
            _ => local_only.push(message.clone()),
        }
    }
    drop(seen);

    if local_only.is_empty() {
        return (primary, Tier::Primary);
    }
    tracing::info!(
        "Recovered {} message(s) held only by the local cache",
        local_only.len()
    );
    primary.extend(local_only);
    (primary, Tier::Local)
}

fn decode_conversation(content: Value) -> Result<Vec<ConversationMessage>> {
    if content.is_array() {
        return Ok(serde_json::from_value(content)?);
    }
    let envelope: ConversationEnvelope = serde_json::from_value(content)?;
    Ok(envelope.messages)
}

/// Profile and conversation store over a primary backend and a local cache
pub struct ProfileStore {
    primary: Option<Arc<dyn MemoryBackend>>,
    cache: Option<LocalCache>,
    profile_query: String,
    conversation_query: String,
    default_limit: usize,
}

/// Builder for [`ProfileStore`]
pub struct ProfileStoreBuilder {
    primary: Option<Arc<dyn MemoryBackend>>,
    cache_dir: Option<PathBuf>,
    profile_query: String,
    conversation_query: String,
    default_limit: usize,
}

impl Default for ProfileStoreBuilder {
    fn default() -> Self {
        let backend = crate::config::BackendConfig::default();
        Self {
            primary: None,
            cache_dir: None,
            profile_query: backend.profile_query,
            conversation_query: backend.conversation_query,
            default_limit: crate::config::ConversationConfig::default().default_limit,
        }
    }
}

impl ProfileStoreBuilder {
    /// Use `backend` as the primary tier
    pub fn primary(mut self, backend: Arc<dyn MemoryBackend>) -> Self {
        self.primary = Some(backend);
        self
    }

    /// Enable the local cache tier under `dir`
    pub fn local_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn profile_query(mut self, query: impl Into<String>) -> Self {
        self.profile_query = query.into();
        self
    }

    pub fn conversation_query(mut self, query: impl Into<String>) -> Self {
        self.conversation_query = query.into();
        self
    }

    /// Number of messages `history` returns when no limit is given
    pub fn default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn build(self) -> Result<ProfileStore> {
        if self.primary.is_none() && self.cache_dir.is_none() {
            return Err(Error::Config(
                "a profile store needs a primary backend or a local cache".to_string(),
            ));
        }
        Ok(ProfileStore {
            primary: self.primary,
            cache: self.cache_dir.map(LocalCache::new),
            profile_query: self.profile_query,
            conversation_query: self.conversation_query,
            default_limit: self.default_limit,
        })
    }
}

impl ProfileStore {
    pub fn builder() -> ProfileStoreBuilder {
        ProfileStoreBuilder::default()
    }

    /// Build the store described by a configuration
    pub fn from_config(config: &ProfileMemoryConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::builder()
            .profile_query(config.backend.profile_query.clone())
            .conversation_query(config.backend.conversation_query.clone())
            .default_limit(config.conversation.default_limit);
        if config.backend.enabled {
            builder = builder.primary(Arc::new(HttpBackend::from_config(&config.backend)?));
        }
        if config.storage.local_cache {
            builder = builder.local_cache(config.storage.base_dir.clone());
        }
        builder.build()
    }

    /// Name of the primary backend, if any
    pub fn primary_name(&self) -> Option<&str> {
        self.primary.as_deref().map(|p| p.name())
    }

    /// The local cache tier, if enabled
    pub fn cache(&self) -> Option<&LocalCache> {
        self.cache.as_ref()
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    /// Persist a profile snapshot through both tiers
    pub async fn save_profile(&self, user_id: &str, profile: &Profile) -> Result<SaveReport> {
        cache_key(user_id)?;
        let envelope = ProfileEnvelope {
            user_id: user_id.to_string(),
            last_updated: Utc::now(),
            profile: profile.clone(),
        };
        let document = MemoryDocument {
            kind: DocumentKind::Profile,
            user_id: user_id.to_string(),
            created_at: envelope.last_updated,
            content: serde_json::to_value(&envelope)?,
        };

        let primary = self.memorize(user_id, document).await;
        let local = match &self.cache {
            Some(cache) => tier_status(cache.save_profile(&envelope).await),
            None => TierStatus::Disabled,
        };
        self.finish(user_id, "profile", SaveReport { primary, local })
    }

    /// Resolve a user's profile
    pub async fn load_profile(&self, user_id: &str) -> Lookup<Profile> {
        if let Err(e) = cache_key(user_id) {
            return Lookup::Unavailable {
                reason: e.to_string(),
            };
        }
        let primary = self.primary_profile(user_id).await;
        let local = match &self.cache {
            Some(cache) => Some(cache.load_profile(user_id).await),
            None => None,
        };
        resolve(user_id, "profile", primary, local, newer_profile).map(|env| env.profile)
    }

    async fn primary_profile(&self, user_id: &str) -> PrimaryRead<ProfileEnvelope> {
        let Some(primary) = &self.primary else {
            return PrimaryRead::Disabled;
        };
        let result = match primary
            .retrieve(&self.profile_query, &UserScope::user(user_id))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Primary backend {} failed to load profile for {}: {}", primary.name(), user_id, e);
                return PrimaryRead::Failed(e.to_string());
            }
        };
        let Some(doc) = result.newest(DocumentKind::Profile, user_id) else {
            return PrimaryRead::Miss;
        };
        match ProfileEnvelope::from_json(user_id, doc.content.clone()) {
            Ok(envelope) => PrimaryRead::Hit(envelope),
            Err(e) => {
                tracing::warn!("Primary backend returned an undecodable profile for {}: {}", user_id, e);
                PrimaryRead::Failed(format!("undecodable profile document: {}", e))
            }
        }
    }

    // ========================================================================
    // Conversations
    // ========================================================================

    /// Append one message to the user's log.
    ///
    /// The full log (both tiers combined) is read, extended and written back
    /// through both tiers, which also brings a recovered primary up to date
    /// with messages written during its outage. Refuses to write when the
    /// current log cannot be read, since writing would replace it.
    pub async fn append_message(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<SaveReport> {
        cache_key(user_id)?;
        let mut messages = match self.read_conversation(user_id).await {
            Lookup::Found { value, .. } => value,
            Lookup::NotFound { .. } => Vec::new(),
            Lookup::Unavailable { reason } => {
                return Err(Error::Persistence(format!(
                    "Conversation log for {} is unavailable, not appending: {}",
                    user_id, reason
                )))
            }
        };
        messages.push(ConversationMessage {
            timestamp: timestamp.unwrap_or_else(Utc::now),
            role,
            content: content.to_string(),
        });
        sort_messages(&mut messages);

        let envelope = ConversationEnvelope {
            user_id: user_id.to_string(),
            last_updated: Utc::now(),
            messages,
        };
        let document = MemoryDocument {
            kind: DocumentKind::Conversation,
            user_id: user_id.to_string(),
            created_at: envelope.last_updated,
            content: serde_json::to_value(&envelope)?,
        };

        let primary = self.memorize(user_id, document).await;
        let local = match &self.cache {
            Some(cache) => tier_status(cache.save_conversation(user_id, &envelope.messages).await),
            None => TierStatus::Disabled,
        };
        self.finish(user_id, "conversation", SaveReport { primary, local })
    }

    /// The oldest `limit` messages, in timestamp order
    pub async fn load_conversation(&self, user_id: &str, limit: usize) -> Lookup<Vec<ConversationMessage>> {
        self.read_conversation(user_id).await.map(|mut messages| {
            messages.truncate(limit);
            messages
        })
    }

    /// The newest `n` messages, oldest first
    pub async fn recent_messages(&self, user_id: &str, n: usize) -> Lookup<Vec<ConversationMessage>> {
        self.read_conversation(user_id).await.map(|mut messages| {
            let skip = messages.len().saturating_sub(n);
            messages.drain(..skip);
            messages
        })
    }

    /// Full log, sorted
    async fn read_conversation(&self, user_id: &str) -> Lookup<Vec<ConversationMessage>> {
        if let Err(e) = cache_key(user_id) {
            return Lookup::Unavailable {
                reason: e.to_string(),
            };
        }
        let primary = self.primary_conversation(user_id).await;
        let local = match &self.cache {
            Some(cache) => Some(cache.load_conversation(user_id).await),
            None => None,
        };
        resolve(user_id, "conversation", primary, local, union_logs).map(|mut messages| {
            sort_messages(&mut messages);
            messages
        })
    }

    async fn primary_conversation(&self, user_id: &str) -> PrimaryRead<Vec<ConversationMessage>> {
        let Some(primary) = &self.primary else {
            return PrimaryRead::Disabled;
        };
        let result = match primary
            .retrieve(&self.conversation_query, &UserScope::user(user_id))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Primary backend {} failed to load conversation for {}: {}", primary.name(), user_id, e);
                return PrimaryRead::Failed(e.to_string());
            }
        };
        let Some(doc) = result.newest(DocumentKind::Conversation, user_id) else {
            return PrimaryRead::Miss;
        };
        match decode_conversation(doc.content.clone()) {
            Ok(messages) => PrimaryRead::Hit(messages),
            Err(e) => {
                tracing::warn!("Primary backend returned an undecodable conversation for {}: {}", user_id, e);
                PrimaryRead::Failed(format!("undecodable conversation document: {}", e))
            }
        }
    }

    // ========================================================================
    // Retrieval and housekeeping
    // ========================================================================

    /// Free-text search over the user's memories in the primary tier.
    ///
    /// Empty when there is no primary tier or it fails.
    pub async fn recall(&self, user_id: &str, query: &str) -> RetrieveResult {
        let Some(primary) = &self.primary else {
            return RetrieveResult::default();
        };
        match primary.retrieve(query, &UserScope::user(user_id)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Recall for {} failed: {}", user_id, e);
                RetrieveResult::default()
            }
        }
    }

    /// True when the local cache holds anything for the user
    pub async fn user_exists(&self, user_id: &str) -> Result<bool> {
        match &self.cache {
            Some(cache) => cache.exists(user_id).await,
            None => Ok(false),
        }
    }

    /// Remove the user's profile and conversation from the local cache.
    ///
    /// The primary tier is not touched.
    pub async fn delete_user_data(&self, user_id: &str) -> Result<bool> {
        match &self.cache {
            Some(cache) => {
                let removed = cache.delete(user_id).await?;
                if removed {
                    tracing::info!("Deleted local data for {}", user_id);
                }
                Ok(removed)
            }
            None => Ok(false),
        }
    }

    /// Readiness of the primary tier; false when there is none
    pub async fn check_backend(&self) -> bool {
        match &self.primary {
            Some(primary) => match primary.health().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("Backend {} not ready: {}", primary.name(), e);
                    false
                }
            },
            None => false,
        }
    }

    async fn memorize(&self, user_id: &str, document: MemoryDocument) -> TierStatus {
        let Some(primary) = &self.primary else {
            return TierStatus::Disabled;
        };
        match primary.memorize(document, &UserScope::user(user_id)).await {
            Ok(ack) => {
                tracing::debug!("Backend {} stored document {} for {}", primary.name(), ack.id, user_id);
                TierStatus::Stored
            }
            Err(e) => {
                tracing::warn!("Backend {} failed to store document for {}: {}", primary.name(), user_id, e);
                TierStatus::Failed(e.to_string())
            }
        }
    }

    fn finish(&self, user_id: &str, what: &str, report: SaveReport) -> Result<SaveReport> {
        if !report.primary.is_stored() && !report.local.is_stored() {
            tracing::error!(
                "Failed to save {} for {}: primary {}, local {}",
                what,
                user_id,
                report.primary,
                report.local
            );
            return Err(Error::Persistence(format!(
                "no tier stored the {} for {} (primary {}, local {})",
                what, user_id, report.primary, report.local
            )));
        }
        if report.is_degraded() {
            tracing::warn!(
                "Saved {} for {} in degraded mode: primary {}, local {}",
                what,
                user_id,
                report.primary,
                report.local
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{FieldData, FieldValue};
    use crate::store::memory::InMemoryBackend;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn profile_with_age(age: i64) -> Profile {
        Profile::empty()
            .with(
                "identity_language",
                "age",
                FieldValue::new(FieldData::int(age), 0.9),
            )
            .unwrap()
    }

    fn local_store(dir: &TempDir) -> ProfileStore {
        ProfileStore::builder()
            .local_cache(dir.path())
            .build()
            .unwrap()
    }

    fn dual_store(dir: &TempDir) -> (ProfileStore, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        let store = ProfileStore::builder()
            .primary(backend.clone())
            .local_cache(dir.path())
            .build()
            .unwrap();
        (store, backend)
    }

    fn at(minute: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 6, 1, 9, minute, 0).unwrap())
    }

    #[tokio::test]
    async fn test_local_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        let profile = profile_with_age(70);

        let report = store.save_profile("alice", &profile).await.unwrap();
        assert_eq!(report.primary, TierStatus::Disabled);
        assert_eq!(report.local, TierStatus::Stored);
        assert!(!report.is_degraded());

        assert_eq!(
            store.load_profile("alice").await,
            Lookup::Found {
                value: profile,
                tier: Tier::Local,
                degraded: false
            }
        );
    }

    #[tokio::test]
    async fn test_primary_is_read_first() {
        let dir = TempDir::new().unwrap();
        let (store, backend) = dual_store(&dir);
        let profile = profile_with_age(70);

        store.save_profile("alice", &profile).await.unwrap();
        assert_eq!(backend.document_count("alice").await, 1);
        match store.load_profile("alice").await {
            Lookup::Found { value, tier, .. } => {
                assert_eq!(value, profile);
                assert_eq!(tier, Tier::Primary);
            }
            other => panic!("unexpected lookup: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_newest_primary_snapshot_wins() {
        let dir = TempDir::new().unwrap();
        let (store, _backend) = dual_store(&dir);
        store.save_profile("alice", &profile_with_age(70)).await.unwrap();
        store.save_profile("alice", &profile_with_age(71)).await.unwrap();

        assert_eq!(
            store.load_profile("alice").await.into_option(),
            Some(profile_with_age(71))
        );
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (store, _backend) = dual_store(&dir);
        assert_eq!(
            store.load_profile("nobody").await,
            Lookup::NotFound { degraded: false }
        );
        assert_eq!(
            store.load_conversation("nobody", 10).await,
            Lookup::NotFound { degraded: false }
        );
    }

    #[tokio::test]
    async fn test_multi_user_isolation() {
        let dir = TempDir::new().unwrap();
        let (store, _backend) = dual_store(&dir);
        store.save_profile("user_a", &profile_with_age(70)).await.unwrap();
        store.save_profile("user_b", &profile_with_age(80)).await.unwrap();

        assert_eq!(
            store.load_profile("user_a").await.into_option(),
            Some(profile_with_age(70))
        );
        assert_eq!(
            store.load_profile("user_b").await.into_option(),
            Some(profile_with_age(80))
        );
    }

    #[tokio::test]
    async fn test_concurrent_users_do_not_interfere() {
        let dir = TempDir::new().unwrap();
        let (store, _backend) = dual_store(&dir);
        let users: Vec<String> = (0..8).map(|i| format!("user-{}", i)).collect();

        let saves = users.iter().enumerate().map(|(i, user)| {
            let store = &store;
            async move {
                store.save_profile(user, &profile_with_age(60 + i as i64)).await?;
                store.append_message(user, Role::User, user, None).await
            }
        });
        for result in futures::future::join_all(saves).await {
            assert!(!result.unwrap().is_degraded());
        }

        for (i, user) in users.iter().enumerate() {
            assert_eq!(
                store.load_profile(user).await.into_option(),
                Some(profile_with_age(60 + i as i64))
            );
            let log = store.load_conversation(user, 10).await.into_option().unwrap();
            assert_eq!(log.len(), 1);
            assert_eq!(&log[0].content, user);
        }
    }

    #[tokio::test]
    async fn test_primary_outage_degrades_to_local() {
        let dir = TempDir::new().unwrap();
        let (store, backend) = dual_store(&dir);
        backend.set_offline(true);
        let profile = profile_with_age(70);

        let report = store.save_profile("alice", &profile).await.unwrap();
        assert!(matches!(report.primary, TierStatus::Failed(_)));
        assert_eq!(report.local, TierStatus::Stored);
        assert!(report.is_degraded());

        assert_eq!(
            store.load_profile("alice").await,
            Lookup::Found {
                value: profile,
                tier: Tier::Local,
                degraded: true
            }
        );
    }

    #[tokio::test]
    async fn test_primary_without_document_falls_back_to_local() {
        let dir = TempDir::new().unwrap();
        let (store, backend) = dual_store(&dir);
        backend.set_offline(true);
        store.save_profile("alice", &profile_with_age(70)).await.unwrap();
        backend.set_offline(false);

        assert_eq!(
            store.load_profile("alice").await,
            Lookup::Found {
                value: profile_with_age(70),
                tier: Tier::Local,
                degraded: false
            }
        );
    }

    #[tokio::test]
    async fn test_both_tiers_failing_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (store, backend) = dual_store(&dir);
        backend.set_offline(true);
        store.cache.as_ref().unwrap().fail_writes(true);

        let err = store
            .save_profile("alice", &profile_with_age(70))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_profile() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        store.save_profile("alice", &profile_with_age(70)).await.unwrap();
        let path = store.cache().unwrap().profile_path("alice").unwrap();
        let before = std::fs::read(&path).unwrap();

        store.cache.as_ref().unwrap().fail_writes(true);
        assert!(store.save_profile("alice", &profile_with_age(99)).await.is_err());
        store.cache.as_ref().unwrap().fail_writes(false);

        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(
            store.load_profile("alice").await.into_option(),
            Some(profile_with_age(70))
        );
    }

    #[tokio::test]
    async fn test_unreadable_cache_without_primary_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        let path = store.cache().unwrap().profile_path("alice").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ torn").unwrap();

        assert!(matches!(
            store.load_profile("alice").await,
            Lookup::Unavailable { .. }
        ));
    }

    #[tokio::test]
    async fn test_unreadable_cache_with_answering_primary() {
        let dir = TempDir::new().unwrap();
        let (store, _backend) = dual_store(&dir);
        let path = store.cache().unwrap().profile_path("alice").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ torn").unwrap();

        assert_eq!(
            store.load_profile("alice").await,
            Lookup::NotFound { degraded: true }
        );
    }

    #[tokio::test]
    async fn test_primary_only_outage_is_unavailable() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = ProfileStore::builder()
            .primary(backend.clone())
            .build()
            .unwrap();
        backend.set_offline(true);

        assert!(matches!(
            store.load_profile("alice").await,
            Lookup::Unavailable { .. }
        ));
        assert!(store.save_profile("alice", &Profile::empty()).await.is_err());
    }

    #[tokio::test]
    async fn test_conversation_is_sorted_and_limited() {
        let dir = TempDir::new().unwrap();
        let (store, _backend) = dual_store(&dir);
        store.append_message("alice", Role::User, "third", at(30)).await.unwrap();
        store.append_message("alice", Role::User, "first", at(10)).await.unwrap();
        store.append_message("alice", Role::Assistant, "second", at(20)).await.unwrap();
        store.append_message("alice", Role::Assistant, "tied", at(30)).await.unwrap();

        let all = store.load_conversation("alice", 100).await.into_option().unwrap();
        let order: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third", "tied"]);

        let oldest = store.load_conversation("alice", 2).await.into_option().unwrap();
        assert_eq!(oldest.len(), 2);
        assert_eq!(oldest[0].content, "first");

        let recent = store.recent_messages("alice", 2).await.into_option().unwrap();
        let order: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(order, vec!["third", "tied"]);
    }

    #[tokio::test]
    async fn test_append_keeps_full_log() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::builder()
            .local_cache(dir.path())
            .default_limit(2)
            .build()
            .unwrap();
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        for i in 0..5 {
            store
                .append_message("alice", Role::User, &format!("m{}", i), Some(base + Duration::minutes(i)))
                .await
                .unwrap();
        }

        let log = store.load_conversation("alice", 100).await.into_option().unwrap();
        assert_eq!(log.len(), 5);
    }

    #[tokio::test]
    async fn test_append_refuses_when_log_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        let path = store.cache().unwrap().conversation_path("alice").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"[{\"role\": ").unwrap();

        let err = store
            .append_message("alice", Role::User, "hello", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"[{\"role\": ");
    }

    #[tokio::test]
    async fn test_conversation_survives_primary_outage() {
        let dir = TempDir::new().unwrap();
        let (store, backend) = dual_store(&dir);
        store.append_message("alice", Role::User, "before", at(1)).await.unwrap();
        backend.set_offline(true);

        let report = store
            .append_message("alice", Role::User, "during", at(2))
            .await
            .unwrap();
        assert!(report.is_degraded());

        match store.load_conversation("alice", 10).await {
            Lookup::Found { value, tier, degraded } => {
                assert_eq!(value.len(), 2);
                assert_eq!(tier, Tier::Local);
                assert!(degraded);
            }
            other => panic!("unexpected lookup: {:?}", other),
        }
    }

    fn contents(log: &[ConversationMessage]) -> Vec<&str> {
        log.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_messages_written_during_outage_survive_recovery() {
        let dir = TempDir::new().unwrap();
        let (store, backend) = dual_store(&dir);
        store.append_message("alice", Role::User, "before", at(1)).await.unwrap();
        backend.set_offline(true);
        store.append_message("alice", Role::User, "during", at(2)).await.unwrap();
        backend.set_offline(false);

        // Primary answers with its stale log; the cache holds the extra message
        match store.load_conversation("alice", 10).await {
            Lookup::Found { value, tier, degraded } => {
                assert_eq!(contents(&value), vec!["before", "during"]);
                assert_eq!(tier, Tier::Local);
                assert!(!degraded);
            }
            other => panic!("unexpected lookup: {:?}", other),
        }

        let report = store
            .append_message("alice", Role::Assistant, "after", at(3))
            .await
            .unwrap();
        assert!(!report.is_degraded());

        let log = store.load_conversation("alice", 10).await.into_option().unwrap();
        assert_eq!(contents(&log), vec!["before", "during", "after"]);

        let cached = store
            .cache()
            .unwrap()
            .load_conversation("alice")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contents(&cached), vec!["before", "during", "after"]);

        // The primary tier caught up as well
        let primary_only = ProfileStore::builder().primary(backend.clone()).build().unwrap();
        let remote = primary_only.load_conversation("alice", 10).await.into_option().unwrap();
        assert_eq!(contents(&remote), vec!["before", "during", "after"]);
    }

    #[tokio::test]
    async fn test_messages_missing_from_cache_are_kept() {
        let dir = TempDir::new().unwrap();
        let (store, _backend) = dual_store(&dir);
        store.append_message("alice", Role::User, "one", at(1)).await.unwrap();
        store.cache.as_ref().unwrap().fail_writes(true);
        let report = store.append_message("alice", Role::User, "two", at(2)).await.unwrap();
        assert!(matches!(report.local, TierStatus::Failed(_)));
        store.cache.as_ref().unwrap().fail_writes(false);

        match store.load_conversation("alice", 10).await {
            Lookup::Found { value, tier, .. } => {
                assert_eq!(contents(&value), vec!["one", "two"]);
                assert_eq!(tier, Tier::Primary);
            }
            other => panic!("unexpected lookup: {:?}", other),
        }
    }

    #[test]
    fn test_union_counts_duplicate_messages() {
        let msg = |minute, content: &str| ConversationMessage {
            timestamp: at(minute).unwrap(),
            role: Role::User,
            content: content.to_string(),
        };
        let primary = vec![msg(1, "hi"), msg(1, "hi")];
        let local = vec![msg(1, "hi"), msg(1, "hi"), msg(1, "hi"), msg(2, "bye")];

        let (merged, tier) = union_logs(primary.clone(), local);
        assert_eq!(tier, Tier::Local);
        assert_eq!(contents(&merged), vec!["hi", "hi", "hi", "bye"]);

        let (same, tier) = union_logs(primary.clone(), primary.clone());
        assert_eq!(same, primary);
        assert_eq!(tier, Tier::Primary);
    }

    #[tokio::test]
    async fn test_newer_local_profile_wins_after_recovery() {
        let dir = TempDir::new().unwrap();
        let (store, backend) = dual_store(&dir);
        store.save_profile("alice", &profile_with_age(70)).await.unwrap();
        backend.set_offline(true);
        store.save_profile("alice", &profile_with_age(71)).await.unwrap();
        backend.set_offline(false);

        assert_eq!(
            store.load_profile("alice").await,
            Lookup::Found {
                value: profile_with_age(71),
                tier: Tier::Local,
                degraded: false
            }
        );

        // The next save brings the primary tier back in line
        store.save_profile("alice", &profile_with_age(72)).await.unwrap();
        assert_eq!(
            store.load_profile("alice").await,
            Lookup::Found {
                value: profile_with_age(72),
                tier: Tier::Primary,
                degraded: false
            }
        );
    }

    #[tokio::test]
    async fn test_newer_primary_profile_wins_over_stale_cache() {
        let dir = TempDir::new().unwrap();
        let (store, _backend) = dual_store(&dir);
        store.save_profile("alice", &profile_with_age(70)).await.unwrap();
        store.cache.as_ref().unwrap().fail_writes(true);
        let report = store.save_profile("alice", &profile_with_age(71)).await.unwrap();
        assert!(matches!(report.local, TierStatus::Failed(_)));
        store.cache.as_ref().unwrap().fail_writes(false);

        assert_eq!(
            store.load_profile("alice").await,
            Lookup::Found {
                value: profile_with_age(71),
                tier: Tier::Primary,
                degraded: false
            }
        );
    }

    #[tokio::test]
    async fn test_profile_and_log_are_independent() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        store.append_message("alice", Role::User, "hi", None).await.unwrap();
        assert_eq!(
            store.load_profile("alice").await,
            Lookup::NotFound { degraded: false }
        );
        store.save_profile("alice", &profile_with_age(70)).await.unwrap();
        assert_eq!(
            store.load_conversation("alice", 10).await.into_option().map(|m| m.len()),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        assert!(!store.user_exists("alice").await.unwrap());

        store.save_profile("alice", &profile_with_age(70)).await.unwrap();
        store.append_message("alice", Role::User, "hi", None).await.unwrap();
        assert!(store.user_exists("alice").await.unwrap());

        assert!(store.delete_user_data("alice").await.unwrap());
        assert!(!store.user_exists("alice").await.unwrap());
        assert_eq!(
            store.load_profile("alice").await,
            Lookup::NotFound { degraded: false }
        );
        assert!(!store.delete_user_data("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_recall_and_backend_check() {
        let dir = TempDir::new().unwrap();
        let (store, backend) = dual_store(&dir);
        store
            .append_message("alice", Role::User, "I used to teach mathematics", None)
            .await
            .unwrap();

        assert!(store.check_backend().await);
        let recalled = store.recall("alice", "mathematics").await;
        assert_eq!(recalled.records.len(), 1);

        backend.set_offline(true);
        assert!(!store.check_backend().await);
        assert_eq!(store.recall("alice", "mathematics").await, RetrieveResult::default());

        assert!(!local_store(&dir).check_backend().await);
    }

    #[tokio::test]
    async fn test_invalid_user_id() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        assert!(matches!(
            store.save_profile("", &Profile::empty()).await,
            Err(Error::InvalidUserId(_))
        ));
        assert!(matches!(
            store.load_profile("").await,
            Lookup::Unavailable { .. }
        ));
    }

    #[test]
    fn test_builder_requires_a_tier() {
        assert!(matches!(
            ProfileStore::builder().build(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let dir = TempDir::new().unwrap();
        let mut config = ProfileMemoryConfig::default();
        config.storage.base_dir = dir.path().to_path_buf();
        config.conversation.default_limit = 20;

        let store = ProfileStore::from_config(&config).unwrap();
        assert!(store.primary_name().is_none());
        assert_eq!(store.cache().unwrap().base_dir(), dir.path());
        assert_eq!(store.default_limit(), 20);

        config.backend.enabled = true;
        config.backend.base_url = "http://127.0.0.1:9".to_string();
        config.backend.api_key_env = None;
        let store = ProfileStore::from_config(&config).unwrap();
        assert_eq!(store.primary_name(), Some("http"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_save_then_load_round_trips(
            age in 0i64..120,
            confidence in 0.01f64..=1.0,
            interests in proptest::collection::vec("[a-z ]{1,12}", 0..4),
            region in proptest::option::of("[A-Za-z]{1,10}"),
        ) {
            let mut profile = Profile::empty()
                .with("identity_language", "age", FieldValue::new(FieldData::int(age), confidence))
                .unwrap()
                .with("lifestyle_social", "core_interests", FieldValue::new(FieldData::List(interests), confidence))
                .unwrap();
            if let Some(region) = region {
                profile
                    .set("identity_language", "region", FieldValue::new(FieldData::Text(region), 0.5))
                    .unwrap();
            }

            let dir = TempDir::new().unwrap();
            let store = local_store(&dir);
            let loaded = tokio_test::block_on(async {
                store.save_profile("prop-user", &profile).await.unwrap();
                store.load_profile("prop-user").await
            });
            prop_assert_eq!(loaded.into_option(), Some(profile));
        }
    }
}
