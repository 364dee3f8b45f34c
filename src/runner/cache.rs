//! Verification-result cache shared by the prerequisite verifier and the executor

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedVerificationResult {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedVerificationResult {
    pub fn new(success: bool, duration_ms: u64, ttl: Option<Duration>) -> Self {
        let created_at = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| ChronoDuration::from_std(ttl).ok())
            .map(|ttl| created_at + ttl);
        Self {
            success,
            message: None,
            duration_ms,
            created_at,
            expires_at,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Process-scoped cache keyed by prerequisite (or test) id.
///
/// A missing or expired entry means "not yet proven". Cloning shares the
/// underlying map.
#[derive(Debug, Clone, Default)]
pub struct VerificationCache {
    entries: Arc<RwLock<HashMap<String, CachedVerificationResult>>>,
    ttl: Option<Duration>,
}

impl VerificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache whose `mark_executed` entries expire after `ttl`
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            entries: Arc::default(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Live entry for `id`; expired entries read as absent
    pub async fn get(&self, id: &str) -> Option<CachedVerificationResult> {
        let entries = self.entries.read().await;
        entries.get(id).filter(|e| !e.is_expired()).cloned()
    }

    pub async fn insert(&self, id: &str, result: CachedVerificationResult) {
        self.entries.write().await.insert(id.to_string(), result);
    }

    /// Record the outcome of a finished test under its own id
    pub async fn mark_executed(&self, id: &str, success: bool, duration_ms: u64) {
        let result = CachedVerificationResult::new(success, duration_ms, self.ttl);
        log::debug!("Marking '{}' executed (success: {})", id, success);
        self.insert(id, result).await;
    }

    pub async fn invalidate(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Drop expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> HashMap<String, CachedVerificationResult> {
        self.entries.read().await.clone()
    }

    /// Periodically purge expired entries until the handle is aborted
    pub fn spawn_expiry_sweep(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired().await;
                if removed > 0 {
                    log::debug!("Purged {} expired verification entries", removed);
                }
            }
        })
    }
}
