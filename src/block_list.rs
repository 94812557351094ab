//! IP block list.
//!
//! At most one entry per IP; blocking an already-blocked IP replaces the
//! entry (latest reason and expiry win).

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::Expiry;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::info;

/// One blocked address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub ip: String,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
    /// `None` blocks indefinitely
    pub expires_at: Option<DateTime<Utc>>,
}

impl BlockEntry {
    pub fn new(ip: impl Into<String>, reason: impl Into<String>, duration: Option<Duration>) -> Self {
        let blocked_at = Utc::now();
        let expires_at = duration
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| blocked_at.checked_add_signed(d));

        Self {
            ip: ip.into(),
            reason: reason.into(),
            blocked_at,
            expires_at,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }

    /// Time left before the entry lapses, `None` when indefinite.
    fn remaining(&self) -> Option<Duration> {
        self.expires_at.map(|at| {
            (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }
}

/// Persistence for blocked IPs.
#[async_trait]
pub trait BlockList: Send + Sync {
    /// True iff an unexpired entry exists for `ip`.
    async fn is_blocked(&self, ip: &str) -> Result<bool, StoreError>;

    /// Insert or replace the entry for `ip`. `None` duration never expires.
    async fn block(&self, ip: &str, reason: &str, duration: Option<Duration>) -> Result<BlockEntry, StoreError>;

    /// Remove the entry for `ip`, returning it if one was active.
    async fn unblock(&self, ip: &str) -> Result<Option<BlockEntry>, StoreError>;

    /// Active entry for `ip`, if any.
    async fn entry(&self, ip: &str) -> Result<Option<BlockEntry>, StoreError>;

    /// All active entries.
    async fn entries(&self) -> Result<Vec<BlockEntry>, StoreError>;
}

/// Per-entry expiry taken from the entry itself.
struct BlockExpiry;

impl Expiry<String, BlockEntry> for BlockExpiry {
    fn expire_after_create(&self, _ip: &String, entry: &BlockEntry, _created_at: Instant) -> Option<Duration> {
        entry.remaining()
    }

    fn expire_after_update(
        &self,
        _ip: &String,
        entry: &BlockEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.remaining()
    }
}

/// In-process block list backed by a bounded cache.
pub struct MemoryBlockList {
    inner: Cache<String, BlockEntry>,
}

impl MemoryBlockList {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(BlockExpiry)
            .build();

        Self { inner }
    }
}

impl Default for MemoryBlockList {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl BlockList for MemoryBlockList {
    async fn is_blocked(&self, ip: &str) -> Result<bool, StoreError> {
        Ok(self.entry(ip).await?.is_some())
    }

    async fn block(&self, ip: &str, reason: &str, duration: Option<Duration>) -> Result<BlockEntry, StoreError> {
        let entry = BlockEntry::new(ip, reason, duration);
        self.inner.insert(ip.to_string(), entry.clone()).await;

        info!(
            ip = %ip,
            reason = %reason,
            expires_at = ?entry.expires_at,
            "IP blocked"
        );
        Ok(entry)
    }

    async fn unblock(&self, ip: &str) -> Result<Option<BlockEntry>, StoreError> {
        let removed = self
            .inner
            .remove(ip)
            .await
            .filter(|entry| entry.is_active(Utc::now()));

        if removed.is_some() {
            info!(ip = %ip, "IP unblocked");
        }
        Ok(removed)
    }

    async fn entry(&self, ip: &str) -> Result<Option<BlockEntry>, StoreError> {
        let now = Utc::now();
        Ok(self
            .inner
            .get(ip)
            .await
            .filter(|entry| entry.is_active(now)))
    }

    async fn entries(&self) -> Result<Vec<BlockEntry>, StoreError> {
        let now = Utc::now();
        let mut entries: Vec<BlockEntry> = self
            .inner
            .iter()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.is_active(now))
            .collect();
        entries.sort_by(|a, b| a.blocked_at.cmp(&b.blocked_at));
        Ok(entries)
    }
}
