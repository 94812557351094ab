//! Escalation from repeated rate-limit violations to an IP block.

use crate::block_list::BlockList;
use crate::config::AutoBlockConfig;
use crate::error::StoreError;
use crate::store::{bounded, counter_key, CounterStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const VIOLATION_NAMESPACE: &str = "violations";

/// Result of recording one violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationOutcome {
    /// Auto-blocking is switched off
    Disabled,
    /// Counted, threshold not reached
    Counted(u64),
    /// Counted and the IP was blocked
    Blocked(u64),
    /// Counter or block list unavailable; nothing recorded
    Failed,
}

impl ViolationOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, ViolationOutcome::Blocked(_))
    }
}

/// Counts violations per IP and blocks once the threshold is reached.
///
/// The violation counter is left in place after a block. Once blocked, the
/// pipeline rejects the IP before the rate limiter runs, so the counter stops
/// growing until the block lapses.
pub struct AutoBlockPolicy {
    config: AutoBlockConfig,
    store: Arc<dyn CounterStore>,
    block_list: Arc<dyn BlockList>,
    store_timeout: Duration,
}

impl AutoBlockPolicy {
    pub fn new(
        config: AutoBlockConfig,
        store: Arc<dyn CounterStore>,
        block_list: Arc<dyn BlockList>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            config,
            store,
            block_list,
            store_timeout,
        }
    }

    fn key(&self, ip: &str) -> String {
        counter_key(VIOLATION_NAMESPACE, ip)
    }

    /// Record one rate-limit rejection for `ip`.
    ///
    /// The window opens with the first violation. Store failures are logged
    /// and reported as [`ViolationOutcome::Failed`].
    pub async fn record_violation(&self, ip: &str) -> ViolationOutcome {
        if !self.config.enabled {
            return ViolationOutcome::Disabled;
        }

        match self.try_record(ip).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, client_ip = %ip, "Failed to record rate limit violation");
                ViolationOutcome::Failed
            }
        }
    }

    async fn try_record(&self, ip: &str) -> Result<ViolationOutcome, StoreError> {
        let key = self.key(ip);
        let count = bounded(
            self.store_timeout,
            self.store.increment(&key, self.config.window()),
        )
        .await?;

        if count < u64::from(self.config.threshold) {
            return Ok(ViolationOutcome::Counted(count));
        }

        let reason = format!("Auto-blocked: {} rate limit violations", count);
        bounded(
            self.store_timeout,
            self.block_list
                .block(ip, &reason, Some(self.config.duration())),
        )
        .await?;

        warn!(client_ip = %ip, violations = count, "IP auto-blocked");
        Ok(ViolationOutcome::Blocked(count))
    }

    /// Violations recorded for `ip` in the current window.
    pub async fn violations(&self, ip: &str) -> Result<u64, StoreError> {
        let count = bounded(self.store_timeout, self.store.get(&self.key(ip))).await?;
        Ok(count.unwrap_or(0))
    }
}
