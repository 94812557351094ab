//! Out-of-band alert dispatch.
//!
//! The pipeline enqueues without waiting; when the queue is full the alert is
//! dropped and counted. A separate consumer drains the queue.

use crate::event::{EventKind, SecurityEvent, Severity};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Payload handed to the alert processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: EventKind,
    pub message: String,
    pub data: serde_json::Value,
    pub severity: Severity,
    pub tenant_id: Option<String>,
}

impl From<&SecurityEvent> for Alert {
    fn from(event: &SecurityEvent) -> Self {
        Self {
            kind: event.kind,
            message: event.message(),
            data: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
            severity: event.severity,
            tenant_id: event.tenant_id.clone(),
        }
    }
}

/// Non-blocking producer side of the alert queue.
#[derive(Clone)]
pub struct AlertSink {
    tx: mpsc::Sender<Alert>,
    dropped: Arc<AtomicU64>,
}

/// Consumer side of the alert queue.
pub struct AlertReceiver {
    rx: mpsc::Receiver<Alert>,
}

impl AlertSink {
    /// Create a queue holding at most `capacity` pending alerts.
    pub fn channel(capacity: usize) -> (AlertSink, AlertReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            AlertSink {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            AlertReceiver { rx },
        )
    }

    /// Queue `alert`. Returns false if it was dropped.
    pub fn enqueue(&self, alert: Alert) -> bool {
        match self.tx.try_send(alert) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(alert)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind = %alert.kind, "Alert queue full, dropping alert");
                false
            }
            Err(mpsc::error::TrySendError::Closed(alert)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind = %alert.kind, "Alert consumer gone, dropping alert");
                false
            }
        }
    }

    /// Queue the alert for `event`.
    pub fn emit(&self, event: &SecurityEvent) -> bool {
        self.enqueue(Alert::from(event))
    }

    /// Alerts dropped since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AlertReceiver {
    /// Wait for the next alert; `None` once every sink is gone.
    pub async fn recv(&mut self) -> Option<Alert> {
        self.rx.recv().await
    }

    /// Next alert if one is already queued.
    pub fn try_recv(&mut self) -> Option<Alert> {
        self.rx.try_recv().ok()
    }

    /// Drain alerts into the log until every sink is dropped.
    pub fn spawn_logger(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(alert) = self.recv().await {
                let data = serde_json::to_string(&alert.data).unwrap_or_default();
                match alert.severity {
                    Severity::Critical | Severity::High => error!(
                        kind = %alert.kind,
                        severity = %alert.severity,
                        tenant_id = ?alert.tenant_id,
                        data = %data,
                        "{}",
                        alert.message
                    ),
                    Severity::Medium | Severity::Low => info!(
                        kind = %alert.kind,
                        severity = %alert.severity,
                        tenant_id = ?alert.tenant_id,
                        data = %data,
                        "{}",
                        alert.message
                    ),
                }
            }
        })
    }
}
