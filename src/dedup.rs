use std::sync::Arc;

use chrono::Utc;
use error_stack::Report;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::model::{Alert, AlertKind};
use crate::storage::{NotificationRecord, NotificationStore};

/// Wall-clock source, in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

pub fn notification_key(ticker: &str, kind: AlertKind) -> String {
    format!("{ticker}:{kind}")
}

/// Suppresses repeat notifications for the same (ticker, kind) inside a
/// silence window and remembers what has been sent.
///
/// History is loaded once when the tracker is opened. Every mutating call
/// persists the full record before returning; a failed write is returned to
/// the caller.
pub struct NotificationTracker {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    silence_seconds: f64,
    record: NotificationRecord,
}

impl NotificationTracker {
    /// Load history from `store`. Unreadable history is logged and replaced
    /// with an empty record.
    pub async fn open(
        store: Arc<dyn NotificationStore>,
        silence_hours: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let record = match store.load().await {
            Ok(record) => record,
            Err(report) => {
                warn!(
                    error = ?report,
                    "notification history unreadable, starting with empty history"
                );
                NotificationRecord::new()
            }
        };

        debug!(entries = record.len(), silence_hours, "notification history loaded");

        Self {
            store,
            clock,
            silence_seconds: silence_hours as f64 * 3600.0,
            record,
        }
    }

    /// Keep only alerts whose key was never notified or whose silence window
    /// has fully elapsed. Input order is preserved; nothing is persisted.
    pub fn filter_alerts(&self, alerts: &[Alert]) -> Vec<Alert> {
        let now = self.clock.now();
        alerts
            .iter()
            .filter(|alert| {
                let key = notification_key(&alert.ticker, alert.kind);
                match self.record.get(&key) {
                    Some(&sent_at) if now - sent_at < self.silence_seconds => {
                        debug!(key = %key, "alert suppressed by silence window");
                        false
                    }
                    _ => true,
                }
            })
            .cloned()
            .collect()
    }

    /// Record that (`ticker`, `kind`) was just notified and persist.
    pub async fn mark_notified(
        &mut self,
        ticker: &str,
        kind: AlertKind,
    ) -> Result<(), Report<StoreError>> {
        let key = notification_key(ticker, kind);
        let now = self.clock.now();
        self.record.insert(key.clone(), now);
        self.store.save(&self.record).await?;
        debug!(key = %key, at = now, "notification recorded");
        Ok(())
    }

    /// Drop entries whose silence window has elapsed, then persist.
    pub async fn cleanup(&mut self) -> Result<(), Report<StoreError>> {
        let now = self.clock.now();
        let before = self.record.len();
        self.record
            .retain(|_, sent_at| now - *sent_at < self.silence_seconds);
        self.store.save(&self.record).await?;

        let removed = before - self.record.len();
        if removed > 0 {
            info!(removed, remaining = self.record.len(), "expired notifications removed");
        }
        Ok(())
    }

    pub fn record(&self) -> &NotificationRecord {
        &self.record
    }
}
