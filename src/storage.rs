pub mod json;
pub mod sqlite;

use std::collections::BTreeMap;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::StoreError;

/// `"{ticker}:{kind}"` to the Unix time (float seconds) it was last notified.
pub type NotificationRecord = BTreeMap<String, f64>;

/// Persistence for notification history.
///
/// `save` replaces the stored record wholesale.
pub trait NotificationStore: Send + Sync {
    fn load(&self) -> BoxFuture<'_, Result<NotificationRecord, Report<StoreError>>>;

    fn save(&self, record: &NotificationRecord) -> BoxFuture<'_, Result<(), Report<StoreError>>>;
}
