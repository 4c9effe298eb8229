pub mod email;
pub mod terminal;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;
use crate::model::Alert;

/// Sink for alert notifications.
pub trait Notifier: Send + Sync {
    fn notify_alert<'a>(
        &'a self,
        alert: &'a Alert,
    ) -> BoxFuture<'a, Result<(), Report<NotifyError>>>;

    /// Tell the operator that every ticker failed in the last cycle.
    fn notify_degraded(&self) -> BoxFuture<'_, Result<(), Report<NotifyError>>>;
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

pub fn format_alert(alert: &Alert) -> Message {
    let subject = format!("StockMon Alert: {} {} signal", alert.ticker, alert.kind);
    let body = format!(
        "Ticker: {}\n\
         Type: {}\n\
         Threshold: ${:.2}\n\
         Reached: ${:.2}\n\
         Current: ${:.2}\n\
         \n\
         ---\n\
         Generated by StockMon",
        alert.ticker,
        alert.kind.as_str().to_uppercase(),
        alert.threshold,
        alert.reached,
        alert.current,
    );
    Message { subject, body }
}

pub fn format_degraded() -> Message {
    Message {
        subject: "StockMon: Service degraded - check API".into(),
        body: "The price source appears to be down: every ticker failed.\n\
               Its client dependencies probably need updating."
            .into(),
    }
}
