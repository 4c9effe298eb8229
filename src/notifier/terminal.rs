use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;
use crate::model::Alert;
use crate::notifier::{Message, Notifier, format_alert, format_degraded};

/// Prints notifications to stdout instead of sending them. Used for dry runs.
pub struct TerminalNotifier;

impl TerminalNotifier {
    fn print(message: &Message) {
        println!("=== {} ===\n{}\n", message.subject, message.body);
    }
}

impl Notifier for TerminalNotifier {
    fn notify_alert<'a>(
        &'a self,
        alert: &'a Alert,
    ) -> BoxFuture<'a, Result<(), Report<NotifyError>>> {
        Box::pin(async move {
            tracing::warn!(
                ticker = %alert.ticker,
                kind = %alert.kind,
                threshold = alert.threshold,
                reached = alert.reached,
                current = alert.current,
                "ALERT (dry run)",
            );
            Self::print(&format_alert(alert));
            Ok(())
        })
    }

    fn notify_degraded(&self) -> BoxFuture<'_, Result<(), Report<NotifyError>>> {
        Box::pin(async move {
            tracing::warn!("SERVICE DEGRADED (dry run)");
            Self::print(&format_degraded());
            Ok(())
        })
    }
}
