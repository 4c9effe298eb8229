use std::sync::Arc;

use chrono::Utc;
use error_stack::{Report, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dedup::NotificationTracker;
use crate::error::CycleError;
use crate::evaluator::{self, EvaluateOptions};
use crate::model::{Alert, EvaluationResult, Watchlist};
use crate::notifier::Notifier;
use crate::quote::PriceSource;
use crate::remote::AlertApiClient;

/// Where a cycle gets its alerts from.
pub enum AlertSource {
    Local {
        source: Arc<dyn PriceSource>,
        options: EvaluateOptions,
    },
    Remote(AlertApiClient),
}

impl AlertSource {
    pub async fn evaluate(
        &self,
        watchlist: &Watchlist,
        cancel: &CancellationToken,
    ) -> Result<EvaluationResult, Report<CycleError>> {
        match self {
            Self::Local { source, options } => {
                let outcome = evaluator::evaluate(watchlist, source.as_ref(), options, cancel)
                    .await
                    .change_context(CycleError::Evaluation)?;
                Ok(outcome.into_result(Utc::now()))
            }
            Self::Remote(client) => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(Report::new(CycleError::Evaluation)
                        .attach("cancelled while waiting for the alert API")),
                    result = client.check_alerts(watchlist) => {
                        result.change_context(CycleError::Evaluation)
                    }
                }
            }
        }
    }
}

/// What one cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub notified: Vec<Alert>,
    pub suppressed: usize,
    pub failed: usize,
    pub degraded: bool,
}

/// Run one evaluate, filter, notify, record pass.
///
/// With `dry_run` nothing is persisted: alerts are not marked and history is
/// not cleaned up. A failure to persist a mark aborts the cycle; a failure to
/// notify leaves that alert unmarked so it is retried next cycle.
pub async fn run_cycle(
    watchlist: &Watchlist,
    alerts: &AlertSource,
    tracker: &mut NotificationTracker,
    notifier: &dyn Notifier,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<CycleReport, Report<CycleError>> {
    let result = alerts.evaluate(watchlist, cancel).await?;

    info!(
        tickers = watchlist.len(),
        alerts = result.alerts.len(),
        errors = result.errors.len(),
        market_open = result.market_open,
        "evaluation complete"
    );
    if !result.market_open {
        info!("market is closed, prices may be stale");
    }

    for failure in &result.errors {
        warn!(ticker = %failure.ticker, error = %failure.message, "ticker failed");
    }

    let mut report = CycleReport {
        degraded: result.service_degraded,
        ..CycleReport::default()
    };

    if result.service_degraded {
        error!("every ticker failed, price source may be down");
        if let Err(e) = notifier.notify_degraded().await {
            error!(error = ?e, "failed to send degraded notice");
        }
    }

    let fresh = tracker.filter_alerts(&result.alerts);
    report.suppressed = result.alerts.len() - fresh.len();

    for alert in fresh {
        if let Err(e) = notifier.notify_alert(&alert).await {
            error!(ticker = %alert.ticker, kind = %alert.kind, error = ?e, "notification failed");
            report.failed += 1;
            continue;
        }

        if !dry_run {
            tracker
                .mark_notified(&alert.ticker, alert.kind)
                .await
                .change_context(CycleError::Persistence)
                .attach_with(|| format!("alert: {}:{}", alert.ticker, alert.kind))?;
        }
        report.notified.push(alert);
    }

    if !dry_run {
        tracker
            .cleanup()
            .await
            .change_context(CycleError::Persistence)?;
    }

    info!(
        notified = report.notified.len(),
        suppressed = report.suppressed,
        failed = report.failed,
        history = tracker.record().len(),
        dry_run,
        "cycle complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::clock::ManualClock;
    use crate::model::{AlertKind, ThresholdSpec};
    use crate::notifier::recording::RecordingNotifier;
    use crate::quote::stub::{Scripted, StaticPriceSource};
    use crate::storage::NotificationRecord;
    use crate::storage::memory::MemoryStore;

    const T0: f64 = 1_700_000_000.0;

    fn watchlist(entries: &[(&str, Option<f64>, Option<f64>)]) -> Watchlist {
        entries
            .iter()
            .map(|(t, buy, sell)| {
                (
                    (*t).to_owned(),
                    ThresholdSpec {
                        buy: *buy,
                        sell: *sell,
                    },
                )
            })
            .collect()
    }

    fn local(source: StaticPriceSource) -> AlertSource {
        AlertSource::Local {
            source: Arc::new(source),
            options: EvaluateOptions {
                window_hours: 24,
                concurrency: 2,
            },
        }
    }

    async fn tracker(store: &Arc<MemoryStore>, clock: &Arc<ManualClock>) -> NotificationTracker {
        NotificationTracker::open(store.clone(), 48, clock.clone()).await
    }

    #[tokio::test]
    async fn alerts_are_sent_once_within_silence_window() {
        let list = watchlist(&[("AAPL", Some(170.0), Some(190.0))]);
        let source = local(StaticPriceSource::default().range("AAPL", 168.5, 175.0, 172.3));
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(ManualClock::at(T0));
        let notifier = RecordingNotifier::default();
        let cancel = CancellationToken::new();

        let mut t = tracker(&store, &clock).await;
        let first = run_cycle(&list, &source, &mut t, &notifier, false, &cancel)
            .await
            .unwrap();
        assert_eq!(first.notified.len(), 1);
        assert_eq!(first.notified[0].kind, AlertKind::Buy);
        assert!(store.snapshot().contains_key("AAPL:buy"));

        clock.advance_hours(1.0);
        let mut t = tracker(&store, &clock).await;
        let second = run_cycle(&list, &source, &mut t, &notifier, false, &cancel)
            .await
            .unwrap();
        assert!(second.notified.is_empty());
        assert_eq!(second.suppressed, 1);
        assert_eq!(notifier.subjects(), vec!["StockMon Alert: AAPL buy signal"]);
    }

    #[tokio::test]
    async fn dry_run_does_not_persist() {
        let list = watchlist(&[("MSFT", None, Some(400.0))]);
        let source = local(StaticPriceSource::default().range("MSFT", 395.0, 405.2, 402.0));
        let mut record = NotificationRecord::new();
        record.insert("OLD:buy".into(), T0 - 100.0 * 3600.0);
        let store = Arc::new(MemoryStore::with_record(record));
        let clock = Arc::new(ManualClock::at(T0));
        let notifier = RecordingNotifier::default();

        let mut t = tracker(&store, &clock).await;
        let report = run_cycle(&list, &source, &mut t, &notifier, true, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.notified.len(), 1);
        assert_eq!(store.save_count(), 0);
        assert!(store.snapshot().contains_key("OLD:buy"));
    }

    #[tokio::test]
    async fn failed_notification_is_not_marked() {
        let list = watchlist(&[("AAPL", Some(170.0), None), ("NVDA", None, Some(100.0))]);
        let source = local(
            StaticPriceSource::default()
                .range("AAPL", 160.0, 175.0, 170.0)
                .range("NVDA", 95.0, 120.0, 110.0),
        );
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(ManualClock::at(T0));
        let notifier = RecordingNotifier::failing_for(&["AAPL"]);

        let mut t = tracker(&store, &clock).await;
        let report = run_cycle(&list, &source, &mut t, &notifier, false, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.notified.len(), 1);
        let saved = store.snapshot();
        assert!(!saved.contains_key("AAPL:buy"));
        assert!(saved.contains_key("NVDA:sell"));
    }

    #[tokio::test]
    async fn persistence_failure_aborts_cycle() {
        let list = watchlist(&[("AAPL", Some(170.0), None)]);
        let source = local(StaticPriceSource::default().range("AAPL", 160.0, 175.0, 170.0));
        let store = Arc::new(MemoryStore::default());
        store.fail_writes();
        let clock = Arc::new(ManualClock::at(T0));
        let notifier = RecordingNotifier::default();

        let mut t = tracker(&store, &clock).await;
        let report = run_cycle(&list, &source, &mut t, &notifier, false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(report.current_context(), CycleError::Persistence));
    }

    #[tokio::test]
    async fn degraded_batch_sends_notice_every_cycle() {
        let list = watchlist(&[("AAPL", Some(170.0), None), ("MSFT", None, Some(400.0))]);
        let source = local(
            StaticPriceSource::default()
                .with("AAPL", Scripted::Timeout)
                .with("MSFT", Scripted::Unknown),
        );
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(ManualClock::at(T0));
        let notifier = RecordingNotifier::default();
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let mut t = tracker(&store, &clock).await;
            let report = run_cycle(&list, &source, &mut t, &notifier, false, &cancel)
                .await
                .unwrap();
            assert!(report.degraded);
            assert!(report.notified.is_empty());
        }
        assert_eq!(
            notifier.subjects(),
            vec![
                "StockMon: Service degraded - check API",
                "StockMon: Service degraded - check API"
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_evaluation_is_an_error() {
        let list = watchlist(&[("AAPL", Some(170.0), None)]);
        let source = local(StaticPriceSource::default().range("AAPL", 160.0, 175.0, 170.0));
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(ManualClock::at(T0));
        let notifier = RecordingNotifier::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut t = tracker(&store, &clock).await;
        let report = run_cycle(&list, &source, &mut t, &notifier, false, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(report.current_context(), CycleError::Evaluation));
        assert!(notifier.subjects().is_empty());
        assert_eq!(store.save_count(), 0);
    }
}
