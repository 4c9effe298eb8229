use std::pin::pin;

use chrono::{DateTime, Utc};
use error_stack::Report;
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::EvaluationError;
use crate::market;
use crate::model::{
    Alert, AlertKind, EvaluationResult, PriceRange, ProcessingError, ThresholdSpec, Watchlist,
};
use crate::quote::PriceSource;

#[derive(Debug, Clone, Copy)]
pub struct EvaluateOptions {
    /// Trailing window passed to the price source.
    pub window_hours: u32,
    /// Maximum number of lookups in flight at once.
    pub concurrency: usize,
}

/// Alerts and errors for one batch, before market status is attached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub alerts: Vec<Alert>,
    pub errors: Vec<ProcessingError>,
    pub degraded: bool,
}

impl BatchOutcome {
    pub fn into_result(self, checked_at: DateTime<Utc>) -> EvaluationResult {
        EvaluationResult {
            alerts: self.alerts,
            errors: self.errors,
            market_open: market::is_market_open(checked_at),
            service_degraded: self.degraded,
            checked_at,
        }
    }
}

/// Apply one ticker's thresholds to its price range.
///
/// Comparisons are inclusive: touching the threshold fires the alert. Buy and
/// sell are independent, so a volatile ticker can yield both.
pub fn evaluate_thresholds(ticker: &str, spec: &ThresholdSpec, range: &PriceRange) -> Vec<Alert> {
    let mut alerts = Vec::with_capacity(2);

    if let Some(buy) = spec.buy {
        if range.low <= buy {
            alerts.push(Alert {
                ticker: ticker.to_owned(),
                kind: AlertKind::Buy,
                threshold: buy,
                reached: range.low,
                current: range.last,
            });
        }
    }

    if let Some(sell) = spec.sell {
        if range.high >= sell {
            alerts.push(Alert {
                ticker: ticker.to_owned(),
                kind: AlertKind::Sell,
                threshold: sell,
                reached: range.high,
                current: range.last,
            });
        }
    }

    alerts
}

/// Look up every ticker once and evaluate its thresholds.
///
/// A failed lookup becomes a [`ProcessingError`] for that ticker and never
/// stops the others. Up to `options.concurrency` lookups run at a time;
/// results are collected in watchlist order.
///
/// If `cancel` fires before every ticker has an outcome, whatever was
/// collected so far is discarded and `EvaluationError::Cancelled` is returned.
pub async fn evaluate(
    watchlist: &Watchlist,
    source: &dyn PriceSource,
    options: &EvaluateOptions,
    cancel: &CancellationToken,
) -> Result<BatchOutcome, Report<EvaluationError>> {
    let total = watchlist.len();
    let window_hours = options.window_hours;

    let entries: Vec<(String, ThresholdSpec)> = watchlist
        .iter()
        .map(|(ticker, spec)| (ticker.clone(), *spec))
        .collect();

    let mut lookups = pin!(
        stream::iter(entries)
            .map(move |(ticker, spec)| async move {
                let outcome = source.lookup(&ticker, window_hours).await;
                (ticker, spec, outcome)
            })
            .buffered(options.concurrency.max(1))
    );

    let mut outcome = BatchOutcome::default();
    let mut succeeded = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let completed = succeeded + outcome.errors.len();
                return Err(Report::new(EvaluationError::Cancelled)
                    .attach(format!("completed {completed} of {total} tickers")));
            }
            next = lookups.next() => next,
        };

        let Some((ticker, spec, lookup)) = next else {
            break;
        };

        match lookup {
            Ok(range) => {
                succeeded += 1;
                let alerts = evaluate_thresholds(&ticker, &spec, &range);
                debug!(ticker = %ticker, alerts = alerts.len(), "ticker evaluated");
                outcome.alerts.extend(alerts);
            }
            Err(report) => {
                debug!(ticker = %ticker, error = ?report, "price lookup failed");
                outcome.errors.push(ProcessingError {
                    ticker,
                    message: report.current_context().to_string(),
                });
            }
        }
    }

    outcome.degraded = total > 0 && succeeded == 0 && outcome.errors.len() == total;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::stub::{Scripted, StaticPriceSource};

    fn spec(buy: Option<f64>, sell: Option<f64>) -> ThresholdSpec {
        ThresholdSpec { buy, sell }
    }

    fn range(low: f64, high: f64, last: f64) -> PriceRange {
        PriceRange { low, high, last }
    }

    fn options() -> EvaluateOptions {
        EvaluateOptions {
            window_hours: 24,
            concurrency: 4,
        }
    }

    fn watchlist(entries: &[(&str, ThresholdSpec)]) -> Watchlist {
        entries
            .iter()
            .map(|(t, s)| ((*t).to_owned(), *s))
            .collect()
    }

    #[test]
    fn buy_fires_when_low_reaches_threshold() {
        let alerts = evaluate_thresholds(
            "AAPL",
            &spec(Some(170.0), None),
            &range(165.0, 180.0, 172.0),
        );
        assert_eq!(
            alerts,
            vec![Alert {
                ticker: "AAPL".into(),
                kind: AlertKind::Buy,
                threshold: 170.0,
                reached: 165.0,
                current: 172.0,
            }]
        );
    }

    #[test]
    fn price_inside_band_fires_nothing() {
        let alerts = evaluate_thresholds(
            "AAPL",
            &spec(Some(170.0), Some(190.0)),
            &range(172.0, 188.0, 180.0),
        );
        assert!(alerts.is_empty());
    }

    #[test]
    fn touching_either_threshold_fires() {
        let alerts = evaluate_thresholds(
            "AAPL",
            &spec(Some(170.0), Some(190.0)),
            &range(170.0, 190.0, 180.0),
        );
        assert_eq!(alerts.len(), 2);
    }

    #[test]
    fn volatile_ticker_fires_both_sides_with_same_current() {
        let alerts = evaluate_thresholds(
            "TSLA",
            &spec(Some(200.0), Some(250.0)),
            &range(195.0, 260.0, 230.0),
        );
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].kind, AlertKind::Buy);
        assert_eq!(alerts[0].reached, 195.0);
        assert_eq!(alerts[1].kind, AlertKind::Sell);
        assert_eq!(alerts[1].reached, 260.0);
        assert!(alerts.iter().all(|a| a.current == 230.0));
    }

    #[test]
    fn missing_sides_are_never_evaluated() {
        let alerts = evaluate_thresholds("AAPL", &spec(None, None), &range(1.0, 1_000.0, 50.0));
        assert!(alerts.is_empty());

        let alerts = evaluate_thresholds(
            "AAPL",
            &spec(None, Some(500.0)),
            &range(1.0, 1_000.0, 50.0),
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Sell);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_other_tickers() {
        let source = StaticPriceSource::default()
            .range("AAPL", 165.0, 180.0, 172.0)
            .with("BOGUS", Scripted::InvalidSymbol);
        let list = watchlist(&[
            ("AAPL", spec(Some(170.0), None)),
            ("BOGUS", spec(Some(10.0), None)),
        ]);

        let outcome = evaluate(&list, &source, &options(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].ticker, "BOGUS");
        assert!(outcome.errors[0].message.starts_with("Invalid ticker:"));
        assert!(!outcome.degraded);
    }

    #[tokio::test]
    async fn failure_messages_reflect_kind() {
        let source = StaticPriceSource::default()
            .with("A", Scripted::NoData)
            .with("B", Scripted::Timeout)
            .with("C", Scripted::Unknown);
        let list = watchlist(&[
            ("A", spec(Some(1.0), None)),
            ("B", spec(Some(1.0), None)),
            ("C", spec(Some(1.0), None)),
        ]);

        let outcome = evaluate(&list, &source, &options(), &CancellationToken::new())
            .await
            .unwrap();

        let messages: Vec<&str> = outcome.errors.iter().map(|e| e.message.as_str()).collect();
        assert!(messages[0].starts_with("Market closed:"));
        assert!(messages[1].starts_with("Timeout:"));
        assert!(messages[2].starts_with("Unexpected error:"));
    }

    #[tokio::test]
    async fn every_ticker_failing_is_degraded() {
        let source = StaticPriceSource::default();
        let list = watchlist(&[("A", spec(Some(1.0), None)), ("B", spec(None, Some(1.0)))]);

        let outcome = evaluate(&list, &source, &options(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.alerts.is_empty());
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome.degraded);
    }

    #[tokio::test]
    async fn empty_watchlist_is_not_degraded() {
        let source = StaticPriceSource::default();
        let outcome = evaluate(
            &Watchlist::new(),
            &source,
            &options(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, BatchOutcome::default());
    }

    #[tokio::test]
    async fn every_ticker_accounted_for_once() {
        let source = StaticPriceSource::default()
            .range("A", 10.0, 20.0, 15.0)
            .range("B", 10.0, 20.0, 15.0)
            .with("C", Scripted::Timeout);
        let list = watchlist(&[
            ("A", spec(Some(12.0), Some(18.0))),
            ("B", spec(Some(5.0), None)),
            ("C", spec(Some(5.0), None)),
        ]);

        let outcome = evaluate(&list, &source, &options(), &CancellationToken::new())
            .await
            .unwrap();

        let mut calls = source.calls();
        calls.sort();
        assert_eq!(calls, vec!["A", "B", "C"]);
        assert_eq!(outcome.alerts.len(), 2);
        assert!(outcome.alerts.iter().all(|a| a.ticker == "A"));
        assert_eq!(outcome.errors.len(), 1);
        assert!(!outcome.degraded);
    }

    #[tokio::test]
    async fn cancelled_evaluation_discards_partial_results() {
        let source = StaticPriceSource::default().range("A", 1.0, 2.0, 1.5);
        let list = watchlist(&[("A", spec(Some(5.0), None))]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = evaluate(&list, &source, &options(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            report.current_context(),
            EvaluationError::Cancelled
        ));
    }

    #[tokio::test]
    async fn evaluation_runs_on_spawned_task() {
        let source = std::sync::Arc::new(
            StaticPriceSource::default()
                .range("AAPL", 168.0, 175.0, 172.0)
                .range("MSFT", 395.0, 405.0, 400.0),
        );
        let list = watchlist(&[
            ("AAPL", spec(Some(170.0), None)),
            ("MSFT", spec(None, Some(400.0))),
            ("ZZZZ", spec(Some(1.0), None)),
        ]);

        let outcome = tokio::spawn(async move {
            evaluate(&list, source.as_ref(), &options(), &CancellationToken::new()).await
        })
        .await
        .unwrap()
        .unwrap();

        let tickers: Vec<&str> = outcome.alerts.iter().map(|a| a.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].ticker, "ZZZZ");
    }

    #[test]
    fn into_result_carries_degraded_flag() {
        let outcome = BatchOutcome {
            degraded: true,
            ..BatchOutcome::default()
        };
        let result = outcome.into_result(Utc::now());
        assert!(result.service_degraded);
        assert!(result.alerts.is_empty());
    }
}
