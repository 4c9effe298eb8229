use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::error::QuoteError;
use crate::model::PriceRange;
use crate::quote::PriceSource;

const YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";
// The chart endpoint rejects requests without a browser-like agent.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) stockmon/0.1";
const CHART_INTERVAL: &str = "1h";
const DEFAULT_REQUESTS_PER_SECOND: NonZeroU32 = nonzero!(5u32);

/// Price source backed by the Yahoo Finance chart API.
pub struct YahooQuoteSource {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    timeout: Duration,
    base_url: String,
}

impl YahooQuoteSource {
    pub fn new(timeout: Duration, requests_per_second: u32) -> Self {
        Self::with_base_url(YAHOO_BASE_URL, timeout, requests_per_second)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        timeout: Duration,
        requests_per_second: u32,
    ) -> Self {
        let per_second =
            NonZeroU32::new(requests_per_second).unwrap_or(DEFAULT_REQUESTS_PER_SECOND);
        Self {
            client: reqwest::Client::new(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            timeout,
            base_url: base_url.into(),
        }
    }

    async fn fetch_chart(
        &self,
        ticker: &str,
        window_hours: u32,
    ) -> Result<ChartEnvelope, Report<QuoteError>> {
        let url = chart_url(&self.base_url, ticker)?;

        // Wait for rate limiter before making the request
        self.rate_limiter.until_ready().await;

        let params = [
            ("range", chart_range(window_hours)),
            ("interval", CHART_INTERVAL),
        ];

        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .query(&params)
            .send()
            .await
            .map_err(|e| transport_failure(ticker, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Report::new(QuoteError::InvalidSymbol {
                reason: format!("ticker '{ticker}' not found"),
            }));
        }
        if !status.is_success() {
            return Err(Report::new(QuoteError::Unknown {
                reason: format!("price request for '{ticker}' returned HTTP {status}"),
            }));
        }

        response
            .json::<ChartEnvelope>()
            .await
            .map_err(|e| transport_failure(ticker, e))
    }
}

impl PriceSource for YahooQuoteSource {
    fn lookup(
        &self,
        ticker: &str,
        window_hours: u32,
    ) -> BoxFuture<'_, Result<PriceRange, Report<QuoteError>>> {
        let ticker = ticker.to_owned();
        Box::pin(async move {
            let fetch = self.fetch_chart(&ticker, window_hours);
            let chart = match tokio::time::timeout(self.timeout, fetch).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Report::new(QuoteError::Timeout {
                        reason: format!(
                            "fetching data for ticker '{ticker}' exceeded {} seconds",
                            self.timeout.as_secs()
                        ),
                    }));
                }
            };

            let range = range_from_chart(&ticker, chart, window_hours)?;
            debug!(
                ticker = %ticker,
                low = range.low,
                high = range.high,
                last = range.last,
                "price range fetched"
            );
            Ok(range)
        })
    }
}

fn transport_failure(ticker: &str, err: reqwest::Error) -> Report<QuoteError> {
    let context = if err.is_timeout() {
        QuoteError::Timeout {
            reason: format!("request for ticker '{ticker}' timed out"),
        }
    } else {
        QuoteError::Unknown {
            reason: format!("request for ticker '{ticker}' failed: {err}"),
        }
    };
    Report::new(err).change_context(context)
}

/// Chart endpoint for `ticker`, with the symbol encoded as a single path
/// segment so reserved characters cannot alter the request.
fn chart_url(base_url: &str, ticker: &str) -> Result<Url, Report<QuoteError>> {
    if ticker.trim().is_empty() || ticker == "." || ticker == ".." {
        return Err(Report::new(QuoteError::InvalidSymbol {
            reason: format!("'{ticker}' is not a ticker symbol"),
        }));
    }

    let base_failure = || QuoteError::Unknown {
        reason: format!("invalid price source URL '{base_url}'"),
    };
    let mut url =
        Url::parse(base_url).map_err(|e| Report::new(e).change_context(base_failure()))?;
    url.path_segments_mut()
        .map_err(|()| Report::new(base_failure()))?
        .pop_if_empty()
        .extend(["v8", "finance", "chart", ticker]);
    Ok(url)
}

fn chart_range(window_hours: u32) -> &'static str {
    match window_hours {
        0..=24 => "1d",
        25..=120 => "5d",
        _ => "1mo",
    }
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChartErrorBody {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<QuoteColumns>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteColumns {
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Reduce hourly chart rows to a (low, high, last) range over the trailing
/// `window_hours`, measured back from the newest row.
///
/// Rows with any missing price are skipped.
fn range_from_chart(
    ticker: &str,
    envelope: ChartEnvelope,
    window_hours: u32,
) -> Result<PriceRange, Report<QuoteError>> {
    if let Some(err) = envelope.chart.error {
        return Err(Report::new(QuoteError::InvalidSymbol {
            reason: format!(
                "{} ({})",
                err.description.as_deref().unwrap_or("no description"),
                err.code.as_deref().unwrap_or("no code"),
            ),
        }));
    }

    let no_data = || {
        Report::new(QuoteError::InvalidSymbol {
            reason: format!(
                "No data available for ticker '{ticker}'. The ticker may be invalid or not found."
            ),
        })
    };

    let result = envelope
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .filter(|r| !r.timestamp.is_empty())
        .ok_or_else(no_data)?;

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let missing: Vec<&str> = [
        ("low", quote.low.is_empty()),
        ("high", quote.high.is_empty()),
        ("close", quote.close.is_empty()),
    ]
    .into_iter()
    .filter_map(|(name, empty)| empty.then_some(name))
    .collect();
    if !missing.is_empty() {
        return Err(Report::new(QuoteError::InvalidSymbol {
            reason: format!("missing required data columns for ticker '{ticker}': {missing:?}"),
        }));
    }

    let newest = result.timestamp.iter().copied().max().unwrap_or_default();
    let cutoff = newest - i64::from(window_hours) * 3600;

    let rows: Vec<(f64, f64, f64)> = result
        .timestamp
        .iter()
        .enumerate()
        .filter(|(_, ts)| **ts >= cutoff)
        .filter_map(|(i, _)| {
            let low = quote.low.get(i).copied().flatten()?;
            let high = quote.high.get(i).copied().flatten()?;
            let close = quote.close.get(i).copied().flatten()?;
            Some((low, high, close))
        })
        .collect();

    let Some(&(_, _, last)) = rows.last() else {
        return Err(Report::new(QuoteError::NoData {
            reason: format!(
                "No valid price data available for ticker '{ticker}'. \
                 The market may be closed or data is unavailable."
            ),
        }));
    };

    let low = rows.iter().map(|r| r.0).fold(f64::INFINITY, f64::min);
    let high = rows.iter().map(|r| r.1).fold(f64::NEG_INFINITY, f64::max);

    Ok(PriceRange { low, high, last })
}
