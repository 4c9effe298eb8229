use std::time::Duration;

use error_stack::{Report, ResultExt};
use reqwest::StatusCode;
use tracing::debug;

use crate::error::ApiError;
use crate::model::{EvaluationResult, Watchlist};

pub const API_KEY_HEADER: &str = "X-API-Key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for a remote `serve` instance's `/check-alerts` endpoint.
pub struct AlertApiClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl AlertApiClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    pub async fn check_alerts(
        &self,
        watchlist: &Watchlist,
    ) -> Result<EvaluationResult, Report<ApiError>> {
        debug!(url = %self.url, tickers = watchlist.len(), "requesting remote evaluation");

        let response = self
            .client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(watchlist)
            .send()
            .await
            .change_context(ApiError::Request)
            .attach_with(|| format!("url: {}", self.url))?;

        let status = response.status();
        if let Some(context) = status_failure(status) {
            let body = response.text().await.unwrap_or_default();
            return Err(Report::new(context).attach(format!("body: {body}")));
        }

        response
            .json::<EvaluationResult>()
            .await
            .change_context(ApiError::ResponseParse)
    }
}

fn status_failure(status: StatusCode) -> Option<ApiError> {
    if status.is_success() {
        None
    } else if status == StatusCode::UNAUTHORIZED {
        Some(ApiError::Unauthorized)
    } else {
        Some(ApiError::Status {
            status: status.as_u16(),
        })
    }
}
