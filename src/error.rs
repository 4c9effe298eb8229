use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

/// Failure of a single price lookup. The display text is what ends up in the
/// per-ticker error list, so each variant carries its own prefix.
#[derive(Debug, Display, Error)]
pub enum QuoteError {
    #[display("Invalid ticker: {reason}")]
    InvalidSymbol { reason: String },
    #[display("Market closed: {reason}")]
    NoData { reason: String },
    #[display("Timeout: {reason}")]
    Timeout { reason: String },
    #[display("Unexpected error: {reason}")]
    Unknown { reason: String },
}

#[derive(Debug, Display, Error)]
pub enum StoreError {
    #[display("failed to open notification store")]
    Open,
    #[display("failed to read notification history")]
    Read,
    #[display("failed to persist notification history")]
    Write,
}

#[derive(Debug, Display, Error)]
pub enum EvaluationError {
    #[display("evaluation cancelled before every ticker was processed")]
    Cancelled,
}

#[derive(Debug, Display, Error)]
pub enum NotifyError {
    #[display("failed to build notification message")]
    Build,
    #[display("notification transport timed out")]
    Timeout,
    #[display("could not reach notification transport")]
    Connection,
    #[display("notification transport rejected credentials")]
    Auth,
    #[display("notification transport rejected the message")]
    Rejected,
}

impl NotifyError {
    /// Timeouts and connection problems may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection)
    }
}

#[derive(Debug, Display, Error)]
pub enum ApiError {
    #[display("request to alert API failed")]
    Request,
    #[display("alert API rejected the API key")]
    Unauthorized,
    #[display("alert API returned HTTP {status}")]
    Status { status: u16 },
    #[display("failed to parse alert API response")]
    ResponseParse,
}

#[derive(Debug, Display, Error)]
pub enum CycleError {
    #[display("failed to obtain alerts")]
    Evaluation,
    #[display("failed to persist notification state")]
    Persistence,
}
