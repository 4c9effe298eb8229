pub mod yahoo;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::QuoteError;
use crate::model::PriceRange;

/// Source of trailing-window price ranges.
///
/// Implementations apply their own timeout and classify every failure into
/// one of the [`QuoteError`] kinds.
pub trait PriceSource: Send + Sync {
    fn lookup(
        &self,
        ticker: &str,
        window_hours: u32,
    ) -> BoxFuture<'_, Result<PriceRange, Report<QuoteError>>>;
}
