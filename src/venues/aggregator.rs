use bigdecimal::BigDecimal;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::VenueError;
use crate::types::{Quote, QuoteFailure, QuoteSet};
use crate::venues::VenueAdapter;

/// Round trips slower than this are reported as degraded venues.
pub const HIGH_LATENCY_MS: u64 = 500;

/// Fans a quote request out to every venue of an asset and joins the results.
#[derive(Debug, Clone)]
pub struct QuoteAggregator {
    high_latency_ms: u64,
}

impl Default for QuoteAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteAggregator {
    pub fn new() -> Self {
        Self {
            high_latency_ms: HIGH_LATENCY_MS,
        }
    }

    /// Calls every venue concurrently, each bounded by `timeout`. Quotes come back in
    /// venue order; venues that fail or time out are listed in `failures`.
    pub async fn collect_quotes(
        &self,
        asset: &str,
        venues: &[Arc<dyn VenueAdapter>],
        timeout: Duration,
    ) -> QuoteSet {
        let calls = venues
            .iter()
            .map(|venue| self.fetch_one(venue.as_ref(), asset, timeout));

        let mut set = QuoteSet::default();
        for (venue, result) in venues.iter().zip(join_all(calls).await) {
            match result {
                Ok(quote) => set.quotes.push(quote),
                Err(error) => {
                    warn!("Failed to get {} quote from {}: {}", asset, venue.id(), error);
                    set.failures.push(QuoteFailure {
                        venue_id: venue.id().to_string(),
                        error,
                    });
                }
            }
        }

        debug!(
            "Collected {} quotes for {} ({} failures)",
            set.quotes.len(),
            asset,
            set.failures.len()
        );
        set
    }

    async fn fetch_one(
        &self,
        venue: &dyn VenueAdapter,
        asset: &str,
        timeout: Duration,
    ) -> Result<Quote, VenueError> {
        let started = Instant::now();

        let quote = tokio::time::timeout(timeout, venue.fetch_quote(asset))
            .await
            .map_err(|_| VenueError::Timeout {
                venue: venue.id().to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })??;

        let latency_ms = started.elapsed().as_millis() as u64;
        if latency_ms > self.high_latency_ms {
            warn!("High latency for {}: {} ms", venue.id(), latency_ms);
        }

        validate_quote(venue.id(), asset, &quote)?;

        Ok(Quote {
            venue_id: venue.id().to_string(),
            latency_ms,
            ..quote
        })
    }
}

fn validate_quote(venue_id: &str, asset: &str, quote: &Quote) -> Result<(), VenueError> {
    if quote.price <= BigDecimal::from(0) {
        return Err(VenueError::InvalidQuote {
            venue: venue_id.to_string(),
            reason: format!("non-positive price {}", quote.price),
        });
    }
    if quote.asset != asset {
        return Err(VenueError::InvalidQuote {
            venue: venue_id.to_string(),
            reason: format!("quote is for {}, expected {}", quote.asset, asset),
        });
    }
    Ok(())
}

pub fn find_best_prices(quotes: &[Quote]) -> (Option<&Quote>, Option<&Quote>) {
    let mut lowest: Option<&Quote> = None;
    let mut highest: Option<&Quote> = None;

    for quote in quotes {
        if lowest.map_or(true, |current| quote.price < current.price) {
            lowest = Some(quote);
        }
        if highest.map_or(true, |current| quote.price > current.price) {
            highest = Some(quote);
        }
    }

    (lowest, highest)
}

/// Highest minus lowest price across venues.
pub fn price_spread(quotes: &[Quote]) -> Option<BigDecimal> {
    match find_best_prices(quotes) {
        (Some(low), Some(high)) => Some(&high.price - &low.price),
        _ => None,
    }
}
