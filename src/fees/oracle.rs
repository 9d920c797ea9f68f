use bigdecimal::BigDecimal;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult, FeeSourceError};
use crate::fees::FeeSource;
use crate::types::FeeEstimate;

#[derive(Debug, Clone)]
struct CachedFee {
    estimate: FeeEstimate,
    fetched_at: Instant,
}

type FeeSlot = Arc<AsyncMutex<Option<CachedFee>>>;

/// Per-asset fee cache with a fixed TTL. Each asset key has its own async lock, so
/// concurrent callers for the same asset share a single refresh.
pub struct FeeOracle {
    sources: Vec<Arc<dyn FeeSource>>,
    default_ttl: Duration,
    source_timeout: Duration,
    ttl_overrides: HashMap<String, Duration>,
    slots: Mutex<HashMap<String, FeeSlot>>,
}

impl FeeOracle {
    pub fn new(
        sources: Vec<Arc<dyn FeeSource>>,
        default_ttl: Duration,
        source_timeout: Duration,
    ) -> Self {
        Self {
            sources,
            default_ttl,
            source_timeout,
            ttl_overrides: HashMap::new(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_asset_ttl(mut self, asset: &str, ttl: Duration) -> Self {
        self.ttl_overrides.insert(asset.to_string(), ttl);
        self
    }

    fn ttl_for(&self, asset: &str) -> Duration {
        self.ttl_overrides
            .get(asset)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    fn slot(&self, asset: &str) -> FeeSlot {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots
            .entry(asset.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    pub async fn estimate_fee(&self, asset: &str) -> EngineResult<FeeEstimate> {
        let slot = self.slot(asset);
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl_for(asset) {
                debug!("Using cached fee for {}: {}", asset, cached.estimate.fee);
                return Ok(cached.estimate.clone());
            }
        }

        match self.query_sources(asset).await {
            Some(estimate) => {
                *entry = Some(CachedFee {
                    estimate: estimate.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(estimate)
            }
            None => match entry.as_ref() {
                Some(cached) => {
                    warn!(
                        "All fee sources failed for {}, using last known fee {} from {}",
                        asset, cached.estimate.fee, cached.estimate.source
                    );
                    Ok(FeeEstimate {
                        is_stale: true,
                        ..cached.estimate.clone()
                    })
                }
                None => Err(EngineError::NoFeeDataAvailable {
                    asset: asset.to_string(),
                }),
            },
        }
    }

    /// Last cached estimate, without triggering a refresh.
    pub async fn cached(&self, asset: &str) -> Option<FeeEstimate> {
        let slot = self.slot(asset);
        let entry = slot.lock().await;
        entry.as_ref().map(|cached| cached.estimate.clone())
    }

    /// Queries every source concurrently and keeps the cheapest valid fee.
    async fn query_sources(&self, asset: &str) -> Option<FeeEstimate> {
        let calls = self.sources.iter().map(|source| async move {
            match tokio::time::timeout(self.source_timeout, source.fetch_fee(asset)).await {
                Ok(result) => result,
                Err(_) => Err(FeeSourceError::Transport {
                    source_name: source.name().to_string(),
                    message: format!("timed out after {}ms", self.source_timeout.as_millis()),
                }),
            }
        });
        let results = join_all(calls).await;

        let mut cheapest: Option<(BigDecimal, &str)> = None;
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(fee) if fee < BigDecimal::from(0) => {
                    warn!("Ignoring negative fee {} from {}", fee, source.name());
                }
                Ok(fee) => {
                    if cheapest.as_ref().map_or(true, |(best, _)| fee < *best) {
                        cheapest = Some((fee, source.name()));
                    }
                }
                Err(e) => warn!("Fee source {} failed for {}: {}", source.name(), asset, e),
            }
        }

        cheapest.map(|(fee, source)| {
            info!("Cheapest fee for {}: {} ({})", asset, fee, source);
            FeeEstimate {
                asset: asset.to_string(),
                fee,
                source: source.to_string(),
                timestamp: Utc::now(),
                is_stale: false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dec, MockFeeSource};

    fn oracle_with(sources: Vec<Arc<MockFeeSource>>, ttl: Duration) -> FeeOracle {
        let sources = sources
            .into_iter()
            .map(|s| s as Arc<dyn FeeSource>)
            .collect();
        FeeOracle::new(sources, ttl, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_cache_hit_does_not_query_sources() {
        let source = Arc::new(MockFeeSource::with_fee("station", "1.5"));
        let oracle = oracle_with(vec![source.clone()], Duration::from_secs(60));

        let first = oracle.estimate_fee("ETH").await.unwrap();
        let second = oracle.estimate_fee("ETH").await.unwrap();

        assert_eq!(source.call_count(), 1);
        assert_eq!(first.fee, dec("1.5"));
        assert_eq!(second, first);
        assert!(!second.is_stale);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refreshed() {
        let source = Arc::new(MockFeeSource::with_fee("station", "1.5"));
        let oracle = oracle_with(vec![source.clone()], Duration::from_millis(20));

        oracle.estimate_fee("ETH").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        source.set_fee("2");
        let refreshed = oracle.estimate_fee("ETH").await.unwrap();

        assert_eq!(source.call_count(), 2);
        assert_eq!(refreshed.fee, dec("2"));
    }

    #[tokio::test]
    async fn test_takes_cheapest_source() {
        let etherscan = Arc::new(MockFeeSource::with_fee("etherscan", "3"));
        let station = Arc::new(MockFeeSource::with_fee("station", "1.2"));
        let blocknative = Arc::new(MockFeeSource::failing("blocknative"));
        let oracle = oracle_with(vec![etherscan, station, blocknative], Duration::from_secs(60));

        let estimate = oracle.estimate_fee("ETH").await.unwrap();

        assert_eq!(estimate.fee, dec("1.2"));
        assert_eq!(estimate.source, "station");
    }

    #[tokio::test]
    async fn test_tie_keeps_first_source() {
        let first = Arc::new(MockFeeSource::with_fee("first", "1"));
        let second = Arc::new(MockFeeSource::with_fee("second", "1.0"));
        let oracle = oracle_with(vec![first, second], Duration::from_secs(60));

        assert_eq!(oracle.estimate_fee("ETH").await.unwrap().source, "first");
    }

    #[tokio::test]
    async fn test_falls_back_to_stale_value() {
        let source = Arc::new(MockFeeSource::with_fee("station", "1.5"));
        let oracle = oracle_with(vec![source.clone()], Duration::from_millis(10));

        oracle.estimate_fee("ETH").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        source.fail();

        let stale = oracle.estimate_fee("ETH").await.unwrap();
        assert!(stale.is_stale);
        assert_eq!(stale.fee, dec("1.5"));
    }

    #[tokio::test]
    async fn test_no_data_available() {
        let oracle = oracle_with(
            vec![Arc::new(MockFeeSource::failing("station"))],
            Duration::from_secs(60),
        );

        let err = oracle.estimate_fee("ETH").await.unwrap_err();
        assert_eq!(
            err,
            EngineError::NoFeeDataAvailable {
                asset: "ETH".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_negative_fee_is_ignored() {
        let broken = Arc::new(MockFeeSource::with_fee("broken", "-1"));
        let station = Arc::new(MockFeeSource::with_fee("station", "0.4"));
        let oracle = oracle_with(vec![broken, station], Duration::from_secs(60));

        assert_eq!(oracle.estimate_fee("ETH").await.unwrap().fee, dec("0.4"));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let source =
            Arc::new(MockFeeSource::with_fee("station", "1").delay(Duration::from_millis(50)));
        let oracle = Arc::new(oracle_with(vec![source.clone()], Duration::from_secs(60)));

        let calls = (0..8).map(|_| {
            let oracle = oracle.clone();
            async move { oracle.estimate_fee("ETH").await }
        });
        let results = join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_assets_are_cached_independently() {
        let source = Arc::new(MockFeeSource::with_fee("station", "1"));
        let oracle = oracle_with(vec![source.clone()], Duration::from_secs(60))
            .with_asset_ttl("BTC", Duration::from_millis(10));

        oracle.estimate_fee("ETH").await.unwrap();
        oracle.estimate_fee("BTC").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        oracle.estimate_fee("ETH").await.unwrap();
        oracle.estimate_fee("BTC").await.unwrap();

        // ETH still cached, BTC expired under its shorter TTL
        assert_eq!(source.call_count(), 3);
        assert!(oracle.cached("ETH").await.is_some());
    }
}
