pub mod chain;
pub mod http;
pub mod oracle;

pub use chain::GasPriceFeeSource;
pub use http::HttpFeeSource;
pub use oracle::FeeOracle;

use anyhow::Result;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{FeeConfig, FeeSourceConfig};
use crate::error::FeeSourceError;

/// One network/settlement cost provider, reporting the fee in quote currency.
#[async_trait]
pub trait FeeSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_fee(&self, asset: &str) -> Result<BigDecimal, FeeSourceError>;
}

pub fn create_fee_sources(config: &FeeConfig) -> Result<Vec<Arc<dyn FeeSource>>> {
    let timeout = Duration::from_millis(config.request_timeout_ms);
    let mut sources: Vec<Arc<dyn FeeSource>> = Vec::with_capacity(config.sources.len());

    for source_config in &config.sources {
        let source: Arc<dyn FeeSource> = match source_config {
            FeeSourceConfig::Http {
                name,
                url,
                fee_pointer,
                divisor,
            } => {
                Arc::new(HttpFeeSource::new(name, url, fee_pointer, divisor, timeout)?)
            }
            FeeSourceConfig::GasPrice {
                name,
                rpc_url,
                gas_limit,
                native_price,
            } => {
                Arc::new(GasPriceFeeSource::new(name, rpc_url, *gas_limit, native_price)?)
            }
        };
        tracing::debug!("Fee source {} configured", source_config.name());
        sources.push(source);
    }

    tracing::info!("Configured {} fee sources", sources.len());
    Ok(sources)
}
