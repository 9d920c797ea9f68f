use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use ethers::{
    providers::{Http, Middleware, Provider},
    types::U256,
};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::FeeSourceError;
use crate::fees::FeeSource;

/// Settlement cost derived from the current gas price of an EVM chain:
/// `gas_price * gas_limit` in native units, converted with `native_price`.
pub struct GasPriceFeeSource {
    name: String,
    provider: Provider<Http>,
    gas_limit: u64,
    native_price: BigDecimal,
}

impl GasPriceFeeSource {
    pub fn new(name: &str, rpc_url: &str, gas_limit: u64, native_price: &str) -> Result<Self> {
        info!("Fee source {} using RPC {}", name, rpc_url);

        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| anyhow!("Failed to create provider for {}: {}", name, e))?;
        let native_price = BigDecimal::from_str(native_price)
            .map_err(|e| anyhow!("Invalid native_price for {}: {}", name, e))?;

        Ok(Self {
            name: name.to_string(),
            provider,
            gas_limit,
            native_price,
        })
    }
}

#[async_trait]
impl FeeSource for GasPriceFeeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_fee(&self, asset: &str) -> Result<BigDecimal, FeeSourceError> {
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| FeeSourceError::Transport {
                source_name: self.name.clone(),
                message: e.to_string(),
            })?;

        let fee = settlement_cost(gas_price, self.gas_limit, &self.native_price).map_err(|message| {
            FeeSourceError::Parse {
                source_name: self.name.clone(),
                message,
            }
        })?;

        debug!(
            "{} gas price for {}: {} gwei, settlement cost {}",
            self.name,
            asset,
            wei_to_gwei(gas_price).map(|gwei| gwei.to_string()).unwrap_or_default(),
            fee
        );
        Ok(fee)
    }
}

pub fn u256_to_decimal(value: U256) -> Result<BigDecimal, String> {
    BigDecimal::from_str(&value.to_string()).map_err(|e| e.to_string())
}

pub fn wei_to_ether(wei: U256) -> Result<BigDecimal, String> {
    Ok(u256_to_decimal(wei)? / BigDecimal::from(1_000_000_000_000_000_000u64))
}

pub fn wei_to_gwei(wei: U256) -> Result<BigDecimal, String> {
    Ok(u256_to_decimal(wei)? / BigDecimal::from(1_000_000_000u64))
}

fn settlement_cost(
    gas_price: U256,
    gas_limit: u64,
    native_price: &BigDecimal,
) -> Result<BigDecimal, String> {
    let cost_wei = gas_price
        .checked_mul(U256::from(gas_limit))
        .ok_or_else(|| "gas cost overflow".to_string())?;
    let cost_native = wei_to_ether(cost_wei)?;
    Ok(&cost_native * native_price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::dec;

    #[test]
    fn test_wei_conversions() {
        let one_ether_wei = U256::from(1_000_000_000_000_000_000u64);
        assert_eq!(wei_to_ether(one_ether_wei).unwrap(), dec("1"));

        let one_gwei_wei = U256::from(1_000_000_000u64);
        assert_eq!(wei_to_gwei(one_gwei_wei).unwrap(), dec("1"));
    }

    #[test]
    fn test_settlement_cost() {
        // 30 gwei * 200k gas = 0.006 ETH, at 2000 per ETH = 12
        let gas_price = U256::from(30_000_000_000u64);
        let cost = settlement_cost(gas_price, 200_000, &dec("2000")).unwrap();
        assert_eq!(cost, dec("12"));
    }

    #[test]
    fn test_rejects_bad_rpc_url() {
        assert!(GasPriceFeeSource::new("rpc", "not a url", 21_000, "2000").is_err());
    }
}
