use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::Client;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::error::FeeSourceError;
use crate::fees::FeeSource;
use crate::venues::rest::decimal_at;

/// Fee read from a JSON HTTP endpoint, e.g. a gas station API.
/// The raw value is divided by `divisor` (wei -> native, gwei -> native, ...).
pub struct HttpFeeSource {
    name: String,
    url: String,
    fee_pointer: String,
    divisor: BigDecimal,
    client: Client,
}

impl HttpFeeSource {
    pub fn new(
        name: &str,
        url: &str,
        fee_pointer: &str,
        divisor: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let divisor = BigDecimal::from_str(divisor)
            .map_err(|e| anyhow!("Invalid divisor for fee source {}: {}", name, e))?;
        if divisor <= BigDecimal::from(0) {
            return Err(anyhow!("Divisor for fee source {} must be positive", name));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client for {}: {}", name, e))?;

        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            fee_pointer: fee_pointer.to_string(),
            divisor,
            client,
        })
    }

    fn transport(&self, message: String) -> FeeSourceError {
        FeeSourceError::Transport {
            source_name: self.name.clone(),
            message,
        }
    }
}

#[async_trait]
impl FeeSource for HttpFeeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_fee(&self, asset: &str) -> Result<BigDecimal, FeeSourceError> {
        let url = self.url.replace("{asset}", asset);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.transport(format!("HTTP {}", response.status())));
        }

        let body: Value = response.json().await.map_err(|e| FeeSourceError::Parse {
            source_name: self.name.clone(),
            message: e.to_string(),
        })?;

        let raw = decimal_at(&body, &self.fee_pointer).map_err(|message| FeeSourceError::Parse {
            source_name: self.name.clone(),
            message,
        })?;

        Ok(&raw / &self.divisor)
    }
}
