use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    config::VenueConfig,
    error::VenueError,
    types::{OrderResult, OrderSide, Quote},
    venues::traits::VenueAdapter,
};

/// A venue reached over a JSON REST API described entirely by configuration.
pub struct RestVenue {
    id: String,
    config: VenueConfig,
    client: Client,
    api_key: Option<String>,
}

impl RestVenue {
    pub fn new(id: String, config: VenueConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client for {}: {}", id, e))?;

        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .map_err(|_| anyhow!("{} requires environment variable {}", id, var))?,
            ),
            None => None,
        };

        Ok(Self {
            id,
            config,
            client,
            api_key,
        })
    }

    fn url(&self, path_template: &str, asset: &str) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            path_template.replace("{asset}", asset)
        )
    }

    /// Only a failed connect proves the venue never saw the request.
    fn transport_error(&self, error: reqwest::Error) -> VenueError {
        let venue = self.id.clone();
        if error.is_timeout() {
            VenueError::Timeout {
                venue,
                timeout_ms: self.config.request_timeout_ms,
            }
        } else if error.is_connect() {
            VenueError::Transport {
                venue,
                message: error.to_string(),
            }
        } else {
            VenueError::Unconfirmed {
                venue,
                message: error.to_string(),
            }
        }
    }

    fn status_error(&self, status: StatusCode, body: String) -> VenueError {
        let venue = self.id.clone();
        let message = format!("{} - {}", status, body);
        match status {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                VenueError::Transport { venue, message }
            }
            status if status.is_server_error() => VenueError::Unconfirmed { venue, message },
            _ => VenueError::Rejected { venue, message },
        }
    }

    async fn read_json(&self, response: reqwest::Response) -> Result<Value, VenueError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.status_error(status, body));
        }

        response.json::<Value>().await.map_err(|e| VenueError::InvalidQuote {
            venue: self.id.clone(),
            reason: format!("malformed JSON: {}", e),
        })
    }
}

#[async_trait]
impl VenueAdapter for RestVenue {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_quote(&self, asset: &str) -> Result<Quote, VenueError> {
        let url = self.url(&self.config.ticker_path, asset);
        debug!("Fetching {} quote from {}", asset, self.config.name);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let body = self.read_json(response).await?;

        let price = decimal_at(&body, &self.config.price_pointer).map_err(|reason| {
            VenueError::InvalidQuote {
                venue: self.id.clone(),
                reason,
            }
        })?;

        Ok(Quote {
            venue_id: self.id.clone(),
            asset: asset.to_string(),
            price,
            timestamp: Utc::now(),
            latency_ms: 0,
        })
    }

    async fn submit_order(
        &self,
        side: OrderSide,
        asset: &str,
        amount: &BigDecimal,
    ) -> Result<OrderResult, VenueError> {
        let order_path = self.config.order_path.as_ref().ok_or_else(|| VenueError::Unsupported {
            venue: self.id.clone(),
            operation: "order submission".to_string(),
        })?;

        let payload = json!({
            "symbol": asset,
            "side": side.to_string().to_uppercase(),
            "type": "MARKET",
            "quantity": amount.to_string(),
        });

        let mut request = self.client.post(self.url(order_path, asset)).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-KEY", key);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let body = self.read_json(response).await?;

        let order_id = match body.pointer(&self.config.order_id_pointer) {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(VenueError::Rejected {
                    venue: self.id.clone(),
                    message: format!("no order id in response: {}", body),
                })
            }
        };

        // Without a readable fill the order counts as unfilled, never as complete.
        let filled_amount = match &self.config.filled_amount_pointer {
            Some(pointer) => decimal_at(&body, pointer).unwrap_or_else(|reason| {
                warn!(
                    "{} order {} on {} reported no fill ({}), treating it as unfilled",
                    side, order_id, self.config.name, reason
                );
                BigDecimal::from(0)
            }),
            None => amount.clone(),
        };
        let average_price = self
            .config
            .fill_price_pointer
            .as_ref()
            .and_then(|pointer| decimal_at(&body, pointer).ok());

        debug!("{} {} order {} accepted by {}", side, asset, order_id, self.config.name);

        Ok(OrderResult {
            venue_id: self.id.clone(),
            side,
            order_id,
            filled_amount,
            average_price,
        })
    }
}

/// Reads a decimal at a JSON pointer; venues report numbers both as strings and as JSON numbers.
pub fn decimal_at(body: &Value, pointer: &str) -> Result<BigDecimal, String> {
    match body.pointer(pointer) {
        Some(Value::String(raw)) => {
            BigDecimal::from_str(raw.trim()).map_err(|e| format!("'{}' at {}: {}", raw, pointer, e))
        }
        Some(Value::Number(raw)) => {
            BigDecimal::from_str(&raw.to_string())
                .map_err(|e| format!("{} at {}: {}", raw, pointer, e))
        }
        Some(other) => Err(format!("unexpected value {} at {}", other, pointer)),
        None => Err(format!("missing field {}", pointer)),
    }
}
