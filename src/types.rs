use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::VenueError;

/// A single venue's price for an asset, valid for one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub venue_id: String,
    pub asset: String,
    pub price: BigDecimal,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
}

impl Quote {
    pub fn new(venue_id: impl Into<String>, asset: impl Into<String>, price: BigDecimal) -> Self {
        Self {
            venue_id: venue_id.into(),
            asset: asset.into(),
            price,
            timestamp: Utc::now(),
            latency_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub asset: String,
    pub fee: BigDecimal,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub is_stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub asset: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub buy_price: BigDecimal,
    pub sell_price: BigDecimal,
    pub gross_spread: BigDecimal,
    pub fee: BigDecimal,
    pub net_profit: BigDecimal,
    pub trade_amount: BigDecimal,
}

impl Opportunity {
    /// Builds the opportunity for buying on `buy` and selling on `sell`.
    /// `net_profit = (sell - buy) * amount - fee`.
    pub fn from_quotes(
        buy: &Quote,
        sell: &Quote,
        trade_amount: &BigDecimal,
        fee: &BigDecimal,
    ) -> Self {
        let gross_spread = &sell.price - &buy.price;
        let net_profit = &gross_spread * trade_amount - fee;

        Self {
            asset: buy.asset.clone(),
            buy_venue: buy.venue_id.clone(),
            sell_venue: sell.venue_id.clone(),
            buy_price: buy.price.clone(),
            sell_price: sell.price.clone(),
            gross_spread,
            fee: fee.clone(),
            net_profit,
            trade_amount: trade_amount.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Venue acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub venue_id: String,
    pub side: OrderSide,
    pub order_id: String,
    pub filled_amount: BigDecimal,
    pub average_price: Option<BigDecimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Filled,
    PartiallyFilled,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Filled => "filled",
            ExecutionStatus::PartiallyFilled => "partially_filled",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: Uuid,
    pub opportunity: Opportunity,
    pub requested_amount: BigDecimal,
    pub status: ExecutionStatus,
    pub requested_at: DateTime<Utc>,
}

impl ExecutionRequest {
    pub fn new(opportunity: Opportunity) -> Self {
        Self {
            id: Uuid::new_v4(),
            requested_amount: opportunity.trade_amount.clone(),
            opportunity,
            status: ExecutionStatus::Pending,
            requested_at: Utc::now(),
        }
    }

    pub fn asset(&self) -> &str {
        &self.opportunity.asset
    }
}

/// Terminal record of an execution, handed to reporting once resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: Uuid,
    pub opportunity: Opportunity,
    pub requested_amount: BigDecimal,
    pub status: ExecutionStatus,
    pub buy_order: Option<OrderResult>,
    pub sell_order: Option<OrderResult>,
    pub realized_slippage: Option<BigDecimal>,
    pub realized_profit: Option<BigDecimal>,
    pub error: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn from_request(request: &ExecutionRequest, status: ExecutionStatus) -> Self {
        Self {
            id: request.id,
            opportunity: request.opportunity.clone(),
            requested_amount: request.requested_amount.clone(),
            status,
            buy_order: None,
            sell_order: None,
            realized_slippage: None,
            realized_profit: None,
            error: None,
            requested_at: request.requested_at,
            resolved_at: Utc::now(),
        }
    }

    pub fn asset(&self) -> &str {
        &self.opportunity.asset
    }

    /// An unhedged position is open: bought but never sold.
    pub fn is_unhedged(&self) -> bool {
        self.status == ExecutionStatus::PartiallyFilled
    }
}

#[derive(Debug, Clone)]
pub struct QuoteFailure {
    pub venue_id: String,
    pub error: VenueError,
}

/// Output of one fan-out to every venue of an asset.
#[derive(Debug, Clone, Default)]
pub struct QuoteSet {
    pub quotes: Vec<Quote>,
    pub failures: Vec<QuoteFailure>,
}

impl QuoteSet {
    pub fn is_tradeable(&self) -> bool {
        self.quotes.len() >= 2
    }
}

/// Per-asset state. At most one non-terminal execution per asset at any time.
#[derive(Debug, Clone, Default)]
pub struct AssetCycleState {
    pub last_cycle_time: Option<DateTime<Utc>>,
    pub in_flight_execution: Option<ExecutionRequest>,
    pub consecutive_failures: u32,
    /// Partial fill awaiting operator acknowledgement; cycles stay halted while set.
    pub suspended_by: Option<ExecutionResult>,
}

impl AssetCycleState {
    pub fn is_idle(&self) -> bool {
        self.in_flight_execution.is_none()
    }
}
