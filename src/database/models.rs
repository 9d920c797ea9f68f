use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::{ExecutionResult, OrderResult};

/// Flattened audit record of one resolved execution.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionResultRow {
    pub id: Uuid,
    pub asset: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub quoted_buy_price: BigDecimal,
    pub quoted_sell_price: BigDecimal,
    pub fee: BigDecimal,
    pub expected_net_profit: BigDecimal,
    pub requested_amount: BigDecimal,
    pub status: String,
    pub buy_order_id: Option<String>,
    pub buy_filled_amount: Option<BigDecimal>,
    pub buy_fill_price: Option<BigDecimal>,
    pub sell_order_id: Option<String>,
    pub sell_filled_amount: Option<BigDecimal>,
    pub sell_fill_price: Option<BigDecimal>,
    pub realized_slippage: Option<BigDecimal>,
    pub realized_profit: Option<BigDecimal>,
    pub error: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: i64,
    pub filled: i64,
    pub partially_filled: i64,
    pub failed: i64,
    pub total_realized_profit: BigDecimal,
    pub average_realized_profit: BigDecimal,
    pub total_slippage: BigDecimal,
    pub most_profitable_venue_pair: Option<(String, String)>,
}

impl From<&ExecutionResult> for ExecutionResultRow {
    fn from(result: &ExecutionResult) -> Self {
        let opportunity = &result.opportunity;
        let leg = |order: &Option<OrderResult>| {
            order.as_ref().map_or((None, None, None), |o| {
                (
                    Some(o.order_id.clone()),
                    Some(o.filled_amount.clone()),
                    o.average_price.clone(),
                )
            })
        };
        let (buy_order_id, buy_filled_amount, buy_fill_price) = leg(&result.buy_order);
        let (sell_order_id, sell_filled_amount, sell_fill_price) = leg(&result.sell_order);

        Self {
            id: result.id,
            asset: opportunity.asset.clone(),
            buy_venue: opportunity.buy_venue.clone(),
            sell_venue: opportunity.sell_venue.clone(),
            quoted_buy_price: opportunity.buy_price.clone(),
            quoted_sell_price: opportunity.sell_price.clone(),
            fee: opportunity.fee.clone(),
            expected_net_profit: opportunity.net_profit.clone(),
            requested_amount: result.requested_amount.clone(),
            status: result.status.as_str().to_string(),
            buy_order_id,
            buy_filled_amount,
            buy_fill_price,
            sell_order_id,
            sell_filled_amount,
            sell_fill_price,
            realized_slippage: result.realized_slippage.clone(),
            realized_profit: result.realized_profit.clone(),
            error: result.error.clone(),
            requested_at: result.requested_at,
            resolved_at: result.resolved_at,
            created_at: None,
        }
    }
}
