use anyhow::{anyhow, Result};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::{
    database::models::*,
    types::{ExecutionResult, ExecutionStatus},
};

pub struct ExecutionRepository {
    pool: PgPool,
}

impl ExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn save_execution_result(&self, result: &ExecutionResult) -> Result<()> {
        let row = ExecutionResultRow::from(result);

        sqlx::query(
            r#"
            INSERT INTO execution_results (
                id, asset, buy_venue, sell_venue, quoted_buy_price, quoted_sell_price,
                fee, expected_net_profit, requested_amount, status,
                buy_order_id, buy_filled_amount, buy_fill_price,
                sell_order_id, sell_filled_amount, sell_fill_price,
                realized_slippage, realized_profit, error, requested_at, resolved_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17, $18, $19, $20, $21
            )
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&row.id)
        .bind(&row.asset)
        .bind(&row.buy_venue)
        .bind(&row.sell_venue)
        .bind(&row.quoted_buy_price)
        .bind(&row.quoted_sell_price)
        .bind(&row.fee)
        .bind(&row.expected_net_profit)
        .bind(&row.requested_amount)
        .bind(&row.status)
        .bind(&row.buy_order_id)
        .bind(&row.buy_filled_amount)
        .bind(&row.buy_fill_price)
        .bind(&row.sell_order_id)
        .bind(&row.sell_filled_amount)
        .bind(&row.sell_fill_price)
        .bind(&row.realized_slippage)
        .bind(&row.realized_profit)
        .bind(&row.error)
        .bind(&row.requested_at)
        .bind(&row.resolved_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to save execution result: {}", e))?;

        debug!("Saved execution result {} ({})", row.id, row.status);
        Ok(())
    }

    /// Partial fills since `since`; each one is an open position someone has to close.
    pub async fn get_unhedged_results(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ExecutionResultRow>> {
        sqlx::query_as::<_, ExecutionResultRow>(
            r#"
            SELECT * FROM execution_results
            WHERE status = $1 AND resolved_at >= $2
            ORDER BY resolved_at DESC
            "#,
        )
        .bind(ExecutionStatus::PartiallyFilled.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to fetch unhedged execution results: {}", e))
    }

    pub async fn get_execution_stats(&self, days: i32) -> Result<ExecutionStats> {
        let start_time = Utc::now() - Duration::days(days as i64);

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total_executions,
                COUNT(*) FILTER (WHERE status = 'filled') as filled,
                COUNT(*) FILTER (WHERE status = 'partially_filled') as partially_filled,
                COUNT(*) FILTER (WHERE status = 'failed') as failed,
                COALESCE(SUM(realized_profit), 0) as total_realized_profit,
                COALESCE(AVG(realized_profit), 0) as average_realized_profit,
                COALESCE(SUM(realized_slippage), 0) as total_slippage
            FROM execution_results
            WHERE resolved_at >= $1
            "#,
        )
        .bind(start_time)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to fetch execution stats: {}", e))?;

        let total_executions: i64 = row.try_get("total_executions")?;
        let filled: i64 = row.try_get("filled")?;
        let partially_filled: i64 = row.try_get("partially_filled")?;
        let failed: i64 = row.try_get("failed")?;
        let total_realized_profit: BigDecimal = row.try_get("total_realized_profit")?;
        let average_realized_profit: BigDecimal = row.try_get("average_realized_profit")?;
        let total_slippage: BigDecimal = row.try_get("total_slippage")?;

        let most_profitable_venue_pair = self.get_most_profitable_venue_pair(start_time).await?;

        Ok(ExecutionStats {
            total_executions,
            filled,
            partially_filled,
            failed,
            total_realized_profit,
            average_realized_profit,
            total_slippage,
            most_profitable_venue_pair,
        })
    }

    async fn get_most_profitable_venue_pair(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Option<(String, String)>> {
        let row = sqlx::query(
            r#"
            SELECT buy_venue, sell_venue, SUM(realized_profit) as profit
            FROM execution_results
            WHERE resolved_at >= $1 AND realized_profit IS NOT NULL
            GROUP BY buy_venue, sell_venue
            ORDER BY profit DESC
            LIMIT 1
            "#,
        )
        .bind(since)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to fetch most profitable venue pair: {}", e))?;

        if let Some(row) = row {
            let buy_venue: String = row.try_get("buy_venue")?;
            let sell_venue: String = row.try_get("sell_venue")?;
            Ok(Some((buy_venue, sell_venue)))
        } else {
            Ok(None)
        }
    }

    /// Deletes resolved results older than `days_to_keep`. Partial fills are kept.
    pub async fn cleanup_old_data(&self, days_to_keep: i32) -> Result<u64> {
        let cutoff_time = Utc::now() - Duration::days(days_to_keep as i64);

        let deleted = sqlx::query(
            "DELETE FROM execution_results WHERE resolved_at < $1 AND status <> $2",
        )
        .bind(cutoff_time)
        .bind(ExecutionStatus::PartiallyFilled.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("Failed to cleanup old execution results: {}", e))?
        .rows_affected();

        info!("Cleaned up {} old execution results", deleted);
        Ok(deleted)
    }
}
