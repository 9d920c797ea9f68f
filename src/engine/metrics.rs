use anyhow::Result;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::{
    sync::{watch, RwLock},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::engine::events::{consume_events, EngineEvent, EventBus};
use crate::types::{ExecutionResult, ExecutionStatus};

const TRADE_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub started_at: DateTime<Utc>,
    pub total_cycles_completed: u64,
    pub total_cycles_skipped: u64,
    pub total_opportunities_found: u64,
    pub executions_started: u64,
    pub executions_filled: u64,
    pub executions_partially_filled: u64,
    pub executions_failed: u64,
    pub total_realized_profit: BigDecimal,
    pub total_realized_slippage: BigDecimal,
    pub average_profit_per_execution: BigDecimal,
    pub success_rate: f64,
    pub venue_performance: HashMap<String, VenueMetrics>,
    pub asset_performance: HashMap<String, AssetMetrics>,
    pub trade_history: VecDeque<TradeRecord>,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueMetrics {
    pub name: String,
    pub executions_as_buy_side: u64,
    pub executions_as_sell_side: u64,
    pub failed_legs: u64,
    pub total_profit_contribution: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMetrics {
    pub asset: String,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub opportunities_found: u64,
    pub executions: u64,
    pub total_profit: BigDecimal,
    pub best_profit: BigDecimal,
    pub skip_reasons: HashMap<String, u64>,
}

/// One resolved execution, kept for the trade history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub asset: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub amount: BigDecimal,
    pub status: ExecutionStatus,
    pub realized_profit: Option<BigDecimal>,
    pub realized_slippage: Option<BigDecimal>,
    pub resolved_at: DateTime<Utc>,
}

impl From<&ExecutionResult> for TradeRecord {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            id: result.id,
            asset: result.opportunity.asset.clone(),
            buy_venue: result.opportunity.buy_venue.clone(),
            sell_venue: result.opportunity.sell_venue.clone(),
            amount: result.requested_amount.clone(),
            status: result.status,
            realized_profit: result.realized_profit.clone(),
            realized_slippage: result.realized_slippage.clone(),
            resolved_at: result.resolved_at,
        }
    }
}

impl VenueMetrics {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            executions_as_buy_side: 0,
            executions_as_sell_side: 0,
            failed_legs: 0,
            total_profit_contribution: BigDecimal::from(0),
        }
    }
}

impl AssetMetrics {
    fn new(asset: &str) -> Self {
        Self {
            asset: asset.to_string(),
            cycles_completed: 0,
            cycles_skipped: 0,
            opportunities_found: 0,
            executions: 0,
            total_profit: BigDecimal::from(0),
            best_profit: BigDecimal::from(0),
            skip_reasons: HashMap::new(),
        }
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            total_cycles_completed: 0,
            total_cycles_skipped: 0,
            total_opportunities_found: 0,
            executions_started: 0,
            executions_filled: 0,
            executions_partially_filled: 0,
            executions_failed: 0,
            total_realized_profit: BigDecimal::from(0),
            total_realized_slippage: BigDecimal::from(0),
            average_profit_per_execution: BigDecimal::from(0),
            success_rate: 0.0,
            venue_performance: HashMap::new(),
            asset_performance: HashMap::new(),
            trade_history: VecDeque::new(),
            error_count: 0,
            last_error: None,
            last_updated: Utc::now(),
        }
    }

    fn asset_entry(&mut self, asset: &str) -> &mut AssetMetrics {
        self.asset_performance
            .entry(asset.to_string())
            .or_insert_with(|| AssetMetrics::new(asset))
    }

    fn venue_entry(&mut self, venue: &str) -> &mut VenueMetrics {
        self.venue_performance
            .entry(venue.to_string())
            .or_insert_with(|| VenueMetrics::new(venue))
    }

    pub fn record(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::CycleCompleted {
                asset,
                opportunity_found,
                ..
            } => {
                self.total_cycles_completed += 1;
                if *opportunity_found {
                    self.total_opportunities_found += 1;
                }
                let metrics = self.asset_entry(asset);
                metrics.cycles_completed += 1;
                if *opportunity_found {
                    metrics.opportunities_found += 1;
                }
            }
            EngineEvent::CycleSkipped { asset, reason } => {
                self.total_cycles_skipped += 1;
                let metrics = self.asset_entry(asset);
                metrics.cycles_skipped += 1;
                *metrics.skip_reasons.entry(reason.to_string()).or_insert(0) += 1;
            }
            EngineEvent::ExecutionStarted { .. } => {
                self.executions_started += 1;
            }
            EngineEvent::ExecutionResolved { result, .. } => self.record_execution(result),
        }

        self.last_updated = Utc::now();
    }

    fn record_execution(&mut self, result: &ExecutionResult) {
        let opportunity = &result.opportunity;
        self.asset_entry(&opportunity.asset).executions += 1;

        match result.status {
            ExecutionStatus::Filled => {
                self.executions_filled += 1;
                let profit = result.realized_profit.clone().unwrap_or_else(|| BigDecimal::from(0));

                self.total_realized_profit += &profit;
                if let Some(slippage) = &result.realized_slippage {
                    self.total_realized_slippage += slippage;
                }

                let asset = self.asset_entry(&opportunity.asset);
                asset.total_profit += &profit;
                if profit > asset.best_profit {
                    asset.best_profit = profit.clone();
                }

                // Profit is split evenly between the two legs' venues.
                let share = &profit / BigDecimal::from(2);
                let buy = self.venue_entry(&opportunity.buy_venue);
                buy.executions_as_buy_side += 1;
                buy.total_profit_contribution += &share;
                let sell = self.venue_entry(&opportunity.sell_venue);
                sell.executions_as_sell_side += 1;
                sell.total_profit_contribution += &share;
            }
            ExecutionStatus::PartiallyFilled => {
                self.executions_partially_filled += 1;
                self.venue_entry(&opportunity.buy_venue).executions_as_buy_side += 1;
                self.venue_entry(&opportunity.sell_venue).failed_legs += 1;
                self.record_error(result.error.as_deref().unwrap_or("partial fill"));
            }
            ExecutionStatus::Failed => {
                self.executions_failed += 1;
                self.venue_entry(&opportunity.buy_venue).failed_legs += 1;
                self.record_error(result.error.as_deref().unwrap_or("execution failed"));
            }
            ExecutionStatus::Pending => {}
        }

        if self.executions_filled > 0 {
            self.average_profit_per_execution =
                &self.total_realized_profit / BigDecimal::from(self.executions_filled);
        }
        self.calculate_success_rate();

        self.trade_history.push_back(TradeRecord::from(result));
        while self.trade_history.len() > TRADE_HISTORY_LIMIT {
            self.trade_history.pop_front();
        }
    }

    pub fn record_error(&mut self, error_message: &str) {
        self.error_count += 1;
        self.last_error = Some(error_message.to_string());
        self.last_updated = Utc::now();
    }

    pub fn calculate_success_rate(&mut self) {
        let resolved =
            self.executions_filled + self.executions_partially_filled + self.executions_failed;
        if resolved > 0 {
            self.success_rate = self.executions_filled as f64 / resolved as f64;
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    pub fn generate_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Arbitrage Engine Metrics Report ===\n");
        report.push_str(&format!("Uptime: {} seconds\n", self.uptime_seconds()));
        report.push_str(&format!("Cycles Completed: {}\n", self.total_cycles_completed));
        report.push_str(&format!("Cycles Skipped: {}\n", self.total_cycles_skipped));
        report.push_str(&format!("Opportunities Found: {}\n", self.total_opportunities_found));
        report.push_str(&format!(
            "Executions: {} started, {} filled, {} partially filled, {} failed\n",
            self.executions_started,
            self.executions_filled,
            self.executions_partially_filled,
            self.executions_failed
        ));
        report.push_str(&format!("Total Realized Profit: {}\n", self.total_realized_profit));
        report.push_str(&format!("Total Slippage Cost: {}\n", self.total_realized_slippage));
        report.push_str(&format!(
            "Average Profit per Execution: {}\n",
            self.average_profit_per_execution
        ));
        report.push_str(&format!("Success Rate: {:.2}%\n", self.success_rate * 100.0));
        report.push_str(&format!("Error Count: {}\n", self.error_count));

        if let Some(ref error) = self.last_error {
            report.push_str(&format!("Last Error: {}\n", error));
        }

        report.push_str("\n=== Venue Performance ===\n");
        let mut venues: Vec<_> = self.venue_performance.values().collect();
        venues.sort_by(|a, b| a.name.cmp(&b.name));
        for metrics in venues {
            report.push_str(&format!(
                "{}: {} buys, {} sells, {} failed legs, {} profit contribution\n",
                metrics.name,
                metrics.executions_as_buy_side,
                metrics.executions_as_sell_side,
                metrics.failed_legs,
                metrics.total_profit_contribution
            ));
        }

        report.push_str("\n=== Asset Performance ===\n");
        let mut assets: Vec<_> = self.asset_performance.values().collect();
        assets.sort_by(|a, b| a.asset.cmp(&b.asset));
        for metrics in assets {
            report.push_str(&format!(
                "{}: {} cycles ({} skipped), {} opportunities, {} executions, \
                 {} total profit, {} best\n",
                metrics.asset,
                metrics.cycles_completed,
                metrics.cycles_skipped,
                metrics.opportunities_found,
                metrics.executions,
                metrics.total_profit,
                metrics.best_profit
            ));
        }

        if !self.trade_history.is_empty() {
            report.push_str("\n=== Recent Trades ===\n");
            for trade in self.trade_history.iter().rev().take(10) {
                report.push_str(&format!(
                    "{} {} {} -> {} x{}: {}\n",
                    trade.resolved_at.format("%Y-%m-%d %H:%M:%S"),
                    trade.asset,
                    trade.buy_venue,
                    trade.sell_venue,
                    trade.amount,
                    match &trade.realized_profit {
                        Some(profit) => format!("{} profit {}", trade.status, profit),
                        None => trade.status.to_string(),
                    }
                ));
            }
        }

        report.push_str(&format!("\nLast Updated: {}\n", self.last_updated));

        report
    }

    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize metrics: {}", e))
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds every bus event into `metrics` until `shutdown` fires.
pub fn spawn_metrics_collector(
    events: &EventBus,
    metrics: Arc<RwLock<EngineMetrics>>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let receiver = events.subscribe();

    tokio::spawn(consume_events("Metrics collector", receiver, shutdown, move |event| {
        let metrics = metrics.clone();
        async move { metrics.write().await.record(&event) }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::SkipReason;
    use crate::testing::{dec, quote};
    use crate::types::{ExecutionRequest, Opportunity};

    fn resolved(status: ExecutionStatus, profit: Option<&str>) -> EngineEvent {
        let opportunity =
            Opportunity::from_quotes(&quote("C", "98"), &quote("B", "105"), &dec("10"), &dec("1"));
        let request = ExecutionRequest::new(opportunity);
        let mut result = ExecutionResult::from_request(&request, status);
        result.realized_profit = profit.map(dec);
        result.realized_slippage = profit.map(|_| dec("0.5"));
        if status != ExecutionStatus::Filled {
            result.error = Some("sell rejected".to_string());
        }
        EngineEvent::resolved(result)
    }

    #[test]
    fn test_cycle_events_are_counted_per_asset() {
        let mut metrics = EngineMetrics::new();

        metrics.record(&EngineEvent::CycleCompleted {
            asset: "BTC".to_string(),
            opportunity_found: true,
            detail: String::new(),
        });
        metrics.record(&EngineEvent::CycleSkipped {
            asset: "BTC".to_string(),
            reason: SkipReason::NoFeeData,
        });
        metrics.record(&EngineEvent::CycleSkipped {
            asset: "BTC".to_string(),
            reason: SkipReason::NoFeeData,
        });

        let btc = &metrics.asset_performance["BTC"];
        assert_eq!(metrics.total_cycles_completed, 1);
        assert_eq!(metrics.total_opportunities_found, 1);
        assert_eq!(btc.cycles_skipped, 2);
        assert_eq!(btc.skip_reasons["no fee data available"], 2);
    }

    #[test]
    fn test_execution_outcomes() {
        let mut metrics = EngineMetrics::new();

        metrics.record(&resolved(ExecutionStatus::Filled, Some("69")));
        metrics.record(&resolved(ExecutionStatus::Filled, Some("31")));
        metrics.record(&resolved(ExecutionStatus::PartiallyFilled, None));
        metrics.record(&resolved(ExecutionStatus::Failed, None));

        assert_eq!(metrics.executions_filled, 2);
        assert_eq!(metrics.executions_partially_filled, 1);
        assert_eq!(metrics.executions_failed, 1);
        assert_eq!(metrics.total_realized_profit, dec("100"));
        assert_eq!(metrics.total_realized_slippage, dec("1"));
        assert_eq!(metrics.average_profit_per_execution, dec("50"));
        assert!((metrics.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics.error_count, 2);
        assert_eq!(metrics.asset_performance["BTC"].best_profit, dec("69"));
        assert_eq!(metrics.venue_performance["B"].failed_legs, 1);
        assert_eq!(metrics.venue_performance["C"].total_profit_contribution, dec("50"));
        assert_eq!(metrics.trade_history.len(), 4);
    }

    #[test]
    fn test_trade_history_is_bounded() {
        let mut metrics = EngineMetrics::new();
        for _ in 0..(TRADE_HISTORY_LIMIT + 5) {
            metrics.record(&resolved(ExecutionStatus::Filled, Some("1")));
        }
        assert_eq!(metrics.trade_history.len(), TRADE_HISTORY_LIMIT);
    }

    #[test]
    fn test_report_and_json_export() {
        let mut metrics = EngineMetrics::new();
        metrics.record(&resolved(ExecutionStatus::Filled, Some("69")));

        let report = metrics.generate_report();
        assert!(report.contains("Total Realized Profit: 69"));
        assert!(report.contains("Recent Trades"));

        let json = metrics.export_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["executions_filled"], 1);
    }

    #[tokio::test]
    async fn test_collector_follows_the_bus() {
        let bus = EventBus::new(16);
        let metrics = Arc::new(RwLock::new(EngineMetrics::new()));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = spawn_metrics_collector(&bus, metrics.clone(), shutdown_rx);

        bus.publish(resolved(ExecutionStatus::Filled, Some("69")));
        shutdown.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(metrics.read().await.executions_filled, 1);
    }
}
