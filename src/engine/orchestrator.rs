use anyhow::{anyhow, Result};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, watch, RwLock},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    config::{AssetSettings, Config},
    database::{spawn_execution_recorder, DatabaseConnection, ExecutionRepository},
    engine::{
        console::{EngineCommand, HELP},
        coordinator::ExecutionCoordinator,
        events::{EngineEvent, EventBus},
        metrics::{spawn_metrics_collector, EngineMetrics},
        scheduler::{AssetMonitor, CycleContext, Scheduler},
    },
    error::EngineResult,
    fees::{create_fee_sources, FeeOracle, FeeSource},
    types::ExecutionResult,
    venues::{create_venues, QuoteAggregator, VenueRegistry},
};

/// Days of resolved execution history kept in the audit table.
const AUDIT_RETENTION_DAYS: i32 = 30;

/// Wires configuration, venues, fee oracle, coordinator and scheduler into one engine.
pub struct ArbitrageEngine {
    config: Config,
    settings: Vec<AssetSettings>,
    venues: VenueRegistry,
    events: EventBus,
    oracle: Arc<FeeOracle>,
    coordinator: Arc<ExecutionCoordinator>,
    metrics: Arc<RwLock<EngineMetrics>>,
    database: Option<Arc<DatabaseConnection>>,
    scheduler: Option<Scheduler>,
    background_shutdown: watch::Sender<bool>,
    background: Vec<JoinHandle<()>>,
}

impl ArbitrageEngine {
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing arbitrage engine");

        let settings = config.validate()?;
        info!("Configuration valid: {} assets", settings.len());

        let venues = create_venues(&config.venues)?;
        let fee_sources = create_fee_sources(&config.fees)?;
        info!("Fee sources initialized: {}", fee_sources.len());

        let database = match &config.database {
            Some(db_config) => {
                let database = DatabaseConnection::new(db_config).await?;
                database.run_migrations().await?;
                Some(Arc::new(database))
            }
            None => {
                info!("No database configured, execution audit trail disabled");
                None
            }
        };

        let mut engine = Self::with_components(config, settings, venues, fee_sources);
        engine.database = database;

        info!("Arbitrage engine initialized successfully");
        Ok(engine)
    }

    /// Builds an engine from already constructed collaborators. No database.
    pub fn with_components(
        config: Config,
        settings: Vec<AssetSettings>,
        venues: VenueRegistry,
        fee_sources: Vec<Arc<dyn FeeSource>>,
    ) -> Self {
        let events = EventBus::new(config.engine.event_capacity);

        let oracle = settings.iter().fold(
            FeeOracle::new(
                fee_sources,
                Duration::from_millis(config.fees.default_cache_ttl_ms),
                Duration::from_millis(config.fees.request_timeout_ms),
            ),
            |oracle, s| oracle.with_asset_ttl(&s.asset, s.fee_cache_ttl),
        );
        let coordinator = ExecutionCoordinator::new(venues.clone(), events.clone(), &settings);
        let (background_shutdown, _) = watch::channel(false);

        Self {
            config,
            settings,
            venues,
            events,
            oracle: Arc::new(oracle),
            coordinator: Arc::new(coordinator),
            metrics: Arc::new(RwLock::new(EngineMetrics::new())),
            database: None,
            scheduler: None,
            background_shutdown,
            background: Vec::new(),
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.scheduler.is_some() {
            return Err(anyhow!("Engine is already running"));
        }

        info!("Starting arbitrage engine");
        self.perform_health_checks().await?;

        let monitors = self
            .settings
            .iter()
            .map(|s| Ok(AssetMonitor::new(s.clone(), self.venues.resolve(&s.venues)?)))
            .collect::<Result<Vec<_>>>()?;

        self.background.push(spawn_metrics_collector(
            &self.events,
            self.metrics.clone(),
            self.background_shutdown.subscribe(),
        ));
        if let Some(database) = &self.database {
            let repository = Arc::new(ExecutionRepository::new(database.pool().clone()));
            self.background.push(spawn_execution_recorder(
                &self.events,
                repository,
                self.background_shutdown.subscribe(),
            ));
        }

        let context = Arc::new(CycleContext {
            aggregator: QuoteAggregator::new(),
            oracle: self.oracle.clone(),
            coordinator: self.coordinator.clone(),
            events: self.events.clone(),
            failure_alert_threshold: self.config.engine.failure_alert_threshold,
        });
        self.scheduler = Some(Scheduler::start(context, monitors));

        info!("Arbitrage engine running");
        Ok(())
    }

    /// Graceful stop. Returns whether every in-flight execution finished within the drain timeout.
    pub async fn stop(&mut self) -> bool {
        let Some(mut scheduler) = self.scheduler.take() else {
            return true;
        };

        info!("Stopping arbitrage engine");
        let drained = scheduler
            .stop(Duration::from_millis(self.config.engine.drain_timeout_ms))
            .await;

        let _ = self.background_shutdown.send(true);
        for handle in self.background.drain(..) {
            if let Err(e) = handle.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        info!("{}", self.metrics.read().await.generate_report());

        if let Some(database) = &self.database {
            database.close().await;
        }

        info!("Arbitrage engine stopped");
        drained
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn acknowledge(&self, asset: &str) -> EngineResult<Option<ExecutionResult>> {
        self.coordinator.acknowledge(asset)
    }

    pub fn status_report(&self) -> String {
        let mut report = String::from("=== Asset Status ===\n");

        for asset in self.coordinator.assets() {
            let Ok(state) = self.coordinator.snapshot(&asset) else {
                continue;
            };
            let activity = match (&state.suspended_by, &state.in_flight_execution) {
                (Some(result), _) => format!(
                    "SUSPENDED by partial fill {} (ack {} to resume)",
                    result.id, asset
                ),
                (None, Some(request)) => format!("executing {}", request.id),
                (None, None) => "idle".to_string(),
            };
            let last_cycle = state
                .last_cycle_time
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string());

            report.push_str(&format!(
                "{}: {}, last cycle {}, {} consecutive failures\n",
                asset, activity, last_cycle, state.consecutive_failures
            ));
        }

        report
    }

    pub async fn metrics_report(&self) -> String {
        self.metrics.read().await.generate_report()
    }

    pub async fn export_metrics(&self) -> Result<String> {
        self.metrics.read().await.export_json()
    }

    /// Applies an operator command. Returns `false` once the engine should exit.
    pub async fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Status => info!("\n{}", self.status_report()),
            EngineCommand::Report => info!("\n{}", self.metrics_report().await),
            EngineCommand::Export => match self.export_metrics().await {
                Ok(json) => info!("\n{}", json),
                Err(e) => warn!("{}", e),
            },
            EngineCommand::Acknowledge { asset } => match self.acknowledge(&asset) {
                Ok(Some(result)) => info!("{} resumed after partial fill {}", asset, result.id),
                Ok(None) => info!("{} was not suspended", asset),
                Err(e) => warn!("Cannot acknowledge {}: {}", asset, e),
            },
            EngineCommand::Help => info!("{}", HELP),
            EngineCommand::Stop => {
                self.stop().await;
                return false;
            }
        }
        true
    }

    async fn perform_health_checks(&self) -> Result<()> {
        info!("Performing health checks");

        if let Some(database) = &self.database {
            database
                .health_check()
                .await
                .map_err(|e| anyhow!("Database health check failed: {}", e))?;
        }

        if self.venues.venue_count() < 2 {
            return Err(anyhow!(
                "At least 2 venues are required, {} registered",
                self.venues.venue_count()
            ));
        }

        info!("All health checks passed");
        Ok(())
    }

    /// Prunes the audit table and logs a metrics summary.
    pub async fn perform_maintenance(&self) -> Result<()> {
        info!("Performing periodic maintenance");

        if let Some(database) = &self.database {
            let repository = ExecutionRepository::new(database.pool().clone());
            match repository.cleanup_old_data(AUDIT_RETENTION_DAYS).await {
                Ok(deleted) => info!("Maintenance: cleaned up {} old execution results", deleted),
                Err(e) => warn!("Failed to cleanup old data: {}", e),
            }

            let since = chrono::Utc::now() - chrono::Duration::days(AUDIT_RETENTION_DAYS as i64);
            let unhedged = repository.get_unhedged_results(since).await?;
            if !unhedged.is_empty() {
                warn!(
                    "{} partial fills recorded in the last {} days",
                    unhedged.len(),
                    AUDIT_RETENTION_DAYS
                );
            }

            let stats = repository.get_execution_stats(1).await?;
            info!(
                "Last 24h: {} executions ({} filled, {} partial, {} failed), \
                 realized profit {}, slippage {}",
                stats.total_executions,
                stats.filled,
                stats.partially_filled,
                stats.failed,
                stats.total_realized_profit,
                stats.total_slippage
            );
            if let Some((buy_venue, sell_venue)) = stats.most_profitable_venue_pair {
                info!("Most profitable route: buy {} / sell {}", buy_venue, sell_venue);
            }
        }

        let metrics = self.metrics.read().await;
        info!(
            "Engine summary: {} cycles, {} opportunities, {} filled, success rate {:.2}%",
            metrics.total_cycles_completed,
            metrics.total_opportunities_found,
            metrics.executions_filled,
            metrics.success_rate * 100.0
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, FeeConfig, LoggingConfig};
    use crate::testing::{dec, MockFeeSource, MockVenue};
    use crate::types::{ExecutionStatus, OrderSide};
    use std::collections::HashMap;
    use tokio::time::timeout;

    fn config() -> Config {
        Config {
            engine: EngineConfig {
                drain_timeout_ms: 1_000,
                failure_alert_threshold: 5,
                event_capacity: 256,
            },
            venues: HashMap::new(),
            fees: FeeConfig {
                default_cache_ttl_ms: 60_000,
                request_timeout_ms: 500,
                sources: Vec::new(),
            },
            assets: Vec::new(),
            database: None,
            logging: LoggingConfig::default(),
        }
    }

    fn settings() -> AssetSettings {
        AssetSettings {
            asset: "BTC".to_string(),
            venues: vec!["A".to_string(), "B".to_string()],
            trade_amount: dec("1"),
            min_profit_threshold: dec("0"),
            cycle_interval: Duration::from_millis(20),
            quote_timeout: Duration::from_millis(100),
            fee_cache_ttl: Duration::from_secs(60),
            max_retries: 0,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn engine(sell: MockVenue) -> (ArbitrageEngine, Arc<MockVenue>) {
        let buy = Arc::new(MockVenue::with_price("A", "BTC", "100"));
        let sell = Arc::new(sell);
        let mut registry = VenueRegistry::new();
        registry.register(buy);
        registry.register(sell.clone());

        let fee: Arc<dyn FeeSource> = Arc::new(MockFeeSource::with_fee("gas", "1"));
        (
            ArbitrageEngine::with_components(config(), vec![settings()], registry, vec![fee]),
            sell,
        )
    }

    async fn next_resolution(receiver: &mut broadcast::Receiver<EngineEvent>) -> ExecutionResult {
        timeout(Duration::from_secs(2), async {
            loop {
                let event = receiver.recv().await.unwrap();
                if let EngineEvent::ExecutionResolved { result, .. } = event {
                    return result;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_engine_runs_and_stops() {
        let (mut engine, sell) = engine(MockVenue::with_price("B", "BTC", "110"));
        let mut receiver = engine.subscribe();

        engine.start().await.unwrap();
        assert!(engine.is_running());
        assert!(engine.start().await.is_err());

        let result = next_resolution(&mut receiver).await;
        assert_eq!(result.status, ExecutionStatus::Filled);
        assert!(sell.calls(OrderSide::Sell) >= 1);

        assert!(engine.stop().await);
        assert!(!engine.is_running());
        assert!(engine.metrics.read().await.executions_filled >= 1);
    }

    #[tokio::test]
    async fn test_operator_acknowledges_partial_fill() {
        let sell = MockVenue::with_price("B", "BTC", "110").script_orders(
            OrderSide::Sell,
            vec![Err(crate::error::VenueError::Rejected {
                venue: "B".to_string(),
                message: "market closed".to_string(),
            })],
        );
        let (mut engine, _) = engine(sell);
        let mut receiver = engine.subscribe();

        engine.start().await.unwrap();
        let result = next_resolution(&mut receiver).await;
        assert_eq!(result.status, ExecutionStatus::PartiallyFilled);
        assert!(engine.status_report().contains("SUSPENDED"));

        assert!(
            engine
                .handle_command(EngineCommand::Acknowledge {
                    asset: "BTC".to_string()
                })
                .await
        );
        assert!(!engine.status_report().contains("SUSPENDED"));

        let resumed = next_resolution(&mut receiver).await;
        assert_eq!(resumed.status, ExecutionStatus::Filled);

        assert!(!engine.handle_command(EngineCommand::Stop).await);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_rejects_single_venue_registry() {
        let mut registry = VenueRegistry::new();
        registry.register(Arc::new(MockVenue::with_price("A", "BTC", "100")));
        let fee: Arc<dyn FeeSource> = Arc::new(MockFeeSource::with_fee("gas", "1"));
        let mut engine =
            ArbitrageEngine::with_components(config(), vec![settings()], registry, vec![fee]);

        assert!(engine.start().await.is_err());
    }
}
