use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    arbitrage::{OpportunityEvaluator, ProfitCalculator},
    config::AssetSettings,
    engine::{
        coordinator::ExecutionCoordinator,
        events::{EngineEvent, EventBus, SkipReason},
    },
    fees::FeeOracle,
    venues::{aggregator::price_spread, QuoteAggregator, VenueAdapter},
};

/// Collaborators shared by every asset task.
pub struct CycleContext {
    pub aggregator: QuoteAggregator,
    pub oracle: Arc<FeeOracle>,
    pub coordinator: Arc<ExecutionCoordinator>,
    pub events: EventBus,
    pub failure_alert_threshold: u32,
}

/// One monitored asset: its settings, evaluator and resolved venue adapters.
pub struct AssetMonitor {
    pub settings: AssetSettings,
    pub evaluator: OpportunityEvaluator,
    pub venues: Vec<Arc<dyn VenueAdapter>>,
}

impl AssetMonitor {
    pub fn new(settings: AssetSettings, venues: Vec<Arc<dyn VenueAdapter>>) -> Self {
        Self {
            evaluator: OpportunityEvaluator::from_settings(&settings),
            settings,
            venues,
        }
    }

    pub fn asset(&self) -> &str {
        &self.settings.asset
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CycleOutcome {
    Completed { opportunity_found: bool, detail: String },
    Skipped(SkipReason),
}

impl CycleOutcome {
    fn into_event(self, asset: &str) -> EngineEvent {
        match self {
            CycleOutcome::Completed {
                opportunity_found,
                detail,
            } => EngineEvent::CycleCompleted {
                asset: asset.to_string(),
                opportunity_found,
                detail,
            },
            CycleOutcome::Skipped(reason) => EngineEvent::CycleSkipped {
                asset: asset.to_string(),
                reason,
            },
        }
    }
}

impl CycleContext {
    async fn run_cycle(&self, monitor: &AssetMonitor) -> CycleOutcome {
        let asset = monitor.asset();

        let state = match self.coordinator.snapshot(asset) {
            Ok(state) => state,
            Err(e) => return CycleOutcome::Skipped(SkipReason::CycleError(e.to_string())),
        };
        if state.suspended_by.is_some() {
            return CycleOutcome::Skipped(SkipReason::Suspended);
        }
        if !state.is_idle() {
            return CycleOutcome::Skipped(SkipReason::ExecutionInFlight);
        }

        let quote_set = self
            .aggregator
            .collect_quotes(asset, &monitor.venues, monitor.settings.quote_timeout)
            .await;
        if !quote_set.is_tradeable() {
            return CycleOutcome::Skipped(SkipReason::InsufficientQuotes {
                received: quote_set.quotes.len(),
            });
        }

        let fee = match self.oracle.estimate_fee(asset).await {
            Ok(fee) => fee,
            Err(e) => {
                warn!("[{}] {}", asset, e);
                return CycleOutcome::Skipped(SkipReason::NoFeeData);
            }
        };

        let opportunity = match monitor.evaluator.evaluate(&quote_set.quotes, &fee) {
            Some(opportunity) => opportunity,
            None => {
                let spread = price_spread(&quote_set.quotes)
                    .map(|spread| spread.to_string())
                    .unwrap_or_else(|| "n/a".to_string());
                return CycleOutcome::Completed {
                    opportunity_found: false,
                    detail: format!(
                        "{} quotes, spread {}, fee {}{}: nothing above threshold {}",
                        quote_set.quotes.len(),
                        spread,
                        fee.fee,
                        if fee.is_stale { " (stale)" } else { "" },
                        monitor.evaluator.min_profit_threshold()
                    ),
                };
            }
        };

        let calculator = ProfitCalculator::new();
        let detail = format!(
            "buy {} at {} on {}, sell at {} on {}, net profit {} (ROI {}%, break-even {})",
            opportunity.trade_amount,
            opportunity.buy_price,
            opportunity.buy_venue,
            opportunity.sell_price,
            opportunity.sell_venue,
            opportunity.net_profit,
            calculator.calculate_roi(&opportunity).with_scale(4),
            calculator.calculate_break_even_price(&opportunity)
        );
        info!("[{}] Arbitrage opportunity: {}", asset, detail);

        // The execution outlives this cycle; the coordinator enforces one per asset.
        let coordinator = self.coordinator.clone();
        let asset_name = asset.to_string();
        tokio::spawn(async move {
            match coordinator.submit(opportunity).await {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    warn!("[{}] execution not started: {}", asset_name, e)
                }
                Err(e) => error!("[{}] execution aborted: {}", asset_name, e),
            }
        });

        CycleOutcome::Completed {
            opportunity_found: true,
            detail,
        }
    }

    /// Updates per-asset bookkeeping and publishes the cycle event.
    fn record_outcome(&self, asset: &str, outcome: CycleOutcome) {
        let counts_as_failure = matches!(
            outcome,
            CycleOutcome::Skipped(
                SkipReason::CycleError(_)
                    | SkipReason::InsufficientQuotes { .. }
                    | SkipReason::NoFeeData
            )
        );
        let threshold = self.failure_alert_threshold;

        let failures = self.coordinator.with_state(asset, |state| {
            state.last_cycle_time = Some(chrono::Utc::now());
            if counts_as_failure {
                state.consecutive_failures += 1;
            } else if matches!(outcome, CycleOutcome::Completed { .. }) {
                state.consecutive_failures = 0;
            }
            state.consecutive_failures
        });

        if let Ok(failures) = failures {
            if counts_as_failure && threshold > 0 && failures % threshold == 0 {
                error!("[{}] {} consecutive failed cycles", asset, failures);
            }
        }

        self.events.publish(outcome.into_event(asset));
    }
}

async fn run_asset(
    context: Arc<CycleContext>,
    monitor: AssetMonitor,
    mut shutdown: watch::Receiver<bool>,
) {
    let asset = monitor.asset().to_string();
    let mut ticker = interval(monitor.settings.cycle_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "[{}] monitoring {} venues every {}ms, trade amount {}",
        asset,
        monitor.venues.len(),
        monitor.settings.cycle_interval.as_millis(),
        monitor.evaluator.trade_amount()
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let cycle = AssertUnwindSafe(context.run_cycle(&monitor)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("[{}] cycle cancelled by shutdown", asset);
                context.record_outcome(&asset, CycleOutcome::Skipped(SkipReason::ShuttingDown));
                break;
            }
            outcome = cycle => match outcome {
                Ok(outcome) => outcome,
                Err(_) => {
                    CycleOutcome::Skipped(SkipReason::CycleError("cycle panicked".to_string()))
                }
            },
        };

        context.record_outcome(&asset, outcome);
    }

    info!("[{}] monitoring stopped", asset);
}

/// Drives one independent timer task per monitored asset.
pub struct Scheduler {
    context: Arc<CycleContext>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(context: Arc<CycleContext>, monitors: Vec<AssetMonitor>) -> Self {
        let (shutdown, receiver) = watch::channel(false);

        let handles = monitors
            .into_iter()
            .map(|monitor| tokio::spawn(run_asset(context.clone(), monitor, receiver.clone())))
            .collect::<Vec<_>>();

        info!("Scheduler started with {} asset tasks", handles.len());

        Self {
            context,
            shutdown,
            handles,
        }
    }

    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Stops all timers, cancels pending quote fetches and waits up to `drain_timeout`
    /// for in-flight executions. Returns whether everything drained.
    pub async fn stop(&mut self, drain_timeout: Duration) -> bool {
        info!("Stopping scheduler");
        self.context.coordinator.begin_shutdown();
        let _ = self.shutdown.send(true);

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("Asset task ended abnormally: {}", e);
            }
        }

        let drained = self.context.coordinator.wait_idle(drain_timeout).await;
        if drained {
            info!("Scheduler stopped, no executions in flight");
        } else {
            error!(
                "Drain timeout of {}ms elapsed with {} executions in flight",
                drain_timeout.as_millis(),
                self.context.coordinator.in_flight_count()
            );
        }
        drained
    }
}
