use bigdecimal::BigDecimal;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    arbitrage::ProfitCalculator,
    config::AssetSettings,
    engine::{
        events::{EngineEvent, EventBus},
        retry::{retry_with_backoff, RetryConfig},
    },
    error::{EngineError, EngineResult, VenueError},
    types::{
        AssetCycleState, ExecutionRequest, ExecutionResult, ExecutionStatus, Opportunity,
        OrderResult, OrderSide,
    },
    venues::{VenueAdapter, VenueRegistry},
};

type StateSlot = Arc<Mutex<AssetCycleState>>;

/// Serializes executions per asset:
/// `Idle -> Requested -> {Filled | PartiallyFilled | Failed} -> Idle`.
///
/// Owns the [`AssetCycleState`] of every configured asset. A `PartiallyFilled` result leaves
/// the asset suspended until [`ExecutionCoordinator::acknowledge`] is called.
pub struct ExecutionCoordinator {
    venues: VenueRegistry,
    events: EventBus,
    calculator: ProfitCalculator,
    states: HashMap<String, StateSlot>,
    retry: HashMap<String, RetryConfig>,
    in_flight: AtomicUsize,
    idle: Notify,
    shutting_down: AtomicBool,
}

/// One unit of the drain counter, plus the asset's execution slot once it is claimed.
/// Dropping it frees both, so an abandoned `submit` never leaves the asset blocked.
struct Reservation<'a> {
    coordinator: &'a ExecutionCoordinator,
    asset: String,
    request_id: Option<Uuid>,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.request_id {
            let abandoned = self.coordinator.with_state(&self.asset, |state| {
                let held = state.in_flight_execution.as_ref().map(|r| r.id) == Some(id);
                if held {
                    state.in_flight_execution = None;
                }
                held
            });
            if matches!(abandoned, Ok(true)) {
                error!("[{}] execution {} abandoned before it resolved", self.asset, id);
            }
        }
        self.coordinator.release();
    }
}

impl ExecutionCoordinator {
    pub fn new(venues: VenueRegistry, events: EventBus, settings: &[AssetSettings]) -> Self {
        let states = settings
            .iter()
            .map(|s| (s.asset.clone(), Arc::new(Mutex::new(AssetCycleState::default()))))
            .collect();
        let retry = settings
            .iter()
            .map(|s| (s.asset.clone(), RetryConfig::from_settings(s)))
            .collect();

        Self {
            venues,
            events,
            calculator: ProfitCalculator::new(),
            states,
            retry,
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    fn slot(&self, asset: &str) -> EngineResult<&StateSlot> {
        self.states
            .get(asset)
            .ok_or_else(|| EngineError::UnknownAsset(asset.to_string()))
    }

    /// Runs `f` against the asset's state under its lock.
    pub fn with_state<R>(
        &self,
        asset: &str,
        f: impl FnOnce(&mut AssetCycleState) -> R,
    ) -> EngineResult<R> {
        let slot = self.slot(asset)?;
        let mut state = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(f(&mut state))
    }

    pub fn snapshot(&self, asset: &str) -> EngineResult<AssetCycleState> {
        self.with_state(asset, |state| state.clone())
    }

    pub fn assets(&self) -> Vec<String> {
        let mut assets: Vec<String> = self.states.keys().cloned().collect();
        assets.sort();
        assets
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// New submissions are refused from now on; running executions continue.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Clears a partial-fill suspension, returning the result that caused it.
    pub fn acknowledge(&self, asset: &str) -> EngineResult<Option<ExecutionResult>> {
        let cleared = self.with_state(asset, |state| state.suspended_by.take())?;
        match &cleared {
            Some(result) => info!(
                "[{}] partial fill {} acknowledged, resuming automated cycles",
                asset, result.id
            ),
            None => info!("[{}] acknowledge requested but asset is not suspended", asset),
        }
        Ok(cleared)
    }

    pub async fn submit(&self, opportunity: Opportunity) -> EngineResult<ExecutionResult> {
        let asset = opportunity.asset.clone();
        let request = ExecutionRequest::new(opportunity);

        // Count first, then check the flag: `wait_idle` after `begin_shutdown` sees either
        // this reservation or the refusal.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let mut reservation = Reservation {
            coordinator: self,
            asset: asset.clone(),
            request_id: None,
        };
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        self.with_state(&asset, |state| {
            if state.suspended_by.is_some() {
                return Err(EngineError::AssetSuspended { asset: asset.clone() });
            }
            if state.in_flight_execution.is_some() {
                return Err(EngineError::AlreadyInFlight { asset: asset.clone() });
            }
            state.in_flight_execution = Some(request.clone());
            Ok(())
        })??;
        reservation.request_id = Some(request.id);

        self.events.publish(EngineEvent::ExecutionStarted {
            request: request.clone(),
        });

        let result = self.execute(&request).await;

        self.with_state(&asset, |state| {
            state.in_flight_execution = None;
            if result.is_unhedged() {
                state.suspended_by = Some(result.clone());
            }
        })?;

        self.events.publish(EngineEvent::resolved(result.clone()));
        drop(reservation);
        Ok(result)
    }

    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Waits until no execution is in flight. Returns `false` if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight.load(Ordering::SeqCst) == 0;
            }
        }
    }

    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        let opportunity = &request.opportunity;
        let asset = opportunity.asset.as_str();
        let retry = self.retry.get(asset).cloned().unwrap_or_default();
        let mut result = ExecutionResult::from_request(request, ExecutionStatus::Failed);

        let (buy_venue, sell_venue) = match (
            self.venues.get(&opportunity.buy_venue),
            self.venues.get(&opportunity.sell_venue),
        ) {
            (Some(buy), Some(sell)) => (buy, sell),
            _ => {
                result.error = Some(format!(
                    "venue pair {}/{} is not registered",
                    opportunity.buy_venue, opportunity.sell_venue
                ));
                return result;
            }
        };

        let buy = place_order(
            buy_venue.as_ref(),
            OrderSide::Buy,
            asset,
            &request.requested_amount,
            &retry,
        )
        .await;

        let buy_order = match buy {
            Ok(order) => order,
            Err(e) => {
                warn!("[{}] buy leg failed, no position opened: {}", asset, e);
                result.error = Some(format!("buy order failed: {}", e));
                result.resolved_at = chrono::Utc::now();
                return result;
            }
        };

        if buy_order.filled_amount <= BigDecimal::from(0) {
            warn!("[{}] buy order {} filled nothing", asset, buy_order.order_id);
            result.error = Some(format!("buy order {} filled nothing", buy_order.order_id));
            result.buy_order = Some(buy_order);
            result.resolved_at = chrono::Utc::now();
            return result;
        }

        // Hedge exactly what was bought.
        let sell_amount = buy_order.filled_amount.clone();
        result.buy_order = Some(buy_order);
        let sell = place_order(
            sell_venue.as_ref(),
            OrderSide::Sell,
            asset,
            &sell_amount,
            &retry,
        )
        .await;

        match sell {
            Ok(sell_order) if sell_order.filled_amount < sell_amount => {
                let message = format!(
                    "sell leg filled {} of {}",
                    sell_order.filled_amount, sell_amount
                );
                result.sell_order = Some(sell_order);
                self.mark_unhedged(&mut result, message);
            }
            Ok(sell_order) => {
                result.sell_order = Some(sell_order);
                self.settle(&mut result);
            }
            Err(e) => self.mark_unhedged(&mut result, e.to_string()),
        }

        result.resolved_at = chrono::Utc::now();
        result
    }

    fn mark_unhedged(&self, result: &mut ExecutionResult, message: String) {
        let failure = EngineError::PartialExecutionFailure {
            asset: result.opportunity.asset.clone(),
            buy_venue: result.opportunity.buy_venue.clone(),
            sell_venue: result.opportunity.sell_venue.clone(),
            message,
        };
        error!(
            "UNHEDGED POSITION on {}: {}. Automated cycles halted until acknowledged.",
            result.opportunity.asset, failure
        );
        result.status = ExecutionStatus::PartiallyFilled;
        result.error = Some(failure.to_string());
    }

    fn settle(&self, result: &mut ExecutionResult) {
        let (Some(buy), Some(sell)) = (&result.buy_order, &result.sell_order) else {
            return;
        };
        let opportunity = &result.opportunity;
        let buy_price = fill_price(buy, &opportunity.buy_price);
        let sell_price = fill_price(sell, &opportunity.sell_price);

        let slippage = self.calculator.slippage_cost(
            OrderSide::Buy,
            &opportunity.buy_price,
            &buy_price,
            &buy.filled_amount,
        ) + self.calculator.slippage_cost(
            OrderSide::Sell,
            &opportunity.sell_price,
            &sell_price,
            &sell.filled_amount,
        );
        let profit = self.calculator.realized_profit(
            &buy_price,
            &sell_price,
            &sell.filled_amount,
            &opportunity.fee,
        );
        let percent = |expected: &BigDecimal, executed: &BigDecimal| {
            self.calculator
                .slippage_percent(expected, executed)
                .map(|p| format!("{}%", p.with_scale(4)))
                .unwrap_or_else(|| "n/a".to_string())
        };

        info!(
            "[{}] execution filled: bought {} at {} on {} ({}), sold at {} on {} ({}), \
             slippage {}, profit {}",
            opportunity.asset,
            sell.filled_amount,
            buy_price,
            opportunity.buy_venue,
            percent(&opportunity.buy_price, &buy_price),
            sell_price,
            opportunity.sell_venue,
            percent(&opportunity.sell_price, &sell_price),
            slippage,
            profit
        );

        result.status = ExecutionStatus::Filled;
        result.realized_slippage = Some(slippage);
        result.realized_profit = Some(profit);
    }
}

/// Places one order leg with retries. A panicking adapter is reported as an order whose
/// outcome is unknown.
async fn place_order(
    venue: &dyn VenueAdapter,
    side: OrderSide,
    asset: &str,
    amount: &BigDecimal,
    retry: &RetryConfig,
) -> Result<OrderResult, VenueError> {
    let context = format!("{} {} on {}", side, asset, venue.id());
    let attempt = retry_with_backoff(|| venue.submit_order(side, asset, amount), retry, &context);

    match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            error!("[{}] {} order handler of {} panicked", asset, side, venue.id());
            Err(VenueError::Unconfirmed {
                venue: venue.id().to_string(),
                message: format!("order handler panicked: {}", panic_message(&*panic)),
            })
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Venue-reported average price, or the quoted price when the venue does not report one.
fn fill_price(order: &OrderResult, quoted: &BigDecimal) -> BigDecimal {
    order.average_price.clone().unwrap_or_else(|| quoted.clone())
}
