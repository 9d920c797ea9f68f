//! Scripted venue and fee source doubles shared by the unit tests.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{FeeSourceError, VenueError};
use crate::fees::FeeSource;
use crate::types::{OrderResult, OrderSide, Quote};
use crate::venues::VenueAdapter;

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub fn quote(venue: &str, price: &str) -> Quote {
    Quote::new(venue, "BTC", dec(price))
}

pub fn transport_error(venue: &str) -> VenueError {
    VenueError::Transport {
        venue: venue.to_string(),
        message: "connection reset".to_string(),
    }
}

pub struct MockVenue {
    id: String,
    asset: String,
    price: Mutex<Option<BigDecimal>>,
    quote_delay: Duration,
    order_delay: Duration,
    buy_script: Mutex<VecDeque<Result<(), VenueError>>>,
    sell_script: Mutex<VecDeque<Result<(), VenueError>>>,
    buy_fills: Mutex<VecDeque<BigDecimal>>,
    sell_fills: Mutex<VecDeque<BigDecimal>>,
    panic_on: Option<OrderSide>,
    pub quote_calls: AtomicUsize,
    pub buy_calls: AtomicUsize,
    pub sell_calls: AtomicUsize,
}

impl MockVenue {
    pub fn with_price(id: &str, asset: &str, price: &str) -> Self {
        Self {
            id: id.to_string(),
            asset: asset.to_string(),
            price: Mutex::new(Some(dec(price))),
            quote_delay: Duration::ZERO,
            order_delay: Duration::ZERO,
            buy_script: Mutex::new(VecDeque::new()),
            sell_script: Mutex::new(VecDeque::new()),
            buy_fills: Mutex::new(VecDeque::new()),
            sell_fills: Mutex::new(VecDeque::new()),
            panic_on: None,
            quote_calls: AtomicUsize::new(0),
            buy_calls: AtomicUsize::new(0),
            sell_calls: AtomicUsize::new(0),
        }
    }

    /// A venue whose quote endpoint always fails.
    pub fn unavailable(id: &str, asset: &str) -> Self {
        let venue = Self::with_price(id, asset, "1");
        *venue.price.lock().unwrap() = None;
        venue
    }

    pub fn quote_delay(mut self, delay: Duration) -> Self {
        self.quote_delay = delay;
        self
    }

    pub fn order_delay(mut self, delay: Duration) -> Self {
        self.order_delay = delay;
        self
    }

    /// Queues outcomes for successive orders on `side`; once drained, orders succeed.
    pub fn script_orders(self, side: OrderSide, outcomes: Vec<Result<(), VenueError>>) -> Self {
        let script = match side {
            OrderSide::Buy => &self.buy_script,
            OrderSide::Sell => &self.sell_script,
        };
        script.lock().unwrap().extend(outcomes);
        self
    }

    /// Queues filled amounts for successive orders on `side`; once drained, orders fill fully.
    pub fn script_fills(self, side: OrderSide, fills: &[&str]) -> Self {
        let queue = match side {
            OrderSide::Buy => &self.buy_fills,
            OrderSide::Sell => &self.sell_fills,
        };
        queue.lock().unwrap().extend(fills.iter().map(|fill| dec(fill)));
        self
    }

    /// Every order on `side` panics inside the adapter.
    pub fn panic_on_order(mut self, side: OrderSide) -> Self {
        self.panic_on = Some(side);
        self
    }

    pub fn set_price(&self, price: &str) {
        *self.price.lock().unwrap() = Some(dec(price));
    }

    pub fn calls(&self, side: OrderSide) -> usize {
        match side {
            OrderSide::Buy => self.buy_calls.load(Ordering::SeqCst),
            OrderSide::Sell => self.sell_calls.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl VenueAdapter for MockVenue {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_quote(&self, asset: &str) -> Result<Quote, VenueError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if !self.quote_delay.is_zero() {
            tokio::time::sleep(self.quote_delay).await;
        }

        let price = self.price.lock().unwrap().clone();
        match price {
            Some(price) if asset == self.asset => Ok(Quote::new(&self.id, asset, price)),
            _ => Err(transport_error(&self.id)),
        }
    }

    async fn submit_order(
        &self,
        side: OrderSide,
        asset: &str,
        amount: &BigDecimal,
    ) -> Result<OrderResult, VenueError> {
        let (counter, script, fills) = match side {
            OrderSide::Buy => (&self.buy_calls, &self.buy_script, &self.buy_fills),
            OrderSide::Sell => (&self.sell_calls, &self.sell_script, &self.sell_fills),
        };
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.order_delay.is_zero() {
            tokio::time::sleep(self.order_delay).await;
        }

        if self.panic_on == Some(side) {
            panic!("{} order handler crashed", self.id);
        }

        let outcome = script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        outcome?;
        let filled_amount = fills.lock().unwrap().pop_front().unwrap_or_else(|| amount.clone());

        Ok(OrderResult {
            venue_id: self.id.clone(),
            side,
            order_id: format!("{}-{}-{}-{}", self.id, asset, side, call),
            filled_amount,
            average_price: self.price.lock().unwrap().clone(),
        })
    }
}

pub struct MockFeeSource {
    name: String,
    outcome: Mutex<Result<BigDecimal, FeeSourceError>>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl MockFeeSource {
    pub fn with_fee(name: &str, fee: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: Mutex::new(Ok(dec(fee))),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        let source = Self::with_fee(name, "0");
        source.fail();
        source
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_fee(&self, fee: &str) {
        *self.outcome.lock().unwrap() = Ok(dec(fee));
    }

    pub fn fail(&self) {
        *self.outcome.lock().unwrap() = Err(FeeSourceError::Transport {
            source_name: self.name.clone(),
            message: "service unavailable".to_string(),
        });
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeeSource for MockFeeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_fee(&self, _asset: &str) -> Result<BigDecimal, FeeSourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.lock().unwrap().clone()
    }
}
