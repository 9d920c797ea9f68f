use async_trait::async_trait;
use bigdecimal::BigDecimal;

use crate::error::VenueError;
use crate::types::{OrderResult, OrderSide, Quote};

/// Normalized access to one trading venue.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn id(&self) -> &str;

    async fn fetch_quote(&self, asset: &str) -> Result<Quote, VenueError>;

    async fn submit_order(
        &self,
        side: OrderSide,
        asset: &str,
        amount: &BigDecimal,
    ) -> Result<OrderResult, VenueError>;
}
