use bigdecimal::BigDecimal;
use tracing::debug;

use crate::types::{Opportunity, OrderSide};

/// Post-trade accounting for executed opportunities.
#[derive(Debug, Clone, Default)]
pub struct ProfitCalculator;

impl ProfitCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Percentage difference between the executed and expected price.
    pub fn slippage_percent(
        &self,
        expected: &BigDecimal,
        executed: &BigDecimal,
    ) -> Option<BigDecimal> {
        if *expected <= BigDecimal::from(0) {
            return None;
        }
        Some((executed - expected) / expected * BigDecimal::from(100))
    }

    /// Quote-currency cost of slippage on one leg; positive means the fill was worse than quoted.
    pub fn slippage_cost(
        &self,
        side: OrderSide,
        expected: &BigDecimal,
        executed: &BigDecimal,
        amount: &BigDecimal,
    ) -> BigDecimal {
        let adverse = match side {
            OrderSide::Buy => executed - expected,
            OrderSide::Sell => expected - executed,
        };
        adverse * amount
    }

    /// Profit actually locked in by a completed buy/sell pair.
    pub fn realized_profit(
        &self,
        buy_price: &BigDecimal,
        sell_price: &BigDecimal,
        amount: &BigDecimal,
        fee: &BigDecimal,
    ) -> BigDecimal {
        let profit = (sell_price - buy_price) * amount - fee;
        debug!(
            "Realized profit: buy={}, sell={}, amount={}, fee={}, net={}",
            buy_price, sell_price, amount, fee, profit
        );
        profit
    }

    pub fn calculate_roi(&self, opportunity: &Opportunity) -> BigDecimal {
        let investment = &opportunity.trade_amount * &opportunity.buy_price;

        if investment <= BigDecimal::from(0) {
            return BigDecimal::from(0);
        }

        (&opportunity.net_profit / investment) * BigDecimal::from(100)
    }

    /// Minimum sell price at which the opportunity covers its fee.
    pub fn calculate_break_even_price(&self, opportunity: &Opportunity) -> BigDecimal {
        &opportunity.buy_price + (&opportunity.fee / &opportunity.trade_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dec, quote};

    fn create_test_opportunity() -> Opportunity {
        Opportunity::from_quotes(&quote("C", "98"), &quote("B", "105"), &dec("10"), &dec("1"))
    }

    #[test]
    fn test_slippage_percent() {
        let calculator = ProfitCalculator::new();

        assert_eq!(calculator.slippage_percent(&dec("2000"), &dec("2010")), Some(dec("0.5")));
        assert_eq!(calculator.slippage_percent(&dec("50"), &dec("49")), Some(dec("-2")));
        assert_eq!(calculator.slippage_percent(&dec("0"), &dec("1")), None);
    }

    #[test]
    fn test_slippage_cost_is_adverse_per_side() {
        let calculator = ProfitCalculator::new();

        // Paid more than quoted on the buy leg
        assert_eq!(
            calculator.slippage_cost(OrderSide::Buy, &dec("98"), &dec("98.5"), &dec("10")),
            dec("5")
        );
        // Received less than quoted on the sell leg
        assert_eq!(
            calculator.slippage_cost(OrderSide::Sell, &dec("105"), &dec("104"), &dec("10")),
            dec("10")
        );
        // Price improvement shows up as negative cost
        assert_eq!(
            calculator.slippage_cost(OrderSide::Sell, &dec("105"), &dec("106"), &dec("1")),
            dec("-1")
        );
    }

    #[test]
    fn test_realized_profit() {
        let calculator = ProfitCalculator::new();
        let profit = calculator.realized_profit(&dec("98.5"), &dec("104"), &dec("10"), &dec("1"));
        assert_eq!(profit, dec("54"));
    }

    #[test]
    fn test_calculate_roi() {
        let calculator = ProfitCalculator::new();
        let roi = calculator.calculate_roi(&create_test_opportunity());

        // 69 / 980 * 100
        assert!(roi > dec("7.04") && roi < dec("7.05"));
    }

    #[test]
    fn test_calculate_break_even_price() {
        let calculator = ProfitCalculator::new();
        let break_even = calculator.calculate_break_even_price(&create_test_opportunity());
        assert_eq!(break_even, dec("98.1"));
    }
}
