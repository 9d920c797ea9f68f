use bigdecimal::BigDecimal;
use tracing::debug;

use crate::{
    config::AssetSettings,
    types::{FeeEstimate, Opportunity, Quote},
};

/// Per-asset evaluation parameters bound to the pure [`evaluate`] function.
#[derive(Debug, Clone)]
pub struct OpportunityEvaluator {
    trade_amount: BigDecimal,
    min_profit_threshold: BigDecimal,
}

impl OpportunityEvaluator {
    pub fn new(trade_amount: BigDecimal, min_profit_threshold: BigDecimal) -> Self {
        Self {
            trade_amount,
            min_profit_threshold,
        }
    }

    pub fn from_settings(settings: &AssetSettings) -> Self {
        Self::new(
            settings.trade_amount.clone(),
            settings.min_profit_threshold.clone(),
        )
    }

    pub fn evaluate(&self, quotes: &[Quote], fee: &FeeEstimate) -> Option<Opportunity> {
        evaluate(quotes, fee, &self.trade_amount, &self.min_profit_threshold)
    }

    pub fn trade_amount(&self) -> &BigDecimal {
        &self.trade_amount
    }

    pub fn min_profit_threshold(&self) -> &BigDecimal {
        &self.min_profit_threshold
    }
}

/// Best (buy, sell) pair over every ordered pair of distinct venues, by
/// `(sell - buy) * trade_amount - fee`. Ties keep the pair found first in quote order.
/// `None` unless the best net profit is strictly above `min_profit_threshold`.
pub fn evaluate(
    quotes: &[Quote],
    fee: &FeeEstimate,
    trade_amount: &BigDecimal,
    min_profit_threshold: &BigDecimal,
) -> Option<Opportunity> {
    if quotes.len() < 2 {
        return None;
    }

    let mut best: Option<Opportunity> = None;

    for buy in quotes {
        for sell in quotes {
            if buy.venue_id == sell.venue_id {
                continue;
            }

            let candidate = Opportunity::from_quotes(buy, sell, trade_amount, &fee.fee);
            let improves = best
                .as_ref()
                .map_or(true, |current| candidate.net_profit > current.net_profit);
            if improves {
                best = Some(candidate);
            }
        }
    }

    let best = best?;
    if best.net_profit > *min_profit_threshold {
        debug!(
            "Best pair for {}: buy {} at {}, sell {} at {}, net profit {}",
            best.asset,
            best.buy_venue,
            best.buy_price,
            best.sell_venue,
            best.sell_price,
            best.net_profit
        );
        Some(best)
    } else {
        debug!(
            "Best net profit {} for {} does not clear threshold {}",
            best.net_profit, best.asset, min_profit_threshold
        );
        None
    }
}
