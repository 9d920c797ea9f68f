pub mod calculator;
pub mod evaluator;

pub use calculator::ProfitCalculator;
pub use evaluator::{evaluate, OpportunityEvaluator};
