pub mod arbitrage;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod fees;
pub mod types;
pub mod venues;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use types::*;
