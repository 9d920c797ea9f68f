pub mod console;
pub mod coordinator;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;

pub use console::EngineCommand;
pub use coordinator::ExecutionCoordinator;
pub use events::{EngineEvent, EventBus, Severity, SkipReason};
pub use metrics::EngineMetrics;
pub use orchestrator::ArbitrageEngine;
pub use scheduler::Scheduler;
