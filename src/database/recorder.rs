use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::error;

use crate::database::ExecutionRepository;
use crate::engine::events::{consume_events, EngineEvent, EventBus};

/// Persists every resolved execution until `shutdown` fires. Write failures are logged
/// and never reach the engine.
pub fn spawn_execution_recorder(
    events: &EventBus,
    repository: Arc<ExecutionRepository>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let receiver = events.subscribe();

    tokio::spawn(consume_events("Execution recorder", receiver, shutdown, move |event| {
        let repository = repository.clone();
        async move {
            if let EngineEvent::ExecutionResolved { result, .. } = event {
                if let Err(e) = repository.save_execution_result(&result).await {
                    error!(
                        "Failed to record execution {} for {}: {}",
                        result.id,
                        result.asset(),
                        e
                    );
                }
            }
        }
    }))
}
