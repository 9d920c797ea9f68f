use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tokio::sync::{
    broadcast::{
        self,
        error::{RecvError, TryRecvError},
    },
    watch,
};
use tracing::{debug, error, info, warn};

use crate::types::{ExecutionRequest, ExecutionResult, ExecutionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// An unhedged partial fill always outranks everything else.
    pub fn for_status(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::PartiallyFilled => Severity::Critical,
            ExecutionStatus::Failed => Severity::Warning,
            ExecutionStatus::Filled | ExecutionStatus::Pending => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    ExecutionInFlight,
    Suspended,
    InsufficientQuotes { received: usize },
    NoFeeData,
    ShuttingDown,
    CycleError(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ExecutionInFlight => write!(f, "execution in flight"),
            SkipReason::Suspended => write!(f, "suspended after partial fill"),
            SkipReason::InsufficientQuotes { received } => {
                write!(f, "insufficient quotes ({} received)", received)
            }
            SkipReason::NoFeeData => write!(f, "no fee data available"),
            SkipReason::ShuttingDown => write!(f, "shutting down"),
            SkipReason::CycleError(message) => write!(f, "cycle error: {}", message),
        }
    }
}

/// Everything the engine reports to the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    CycleCompleted {
        asset: String,
        opportunity_found: bool,
        detail: String,
    },
    CycleSkipped {
        asset: String,
        reason: SkipReason,
    },
    ExecutionStarted {
        request: ExecutionRequest,
    },
    ExecutionResolved {
        result: ExecutionResult,
        severity: Severity,
    },
}

impl EngineEvent {
    pub fn resolved(result: ExecutionResult) -> Self {
        let severity = Severity::for_status(result.status);
        EngineEvent::ExecutionResolved { result, severity }
    }

    pub fn asset(&self) -> &str {
        match self {
            EngineEvent::CycleCompleted { asset, .. }
            | EngineEvent::CycleSkipped { asset, .. } => asset,
            EngineEvent::ExecutionStarted { request } => request.asset(),
            EngineEvent::ExecutionResolved { result, .. } => result.asset(),
        }
    }
}

/// Broadcast fan-out of [`EngineEvent`]s. Publishing with no subscribers is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        match &event {
            EngineEvent::CycleSkipped { asset, reason } => {
                debug!("[{}] cycle skipped: {}", asset, reason)
            }
            EngineEvent::CycleCompleted { asset, detail, .. } => {
                debug!("[{}] cycle completed: {}", asset, detail)
            }
            EngineEvent::ExecutionStarted { request } => info!(
                "[{}] execution {} started: buy {} / sell {}",
                request.asset(),
                request.id,
                request.opportunity.buy_venue,
                request.opportunity.sell_venue
            ),
            EngineEvent::ExecutionResolved { result, severity } => match severity {
                Severity::Critical => error!(
                    "[{}] execution {} resolved {}: {}",
                    result.asset(),
                    result.id,
                    result.status,
                    result.error.as_deref().unwrap_or("no error detail")
                ),
                Severity::Warning => warn!(
                    "[{}] execution {} resolved {}: {}",
                    result.asset(),
                    result.id,
                    result.status,
                    result.error.as_deref().unwrap_or("no error detail")
                ),
                Severity::Info => info!(
                    "[{}] execution {} resolved {}",
                    result.asset(),
                    result.id,
                    result.status
                ),
            },
        }

        if self.sender.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Feeds every event to `handler` until `shutdown` fires, then handles whatever is
/// still buffered so late results are not lost.
pub async fn consume_events<F, Fut>(
    name: &str,
    mut receiver: broadcast::Receiver<EngineEvent>,
    mut shutdown: watch::Receiver<bool>,
    mut handler: F,
) where
    F: FnMut(EngineEvent) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Ok(event) => handler(event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!("{} lagged, {} events dropped", name, missed)
                }
                Err(RecvError::Closed) => return,
            },
            _ = shutdown.changed() => break,
        }
    }

    loop {
        match receiver.try_recv() {
            Ok(event) => handler(event).await,
            Err(TryRecvError::Lagged(missed)) => {
                warn!("{} lagged, {} events dropped", name, missed)
            }
            Err(_) => break,
        }
    }
    debug!("{} stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(Severity::for_status(ExecutionStatus::PartiallyFilled), Severity::Critical);
        assert_eq!(Severity::for_status(ExecutionStatus::Failed), Severity::Warning);
        assert_eq!(Severity::for_status(ExecutionStatus::Filled), Severity::Info);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(EngineEvent::CycleSkipped {
            asset: "BTC".to_string(),
            reason: SkipReason::NoFeeData,
        });
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(4);
        let mut receiver = bus.subscribe();

        bus.publish(EngineEvent::CycleSkipped {
            asset: "ETH".to_string(),
            reason: SkipReason::InsufficientQuotes { received: 1 },
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.asset(), "ETH");
        assert!(matches!(
            event,
            EngineEvent::CycleSkipped {
                reason: SkipReason::InsufficientQuotes { received: 1 },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_consumer_drains_buffer_on_shutdown() {
        let bus = EventBus::new(8);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let receiver = bus.subscribe();
        for _ in 0..3 {
            bus.publish(EngineEvent::CycleSkipped {
                asset: "BTC".to_string(),
                reason: SkipReason::Suspended,
            });
        }
        shutdown.send(true).unwrap();

        let counter = seen.clone();
        consume_events("test consumer", receiver, shutdown_rx, move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async {}
        })
        .await;

        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
