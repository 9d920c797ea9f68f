use thiserror::Error;

/// Failure of a single venue call. Absorbed by the aggregator, never fatal for a cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VenueError {
    #[error("{venue} timed out after {timeout_ms}ms")]
    Timeout { venue: String, timeout_ms: u64 },

    #[error("{venue} transport error: {message}")]
    Transport { venue: String, message: String },

    /// The request may have reached the venue; whether it took effect is unknown.
    #[error("{venue} outcome unknown: {message}")]
    Unconfirmed { venue: String, message: String },

    #[error("{venue} rejected request: {message}")]
    Rejected { venue: String, message: String },

    #[error("{venue} returned an invalid quote: {reason}")]
    InvalidQuote { venue: String, reason: String },

    #[error("{venue} does not support {operation}")]
    Unsupported { venue: String, operation: String },
}

impl VenueError {
    /// The venue never acted on the request, so an order can be sent again without
    /// risking a second fill.
    pub fn is_resendable(&self) -> bool {
        matches!(self, VenueError::Transport { .. })
    }

    pub fn venue(&self) -> &str {
        match self {
            VenueError::Timeout { venue, .. }
            | VenueError::Transport { venue, .. }
            | VenueError::Unconfirmed { venue, .. }
            | VenueError::Rejected { venue, .. }
            | VenueError::InvalidQuote { venue, .. }
            | VenueError::Unsupported { venue, .. } => venue,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeeSourceError {
    #[error("{source_name} transport error: {message}")]
    Transport { source_name: String, message: String },

    #[error("{source_name} response could not be parsed: {message}")]
    Parse { source_name: String, message: String },

    #[error("{source_name} reported an invalid fee: {value}")]
    Invalid { source_name: String, value: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("insufficient quotes for {asset}: {received} received, at least 2 required")]
    InsufficientQuotes { asset: String, received: usize },

    #[error("no fee data available for {asset}")]
    NoFeeDataAvailable { asset: String },

    #[error("an execution is already in flight for {asset}")]
    AlreadyInFlight { asset: String },

    #[error("{asset} is suspended after a partial fill and awaits acknowledgement")]
    AssetSuspended { asset: String },

    #[error(
        "partial execution for {asset}: bought on {buy_venue}, \
         sell on {sell_venue} failed: {message}"
    )]
    PartialExecutionFailure {
        asset: String,
        buy_venue: String,
        sell_venue: String,
        message: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    #[error("engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    /// Cycle-level errors that leave the scheduler running.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            EngineError::Configuration(_) | EngineError::PartialExecutionFailure { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
