//! Error types for flowkit
//!
//! A failure inside producer or transform logic terminates the subscription and
//! is delivered at most once. Cancellation is a normal terminal state, not a
//! failure.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    /// An error raised inside producer or transform logic
    #[error("producer failure: {0}")]
    Producer(String),
    /// Invalid buffer/policy/capacity combination, detected at construction
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The subscription was cancelled before the flow terminated
    #[error("flow cancelled")]
    Cancelled,
    /// `reduce` was applied to a flow that completed without values
    #[error("reduce on an empty flow")]
    EmptySource,
}

impl FlowError {
    /// Shorthand for a producer failure with a message
    pub fn producer(msg: impl Into<String>) -> Self {
        FlowError::Producer(msg.into())
    }
}

/// Result type for flow operations
pub type FlowResult<T> = Result<T, FlowError>;
