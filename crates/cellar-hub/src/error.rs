//! Error types for the real-time hub.

/// Errors raised by the hub, an observer connection, or the ingress adapter.
///
/// Only [`HubError::Serialization`] and [`HubError::Unavailable`] ever reach
/// a caller of [`crate::Hub::broadcast`]. The observer-level variants are
/// absorbed at the connection boundary and only affect that one observer.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The event could not be encoded; it is dropped for every observer.
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The observer's outbound queue is full.
    #[error("observer queue is full")]
    QueueOverflow,

    /// The observer connection is no longer active.
    #[error("observer connection is closed")]
    Closed,

    /// Writing a frame to the observer's transport failed.
    #[error("observer transport write failed: {0}")]
    TransportWrite(String),

    /// The coordination loop has stopped.
    #[error("hub coordination loop is not running")]
    Unavailable,
}
