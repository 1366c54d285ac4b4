//! Crate-level error types.
//!
//! [`TrackerError`] unifies every error source (configuration, HTTP, JSON,
//! event stream) behind a single enum so callers can match on the variant
//! they care about while still using the `?` operator for easy propagation.
//!
//! The live pipeline itself never hands these to presentation code: stream
//! failures end up in [`ConnectionState`](crate::stream::ConnectionState)
//! and prefetch failures in the [`ItemCatalog`](crate::prefetch::ItemCatalog).

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Configuration could not be read or holds an invalid value.
    #[error("configuration error: {0}")]
    Config(String),

    /// An HTTP request (REST or event stream) failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A payload was structurally valid JSON but not the shape we expect.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The event stream ended or produced an unreadable frame.
    #[error("stream error: {0}")]
    Stream(String),

    /// Reading a local file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
