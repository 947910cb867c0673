use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// The backing capture device could not be opened.
    #[error("Device unavailable [{device}]: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    /// A capture call returned no data. Fatal to the owning producer's
    /// run loop, recoverable at the session level.
    #[error("Capture read failed [{device}]: {reason}")]
    ReadFailure { device: String, reason: String },

    /// A tick was requested after the producer was stopped.
    #[error("Stream not live: {0}")]
    StreamNotLive(String),

    /// Socket-level signaling failure. Fatal to the session.
    #[error("Signaling transport error: {0}")]
    SignalingTransport(String),

    /// Undecodable payload on the signaling or command channel.
    /// Logged and skipped, never fatal.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Message that the current role never expects. Logged and skipped.
    #[error("Unexpected {message} message for role {role}")]
    UnexpectedMessageForRole { role: String, message: String },

    /// Command channel used before it reached the open state.
    #[error("Command channel not ready")]
    NotReady,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Video error: {0}")]
    VideoError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, AppError>;
