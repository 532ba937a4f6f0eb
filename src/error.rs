//! Error handling for the bridge service.

use thiserror::Error;

/// Bridge error type.
///
/// Read faults reset the affected batch before they propagate, derivation
/// faults are handled inside the processor, everything that reaches the
/// runner is fatal for the run.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// Configuration loading/validation errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Register transport errors (connect, read, short response)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Data handling errors (decode, derivation, serialization)
    #[error("Data error: {0}")]
    DataError(String),

    /// MQTT connection establishment and liveness errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Operation timeout errors
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the bridge service.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        BridgeError::ConfigError(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        BridgeError::TransportError(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        BridgeError::DataError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        BridgeError::ConnectionError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        BridgeError::TimeoutError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        BridgeError::InternalError(msg.into())
    }

    pub fn not_connected(detail: Option<String>) -> Self {
        BridgeError::ConnectionError(detail.unwrap_or_else(|| "MQTT is not connected".to_string()))
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::TransportError(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::DataError(format!("JSON: {err}"))
    }
}

impl From<figment::Error> for BridgeError {
    fn from(err: figment::Error) -> Self {
        BridgeError::ConfigError(err.to_string())
    }
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::ConnectionError(format!("MQTT: {err}"))
    }
}
