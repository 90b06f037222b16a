use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForceCoolingError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Network error")]
    NetworkError,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Device '{0}' not found")]
    DeviceNotFound(String),
}
