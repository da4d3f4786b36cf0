use thiserror::Error;

/// Engine-wide error taxonomy.
///
/// `Clone` is required so results can be fanned out through the cache's
/// shared in-flight computations: every waiter receives the same failure.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Upstream exchange is unreachable or returned a server-side error
    #[error("Remote Unavailable: {0}")]
    RemoteUnavailable(String),

    /// Upstream exchange rejected the call with a rate-limit response
    #[error("Rate Limited: {0}")]
    RateLimited(String),

    /// A call exceeded its timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Upstream payload could not be parsed into the canonical shape
    #[error("Malformed Response: {0}")]
    MalformedResponse(String),

    /// The circuit breaker for this exchange is open, call short-circuited
    #[error("Circuit breaker open for exchange: {0}")]
    CircuitOpen(String),

    /// No candidate exchange produced a usable result before the deadline
    #[error("All exchanges unavailable for this request")]
    AllExchangesUnavailable,

    /// Caller-supplied parameters are invalid
    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Config Error: {0}")]
    ConfigError(String),

    /// Capability not offered by this exchange adapter
    #[error("Unsupported Operation: {0}")]
    Unsupported(String),

    /// Unknown/unclassified errors
    #[error("Unknown Error: {0}")]
    Unknown(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Timeout(format!("HTTP request timed out: {}", err))
        } else if err.is_connect() {
            EngineError::RemoteUnavailable(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            EngineError::MalformedResponse(format!("Response decoding failed: {}", err))
        } else {
            EngineError::Unknown(format!("HTTP error: {}", err))
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::MalformedResponse(format!("JSON error: {}", err))
    }
}

impl EngineError {
    /// Whether a later retry of the same call could plausibly succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::RemoteUnavailable(_) => true,
            EngineError::RateLimited(_) => true,
            EngineError::Timeout(_) => true,
            EngineError::MalformedResponse(_) => false, // data format issues need a code fix
            EngineError::CircuitOpen(_) => true, // clears once the cool-down elapses
            EngineError::AllExchangesUnavailable => true,
            EngineError::InvalidInput(_) => false,
            EngineError::ConfigError(_) => false,
            EngineError::Unsupported(_) => false,
            EngineError::Unknown(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
