use thiserror::Error;

use crate::stage::CheckoutStage;
use crate::validation::FormErrors;

/// Failures of a remote collaborator (inventory, cart, order, download).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("circuit breaker is open - remote service temporarily unavailable")]
    CircuitOpen,
}

/// Errors raised while driving the checkout flow.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Generic user-facing message for a failed remote call. Not retried.
    #[error("{message}")]
    Remote {
        message: &'static str,
        #[source]
        source: ServiceError,
    },
    #[error("validation failed: {0}")]
    Validation(FormErrors),
    #[error("cannot {action} from {stage:?}")]
    InvalidTransition {
        action: &'static str,
        stage: CheckoutStage,
    },
    #[error("quantity {requested} for {key} exceeds the allowed maximum {max}")]
    QuantityOutOfRange {
        key: String,
        requested: u32,
        max: u32,
    },
    #[error("no session has been chosen")]
    NoSessionSelected,
    #[error("unknown session {0}")]
    UnknownSession(String),
    #[error("cart has expired")]
    Expired,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CheckoutError {
    pub fn remote(message: &'static str, source: ServiceError) -> Self {
        CheckoutError::Remote { message, source }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode value for {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from reading configuration out of the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a valid number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error(
        "For your security this confirmation page cannot be reloaded. \
         Please click the Back button or check your email for tickets."
    )]
    MissingReference,
    #[error("{message}")]
    Remote {
        message: &'static str,
        #[source]
        source: ServiceError,
    },
}

pub type CheckoutResult<T> = Result<T, CheckoutError>;
