//! Error handling for the poll engine

/// Result type alias for the poll engine
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the poll engine
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Document store read/write/subscription failures
    #[error("Store error: {message}")]
    Store { message: String },

    /// Voting-specific errors (ballot cannot be submitted as-is)
    #[error("Voting error: {message}")]
    Voting { message: String },

    /// Validation errors
    #[error("Validation failed: {field}")]
    Validation { field: String },

    /// The poll is locked or past its deadline
    #[error("Poll {poll_id} is closed")]
    PollClosed { poll_id: String },

    /// Guests may not add options to this poll
    #[error("Poll {poll_id} does not accept guest options")]
    GuestOptionsDisabled { poll_id: String },

    /// Operation reserved for the poll's creator
    #[error("Only the poll creator may do this")]
    NotCreator,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a new store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a new voting error
    pub fn voting(message: impl Into<String>) -> Self {
        Self::Voting {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller may retry the operation later
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

/// Convenience macros for creating specific error types
#[macro_export]
macro_rules! store_error {
    ($msg:expr) => {
        $crate::Error::store($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::store(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! voting_error {
    ($msg:expr) => {
        $crate::Error::voting($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::voting(format!($fmt, $($arg)*))
    };
}
