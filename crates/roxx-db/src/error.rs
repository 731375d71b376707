use roxx_types::models::CallStatus;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Unknown uid, chat, message, call or story.
    #[error("{0} not found")]
    NotFound(String),

    /// Duplicate email on register.
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Invalid credentials")]
    InvalidCredential,

    /// The account has been globally blocked by an administrator.
    #[error("Account suspended")]
    Suspended,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Illegal call transition: {from} -> {to}")]
    IllegalTransition { from: CallStatus, to: CallStatus },

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Database lock poisoned")]
    LockPoisoned,

    /// A stored row could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn not_found(kind: &str, id: &str) -> Self {
        Self::NotFound(format!("{kind} {id}"))
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
