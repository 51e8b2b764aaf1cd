use thiserror::Error;

/// Errors surfaced to callers of the contact surface.
///
/// Queue-internal failures never show up here: they are retried or dropped
/// by the executor.
#[derive(Debug, Error)]
pub enum ContactError {
    #[error("invalid named user ID {0:?}: must be between 1 and {1} characters")]
    InvalidNamedUserId(String, usize),

    #[error("empty audience update")]
    EmptyUpdate,

    #[error("invalid channel: {0}")]
    InvalidChannel(&'static str),

    #[error("contacts are disabled")]
    Disabled,

    #[error("missing channel ID")]
    MissingChannelId,

    #[error("missing contact ID")]
    MissingContactId,

    #[error("contact ID mismatch: expected {expected}, resolved {actual:?}")]
    ContactIdMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("failed to refresh auth token")]
    TokenRefreshFailed,

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),
}

pub type ContactResult<T> = std::result::Result<T, ContactError>;
