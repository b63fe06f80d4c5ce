use thiserror::Error;
use tracing::error;

use sayit_types::models::DeliveryStatus;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The conversation does not exist or the caller is not a participant.
    #[error("invalid conversation")]
    InvalidConversation,

    #[error("message text is empty")]
    EmptyMessage,

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("message {sequence} not found")]
    UnknownMessage { sequence: u64 },

    #[error("a conversation needs at least two distinct participants")]
    InvalidParticipants,

    /// Subscription target the caller may not observe.
    #[error("invalid target")]
    InvalidTarget,

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    /// Storage failed or is unreachable. Writes are not retried.
    #[error("unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),

    /// An internal invariant broke, e.g. a sequence number was assigned twice.
    #[error("consistency violation: {0}")]
    Consistency(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unavailable,
    Consistency,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Consistency(_) => ErrorKind::Consistency,
            _ => ErrorKind::Validation,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConversation => "INVALID_CONVERSATION",
            Self::EmptyMessage => "EMPTY_MESSAGE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::UnknownMessage { .. } => "UNKNOWN_MESSAGE",
            Self::InvalidParticipants => "INVALID_PARTICIPANTS",
            Self::InvalidTarget => "INVALID_TARGET",
            Self::InvalidProfile(_) => "INVALID_PROFILE",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Consistency(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        if sayit_db::is_constraint_violation(&err) {
            error!("Storage constraint violated: {:#}", err);
            Self::Consistency(format!("{:#}", err))
        } else {
            Self::Unavailable(err)
        }
    }
}
