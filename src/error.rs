//! Error types for warpact.
//!
//! All errors are strongly typed using thiserror. Command failures carry
//! a short human-readable reason; nothing in this crate panics the host.

use thiserror::Error;

use crate::principal::PrincipalId;

/// Failures of conflict commands.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConflictError {
    /// No conflict exists between the two principals (either direction
    /// for bypass requests, the exact direction for `end`).
    #[error("No active conflict with that principal")]
    NoSuchConflict,

    /// A conflict already exists for this ordered pair.
    #[error("Already at war with {target}")]
    AlreadyAtWar {
        /// The targeted principal.
        target: PrincipalId,
    },

    /// A principal tried to declare a conflict on themselves.
    #[error("Cannot declare a conflict on yourself")]
    SelfConflict,

    /// Either party lacks leader-equivalent rank.
    #[error("{principal} does not hold leader rank")]
    NotLeader {
        /// The principal failing the rank check.
        principal: PrincipalId,
    },

    /// The identity service does not know this principal.
    #[error("Unknown principal {principal}")]
    PrincipalUnresolvable {
        /// The unresolvable principal.
        principal: PrincipalId,
    },

    /// Transient: a privilege grant could not be applied because a
    /// principal is offline or the gateway is unavailable. Retrying
    /// (automatically via the tick driver, or by re-issuing the vote)
    /// will eventually succeed once the principal is reachable.
    #[error("Privilege grant failed; it will be retried once everyone is reachable")]
    GrantFailed,
}

/// Failures of the persistence adapter.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The snapshot file could not be read or written.
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk document matched no known format.
    #[error("Snapshot corrupt: {reason}")]
    Corrupt {
        /// What failed to decode.
        reason: String,
    },

    /// The in-memory state could not be encoded.
    #[error("Snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Top-level error type for warpact operations.
#[derive(Debug, Error)]
pub enum WarError {
    /// A conflict command failed.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// A persistence operation failed.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// The store was constructed with an invalid configuration.
    #[error("Invalid configuration: {message}")]
    Config {
        /// What was rejected.
        message: String,
    },
}

impl WarError {
    /// Returns true if retrying the same operation can succeed without
    /// any caller-side change.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict(e) => matches!(e, ConflictError::GrantFailed),
            Self::Persist(e) => matches!(e, PersistError::Io(_)),
            Self::Config { .. } => false,
        }
    }
}

/// Result type alias for warpact operations.
pub type WarResult<T> = Result<T, WarError>;
