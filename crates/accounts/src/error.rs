//! Error types for the account coordinator.

use courier_store::{StoreError, TombstoneError};
use courier_types::Aci;
use snafu::Snafu;

use crate::collaborators::CollaboratorError;

/// Errors surfaced by the account coordinator.
///
/// The coordinator recovers locally from cache failures, presence-disconnect
/// failures, and contested writes (bounded retry); everything here is what
/// remains once local recovery is exhausted.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The durable store rejected or failed an operation.
    #[snafu(display("account store failure: {source}"))]
    Store {
        /// The underlying store error.
        source: StoreError,
    },

    /// The requested username is reserved for or taken by another account.
    ///
    /// Only `set_username` surfaces this.
    #[snafu(display("username is not available"))]
    UsernameNotAvailable,

    /// Contested writes exhausted the bounded retry budget.
    #[snafu(display("update of {aci} abandoned after {attempts} contested attempts"))]
    RetryLimitExceeded {
        /// The account being updated.
        aci: Aci,
        /// How many persist attempts were made.
        attempts: u32,
    },

    /// A per-number lease could not be acquired in time; the operation was
    /// abandoned before any durable effect.
    #[snafu(display("timed out waiting for the lease on {number}"))]
    LeaseUnavailable {
        /// The contended phone number.
        number: String,
    },

    /// The account could not be encoded for a cache write. Encoding our own
    /// record never legitimately fails, so this indicates a programming bug
    /// and is surfaced rather than degraded.
    #[snafu(display("failed to encode account {aci} for the cache: {source}"))]
    CacheEncode {
        /// The account being encoded.
        aci: Aci,
        /// The serializer error.
        source: serde_json::Error,
    },

    /// Tombstone persistence failed.
    #[snafu(display("deleted-accounts store failure: {source}"))]
    Tombstone {
        /// The underlying tombstone store error.
        source: TombstoneError,
    },

    /// A downstream collaborator the operation cannot proceed without
    /// failed.
    #[snafu(display("collaborator failure: {source}"))]
    Collaborator {
        /// The collaborator error.
        source: CollaboratorError,
    },

    /// An invariant the coordinator relies on did not hold.
    #[snafu(display("internal invariant violated: {message}"))]
    Internal {
        /// What went wrong.
        message: String,
    },
}

/// Result type for coordinator operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Remaps a `UsernameNotAvailable` that escaped an operation which can
    /// never legitimately produce one. Keeps the caller-visible error
    /// contract of `set_username` exclusive.
    pub(crate) fn reject_username_conflict(self, operation: &'static str) -> Self {
        match self {
            Error::UsernameNotAvailable => Error::Internal {
                message: format!("username conflict surfaced from {operation}"),
            },
            other => other,
        }
    }
}
