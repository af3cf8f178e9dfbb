//! Optimistic update engine.
//!
//! All mutations of an existing account funnel through
//! [`update_with_retries`]: apply a mutator to a working copy, persist
//! through the versioned store, and on contention refetch the authoritative
//! record and try again, bounded.

use courier_store::{AccountsStore, StoreError};
use courier_types::{Account, Pni};
use tracing::debug;

use crate::error::{Error, InternalSnafu, Result, RetryLimitExceededSnafu};

/// How many persist attempts a contested update gets before giving up.
///
/// Contention on a single account is rare enough under production load that
/// no backoff is needed between attempts.
pub(crate) const MAX_UPDATE_ATTEMPTS: u32 = 10;

/// The store write an update run performs on each attempt.
#[derive(Debug, Clone)]
pub(crate) enum PersistOp {
    /// Plain versioned write-back.
    Update,
    /// Atomic number + PNI swap.
    ChangeNumber {
        /// The number to move to.
        number: String,
        /// Its phone-number identifier.
        pni: Pni,
    },
    /// Atomic username assignment.
    SetUsername {
        /// The canonical username.
        username: String,
    },
    /// Atomic username clear.
    ClearUsername,
}

async fn persist(
    store: &dyn AccountsStore,
    op: &PersistOp,
    account: &mut Account,
) -> Result<(), StoreError> {
    match op {
        PersistOp::Update => store.update(account).await,
        PersistOp::ChangeNumber { number, pni } => {
            store.change_number(account, number, *pni).await
        }
        PersistOp::SetUsername { username } => store.set_username(account, username).await,
        PersistOp::ClearUsername => store.clear_username(account).await,
    }
}

/// Applies `mutator` to a working copy of `original` and persists it through
/// `op`, retrying on contention.
///
/// - If the mutator reports nothing changed, the working copy is returned
///   without a write.
/// - On a successful persist the caller's `original` is marked stale and a
///   fresh detached copy is returned; callers must switch to the return
///   value.
/// - On [`StoreError::Contested`] the authoritative record is refetched and
///   the mutator re-run; if it now reports nothing to do (another writer
///   already got there), the refetched copy is returned as-is.
/// - [`StoreError::UsernameNotAvailable`] propagates immediately; it is not
///   contention.
pub(crate) async fn update_with_retries<M>(
    store: &dyn AccountsStore,
    original: &Account,
    op: PersistOp,
    mut mutator: M,
) -> Result<Account>
where
    M: FnMut(&mut Account) -> bool,
{
    let mut working = original.clone();
    if !mutator(&mut working) {
        return Ok(working);
    }

    let aci = original.aci();
    let mut attempts = 0;

    loop {
        match persist(store, &op, &mut working).await {
            Ok(()) => {
                original.mark_stale();
                return Ok(working);
            }
            Err(StoreError::Contested { .. }) => {
                attempts += 1;
                if attempts >= MAX_UPDATE_ATTEMPTS {
                    return RetryLimitExceededSnafu { aci, attempts }.fail();
                }
                debug!(%aci, attempts, "contested write, refetching");

                working = store
                    .get_by_aci(aci)
                    .await
                    .map_err(|source| Error::Store { source })?
                    .ok_or_else(|| {
                        InternalSnafu {
                            message: format!("account {aci} vanished during a contested update"),
                        }
                        .build()
                    })?;

                if !mutator(&mut working) {
                    return Ok(working);
                }
            }
            Err(StoreError::UsernameNotAvailable) => return Err(Error::UsernameNotAvailable),
            Err(source) => return Err(Error::Store { source }),
        }
    }
}
