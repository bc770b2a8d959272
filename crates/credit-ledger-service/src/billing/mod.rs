//! Ledgers and state machines that mutate account balances.
//!
//! Every operation here runs inside one [`AccountTxn`] obtained through
//! [`atomically`], so the idempotency checks and the mutation they guard
//! commit together or not at all.

pub mod grants;
pub mod plans;
pub mod processor;
pub mod usage;

use credit_ledger_core::{AccountId, BillingError, Result};
use credit_ledger_store::{AccountTxn, Store, StoreError};

/// Maximum attempts for a transaction that keeps hitting lock conflicts.
pub const MAX_ATTEMPTS: u32 = 5;

/// Run `f` inside a transaction on `account_id` and commit it.
///
/// The closure may run more than once: a conflict (lock timeout, or a
/// unique key taken by a concurrent commit) rolls the attempt back and
/// starts over with fresh state, up to [`MAX_ATTEMPTS`] times.
///
/// # Errors
///
/// Returns `BillingError::AccountNotFound` if the account does not exist,
/// `BillingError::Conflict` once retries are exhausted, or whatever `f`
/// returns.
pub fn atomically<T, F>(store: &dyn Store, account_id: &AccountId, mut f: F) -> Result<T>
where
    F: FnMut(&mut dyn AccountTxn) -> Result<T>,
{
    let mut attempt = 1;
    loop {
        match run_once(store, account_id, &mut f) {
            Err(BillingError::Conflict { .. }) if attempt < MAX_ATTEMPTS => {
                tracing::debug!(
                    account_id = %account_id,
                    attempt,
                    "Transaction conflict, retrying"
                );
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn run_once<T, F>(store: &dyn Store, account_id: &AccountId, f: &mut F) -> Result<T>
where
    F: FnMut(&mut dyn AccountTxn) -> Result<T>,
{
    let mut txn = store.begin(account_id)?;
    let value = f(&mut *txn)?;
    txn.commit()?;
    Ok(value)
}

/// Map a store error raised inside a transaction.
///
/// A duplicate key here means a concurrent transaction committed the same
/// record first; retrying re-runs the lookups, which then report the
/// duplicate as an ordinary no-op.
pub(crate) fn in_txn(account_id: &AccountId, err: StoreError) -> BillingError {
    match err {
        StoreError::DuplicateKey { .. } => BillingError::Conflict {
            account_id: account_id.to_string(),
        },
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_ledger_core::{Account, UserId};
    use credit_ledger_store::MemoryStore;

    #[test]
    fn commits_closure_result() {
        let store = MemoryStore::new();
        let id = AccountId::User(UserId::generate());
        store.insert_account(&Account::new(id)).unwrap();

        let balance = atomically(&store, &id, |txn| {
            txn.account_mut().credit_balance = 42;
            Ok(txn.account().credit_balance)
        })
        .unwrap();

        assert_eq!(balance, 42);
        assert_eq!(store.get_account(&id).unwrap().unwrap().credit_balance, 42);
    }

    #[test]
    fn retries_conflicts_then_gives_up() {
        let store = MemoryStore::new();
        let id = AccountId::User(UserId::generate());
        store.insert_account(&Account::new(id)).unwrap();

        let mut calls = 0;
        let result: Result<()> = atomically(&store, &id, |_| {
            calls += 1;
            Err(BillingError::Conflict {
                account_id: id.to_string(),
            })
        });

        assert!(matches!(result, Err(BillingError::Conflict { .. })));
        assert_eq!(calls, MAX_ATTEMPTS);
    }

    #[test]
    fn error_rolls_back() {
        let store = MemoryStore::new();
        let id = AccountId::User(UserId::generate());
        store.insert_account(&Account::new(id)).unwrap();

        let result: Result<()> = atomically(&store, &id, |txn| {
            txn.account_mut().credit_balance = 7;
            Err(BillingError::InvalidAmount("nope".into()))
        });

        assert!(result.is_err());
        assert_eq!(store.get_account(&id).unwrap().unwrap().credit_balance, 0);
    }

    #[test]
    fn missing_account_is_reported() {
        let store = MemoryStore::new();
        let id = AccountId::User(UserId::generate());
        let result = atomically(&store, &id, |_| Ok(()));
        assert!(matches!(result, Err(BillingError::AccountNotFound { .. })));
    }
}
