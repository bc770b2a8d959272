//! Transactional storage layer for the credit ledger.
//!
//! This crate persists accounts, credit grants, and usage charge entries.
//! Every balance change happens inside an [`AccountTxn`]: a unit of work
//! scoped to one account row that either commits all of its writes or none.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`]: a mutex-guarded in-process store, used by tests and
//!   single-node development.
//! - `RocksStore` (feature `rocksdb-backend`): a `RocksDB` `TransactionDB`
//!   with pessimistic row locks.
//!
//! # Uniqueness
//!
//! The store, not the caller, enforces the ledger's uniqueness constraints.
//! [`AccountTxn::insert_grant`] and [`AccountTxn::insert_usage_entry`]
//! return [`StoreError::DuplicateKey`] when a key is already taken, even by
//! a concurrent transaction that committed first.
//!
//! # Example
//!
//! ```
//! use credit_ledger_core::{Account, AccountId, UserId};
//! use credit_ledger_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let id = AccountId::User(UserId::generate());
//! store.insert_account(&Account::new(id)).unwrap();
//!
//! let mut txn = store.begin(&id).unwrap();
//! txn.account_mut().credit_balance += 10;
//! txn.commit().unwrap();
//!
//! assert_eq!(store.get_account(&id).unwrap().unwrap().credit_balance, 10);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use credit_ledger_core::{Account, AccountId, ChargeKey, CreditGrant, UsageChargeEntry};

/// Index names reported by [`StoreError::DuplicateKey`].
pub mod index {
    /// Grant idempotency key.
    pub const GRANT_EVENT: &str = "grant_event";
    /// Monthly grant `(account, period_key)`.
    pub const GRANT_PERIOD: &str = "grant_period";
    /// Usage entry `(actor, turn_id, charge_kind)`.
    pub const USAGE_CHARGE: &str = "usage_charge";
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Get an account by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Create an account unless one already exists.
    ///
    /// Returns `true` if the account was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn insert_account(&self, account: &Account) -> Result<bool>;

    /// Resolve an account from its provider customer reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_account_by_customer(&self, customer_id: &str) -> Result<Option<Account>>;

    // =========================================================================
    // Ledger Reads
    // =========================================================================

    /// Get a grant by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_grant_by_key(&self, external_event_id: &str) -> Result<Option<CreditGrant>>;

    /// List grants for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_grants(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditGrant>>;

    /// List usage entries for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_usage_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageChargeEntry>>;

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Open a transaction scoped to one account.
    ///
    /// The account row is locked until the transaction commits or is dropped.
    /// Callers must not use other `Store` methods while holding it.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::Conflict` if the row lock could not be acquired.
    fn begin(&self, account_id: &AccountId) -> Result<Box<dyn AccountTxn + '_>>;
}

/// A unit of work on one account.
///
/// Writes become visible to other readers only on [`commit`](Self::commit).
/// Dropping the transaction without committing discards them.
pub trait AccountTxn {
    /// The locked account row, including uncommitted changes.
    fn account(&self) -> &Account;

    /// Mutable access to the account row. Persisted on commit.
    fn account_mut(&mut self) -> &mut Account;

    /// Look up a grant by idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn grant_by_key(&mut self, external_event_id: &str) -> Result<Option<CreditGrant>>;

    /// Look up this account's monthly grant for a billing period.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn monthly_grant_for_period(&mut self, period_key: &str) -> Result<Option<CreditGrant>>;

    /// Look up a usage entry by its uniqueness triple.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn usage_entry(&mut self, key: &ChargeKey) -> Result<Option<UsageChargeEntry>>;

    /// Record a grant.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if the idempotency key, or for
    /// monthly grants the period key, is taken.
    fn insert_grant(&mut self, grant: CreditGrant) -> Result<()>;

    /// Record a usage entry.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if the `(actor, turn, kind)`
    /// triple is taken.
    fn insert_usage_entry(&mut self, entry: UsageChargeEntry) -> Result<()>;

    /// Persist the account row and every staged record atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; nothing is persisted in that case.
    fn commit(self: Box<Self>) -> Result<()>;
}
