//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait,
//! built on a pessimistic `TransactionDB`. Every transaction locks the account
//! row on `begin` and each unique-index key it checks, so two writers racing
//! on the same idempotency key serialize on that key's lock.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, MultiThreaded,
    Options, Transaction, TransactionDB, TransactionDBOptions,
};

use credit_ledger_core::{
    Account, AccountId, ChargeKey, CreditGrant, GrantType, UsageChargeEntry,
};

use crate::error::{Result, StoreError};
use crate::schema::{all_column_families, cf};
use crate::{index, keys, AccountTxn, Store};

/// How long a transaction waits for a row lock before giving up.
const LOCK_TIMEOUT_MS: i64 = 5_000;

type Db = TransactionDB<MultiThreaded>;

fn db_err(err: &rocksdb::Error) -> StoreError {
    match err.kind() {
        ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
            StoreError::Conflict(err.to_string())
        }
        _ => StoreError::Database(err.to_string()),
    }
}

/// Serialize a value using CBOR.
fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR.
fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(LOCK_TIMEOUT_MS);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, &txn_opts, path, cf_descriptors)
            .map_err(|e| db_err(&e))?;

        tracing::info!("opened RocksDB transaction store");
        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| db_err(&e))?
            .map(|data| deserialize(&data))
            .transpose()
    }

    /// Collect one page of per-account index entries, newest first.
    ///
    /// Walks the account's range backwards from its upper bound, so a page
    /// reads at most `offset + limit` entries.
    fn scan_account_index(
        &self,
        cf_name: &str,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(cf_name)?;
        let prefix = keys::account_prefix(account_id);
        let end = keys::account_prefix_end(account_id);

        let mut entries = Vec::with_capacity(limit);
        if limit == 0 {
            return Ok(entries);
        }
        let mut seen = 0;
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&end, Direction::Reverse))
        {
            let (key, value) = item.map_err(|e| db_err(&e))?;
            if !key.starts_with(&prefix) {
                // Only the bound itself sorts between the range and the seek target.
                if &*key > prefix.as_slice() {
                    continue;
                }
                break;
            }
            seen += 1;
            if seen <= offset {
                continue;
            }
            entries.push((key.to_vec(), value.to_vec()));
            if entries.len() >= limit {
                break;
            }
        }
        Ok(entries)
    }
}

impl Store for RocksStore {
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.get(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    fn insert_account(&self, account: &Account) -> Result<bool> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let key = keys::account_key(&account.id);

        let txn = self.db.transaction();
        if txn
            .get_for_update_cf(&cf_accounts, &key, true)
            .map_err(|e| db_err(&e))?
            .is_some()
        {
            return Ok(false);
        }
        txn.put_cf(&cf_accounts, &key, serialize(account)?)
            .map_err(|e| db_err(&e))?;
        if let Some(customer) = &account.stripe_customer_id {
            let cf_customers = self.cf(cf::ACCOUNTS_BY_CUSTOMER)?;
            txn.put_cf(&cf_customers, keys::customer_key(customer), &key)
                .map_err(|e| db_err(&e))?;
        }
        txn.commit().map_err(|e| db_err(&e))?;
        Ok(true)
    }

    fn find_account_by_customer(&self, customer_id: &str) -> Result<Option<Account>> {
        let cf = self.cf(cf::ACCOUNTS_BY_CUSTOMER)?;
        let Some(account_key) = self
            .db
            .get_cf(&cf, keys::customer_key(customer_id))
            .map_err(|e| db_err(&e))?
        else {
            return Ok(None);
        };
        self.get(cf::ACCOUNTS, &account_key)
    }

    fn get_grant_by_key(&self, external_event_id: &str) -> Result<Option<CreditGrant>> {
        let cf = self.cf(cf::GRANTS_BY_EVENT)?;
        let Some(grant_key) = self
            .db
            .get_cf(&cf, keys::grant_event_key(external_event_id))
            .map_err(|e| db_err(&e))?
        else {
            return Ok(None);
        };
        self.get(cf::GRANTS, &grant_key)
    }

    fn list_grants(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditGrant>> {
        let mut grants = Vec::new();
        for (key, _) in self.scan_account_index(cf::GRANTS_BY_ACCOUNT, account_id, limit, offset)? {
            let Some(record_id) = keys::extract_record_id(&key) else {
                continue;
            };
            if let Some(grant) = self.get(cf::GRANTS, &keys::grant_key(&record_id))? {
                grants.push(grant);
            }
        }
        Ok(grants)
    }

    fn list_usage_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageChargeEntry>> {
        let mut entries = Vec::new();
        for (_, usage_key) in
            self.scan_account_index(cf::USAGE_BY_ACCOUNT, account_id, limit, offset)?
        {
            if let Some(entry) = self.get(cf::USAGE_ENTRIES, &usage_key)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn begin(&self, account_id: &AccountId) -> Result<Box<dyn AccountTxn + '_>> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let txn = self.db.transaction();
        let account: Account = txn
            .get_for_update_cf(&cf_accounts, keys::account_key(account_id), true)
            .map_err(|e| db_err(&e))?
            .map(|data| deserialize(&data))
            .transpose()?
            .ok_or_else(|| StoreError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            })?;

        Ok(Box::new(RocksTxn {
            store: self,
            txn,
            previous_customer: account.stripe_customer_id.clone(),
            account,
        }))
    }
}

struct RocksTxn<'a> {
    store: &'a RocksStore,
    txn: Transaction<'a, Db>,
    account: Account,
    previous_customer: Option<String>,
}

impl RocksTxn<'_> {
    /// Read a row under an exclusive lock held until commit or rollback.
    fn locked_get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.store.cf(cf_name)?;
        self.txn
            .get_for_update_cf(&cf, key, true)
            .map_err(|e| db_err(&e))
    }

    fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.store.cf(cf_name)?;
        self.txn.put_cf(&cf, key, value).map_err(|e| db_err(&e))
    }

    /// Follow a unique index to its grant record.
    fn grant_via(&self, index_cf: &str, index_key: &[u8]) -> Result<Option<CreditGrant>> {
        let Some(grant_key) = self.locked_get(index_cf, index_key)? else {
            return Ok(None);
        };
        let cf = self.store.cf(cf::GRANTS)?;
        self.txn
            .get_cf(&cf, grant_key)
            .map_err(|e| db_err(&e))?
            .map(|data| deserialize(&data))
            .transpose()
    }
}

impl AccountTxn for RocksTxn<'_> {
    fn account(&self) -> &Account {
        &self.account
    }

    fn account_mut(&mut self) -> &mut Account {
        &mut self.account
    }

    fn grant_by_key(&mut self, external_event_id: &str) -> Result<Option<CreditGrant>> {
        self.grant_via(cf::GRANTS_BY_EVENT, &keys::grant_event_key(external_event_id))
    }

    fn monthly_grant_for_period(&mut self, period_key: &str) -> Result<Option<CreditGrant>> {
        let key = keys::grant_period_key(&self.account.id, period_key);
        self.grant_via(cf::GRANTS_BY_PERIOD, &key)
    }

    fn usage_entry(&mut self, key: &ChargeKey) -> Result<Option<UsageChargeEntry>> {
        self.locked_get(cf::USAGE_ENTRIES, &keys::usage_key(key))?
            .map(|data| deserialize(&data))
            .transpose()
    }

    fn insert_grant(&mut self, grant: CreditGrant) -> Result<()> {
        let event_key = keys::grant_event_key(&grant.external_event_id);
        if self.locked_get(cf::GRANTS_BY_EVENT, &event_key)?.is_some() {
            return Err(StoreError::DuplicateKey {
                index: index::GRANT_EVENT,
                key: grant.external_event_id,
            });
        }

        let grant_key = keys::grant_key(&grant.id);
        if let (GrantType::PlanMonthly, Some(period)) = (grant.grant_type, &grant.period_key) {
            let period_key = keys::grant_period_key(&grant.account_id, period);
            if self.locked_get(cf::GRANTS_BY_PERIOD, &period_key)?.is_some() {
                return Err(StoreError::DuplicateKey {
                    index: index::GRANT_PERIOD,
                    key: period.clone(),
                });
            }
            self.put(cf::GRANTS_BY_PERIOD, &period_key, &grant_key)?;
        }

        self.put(cf::GRANTS, &grant_key, &serialize(&grant)?)?;
        self.put(cf::GRANTS_BY_EVENT, &event_key, &grant_key)?;
        self.put(
            cf::GRANTS_BY_ACCOUNT,
            &keys::account_record_key(&grant.account_id, &grant.id),
            &[],
        )
    }

    fn insert_usage_entry(&mut self, entry: UsageChargeEntry) -> Result<()> {
        let charge_key = entry.key();
        let usage_key = keys::usage_key(&charge_key);
        if self.locked_get(cf::USAGE_ENTRIES, &usage_key)?.is_some() {
            return Err(StoreError::DuplicateKey {
                index: index::USAGE_CHARGE,
                key: format!(
                    "{}/{}/{}",
                    charge_key.actor,
                    charge_key.turn_id,
                    charge_key.kind.as_str()
                ),
            });
        }

        self.put(cf::USAGE_ENTRIES, &usage_key, &serialize(&entry)?)?;
        self.put(
            cf::USAGE_BY_ACCOUNT,
            &keys::account_record_key(&entry.actor, &entry.id),
            &usage_key,
        )
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let account_key = keys::account_key(&self.account.id);
        self.put(cf::ACCOUNTS, &account_key, &serialize(&self.account)?)?;

        if self.previous_customer != self.account.stripe_customer_id {
            let cf_customers = self.store.cf(cf::ACCOUNTS_BY_CUSTOMER)?;
            if let Some(old) = &self.previous_customer {
                self.txn
                    .delete_cf(&cf_customers, keys::customer_key(old))
                    .map_err(|e| db_err(&e))?;
            }
            if let Some(new) = &self.account.stripe_customer_id {
                let customer_key = keys::customer_key(new);
                let holder = self
                    .txn
                    .get_for_update_cf(&cf_customers, &customer_key, true)
                    .map_err(|e| db_err(&e))?;
                if holder.is_some_and(|holder| holder != account_key) {
                    tracing::warn!(
                        account_id = %self.account.id,
                        customer_id = %new,
                        "Stripe customer was linked to another account, relinking"
                    );
                }
                self.txn
                    .put_cf(&cf_customers, customer_key, &account_key)
                    .map_err(|e| db_err(&e))?;
            }
        }

        self.txn.commit().map_err(|e| db_err(&e))
    }
}
