//! In-memory storage implementation.
//!
//! All tables live behind one mutex. A transaction holds the guard for its
//! whole lifetime, so transactions are fully serialized.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use credit_ledger_core::{
    Account, AccountId, ChargeKey, CreditGrant, GrantType, RecordId, UsageChargeEntry,
};

use crate::error::{Result, StoreError};
use crate::{index, keys, AccountTxn, Store};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    accounts_by_customer: HashMap<String, AccountId>,
    grants: BTreeMap<RecordId, CreditGrant>,
    grants_by_event: HashMap<String, RecordId>,
    grants_by_period: HashMap<Vec<u8>, RecordId>,
    usage_entries: BTreeMap<RecordId, UsageChargeEntry>,
    usage_by_key: HashMap<Vec<u8>, RecordId>,
}

impl Tables {
    fn grant_by_event(&self, external_event_id: &str) -> Option<&CreditGrant> {
        self.grants_by_event
            .get(external_event_id)
            .and_then(|id| self.grants.get(id))
    }

    fn grant_by_period(&self, period_index_key: &[u8]) -> Option<&CreditGrant> {
        self.grants_by_period
            .get(period_index_key)
            .and_then(|id| self.grants.get(id))
    }

    fn usage_by_key(&self, charge_key: &[u8]) -> Option<&UsageChargeEntry> {
        self.usage_by_key
            .get(charge_key)
            .and_then(|id| self.usage_entries.get(id))
    }

    fn index_customer(&mut self, previous: Option<&str>, account: &Account) {
        if previous == account.stripe_customer_id.as_deref() {
            return;
        }
        if let Some(old) = previous {
            if self.accounts_by_customer.get(old) == Some(&account.id) {
                self.accounts_by_customer.remove(old);
            }
        }
        if let Some(new) = &account.stripe_customer_id {
            if let Some(holder) = self.accounts_by_customer.insert(new.clone(), account.id) {
                if holder != account.id {
                    tracing::warn!(
                        account_id = %account.id,
                        previous_account_id = %holder,
                        customer_id = %new,
                        "Stripe customer was linked to another account, relinking"
                    );
                }
            }
        }
    }
}

/// Period index key for a grant, if it participates in the period constraint.
fn period_index(grant: &CreditGrant) -> Option<Vec<u8>> {
    match (grant.grant_type, &grant.period_key) {
        (GrantType::PlanMonthly, Some(period)) => {
            Some(keys::grant_period_key(&grant.account_id, period))
        }
        _ => None,
    }
}

/// In-process storage implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }
}

impl Store for MemoryStore {
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        Ok(self.lock()?.accounts.get(account_id).cloned())
    }

    fn insert_account(&self, account: &Account) -> Result<bool> {
        let mut tables = self.lock()?;
        if tables.accounts.contains_key(&account.id) {
            return Ok(false);
        }
        tables.index_customer(None, account);
        tables.accounts.insert(account.id, account.clone());
        Ok(true)
    }

    fn find_account_by_customer(&self, customer_id: &str) -> Result<Option<Account>> {
        let tables = self.lock()?;
        Ok(tables
            .accounts_by_customer
            .get(customer_id)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    fn get_grant_by_key(&self, external_event_id: &str) -> Result<Option<CreditGrant>> {
        Ok(self.lock()?.grant_by_event(external_event_id).cloned())
    }

    fn list_grants(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditGrant>> {
        let tables = self.lock()?;
        Ok(tables
            .grants
            .values()
            .rev()
            .filter(|grant| grant.account_id == *account_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn list_usage_entries(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageChargeEntry>> {
        let tables = self.lock()?;
        Ok(tables
            .usage_entries
            .values()
            .rev()
            .filter(|entry| entry.actor == *account_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn begin(&self, account_id: &AccountId) -> Result<Box<dyn AccountTxn + '_>> {
        let tables = self.lock()?;
        let account = tables
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "account",
                id: account_id.to_string(),
            })?;
        Ok(Box::new(MemoryTxn {
            previous_customer: account.stripe_customer_id.clone(),
            tables,
            account,
            grants: Vec::new(),
            usage: Vec::new(),
        }))
    }
}

struct MemoryTxn<'a> {
    tables: MutexGuard<'a, Tables>,
    account: Account,
    previous_customer: Option<String>,
    grants: Vec<CreditGrant>,
    usage: Vec<UsageChargeEntry>,
}

impl AccountTxn for MemoryTxn<'_> {
    fn account(&self) -> &Account {
        &self.account
    }

    fn account_mut(&mut self) -> &mut Account {
        &mut self.account
    }

    fn grant_by_key(&mut self, external_event_id: &str) -> Result<Option<CreditGrant>> {
        let staged = self
            .grants
            .iter()
            .find(|grant| grant.external_event_id == external_event_id);
        Ok(staged
            .or_else(|| self.tables.grant_by_event(external_event_id))
            .cloned())
    }

    fn monthly_grant_for_period(&mut self, period_key: &str) -> Result<Option<CreditGrant>> {
        let key = keys::grant_period_key(&self.account.id, period_key);
        let staged = self
            .grants
            .iter()
            .find(|grant| period_index(grant).as_deref() == Some(key.as_slice()));
        Ok(staged.or_else(|| self.tables.grant_by_period(&key)).cloned())
    }

    fn usage_entry(&mut self, key: &ChargeKey) -> Result<Option<UsageChargeEntry>> {
        let staged = self.usage.iter().find(|entry| entry.key() == *key);
        Ok(staged
            .or_else(|| self.tables.usage_by_key(&keys::usage_key(key)))
            .cloned())
    }

    fn insert_grant(&mut self, grant: CreditGrant) -> Result<()> {
        if self.grant_by_key(&grant.external_event_id)?.is_some() {
            return Err(StoreError::DuplicateKey {
                index: index::GRANT_EVENT,
                key: grant.external_event_id,
            });
        }
        if let Some(period) = grant.period_key.as_deref() {
            if grant.grant_type == GrantType::PlanMonthly
                && self.monthly_grant_for_period(period)?.is_some()
            {
                return Err(StoreError::DuplicateKey {
                    index: index::GRANT_PERIOD,
                    key: period.to_string(),
                });
            }
        }
        self.grants.push(grant);
        Ok(())
    }

    fn insert_usage_entry(&mut self, entry: UsageChargeEntry) -> Result<()> {
        let key = entry.key();
        if self.usage_entry(&key)?.is_some() {
            return Err(StoreError::DuplicateKey {
                index: index::USAGE_CHARGE,
                key: format!("{}/{}/{}", key.actor, key.turn_id, key.kind.as_str()),
            });
        }
        self.usage.push(entry);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTxn {
            mut tables,
            account,
            previous_customer,
            grants,
            usage,
        } = *self;

        for grant in grants {
            if let Some(period) = period_index(&grant) {
                tables.grants_by_period.insert(period, grant.id);
            }
            tables
                .grants_by_event
                .insert(grant.external_event_id.clone(), grant.id);
            tables.grants.insert(grant.id, grant);
        }
        for entry in usage {
            tables
                .usage_by_key
                .insert(keys::usage_key(&entry.key()), entry.id);
            tables.usage_entries.insert(entry.id, entry);
        }
        tables.index_customer(previous_customer.as_deref(), &account);
        tables.accounts.insert(account.id, account);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_ledger_core::{ChargeKind, GrantRequest, TurnId, UserId};
    use std::sync::Arc;

    fn store_with_account() -> (MemoryStore, AccountId) {
        let store = MemoryStore::new();
        let id = AccountId::User(UserId::generate());
        assert!(store.insert_account(&Account::new(id)).unwrap());
        (store, id)
    }

    fn topup(id: AccountId, key: &str, amount: u64) -> CreditGrant {
        GrantRequest::new(id, GrantType::Topup, key, amount).into_grant(amount)
    }

    #[test]
    fn insert_account_is_create_if_absent() {
        let (store, id) = store_with_account();
        let mut other = Account::new(id);
        other.credit_balance = 99;
        assert!(!store.insert_account(&other).unwrap());
        assert_eq!(store.get_account(&id).unwrap().unwrap().credit_balance, 0);
    }

    #[test]
    fn begin_requires_account() {
        let store = MemoryStore::new();
        let id = AccountId::User(UserId::generate());
        assert!(matches!(
            store.begin(&id),
            Err(StoreError::NotFound { entity: "account", .. })
        ));
    }

    #[test]
    fn commit_persists_account_and_records() {
        let (store, id) = store_with_account();

        let mut txn = store.begin(&id).unwrap();
        txn.account_mut().credit_balance = 50;
        txn.insert_grant(topup(id, "topup:cs_1", 50)).unwrap();
        txn.commit().unwrap();

        assert_eq!(store.get_account(&id).unwrap().unwrap().credit_balance, 50);
        assert!(store.get_grant_by_key("topup:cs_1").unwrap().is_some());
        assert_eq!(store.list_grants(&id, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let (store, id) = store_with_account();

        {
            let mut txn = store.begin(&id).unwrap();
            txn.account_mut().credit_balance = 50;
            txn.insert_grant(topup(id, "topup:cs_1", 50)).unwrap();
        }

        assert_eq!(store.get_account(&id).unwrap().unwrap().credit_balance, 0);
        assert!(store.get_grant_by_key("topup:cs_1").unwrap().is_none());
    }

    #[test]
    fn duplicate_grant_key_is_rejected() {
        let (store, id) = store_with_account();

        let mut txn = store.begin(&id).unwrap();
        txn.insert_grant(topup(id, "evt_1", 10)).unwrap();
        txn.commit().unwrap();

        let mut txn = store.begin(&id).unwrap();
        let err = txn.insert_grant(topup(id, "evt_1", 10)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateKey { index: index::GRANT_EVENT, .. }
        ));
    }

    #[test]
    fn duplicate_monthly_period_is_rejected() {
        let (store, id) = store_with_account();
        let monthly = |key: &str| {
            GrantRequest::new(id, GrantType::PlanMonthly, key, 300)
                .with_period_key("sub_1:1700000000")
                .into_grant(300)
        };

        let mut txn = store.begin(&id).unwrap();
        txn.insert_grant(monthly("evt_a")).unwrap();
        let err = txn.insert_grant(monthly("evt_b")).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateKey { index: index::GRANT_PERIOD, .. }
        ));
        txn.commit().unwrap();

        let mut txn = store.begin(&id).unwrap();
        assert!(txn.monthly_grant_for_period("sub_1:1700000000").unwrap().is_some());
        assert!(txn.monthly_grant_for_period("sub_1:1702592000").unwrap().is_none());
    }

    #[test]
    fn duplicate_usage_entry_is_rejected() {
        let (store, id) = store_with_account();
        let key = ChargeKey::new(id, TurnId::new("t1").unwrap(), ChargeKind::UserSend);

        let mut txn = store.begin(&id).unwrap();
        txn.insert_usage_entry(UsageChargeEntry::new(key.clone(), 1, 9))
            .unwrap();
        txn.commit().unwrap();

        let mut txn = store.begin(&id).unwrap();
        assert_eq!(txn.usage_entry(&key).unwrap().unwrap().balance_after, 9);
        assert!(txn
            .insert_usage_entry(UsageChargeEntry::new(key, 1, 8))
            .is_err());
    }

    #[test]
    fn customer_index_follows_account() {
        let (store, id) = store_with_account();

        let mut txn = store.begin(&id).unwrap();
        txn.account_mut().stripe_customer_id = Some("cus_1".into());
        txn.commit().unwrap();
        assert_eq!(
            store.find_account_by_customer("cus_1").unwrap().unwrap().id,
            id
        );

        let mut txn = store.begin(&id).unwrap();
        txn.account_mut().stripe_customer_id = Some("cus_2".into());
        txn.commit().unwrap();
        assert!(store.find_account_by_customer("cus_1").unwrap().is_none());
        assert!(store.find_account_by_customer("cus_2").unwrap().is_some());
    }

    #[test]
    fn relinking_customer_moves_index() {
        let (store, first) = store_with_account();
        let second = AccountId::User(UserId::generate());
        store.insert_account(&Account::new(second)).unwrap();

        for id in [first, second] {
            let mut txn = store.begin(&id).unwrap();
            txn.account_mut().stripe_customer_id = Some("cus_shared".into());
            txn.commit().unwrap();
        }

        assert_eq!(
            store.find_account_by_customer("cus_shared").unwrap().unwrap().id,
            second
        );
    }

    #[test]
    fn list_is_newest_first_with_pagination() {
        let (store, id) = store_with_account();
        for i in 0..5 {
            let mut txn = store.begin(&id).unwrap();
            txn.insert_grant(topup(id, &format!("evt_{i}"), 1)).unwrap();
            txn.commit().unwrap();
        }

        let page = store.list_grants(&id, 2, 1).unwrap();
        let keys: Vec<_> = page.iter().map(|g| g.external_event_id.as_str()).collect();
        assert_eq!(keys, ["evt_3", "evt_2"]);
    }

    #[test]
    fn concurrent_transactions_serialize() {
        let (store, id) = store_with_account();
        let store = Arc::new(store);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for _ in 0..25 {
                        let mut txn = store.begin(&id).unwrap();
                        txn.account_mut().credit_balance += 1;
                        txn.commit().unwrap();
                    }
                });
            }
        });

        assert_eq!(store.get_account(&id).unwrap().unwrap().credit_balance, 200);
    }
}
