//! Credit grant ledger.
//!
//! A grant is applied at most once per idempotency key, and a monthly grant
//! at most once per `(account, period_key)`. Both checks and the balance
//! increase share one transaction, so concurrent deliveries of the same
//! provider event race safely: exactly one of them credits the account.

use credit_ledger_core::{BillingError, GrantOutcome, GrantRequest, GrantSkip, GrantType, Result};
use credit_ledger_store::{AccountTxn, Store};

use super::{atomically, in_txn};

/// Apply a grant in its own transaction.
///
/// # Errors
///
/// Returns `BillingError::InvalidAmount` or `InvalidIdempotencyKey` for
/// bad input, `AccountNotFound` if the account does not exist, or a store
/// error. Duplicates are not errors; see [`GrantOutcome::skipped`].
pub fn apply_grant(store: &dyn Store, req: &GrantRequest) -> Result<GrantOutcome> {
    req.validate()?;
    atomically(store, &req.account_id, |txn| apply_grant_in(txn, req))
}

/// Apply a grant inside a transaction the caller already holds.
///
/// # Errors
///
/// Same as [`apply_grant`].
pub fn apply_grant_in(txn: &mut dyn AccountTxn, req: &GrantRequest) -> Result<GrantOutcome> {
    req.validate()?;
    let account_id = req.account_id;
    let balance = txn.account().credit_balance;

    if txn
        .grant_by_key(&req.external_event_id)
        .map_err(|e| in_txn(&account_id, e))?
        .is_some()
    {
        tracing::debug!(
            account_id = %account_id,
            key = %req.external_event_id,
            "Duplicate grant event, skipping"
        );
        return Ok(GrantOutcome::skipped(balance, GrantSkip::DuplicateEvent));
    }

    if req.grant_type == GrantType::PlanMonthly {
        if let Some(period_key) = &req.period_key {
            if let Some(existing) = txn
                .monthly_grant_for_period(period_key)
                .map_err(|e| in_txn(&account_id, e))?
            {
                tracing::debug!(
                    account_id = %account_id,
                    period_key = %period_key,
                    existing_key = %existing.external_event_id,
                    "Period already credited, skipping"
                );
                return Ok(GrantOutcome::skipped(balance, GrantSkip::DuplicatePeriod));
            }
        }
    }

    let new_balance = balance.checked_add(req.amount).ok_or_else(|| {
        BillingError::InvalidAmount(format!("grant of {} overflows balance", req.amount))
    })?;

    let account = txn.account_mut();
    account.credit_balance = new_balance;
    account.lifetime_granted = account.lifetime_granted.saturating_add(req.amount);
    if req.grant_type == GrantType::PlanMonthly {
        account.last_grant_period_key.clone_from(&req.period_key);
    }
    account.touch();

    txn.insert_grant(req.clone().into_grant(new_balance))
        .map_err(|e| in_txn(&account_id, e))?;

    tracing::info!(
        account_id = %account_id,
        grant_type = req.grant_type.as_str(),
        key = %req.external_event_id,
        amount = req.amount,
        balance = new_balance,
        "Credits granted"
    );

    Ok(GrantOutcome::granted(new_balance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_ledger_core::{Account, AccountId, Plan, UserId};
    use credit_ledger_store::MemoryStore;
    use std::sync::Arc;

    fn setup() -> (MemoryStore, AccountId) {
        let store = MemoryStore::new();
        let id = AccountId::User(UserId::generate());
        store.insert_account(&Account::new(id)).unwrap();
        (store, id)
    }

    fn balance(store: &MemoryStore, id: &AccountId) -> u64 {
        store.get_account(id).unwrap().unwrap().credit_balance
    }

    #[test]
    fn same_event_credits_once() {
        let (store, id) = setup();
        let req = GrantRequest::new(id, GrantType::Topup, "topup:cs_1", 100);

        let first = apply_grant(&store, &req).unwrap();
        let second = apply_grant(&store, &req).unwrap();

        assert_eq!(first, GrantOutcome::granted(100));
        assert_eq!(
            second,
            GrantOutcome::skipped(100, GrantSkip::DuplicateEvent)
        );
        assert_eq!(balance(&store, &id), 100);
        assert_eq!(store.list_grants(&id, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn same_period_credits_once() {
        let (store, id) = setup();
        let first = GrantRequest::new(id, GrantType::PlanMonthly, "renew:in_1", 300)
            .with_period_key("sub_1:1700000000")
            .with_plan(Plan::Starter);
        let late_duplicate = GrantRequest::new(id, GrantType::PlanMonthly, "renew:in_2", 300)
            .with_period_key("sub_1:1700000000")
            .with_plan(Plan::Starter);

        assert!(apply_grant(&store, &first).unwrap().granted);
        let outcome = apply_grant(&store, &late_duplicate).unwrap();

        assert_eq!(outcome.skipped, Some(GrantSkip::DuplicatePeriod));
        assert_eq!(balance(&store, &id), 300);
        let account = store.get_account(&id).unwrap().unwrap();
        assert_eq!(
            account.last_grant_period_key.as_deref(),
            Some("sub_1:1700000000")
        );
        assert_eq!(account.lifetime_granted, 300);
    }

    #[test]
    fn period_key_only_guards_monthly_grants() {
        let (store, id) = setup();
        let monthly = GrantRequest::new(id, GrantType::PlanMonthly, "renew:in_1", 300)
            .with_period_key("p1");
        let topup = GrantRequest::new(id, GrantType::Topup, "topup:cs_1", 50).with_period_key("p1");

        apply_grant(&store, &monthly).unwrap();
        assert!(apply_grant(&store, &topup).unwrap().granted);
        assert_eq!(balance(&store, &id), 350);
    }

    #[test]
    fn invalid_requests_touch_nothing() {
        let (store, id) = setup();
        let zero = GrantRequest::new(id, GrantType::Topup, "k", 0);
        let blank = GrantRequest::new(id, GrantType::Topup, "", 5);

        assert!(matches!(
            apply_grant(&store, &zero),
            Err(BillingError::InvalidAmount(_))
        ));
        assert!(matches!(
            apply_grant(&store, &blank),
            Err(BillingError::InvalidIdempotencyKey(_))
        ));
        assert_eq!(balance(&store, &id), 0);
    }

    #[test]
    fn overflow_is_rejected() {
        let (store, id) = setup();
        atomically(&store, &id, |txn| {
            txn.account_mut().credit_balance = u64::MAX - 1;
            Ok(())
        })
        .unwrap();

        let req = GrantRequest::new(id, GrantType::Topup, "big", 2);
        assert!(matches!(
            apply_grant(&store, &req),
            Err(BillingError::InvalidAmount(_))
        ));
        assert_eq!(balance(&store, &id), u64::MAX - 1);
    }

    #[test]
    fn concurrent_duplicate_deliveries_credit_once() {
        let (store, id) = setup();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let req = GrantRequest::new(id, GrantType::PlanStart, "start:sub_1", 300);
                    apply_grant(store.as_ref(), &req).unwrap().granted
                })
            })
            .collect();

        let applied = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();

        assert_eq!(applied, 1);
        assert_eq!(balance(&store, &id), 300);
    }
}
