//! Usage charge ledger.

use credit_ledger_core::{
    AccountId, BillingError, ChargeKey, ChargeKind, ChargeOutcome, ChargeStatus, Result,
    UsageChargeEntry,
};
use credit_ledger_store::Store;

use super::{atomically, in_txn};

/// Deduct `amount` credits for one checkpoint of a turn.
///
/// A repeated call for the same `(actor, turn, kind)` returns the balance
/// recorded by the first call and deducts nothing. A charge the balance
/// cannot cover deducts nothing and records an `out_of_credits_block`
/// marker for the turn.
///
/// # Errors
///
/// Returns `BillingError::InvalidAmount` for a zero amount or a charge of
/// kind `out_of_credits_block`, `AccountNotFound` if the actor has no
/// account, or a store error.
pub fn charge(store: &dyn Store, key: &ChargeKey, amount: u64) -> Result<ChargeOutcome> {
    if amount == 0 {
        return Err(BillingError::InvalidAmount(
            "charge amount must be positive".into(),
        ));
    }
    if key.kind == ChargeKind::OutOfCreditsBlock {
        return Err(BillingError::InvalidAmount(
            "out_of_credits_block is recorded by the ledger, not charged".into(),
        ));
    }

    let actor = key.actor;
    atomically(store, &actor, |txn| {
        if let Some(existing) = txn.usage_entry(key).map_err(|e| in_txn(&actor, e))? {
            tracing::debug!(
                actor = %actor,
                turn_id = %key.turn_id,
                kind = key.kind.as_str(),
                "Turn already charged, skipping"
            );
            return Ok(ChargeOutcome {
                charged: false,
                balance_after: existing.balance_after,
                status: ChargeStatus::DuplicateTurnCharge,
            });
        }

        let balance = txn.account().credit_balance;
        let Some(balance_after) = balance.checked_sub(amount) else {
            let marker = ChargeKey::new(actor, key.turn_id.clone(), ChargeKind::OutOfCreditsBlock);
            if txn
                .usage_entry(&marker)
                .map_err(|e| in_txn(&actor, e))?
                .is_none()
            {
                txn.insert_usage_entry(UsageChargeEntry::new(marker, 0, balance))
                    .map_err(|e| in_txn(&actor, e))?;
            }
            tracing::info!(
                actor = %actor,
                turn_id = %key.turn_id,
                kind = key.kind.as_str(),
                amount,
                balance,
                "Insufficient credits"
            );
            return Ok(ChargeOutcome {
                charged: false,
                balance_after: balance,
                status: ChargeStatus::InsufficientCredits,
            });
        };

        let account = txn.account_mut();
        account.credit_balance = balance_after;
        account.lifetime_used = account.lifetime_used.saturating_add(amount);
        account.touch();
        txn.insert_usage_entry(UsageChargeEntry::new(key.clone(), amount, balance_after))
            .map_err(|e| in_txn(&actor, e))?;

        tracing::info!(
            actor = %actor,
            turn_id = %key.turn_id,
            kind = key.kind.as_str(),
            amount,
            balance_after,
            "Usage charged"
        );

        Ok(ChargeOutcome {
            charged: true,
            balance_after,
            status: ChargeStatus::Charged,
        })
    })
}

/// Whether `actor` currently holds at least `amount` credits.
///
/// # Errors
///
/// Returns `BillingError::AccountNotFound` if the actor has no account.
pub fn can_afford(store: &dyn Store, actor: &AccountId, amount: u64) -> Result<bool> {
    let account = store
        .get_account(actor)?
        .ok_or_else(|| BillingError::AccountNotFound {
            account_id: actor.to_string(),
        })?;
    Ok(account.can_afford(amount))
}
