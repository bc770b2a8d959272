//! Account types for the credit ledger.
//!
//! This module defines the per-identity account: plan, credit balance, the
//! provider subscription it mirrors, and any downgrade scheduled for the
//! next renewal.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, Plan};

/// A billing account for a user or an anonymous session.
///
/// Mutated only by the grant ledger, the usage ledger, and the plan state
/// machine, always inside a store transaction scoped to this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The billable identity.
    pub id: AccountId,

    /// Effective plan.
    pub plan: Plan,

    /// Spendable credits. Never negative.
    pub credit_balance: u64,

    /// Provider subscription reference.
    pub subscription_id: Option<String>,

    /// Provider subscription status.
    pub subscription_status: Option<SubscriptionStatus>,

    /// Provider price of the current subscription item.
    pub price_id: Option<String>,

    /// Start of the current billing period.
    pub current_period_start: Option<DateTime<Utc>>,

    /// End of the current billing period.
    pub current_period_end: Option<DateTime<Utc>>,

    /// Lower-ranked plan that takes effect at the next renewal.
    pub pending_downgrade_plan: Option<Plan>,

    /// Period key of the last monthly grant.
    pub last_grant_period_key: Option<String>,

    /// Creation time of the newest plan-affecting provider event applied.
    pub plan_event_at: Option<DateTime<Utc>>,

    /// Provider customer reference, used for reverse lookups.
    pub stripe_customer_id: Option<String>,

    /// Lifetime credits granted.
    pub lifetime_granted: u64,

    /// Lifetime credits spent.
    pub lifetime_used: u64,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with no plan and zero balance.
    #[must_use]
    pub fn new(id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            id,
            plan: Plan::None,
            credit_balance: 0,
            subscription_id: None,
            subscription_status: None,
            price_id: None,
            current_period_start: None,
            current_period_end: None,
            pending_downgrade_plan: None,
            last_grant_period_key: None,
            plan_event_at: None,
            stripe_customer_id: None,
            lifetime_granted: 0,
            lifetime_used: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account can pay `amount` credits.
    #[must_use]
    pub fn can_afford(&self, amount: u64) -> bool {
        self.credit_balance >= amount
    }

    /// Whether a plan-affecting event created at `at` predates one already
    /// applied to this account.
    #[must_use]
    pub fn is_stale_plan_event(&self, at: Option<DateTime<Utc>>) -> bool {
        matches!((self.plan_event_at, at), (Some(applied), Some(at)) if at < applied)
    }

    /// Advance the plan event watermark. Never moves backwards.
    pub fn observe_plan_event(&mut self, at: Option<DateTime<Utc>>) {
        if let Some(at) = at {
            if self.plan_event_at.map_or(true, |applied| at > applied) {
                self.plan_event_at = Some(at);
            }
        }
    }

    /// Record the billing period boundaries when known.
    pub fn set_period(&mut self, period: Option<BillingPeriod>) {
        if let Some(period) = period {
            self.current_period_start = Some(period.start);
            self.current_period_end = Some(period.end);
        }
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Start and end of one billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    /// Period start.
    pub start: DateTime<Utc>,
    /// Period end.
    pub end: DateTime<Utc>,
}

impl BillingPeriod {
    /// Build a period from provider Unix timestamps.
    #[must_use]
    pub fn from_unix(start: i64, end: i64) -> Option<Self> {
        Some(Self {
            start: DateTime::from_timestamp(start, 0)?,
            end: DateTime::from_timestamp(end, 0)?,
        })
    }
}

/// Status of the provider subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Subscription is active.
    Active,
    /// In a trial period.
    Trialing,
    /// Latest invoice payment failed.
    PastDue,
    /// Payment retries exhausted.
    Unpaid,
    /// Subscription ended.
    Canceled,
    /// Awaiting first payment.
    Incomplete,
    /// First payment never completed.
    IncompleteExpired,
    /// Collection paused.
    Paused,
}

impl SubscriptionStatus {
    /// Provider wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Paused => "paused",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "trialing" => Ok(Self::Trialing),
            "past_due" => Ok(Self::PastDue),
            "unpaid" => Ok(Self::Unpaid),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            "incomplete" => Ok(Self::Incomplete),
            "incomplete_expired" => Ok(Self::IncompleteExpired),
            "paused" => Ok(Self::Paused),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserId;
    use chrono::Duration;

    #[test]
    fn new_account_has_no_plan_and_zero_balance() {
        let account = Account::new(AccountId::User(UserId::generate()));
        assert_eq!(account.plan, Plan::None);
        assert_eq!(account.credit_balance, 0);
        assert!(account.pending_downgrade_plan.is_none());
        assert!(account.subscription_id.is_none());
    }

    #[test]
    fn can_afford_is_inclusive() {
        let mut account = Account::new(AccountId::User(UserId::generate()));
        account.credit_balance = 10;
        assert!(account.can_afford(10));
        assert!(!account.can_afford(11));
    }

    #[test]
    fn plan_event_watermark_is_monotonic() {
        let mut account = Account::new(AccountId::User(UserId::generate()));
        let t1 = Utc::now();
        let t0 = t1 - Duration::seconds(60);

        assert!(!account.is_stale_plan_event(Some(t0)));
        account.observe_plan_event(Some(t1));
        account.observe_plan_event(Some(t0));
        assert_eq!(account.plan_event_at, Some(t1));
        assert!(account.is_stale_plan_event(Some(t0)));
        assert!(!account.is_stale_plan_event(Some(t1)));
        assert!(!account.is_stale_plan_event(None));
    }

    #[test]
    fn subscription_status_parses_provider_names() {
        assert_eq!(
            "past_due".parse::<SubscriptionStatus>(),
            Ok(SubscriptionStatus::PastDue)
        );
        assert_eq!(
            SubscriptionStatus::IncompleteExpired.as_str(),
            "incomplete_expired"
        );
        assert!("bogus".parse::<SubscriptionStatus>().is_err());
    }
}
