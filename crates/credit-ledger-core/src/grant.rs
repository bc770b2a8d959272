//! Credit grant types.
//!
//! A `CreditGrant` is the immutable audit record of one successful balance
//! increase. Its idempotency key is globally unique, and monthly grants are
//! additionally unique per `(account, period_key)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::{AccountId, Plan, RecordId};

/// Maximum length of an idempotency or period key in bytes.
pub const MAX_KEY_LEN: usize = 255;

/// Why credits were granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// First allotment of a new subscription.
    PlanStart,
    /// Allotment for a renewed billing period.
    PlanMonthly,
    /// Immediate grant on upgrading to a higher-ranked plan.
    PlanUpgradeAdd,
    /// One-time credit purchase (or trial seed).
    Topup,
}

impl GrantType {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlanStart => "plan_start",
            Self::PlanMonthly => "plan_monthly",
            Self::PlanUpgradeAdd => "plan_upgrade_add",
            Self::Topup => "topup",
        }
    }
}

/// Immutable record of one balance increase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditGrant {
    /// Record identifier (time-ordered).
    pub id: RecordId,
    /// Credited account.
    pub account_id: AccountId,
    /// Why the credits were granted.
    pub grant_type: GrantType,
    /// Globally unique idempotency key.
    pub external_event_id: String,
    /// Provider event that carried the grant, when different from the key.
    pub source_event_id: Option<String>,
    /// Billing period of a monthly grant.
    pub period_key: Option<String>,
    /// Plan the grant was issued for.
    pub plan: Option<Plan>,
    /// Credits added.
    pub amount: u64,
    /// Balance after the grant.
    pub balance_after: u64,
    /// When the grant was recorded.
    pub created_at: DateTime<Utc>,
}

/// Input to the grant ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRequest {
    /// Account to credit.
    pub account_id: AccountId,
    /// Grant type.
    pub grant_type: GrantType,
    /// Idempotency key.
    pub external_event_id: String,
    /// Provider event id, for audit.
    pub source_event_id: Option<String>,
    /// Billing period key (required for monthly grants).
    pub period_key: Option<String>,
    /// Plan the grant is for.
    pub plan: Option<Plan>,
    /// Credits to add.
    pub amount: u64,
}

impl GrantRequest {
    /// Create a request with no period, plan, or source event.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        grant_type: GrantType,
        external_event_id: impl Into<String>,
        amount: u64,
    ) -> Self {
        Self {
            account_id,
            grant_type,
            external_event_id: external_event_id.into(),
            source_event_id: None,
            period_key: None,
            plan: None,
            amount,
        }
    }

    /// Attach the billing period key.
    #[must_use]
    pub fn with_period_key(mut self, period_key: impl Into<String>) -> Self {
        self.period_key = Some(period_key.into());
        self
    }

    /// Attach the plan.
    #[must_use]
    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Attach the provider event id.
    #[must_use]
    pub fn with_source_event(mut self, event_id: impl Into<String>) -> Self {
        self.source_event_id = Some(event_id.into());
        self
    }

    /// Validate inputs before touching the store.
    ///
    /// # Errors
    ///
    /// - `BillingError::InvalidAmount` if `amount` is zero.
    /// - `BillingError::InvalidIdempotencyKey` if the key is blank or too
    ///   long, or a monthly grant lacks a period key.
    pub fn validate(&self) -> Result<()> {
        if self.amount == 0 {
            return Err(BillingError::InvalidAmount(
                "grant amount must be positive".into(),
            ));
        }
        validate_key("external_event_id", &self.external_event_id)?;
        match (&self.period_key, self.grant_type) {
            (Some(key), _) => validate_key("period_key", key)?,
            (None, GrantType::PlanMonthly) => {
                return Err(BillingError::InvalidIdempotencyKey(
                    "monthly grants require a period key".into(),
                ));
            }
            (None, _) => {}
        }
        Ok(())
    }

    /// Build the audit record for this request.
    #[must_use]
    pub fn into_grant(self, balance_after: u64) -> CreditGrant {
        CreditGrant {
            id: RecordId::generate(),
            account_id: self.account_id,
            grant_type: self.grant_type,
            external_event_id: self.external_event_id,
            source_event_id: self.source_event_id,
            period_key: self.period_key,
            plan: self.plan,
            amount: self.amount,
            balance_after,
            created_at: Utc::now(),
        }
    }
}

fn validate_key(field: &str, key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(BillingError::InvalidIdempotencyKey(format!(
            "{field} must not be empty"
        )));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(BillingError::InvalidIdempotencyKey(format!(
            "{field} exceeds {MAX_KEY_LEN} bytes"
        )));
    }
    Ok(())
}

/// Why a grant was a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantSkip {
    /// The idempotency key was already applied.
    DuplicateEvent,
    /// A monthly grant for this period already exists.
    DuplicatePeriod,
}

/// Result of applying a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GrantOutcome {
    /// Whether the balance changed.
    pub granted: bool,
    /// Balance after the call.
    pub balance: u64,
    /// Set when `granted` is false.
    pub skipped: Option<GrantSkip>,
}

impl GrantOutcome {
    /// A grant that was applied.
    #[must_use]
    pub const fn granted(balance: u64) -> Self {
        Self {
            granted: true,
            balance,
            skipped: None,
        }
    }

    /// A duplicate that left the balance unchanged.
    #[must_use]
    pub const fn skipped(balance: u64, reason: GrantSkip) -> Self {
        Self {
            granted: false,
            balance,
            skipped: Some(reason),
        }
    }
}
