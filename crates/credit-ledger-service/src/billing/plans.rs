//! Plan state machine.
//!
//! Derives an account's effective plan, and any downgrade scheduled for the
//! next renewal, from provider subscription events. Upgrades apply
//! immediately with a credit grant; downgrades wait for the next renewal so
//! credits already granted for the period are never clawed back.
//!
//! All transitions run inside the caller's [`AccountTxn`], so the plan patch
//! and any grant it triggers commit together.

use chrono::{DateTime, Utc};
use serde::Serialize;

use credit_ledger_core::{
    BillingPeriod, GrantOutcome, GrantRequest, GrantType, InvoiceSnapshot, Plan, PlanCatalog,
    Result, SubscriptionSnapshot, SubscriptionStatus,
};
use credit_ledger_store::AccountTxn;

use super::grants::apply_grant_in;

/// Result of one plan transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// A subscription started.
    Started {
        /// The new plan.
        plan: Plan,
        /// The start grant.
        grant: Option<GrantOutcome>,
    },
    /// Moved to a higher-ranked plan.
    Upgraded {
        /// Previous plan.
        from: Plan,
        /// New plan.
        to: Plan,
        /// The upgrade grant, if the policy grants anything.
        grant: Option<GrantOutcome>,
    },
    /// A lower-ranked plan will apply at the next renewal.
    DowngradeScheduled {
        /// Current plan, kept until renewal.
        from: Plan,
        /// Plan applied at renewal.
        to: Plan,
    },
    /// A pending downgrade was withdrawn.
    DowngradeCancelled {
        /// The plan that stays.
        plan: Plan,
    },
    /// A billing period renewed.
    Renewed {
        /// Plan for the new period.
        plan: Plan,
        /// The monthly grant.
        grant: Option<GrantOutcome>,
    },
    /// The subscription ended.
    Cancelled {
        /// Plan held before cancellation.
        previous: Plan,
    },
    /// Only subscription status or period fields changed.
    StatusOnly,
    /// The event is older than state already applied, or names a
    /// subscription the account no longer holds.
    Stale {
        /// Grant still owed for a paid period, if any.
        grant: Option<GrantOutcome>,
    },
    /// Nothing to do.
    Unchanged,
}

impl TransitionOutcome {
    /// Short name for logs and webhook responses.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Upgraded { .. } => "upgraded",
            Self::DowngradeScheduled { .. } => "downgrade_scheduled",
            Self::DowngradeCancelled { .. } => "downgrade_cancelled",
            Self::Renewed { .. } => "renewed",
            Self::Cancelled { .. } => "cancelled",
            Self::StatusOnly => "status_only",
            Self::Stale { .. } => "stale",
            Self::Unchanged => "unchanged",
        }
    }

    /// The grant issued by this transition, if any.
    #[must_use]
    pub const fn grant(&self) -> Option<GrantOutcome> {
        match self {
            Self::Started { grant, .. }
            | Self::Upgraded { grant, .. }
            | Self::Renewed { grant, .. }
            | Self::Stale { grant } => *grant,
            _ => None,
        }
    }
}

/// A subscription start, from checkout, subscription creation, or the
/// subscription's first invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStart {
    /// Provider subscription id.
    pub subscription_id: Option<String>,
    /// Plan resolved from metadata or price; `None` if unmapped.
    pub plan: Option<Plan>,
    /// Provider price id.
    pub price_id: Option<String>,
    /// Provider status, if the event carries one.
    pub status: Option<SubscriptionStatus>,
    /// Billing period, if known.
    pub period: Option<BillingPeriod>,
    /// Provider event id.
    pub event_id: String,
    /// Provider event creation time.
    pub event_at: Option<DateTime<Utc>>,
}

impl PlanStart {
    fn grant_key(&self) -> String {
        match &self.subscription_id {
            Some(sub) => format!("start:{sub}"),
            None => format!("start:{}", self.event_id),
        }
    }
}

/// Applies provider subscription events to an account's plan.
#[derive(Debug, Clone, Copy)]
pub struct PlanStateMachine<'a> {
    catalog: &'a PlanCatalog,
}

impl<'a> PlanStateMachine<'a> {
    /// Create a state machine over a plan catalog.
    #[must_use]
    pub const fn new(catalog: &'a PlanCatalog) -> Self {
        Self { catalog }
    }

    /// Start a subscription: set the plan and grant its allotment.
    ///
    /// The grant is keyed by subscription, so the several provider signals
    /// of one start credit once. A start older than an already applied plan
    /// event still receives its grant but does not overwrite the plan.
    ///
    /// # Errors
    ///
    /// Returns a store or grant ledger error.
    pub fn start(&self, txn: &mut dyn AccountTxn, start: &PlanStart) -> Result<TransitionOutcome> {
        let account_id = txn.account().id;
        let Some(plan) = start.plan.filter(|plan| plan.is_paid()) else {
            tracing::warn!(
                account_id = %account_id,
                price_id = ?start.price_id,
                event_id = %start.event_id,
                "Unmapped price on subscription start, updating status only"
            );
            let account = txn.account_mut();
            if let Some(status) = start.status {
                account.subscription_status = Some(status);
            }
            account.touch();
            return Ok(TransitionOutcome::StatusOnly);
        };

        let stale = txn.account().is_stale_plan_event(start.event_at);
        if !stale {
            let account = txn.account_mut();
            account.plan = plan;
            account.pending_downgrade_plan = None;
            account.subscription_id.clone_from(&start.subscription_id);
            account.subscription_status = Some(start.status.unwrap_or(SubscriptionStatus::Active));
            if start.price_id.is_some() {
                account.price_id.clone_from(&start.price_id);
            }
            account.set_period(start.period);
            account.observe_plan_event(start.event_at);
            account.touch();
        }

        let grant = self.grant(
            txn,
            GrantRequest::new(
                account_id,
                GrantType::PlanStart,
                start.grant_key(),
                self.catalog.monthly_allotment(plan),
            )
            .with_plan(plan)
            .with_source_event(start.event_id.as_str()),
        )?;

        if stale {
            tracing::info!(
                account_id = %account_id,
                event_id = %start.event_id,
                "Stale subscription start, plan left unchanged"
            );
            return Ok(TransitionOutcome::Stale { grant });
        }

        tracing::info!(account_id = %account_id, plan = %plan, "Subscription started");
        Ok(TransitionOutcome::Started { plan, grant })
    }

    /// Apply a subscription update, classifying it by the rank of the
    /// plan its price maps to.
    ///
    /// # Errors
    ///
    /// Returns a store or grant ledger error.
    pub fn change(
        &self,
        txn: &mut dyn AccountTxn,
        snapshot: &SubscriptionSnapshot,
        event_id: &str,
        event_at: Option<DateTime<Utc>>,
    ) -> Result<TransitionOutcome> {
        let target = snapshot
            .price_id
            .as_deref()
            .and_then(|price| self.catalog.plan_for_price(price));
        self.apply_change(txn, snapshot, target, event_id, event_at)
    }

    /// Apply a subscription update towards an already resolved plan.
    ///
    /// `target` of `None` means the price could not be mapped: status and
    /// period are patched and the plan is left alone.
    ///
    /// # Errors
    ///
    /// Returns a store or grant ledger error.
    pub fn apply_change(
        &self,
        txn: &mut dyn AccountTxn,
        snapshot: &SubscriptionSnapshot,
        target: Option<Plan>,
        event_id: &str,
        event_at: Option<DateTime<Utc>>,
    ) -> Result<TransitionOutcome> {
        let account = txn.account();
        let account_id = account.id;
        // A cancelled account stays bound to its old subscription id, but
        // an update for a new one may arrive before the new one's start.
        let superseded = account.plan.is_paid()
            && holds_other_subscription(
                account.subscription_id.as_deref(),
                Some(&snapshot.subscription_id),
            );
        if superseded || account.is_stale_plan_event(event_at) {
            tracing::info!(
                account_id = %account_id,
                subscription_id = %snapshot.subscription_id,
                event_id = %event_id,
                "Stale subscription update ignored"
            );
            return Ok(TransitionOutcome::Stale { grant: None });
        }

        let current = account.plan;

        // With no plan held, an update is the first signal of a new subscription.
        if current == Plan::None {
            if let Some(plan) = target.filter(|plan| plan.is_paid()) {
                return self.start(
                    txn,
                    &PlanStart {
                        subscription_id: Some(snapshot.subscription_id.clone()),
                        plan: Some(plan),
                        price_id: snapshot.price_id.clone(),
                        status: snapshot.status,
                        period: snapshot.period,
                        event_id: event_id.to_string(),
                        event_at,
                    },
                );
            }
        }

        let account = txn.account_mut();
        account.observe_plan_event(event_at);
        if account.subscription_id.is_none() {
            account.subscription_id = Some(snapshot.subscription_id.clone());
        }
        if let Some(status) = snapshot.status {
            account.subscription_status = Some(status);
        }
        account.set_period(snapshot.period);
        account.touch();

        let Some(target) = target else {
            tracing::warn!(
                account_id = %account_id,
                price_id = ?snapshot.price_id,
                event_id = %event_id,
                "Unmapped price on subscription update, updating status only"
            );
            return Ok(TransitionOutcome::StatusOnly);
        };

        if snapshot.price_id.is_some() {
            account.price_id.clone_from(&snapshot.price_id);
        }

        match target.rank().cmp(&current.rank()) {
            std::cmp::Ordering::Greater => {
                account.plan = target;
                account.pending_downgrade_plan = None;
                let amount = self.catalog.upgrade_grant(current, target);
                let grant = self.grant(
                    txn,
                    GrantRequest::new(
                        account_id,
                        GrantType::PlanUpgradeAdd,
                        format!("upgrade:{event_id}"),
                        amount,
                    )
                    .with_plan(target)
                    .with_source_event(event_id),
                )?;
                tracing::info!(
                    account_id = %account_id,
                    from = %current,
                    to = %target,
                    "Plan upgraded"
                );
                Ok(TransitionOutcome::Upgraded {
                    from: current,
                    to: target,
                    grant,
                })
            }
            std::cmp::Ordering::Less => {
                account.pending_downgrade_plan = Some(target);
                tracing::info!(
                    account_id = %account_id,
                    from = %current,
                    to = %target,
                    "Downgrade scheduled for next renewal"
                );
                Ok(TransitionOutcome::DowngradeScheduled {
                    from: current,
                    to: target,
                })
            }
            std::cmp::Ordering::Equal => {
                if account.pending_downgrade_plan.take().is_some() {
                    tracing::info!(account_id = %account_id, plan = %current, "Pending downgrade cancelled");
                    Ok(TransitionOutcome::DowngradeCancelled { plan: current })
                } else {
                    Ok(TransitionOutcome::Unchanged)
                }
            }
        }
    }

    /// Renew a billing period: apply any pending downgrade, then grant the
    /// plan's monthly allotment once per period.
    ///
    /// # Errors
    ///
    /// Returns a store or grant ledger error.
    pub fn renew(
        &self,
        txn: &mut dyn AccountTxn,
        invoice: &InvoiceSnapshot,
        event_id: &str,
        event_at: Option<DateTime<Utc>>,
    ) -> Result<TransitionOutcome> {
        let account = txn.account();
        let account_id = account.id;
        if holds_other_subscription(
            account.subscription_id.as_deref(),
            invoice.subscription_id.as_deref(),
        ) {
            tracing::info!(
                account_id = %account_id,
                invoice_id = %invoice.invoice_id,
                "Invoice for a superseded subscription ignored"
            );
            return Ok(TransitionOutcome::Stale { grant: None });
        }

        let stale = account.is_stale_plan_event(event_at);
        if !stale {
            let priced = invoice
                .price_id
                .as_deref()
                .and_then(|price| self.catalog.plan_for_price(price));
            let account = txn.account_mut();
            if let Some(pending) = account.pending_downgrade_plan.take() {
                tracing::info!(
                    account_id = %account_id,
                    from = %account.plan,
                    to = %pending,
                    "Applying scheduled downgrade"
                );
                account.plan = pending;
            } else if let Some(plan) = priced.filter(|plan| *plan != account.plan) {
                // Only a scheduled downgrade may lower the plan at renewal.
                if plan.rank() > account.plan.rank() {
                    tracing::info!(
                        account_id = %account_id,
                        from = %account.plan,
                        to = %plan,
                        "Renewal price names a higher plan, adopting it"
                    );
                    account.plan = plan;
                } else {
                    tracing::warn!(
                        account_id = %account_id,
                        plan = %account.plan,
                        priced = %plan,
                        invoice_id = %invoice.invoice_id,
                        "Renewal price names a lower plan with no downgrade scheduled, keeping plan"
                    );
                }
            }
            if account.subscription_id.is_none() {
                account.subscription_id.clone_from(&invoice.subscription_id);
            }
            if priced == Some(account.plan) {
                account.price_id.clone_from(&invoice.price_id);
            }
            account.subscription_status = Some(SubscriptionStatus::Active);
            account.set_period(invoice.period);
            account.observe_plan_event(event_at);
            account.touch();
        }

        let plan = txn.account().plan;
        let grant = if plan.is_paid() {
            self.grant(
                txn,
                GrantRequest::new(
                    account_id,
                    GrantType::PlanMonthly,
                    format!("renew:{}", invoice.invoice_id),
                    self.catalog.monthly_allotment(plan),
                )
                .with_period_key(invoice.period_key())
                .with_plan(plan)
                .with_source_event(event_id),
            )?
        } else {
            None
        };

        if stale {
            return Ok(TransitionOutcome::Stale { grant });
        }
        tracing::info!(account_id = %account_id, plan = %plan, "Billing period renewed");
        Ok(TransitionOutcome::Renewed { plan, grant })
    }

    /// End the subscription now. The balance is kept and stays spendable.
    pub fn cancel(
        &self,
        txn: &mut dyn AccountTxn,
        snapshot: &SubscriptionSnapshot,
        event_at: Option<DateTime<Utc>>,
    ) -> TransitionOutcome {
        let account = txn.account_mut();
        if holds_other_subscription(
            account.subscription_id.as_deref(),
            Some(&snapshot.subscription_id),
        ) {
            tracing::info!(
                account_id = %account.id,
                subscription_id = %snapshot.subscription_id,
                "Cancellation of a superseded subscription ignored"
            );
            return TransitionOutcome::Stale { grant: None };
        }

        let previous = account.plan;
        account.plan = Plan::None;
        account.pending_downgrade_plan = None;
        account.subscription_status = Some(snapshot.status.unwrap_or(SubscriptionStatus::Canceled));
        account.observe_plan_event(event_at);
        account.touch();

        tracing::info!(account_id = %account.id, previous = %previous, "Subscription cancelled");
        TransitionOutcome::Cancelled { previous }
    }

    /// Record a new subscription status without touching plan or balance.
    pub fn update_status(
        &self,
        txn: &mut dyn AccountTxn,
        subscription_id: Option<&str>,
        status: SubscriptionStatus,
    ) -> TransitionOutcome {
        let account = txn.account_mut();
        if holds_other_subscription(account.subscription_id.as_deref(), subscription_id) {
            return TransitionOutcome::Stale { grant: None };
        }
        account.subscription_status = Some(status);
        account.touch();
        tracing::info!(
            account_id = %account.id,
            status = status.as_str(),
            "Subscription status updated"
        );
        TransitionOutcome::StatusOnly
    }

    fn grant(&self, txn: &mut dyn AccountTxn, req: GrantRequest) -> Result<Option<GrantOutcome>> {
        if req.amount == 0 {
            return Ok(None);
        }
        apply_grant_in(txn, &req).map(Some)
    }
}

/// Whether the account is bound to a subscription other than `incoming`.
fn holds_other_subscription(current: Option<&str>, incoming: Option<&str>) -> bool {
    matches!((current, incoming), (Some(current), Some(incoming)) if current != incoming)
}
