//! Subscription plans and the static plan configuration table.
//!
//! Plans form a total order (`rank`) that classifies a subscription change
//! as an upgrade or a downgrade. The `PlanCatalog` maps opaque provider price
//! identifiers to plans and back, and carries each plan's monthly allotment.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};

/// Default monthly allotment of the starter plan.
pub const STARTER_PLAN_CREDITS: u64 = 300;

/// Default monthly allotment of the plus plan.
pub const PLUS_PLAN_CREDITS: u64 = 800;

/// Default monthly allotment of the pro plan.
pub const PRO_PLAN_CREDITS: u64 = 2000;

/// Default credits granted per purchased top-up unit.
pub const DEFAULT_TOPUP_CREDITS_PER_UNIT: u64 = 100;

/// Available billing plans, ordered by rank.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// No subscription. Only purchased or trial credits are available.
    #[default]
    None,
    /// Entry-level subscription.
    Starter,
    /// Mid-tier subscription.
    Plus,
    /// Top-tier subscription.
    Pro,
}

impl Plan {
    /// All plans in rank order.
    pub const ALL: [Self; 4] = [Self::None, Self::Starter, Self::Plus, Self::Pro];

    /// Position in the total order used to classify plan changes.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Starter => 1,
            Self::Plus => 2,
            Self::Pro => 3,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Starter => "starter",
            Self::Plus => "plus",
            Self::Pro => "pro",
        }
    }

    /// Whether this plan is a paid subscription.
    #[must_use]
    pub const fn is_paid(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "free" => Ok(Self::None),
            "starter" => Ok(Self::Starter),
            "plus" => Ok(Self::Plus),
            "pro" => Ok(Self::Pro),
            other => Err(BillingError::Configuration(format!("unknown plan: {other}"))),
        }
    }
}

/// How many credits an immediate upgrade grants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeGrantPolicy {
    /// Grant the new plan's full monthly allotment.
    #[default]
    FullAllotment,
    /// Grant only the difference between the new and the old allotment.
    Delta,
}

impl FromStr for UpgradeGrantPolicy {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "full_allotment" => Ok(Self::FullAllotment),
            "delta" => Ok(Self::Delta),
            other => Err(BillingError::Configuration(format!(
                "unknown upgrade grant policy: {other}"
            ))),
        }
    }
}

/// Static plan configuration: allotments, the invertible price table, and
/// top-up settings.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    allotments: HashMap<Plan, u64>,
    price_to_plan: HashMap<String, Plan>,
    plan_to_price: HashMap<Plan, String>,
    topup_price_id: Option<String>,
    topup_credits_per_unit: u64,
    upgrade_policy: UpgradeGrantPolicy,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new([
            (Plan::Starter, STARTER_PLAN_CREDITS),
            (Plan::Plus, PLUS_PLAN_CREDITS),
            (Plan::Pro, PRO_PLAN_CREDITS),
        ])
    }
}

impl PlanCatalog {
    /// Create a catalog with the given monthly allotments and no prices.
    ///
    /// The `none` plan always has a zero allotment, whatever is passed in.
    #[must_use]
    pub fn new(allotments: impl IntoIterator<Item = (Plan, u64)>) -> Self {
        let mut allotments: HashMap<Plan, u64> = allotments.into_iter().collect();
        allotments.insert(Plan::None, 0);

        Self {
            allotments,
            price_to_plan: HashMap::new(),
            plan_to_price: HashMap::new(),
            topup_price_id: None,
            topup_credits_per_unit: DEFAULT_TOPUP_CREDITS_PER_UNIT,
            upgrade_policy: UpgradeGrantPolicy::default(),
        }
    }

    /// Register the provider price for a plan.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Configuration` if the mapping would stop the
    /// table from being invertible: an empty price, a price for `none`, a
    /// price already bound to another plan, or a second price for one plan.
    pub fn with_price(mut self, plan: Plan, price_id: impl Into<String>) -> Result<Self> {
        let price_id = price_id.into();
        if price_id.trim().is_empty() {
            return Err(BillingError::Configuration(format!(
                "empty price id for plan {plan}"
            )));
        }
        if !plan.is_paid() {
            return Err(BillingError::Configuration(
                "the none plan cannot have a price".into(),
            ));
        }
        if let Some(existing) = self.price_to_plan.get(&price_id) {
            if *existing != plan {
                return Err(BillingError::Configuration(format!(
                    "price {price_id} already mapped to {existing}"
                )));
            }
        }
        if let Some(existing) = self.plan_to_price.get(&plan) {
            if *existing != price_id {
                return Err(BillingError::Configuration(format!(
                    "plan {plan} already mapped to price {existing}"
                )));
            }
        }
        if self.topup_price_id.as_deref() == Some(price_id.as_str()) {
            return Err(BillingError::Configuration(format!(
                "price {price_id} is the top-up price"
            )));
        }

        self.price_to_plan.insert(price_id.clone(), plan);
        self.plan_to_price.insert(plan, price_id);
        Ok(self)
    }

    /// Configure one-time credit purchases.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Configuration` if the price collides with a
    /// plan price or `credits_per_unit` is zero.
    pub fn with_topup(mut self, price_id: Option<String>, credits_per_unit: u64) -> Result<Self> {
        if credits_per_unit == 0 {
            return Err(BillingError::Configuration(
                "top-up credits per unit must be positive".into(),
            ));
        }
        if let Some(price) = &price_id {
            if self.price_to_plan.contains_key(price) {
                return Err(BillingError::Configuration(format!(
                    "top-up price {price} is also a plan price"
                )));
            }
        }
        self.topup_price_id = price_id;
        self.topup_credits_per_unit = credits_per_unit;
        Ok(self)
    }

    /// Set the upgrade grant policy.
    #[must_use]
    pub fn with_upgrade_policy(mut self, policy: UpgradeGrantPolicy) -> Self {
        self.upgrade_policy = policy;
        self
    }

    /// Monthly credit allotment of a plan.
    #[must_use]
    pub fn monthly_allotment(&self, plan: Plan) -> u64 {
        self.allotments.get(&plan).copied().unwrap_or(0)
    }

    /// Map a provider price to a plan.
    #[must_use]
    pub fn plan_for_price(&self, price_id: &str) -> Option<Plan> {
        self.price_to_plan.get(price_id).copied()
    }

    /// Map a plan to its provider price (for checkout creation).
    #[must_use]
    pub fn price_for_plan(&self, plan: Plan) -> Option<&str> {
        self.plan_to_price.get(&plan).map(String::as_str)
    }

    /// Price used for one-time credit purchases, if configured.
    #[must_use]
    pub fn topup_price_id(&self) -> Option<&str> {
        self.topup_price_id.as_deref()
    }

    /// Credits granted for `quantity` purchased top-up units.
    #[must_use]
    pub fn topup_credits(&self, quantity: u64) -> u64 {
        quantity.saturating_mul(self.topup_credits_per_unit)
    }

    /// The configured upgrade grant policy.
    #[must_use]
    pub const fn upgrade_policy(&self) -> UpgradeGrantPolicy {
        self.upgrade_policy
    }

    /// Credits granted when moving from `from` to the higher-ranked `to`.
    #[must_use]
    pub fn upgrade_grant(&self, from: Plan, to: Plan) -> u64 {
        let target = self.monthly_allotment(to);
        match self.upgrade_policy {
            UpgradeGrantPolicy::FullAllotment => target,
            UpgradeGrantPolicy::Delta => target.saturating_sub(self.monthly_allotment(from)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PlanCatalog {
        PlanCatalog::default()
            .with_price(Plan::Starter, "price_starter")
            .unwrap()
            .with_price(Plan::Plus, "price_plus")
            .unwrap()
            .with_price(Plan::Pro, "price_pro")
            .unwrap()
    }

    #[test]
    fn ranks_are_strictly_ordered() {
        let ranks: Vec<u8> = Plan::ALL.iter().map(|p| p.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
        assert!(Plan::Starter < Plan::Plus);
    }

    #[test]
    fn price_table_is_invertible() {
        let catalog = catalog();
        for plan in [Plan::Starter, Plan::Plus, Plan::Pro] {
            let price = catalog.price_for_plan(plan).unwrap();
            assert_eq!(catalog.plan_for_price(price), Some(plan));
        }
        assert_eq!(catalog.plan_for_price("price_unknown"), None);
        assert_eq!(catalog.price_for_plan(Plan::None), None);
    }

    #[test]
    fn rejects_non_invertible_mappings() {
        let catalog = catalog();
        assert!(catalog.clone().with_price(Plan::Plus, "price_starter").is_err());
        assert!(catalog.clone().with_price(Plan::Plus, "price_plus_v2").is_err());
        assert!(catalog.clone().with_price(Plan::None, "price_free").is_err());
        assert!(catalog.clone().with_price(Plan::Plus, "  ").is_err());
        assert!(catalog
            .with_topup(Some("price_pro".into()), 100)
            .is_err());
    }

    #[test]
    fn none_plan_has_no_allotment() {
        let catalog = PlanCatalog::new([(Plan::None, 50), (Plan::Starter, 10)]);
        assert_eq!(catalog.monthly_allotment(Plan::None), 0);
        assert_eq!(catalog.monthly_allotment(Plan::Starter), 10);
        assert_eq!(catalog.monthly_allotment(Plan::Pro), 0);
    }

    #[test]
    fn upgrade_grant_follows_policy() {
        let full = catalog();
        assert_eq!(full.upgrade_grant(Plan::Starter, Plan::Plus), PLUS_PLAN_CREDITS);

        let delta = catalog().with_upgrade_policy(UpgradeGrantPolicy::Delta);
        assert_eq!(
            delta.upgrade_grant(Plan::Starter, Plan::Plus),
            PLUS_PLAN_CREDITS - STARTER_PLAN_CREDITS
        );
    }

    #[test]
    fn topup_credits_scale_with_quantity() {
        let catalog = catalog().with_topup(Some("price_topup".into()), 250).unwrap();
        assert_eq!(catalog.topup_price_id(), Some("price_topup"));
        assert_eq!(catalog.topup_credits(3), 750);
        assert!(PlanCatalog::default().with_topup(None, 0).is_err());
    }

    #[test]
    fn parse_plan_and_policy() {
        assert_eq!("Plus".parse::<Plan>().unwrap(), Plan::Plus);
        assert_eq!("free".parse::<Plan>().unwrap(), Plan::None);
        assert!("gold".parse::<Plan>().is_err());
        assert_eq!(
            "delta".parse::<UpgradeGrantPolicy>().unwrap(),
            UpgradeGrantPolicy::Delta
        );
    }
}
