//! Service configuration.

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

use credit_ledger_core::{
    plan::{
        DEFAULT_TOPUP_CREDITS_PER_UNIT, PLUS_PLAN_CREDITS, PRO_PLAN_CREDITS, STARTER_PLAN_CREDITS,
    },
    BillingError, Plan, PlanCatalog, UpgradeGrantPolicy, UsagePricing,
};

/// Default Stripe API base URL.
pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Default tolerance between a webhook's signed timestamp and now.
pub const DEFAULT_WEBHOOK_TOLERANCE_SECONDS: u64 = 300;

/// Default credits seeded into a new anonymous session account.
pub const DEFAULT_ANONYMOUS_TRIAL_CREDITS: u64 = 10;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/credit-ledger").
    pub data_dir: String,

    /// HS256 secret used to validate user JWTs.
    pub auth_jwt_secret: Option<String>,

    /// Expected JWT issuer.
    pub auth_issuer: String,

    /// Expected JWT audience (default: "credit-ledger").
    pub auth_audience: String,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Stripe API key (optional).
    pub stripe_api_key: Option<String>,

    /// Stripe webhook signing secret (optional).
    pub stripe_webhook_secret: Option<String>,

    /// Stripe API base URL, overridable for tests.
    pub stripe_api_base: String,

    /// Maximum age of a signed webhook timestamp, in seconds.
    pub webhook_tolerance_seconds: u64,

    /// Plans, prices, allotments, and top-up settings.
    pub plans: PlanCatalog,

    /// Default per-kind usage costs.
    pub usage_pricing: UsagePricing,

    /// Credits granted to a new anonymous session.
    pub anonymous_trial_credits: u64,

    /// Frontend URL for checkout redirects.
    pub frontend_url: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Configuration` if the price table is not
    /// invertible or a policy value cannot be parsed.
    pub fn from_env() -> Result<Self, BillingError> {
        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();

        Ok(Self {
            listen_addr: env_or("LISTEN_ADDR", "0.0.0.0:8080"),
            data_dir: env_or("DATA_DIR", "/data/credit-ledger"),
            auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            auth_issuer: env_or("AUTH_ISSUER", "credit-ledger-auth"),
            auth_audience: env_or("AUTH_AUDIENCE", "credit-ledger"),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            stripe_api_key,
            stripe_webhook_secret,
            stripe_api_base: env_or("STRIPE_API_BASE", DEFAULT_STRIPE_API_BASE),
            webhook_tolerance_seconds: env_parse(
                "WEBHOOK_TOLERANCE_SECONDS",
                DEFAULT_WEBHOOK_TOLERANCE_SECONDS,
            ),
            plans: load_plan_catalog()?,
            usage_pricing: UsagePricing {
                user_send: env_parse("USAGE_COST_USER_SEND", UsagePricing::default().user_send),
                assistant_reply: env_parse(
                    "USAGE_COST_ASSISTANT_REPLY",
                    UsagePricing::default().assistant_reply,
                ),
                image_surcharge: env_parse(
                    "USAGE_COST_IMAGE_SURCHARGE",
                    UsagePricing::default().image_surcharge,
                ),
            },
            anonymous_trial_credits: env_parse(
                "ANONYMOUS_TRIAL_CREDITS",
                DEFAULT_ANONYMOUS_TRIAL_CREDITS,
            ),
            frontend_url: env_or("FRONTEND_URL", "http://localhost:3000"),
            cors_origins: env_or("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES", 1024 * 1024), // 1MB
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS", 30),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Build the plan catalog from `PLAN_CREDITS_*`, `STRIPE_PRICE_*`, and the
/// top-up and upgrade settings.
fn load_plan_catalog() -> Result<PlanCatalog, BillingError> {
    let mut catalog = PlanCatalog::new([
        (
            Plan::Starter,
            env_parse("PLAN_CREDITS_STARTER", STARTER_PLAN_CREDITS),
        ),
        (Plan::Plus, env_parse("PLAN_CREDITS_PLUS", PLUS_PLAN_CREDITS)),
        (Plan::Pro, env_parse("PLAN_CREDITS_PRO", PRO_PLAN_CREDITS)),
    ]);

    for (plan, key) in [
        (Plan::Starter, "STRIPE_PRICE_STARTER"),
        (Plan::Plus, "STRIPE_PRICE_PLUS"),
        (Plan::Pro, "STRIPE_PRICE_PRO"),
    ] {
        match std::env::var(key) {
            Ok(price) => catalog = catalog.with_price(plan, price)?,
            Err(_) => tracing::warn!(plan = %plan, env = key, "No Stripe price configured for plan"),
        }
    }

    let policy = match std::env::var("UPGRADE_GRANT_POLICY") {
        Ok(value) => value.parse::<UpgradeGrantPolicy>()?,
        Err(_) => UpgradeGrantPolicy::default(),
    };

    Ok(catalog
        .with_topup(
            std::env::var("STRIPE_PRICE_TOPUP").ok(),
            env_parse("TOPUP_CREDITS_PER_UNIT", DEFAULT_TOPUP_CREDITS_PER_UNIT),
        )?
        .with_upgrade_policy(policy))
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [".secrets/stripe.json", "../.secrets/stripe.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return (Some(secrets.api_key), secrets.webhook_secret);
        }
    }

    // Fall back to environment variables
    tracing::debug!("Stripe secrets file not found, using environment variables");
    (
        std::env::var("STRIPE_API_KEY").ok(),
        std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/credit-ledger".into(),
            auth_jwt_secret: None,
            auth_issuer: "credit-ledger-auth".into(),
            auth_audience: "credit-ledger".into(),
            service_api_key: None,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: DEFAULT_STRIPE_API_BASE.into(),
            webhook_tolerance_seconds: DEFAULT_WEBHOOK_TOLERANCE_SECONDS,
            plans: PlanCatalog::default(),
            usage_pricing: UsagePricing::default(),
            anonymous_trial_credits: DEFAULT_ANONYMOUS_TRIAL_CREDITS,
            frontend_url: "http://localhost:3000".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
