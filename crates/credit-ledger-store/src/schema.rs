//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary account records, keyed by account id.
    pub const ACCOUNTS: &str = "accounts";

    /// Index: provider customer id to account id.
    pub const ACCOUNTS_BY_CUSTOMER: &str = "accounts_by_customer";

    /// Credit grants, keyed by record id (ULID).
    pub const GRANTS: &str = "grants";

    /// Unique index: grant idempotency key to record id.
    pub const GRANTS_BY_EVENT: &str = "grants_by_event";

    /// Unique index: `account_id || period_key` to record id (monthly grants only).
    pub const GRANTS_BY_PERIOD: &str = "grants_by_period";

    /// Index: grants by account, keyed by `account_id || record_id`.
    /// Value is empty (index only).
    pub const GRANTS_BY_ACCOUNT: &str = "grants_by_account";

    /// Usage entries, keyed by `actor || turn_id || kind` (the uniqueness triple).
    pub const USAGE_ENTRIES: &str = "usage_entries";

    /// Index: usage entries by account, keyed by `account_id || record_id`.
    /// Value is the usage entry key.
    pub const USAGE_BY_ACCOUNT: &str = "usage_by_account";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::ACCOUNTS_BY_CUSTOMER,
        cf::GRANTS,
        cf::GRANTS_BY_EVENT,
        cf::GRANTS_BY_PERIOD,
        cf::GRANTS_BY_ACCOUNT,
        cf::USAGE_ENTRIES,
        cf::USAGE_BY_ACCOUNT,
    ]
}
