//! Key encoding utilities.
//!
//! Composite keys join their parts with a `0x00` separator. Account ids and
//! provider identifiers never contain NUL, so prefixes stay unambiguous.

use credit_ledger_core::{AccountId, ChargeKey, RecordId};

const SEP: u8 = 0;

/// Create an account key.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.to_key()
}

/// Create a customer-index key from a provider customer id.
#[must_use]
pub fn customer_key(customer_id: &str) -> Vec<u8> {
    customer_id.as_bytes().to_vec()
}

/// Create a grant record key.
#[must_use]
pub fn grant_key(record_id: &RecordId) -> Vec<u8> {
    record_id.to_bytes().to_vec()
}

/// Create a grant idempotency-index key.
#[must_use]
pub fn grant_event_key(external_event_id: &str) -> Vec<u8> {
    external_event_id.as_bytes().to_vec()
}

/// Create a monthly-period index key.
///
/// Format: `account_id || 0x00 || period_key`
#[must_use]
pub fn grant_period_key(account_id: &AccountId, period_key: &str) -> Vec<u8> {
    let mut key = account_prefix(account_id);
    key.extend_from_slice(period_key.as_bytes());
    key
}

/// Create a usage entry key from its uniqueness triple.
#[must_use]
pub fn usage_key(charge_key: &ChargeKey) -> Vec<u8> {
    charge_key.to_key()
}

/// Create a per-account index key for a ledger record.
///
/// Format: `account_id || 0x00 || record_id (16 bytes)`
///
/// Since ULIDs are time-ordered, records for an account sort by time.
#[must_use]
pub fn account_record_key(account_id: &AccountId, record_id: &RecordId) -> Vec<u8> {
    let mut key = account_prefix(account_id);
    key.extend_from_slice(&record_id.to_bytes());
    key
}

/// Create a prefix for iterating all records of an account.
#[must_use]
pub fn account_prefix(account_id: &AccountId) -> Vec<u8> {
    let mut key = account_id.to_key();
    key.push(SEP);
    key
}

/// Exclusive upper bound of [`account_prefix`], for reverse scans.
#[must_use]
pub fn account_prefix_end(account_id: &AccountId) -> Vec<u8> {
    let mut key = account_id.to_key();
    key.push(SEP + 1);
    key
}

/// Extract the record ID from a per-account index key.
///
/// Returns `None` if the key is shorter than a record id.
#[must_use]
pub fn extract_record_id(key: &[u8]) -> Option<RecordId> {
    let start = key.len().checked_sub(16)?;
    let bytes: [u8; 16] = key[start..].try_into().ok()?;
    Some(RecordId::from_bytes(bytes))
}
