//! Usage charge types.
//!
//! Each conversational turn is billed at two checkpoints (message accepted,
//! reply completed), each under its own `ChargeKind`, so the triple
//! `(actor, turn, kind)` identifies a charge exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, RecordId, TurnId};

/// Default cost of accepting a user message.
pub const DEFAULT_USER_SEND_COST: u64 = 1;

/// Default cost of a completed assistant reply.
pub const DEFAULT_ASSISTANT_REPLY_COST: u64 = 1;

/// Default surcharge for a turn that carries an image.
pub const DEFAULT_IMAGE_SURCHARGE: u64 = 4;

/// Which checkpoint of a turn a charge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeKind {
    /// The user's message was accepted.
    UserSend,
    /// The assistant's reply completed.
    AssistantReply,
    /// Extra cost for image input.
    ImageSurcharge,
    /// Marker recorded when a charge was refused for lack of credits.
    OutOfCreditsBlock,
}

impl ChargeKind {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserSend => "user_send",
            Self::AssistantReply => "assistant_reply",
            Self::ImageSurcharge => "image_surcharge",
            Self::OutOfCreditsBlock => "out_of_credits_block",
        }
    }
}

/// Uniqueness key of a usage entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChargeKey {
    /// Charged account.
    pub actor: AccountId,
    /// Turn being billed.
    pub turn_id: TurnId,
    /// Checkpoint.
    pub kind: ChargeKind,
}

impl ChargeKey {
    /// Build a key.
    #[must_use]
    pub fn new(actor: AccountId, turn_id: TurnId, kind: ChargeKind) -> Self {
        Self {
            actor,
            turn_id,
            kind,
        }
    }

    /// Storage key bytes: `actor 0x00 turn 0x00 kind`.
    #[must_use]
    pub fn to_key(&self) -> Vec<u8> {
        let mut key = self.actor.to_key();
        key.push(0);
        key.extend_from_slice(self.turn_id.as_str().as_bytes());
        key.push(0);
        key.extend_from_slice(self.kind.as_str().as_bytes());
        key
    }
}

/// Immutable record of one balance decrease tied to a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageChargeEntry {
    /// Record identifier (time-ordered).
    pub id: RecordId,
    /// Charged account.
    pub actor: AccountId,
    /// Turn being billed.
    pub turn_id: TurnId,
    /// Checkpoint.
    pub charge_kind: ChargeKind,
    /// Credits deducted (zero for block markers).
    pub amount: u64,
    /// Balance after this entry.
    pub balance_after: u64,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
}

impl UsageChargeEntry {
    /// Create an entry.
    #[must_use]
    pub fn new(key: ChargeKey, amount: u64, balance_after: u64) -> Self {
        Self {
            id: RecordId::generate(),
            actor: key.actor,
            turn_id: key.turn_id,
            charge_kind: key.kind,
            amount,
            balance_after,
            created_at: Utc::now(),
        }
    }

    /// The uniqueness key of this entry.
    #[must_use]
    pub fn key(&self) -> ChargeKey {
        ChargeKey::new(self.actor, self.turn_id.clone(), self.charge_kind)
    }
}

/// How a charge call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    /// Credits were deducted.
    Charged,
    /// This checkpoint of the turn was already billed.
    DuplicateTurnCharge,
    /// Balance too low; nothing deducted.
    InsufficientCredits,
}

/// Result of a charge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChargeOutcome {
    /// Whether the balance changed.
    pub charged: bool,
    /// Balance after the call (or as recorded by the original charge).
    pub balance_after: u64,
    /// Outcome detail.
    pub status: ChargeStatus,
}

/// Default per-kind costs, used when the caller does not name an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsagePricing {
    /// Cost of accepting a user message.
    pub user_send: u64,
    /// Cost of a completed reply.
    pub assistant_reply: u64,
    /// Image surcharge.
    pub image_surcharge: u64,
}

impl Default for UsagePricing {
    fn default() -> Self {
        Self {
            user_send: DEFAULT_USER_SEND_COST,
            assistant_reply: DEFAULT_ASSISTANT_REPLY_COST,
            image_surcharge: DEFAULT_IMAGE_SURCHARGE,
        }
    }
}

impl UsagePricing {
    /// Cost of a checkpoint. Block markers are free.
    #[must_use]
    pub const fn cost(&self, kind: ChargeKind) -> u64 {
        match kind {
            ChargeKind::UserSend => self.user_send,
            ChargeKind::AssistantReply => self.assistant_reply,
            ChargeKind::ImageSurcharge => self.image_surcharge,
            ChargeKind::OutOfCreditsBlock => 0,
        }
    }
}
