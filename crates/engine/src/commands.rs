//! Command structs for engine operations.
//!
//! These types group parameters for the write operations (credit/transfer),
//! keeping call sites readable and avoiding long argument lists.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Top up a wallet.
#[derive(Clone, Debug)]
pub struct CreditCmd {
    pub wallet_id: Uuid,
    pub amount_minor: i64,
    pub note: Option<String>,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl CreditCmd {
    #[must_use]
    pub fn new(wallet_id: Uuid, amount_minor: i64, occurred_at: DateTime<Utc>) -> Self {
        Self {
            wallet_id,
            amount_minor,
            note: None,
            idempotency_key: None,
            occurred_at,
        }
    }

    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Move value from one wallet to another.
#[derive(Clone, Debug)]
pub struct TransferCmd {
    pub sender_wallet_id: Uuid,
    pub receiver_wallet_id: Uuid,
    pub amount_minor: i64,
    pub note: Option<String>,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl TransferCmd {
    #[must_use]
    pub fn new(
        sender_wallet_id: Uuid,
        receiver_wallet_id: Uuid,
        amount_minor: i64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sender_wallet_id,
            receiver_wallet_id,
            amount_minor,
            note: None,
            idempotency_key: None,
            occurred_at,
        }
    }

    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}
