//! Transaction primitives.
//!
//! A `Transaction` is one immutable entry of the append-only log: a top-up
//! credits a single wallet, a transfer moves value between two wallets. Rows
//! are only ever inserted; `id` is assigned by the store and is strictly
//! increasing, which makes it the deterministic tie-break when ordering
//! history by timestamp.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, util::parse_uuid};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    TopUp,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopUp => "top_up",
            Self::Transfer => "transfer",
        }
    }
}

impl TryFrom<&str> for TransactionKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "top_up" => Ok(Self::TopUp),
            "transfer" => Ok(Self::Transfer),
            other => Err(EngineError::InvalidTransaction(format!(
                "invalid transaction kind: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub kind: TransactionKind,
    /// Absent for top-ups, which have no sending wallet.
    pub sender_wallet: Option<Uuid>,
    /// Set for top-ups and transfers alike; modeled as optional so a future
    /// pure-debit kind fits the same row shape.
    pub receiver_wallet: Option<Uuid>,
    pub amount_minor: i64,
    pub occurred_at: DateTime<Utc>,
    pub note: Option<String>,
    pub idempotency_key: Option<String>,
}

impl Transaction {
    /// Signed effect of this transaction on `wallet_id`: positive for a
    /// credit, negative for a debit, 0 if the wallet is not involved.
    #[must_use]
    pub fn signed_amount_for(&self, wallet_id: Uuid) -> i64 {
        let mut signed = 0;
        if self.sender_wallet == Some(wallet_id) {
            signed -= self.amount_minor;
        }
        if self.receiver_wallet == Some(wallet_id) {
            signed += self.amount_minor;
        }
        signed
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub kind: String,
    pub sender_wallet: Option<String>,
    pub receiver_wallet: Option<String>,
    pub amount_minor: i64,
    pub occurred_at: DateTimeUtc,
    pub note: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Row for a top-up: no sender, value appears in `receiver`.
pub(crate) fn top_up_row(
    receiver_wallet: Uuid,
    amount_minor: i64,
    occurred_at: DateTime<Utc>,
    note: Option<String>,
    idempotency_key: Option<String>,
) -> ActiveModel {
    ActiveModel {
        id: ActiveValue::NotSet,
        kind: ActiveValue::Set(TransactionKind::TopUp.as_str().to_string()),
        sender_wallet: ActiveValue::Set(None),
        receiver_wallet: ActiveValue::Set(Some(receiver_wallet.to_string())),
        amount_minor: ActiveValue::Set(amount_minor),
        occurred_at: ActiveValue::Set(occurred_at),
        note: ActiveValue::Set(note),
        idempotency_key: ActiveValue::Set(idempotency_key),
    }
}

/// Row for a transfer: both wallets set, value moves sender → receiver.
pub(crate) fn transfer_row(
    sender_wallet: Uuid,
    receiver_wallet: Uuid,
    amount_minor: i64,
    occurred_at: DateTime<Utc>,
    note: Option<String>,
    idempotency_key: Option<String>,
) -> ActiveModel {
    ActiveModel {
        id: ActiveValue::NotSet,
        kind: ActiveValue::Set(TransactionKind::Transfer.as_str().to_string()),
        sender_wallet: ActiveValue::Set(Some(sender_wallet.to_string())),
        receiver_wallet: ActiveValue::Set(Some(receiver_wallet.to_string())),
        amount_minor: ActiveValue::Set(amount_minor),
        occurred_at: ActiveValue::Set(occurred_at),
        note: ActiveValue::Set(note),
        idempotency_key: ActiveValue::Set(idempotency_key),
    }
}

impl TryFrom<Model> for Transaction {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let kind = TransactionKind::try_from(model.kind.as_str())?;
        let sender_wallet = model
            .sender_wallet
            .as_deref()
            .map(|raw| parse_uuid(raw, "wallet"))
            .transpose()?;
        let receiver_wallet = model
            .receiver_wallet
            .as_deref()
            .map(|raw| parse_uuid(raw, "wallet"))
            .transpose()?;

        // Enforce the kind's row shape; a violation means the log was written
        // by something other than the engine.
        match kind {
            TransactionKind::TopUp => {
                if sender_wallet.is_some() || receiver_wallet.is_none() {
                    return Err(EngineError::InvalidTransaction(format!(
                        "top_up {} must have a receiver and no sender",
                        model.id
                    )));
                }
            }
            TransactionKind::Transfer => match (sender_wallet, receiver_wallet) {
                (Some(sender), Some(receiver)) if sender != receiver => {}
                _ => {
                    return Err(EngineError::InvalidTransaction(format!(
                        "transfer {} must have two distinct wallets",
                        model.id
                    )));
                }
            },
        }

        if model.amount_minor <= 0 {
            return Err(EngineError::InvalidTransaction(format!(
                "transaction {} has non-positive amount",
                model.id
            )));
        }

        Ok(Self {
            id: model.id,
            kind,
            sender_wallet,
            receiver_wallet,
            amount_minor: model.amount_minor,
            occurred_at: model.occurred_at,
            note: model.note,
            idempotency_key: model.idempotency_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn model(kind: &str, sender: Option<Uuid>, receiver: Option<Uuid>) -> Model {
        Model {
            id: 7,
            kind: kind.to_string(),
            sender_wallet: sender.map(|id| id.to_string()),
            receiver_wallet: receiver.map(|id| id.to_string()),
            amount_minor: 250,
            occurred_at: Utc.timestamp_opt(0, 0).unwrap(),
            note: None,
            idempotency_key: None,
        }
    }

    #[test]
    fn top_up_requires_receiver_only() {
        let wallet = Uuid::new_v4();
        assert!(Transaction::try_from(model("top_up", None, Some(wallet))).is_ok());
        assert!(Transaction::try_from(model("top_up", Some(wallet), Some(wallet))).is_err());
        assert!(Transaction::try_from(model("top_up", None, None)).is_err());
    }

    #[test]
    fn transfer_requires_distinct_wallets() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(Transaction::try_from(model("transfer", Some(a), Some(b))).is_ok());
        assert!(Transaction::try_from(model("transfer", Some(a), Some(a))).is_err());
        assert!(Transaction::try_from(model("transfer", Some(a), None)).is_err());
    }

    #[test]
    fn signed_amount_reflects_direction() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let tx = Transaction::try_from(model("transfer", Some(a), Some(b))).unwrap();
        assert_eq!(tx.signed_amount_for(a), -250);
        assert_eq!(tx.signed_amount_for(b), 250);
        assert_eq!(tx.signed_amount_for(Uuid::new_v4()), 0);
    }
}
