//! Consistency check and repair for denormalized balances.
//!
//! The transaction log is the authoritative history; the stored `balance`
//! column is an incrementally maintained fold of it. These operations
//! recompute the fold from scratch so operators can detect and repair any
//! divergence between the two.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use sea_orm::{ActiveValue, DatabaseTransaction, QueryOrder, TransactionTrait, prelude::*};

use crate::{
    EngineError, ResultEngine, Transaction, transactions, util::parse_uuid, wallets,
};

use super::{Engine, with_tx};

/// One wallet whose stored balance disagrees with the log fold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BalanceDrift {
    pub wallet_id: Uuid,
    pub stored_minor: i64,
    pub computed_minor: i64,
}

impl Engine {
    /// Recomputes every wallet balance from the log and reports mismatches.
    ///
    /// Read-only; pair with [`Engine::recompute_balances`] to repair.
    pub async fn verify_balances(&self) -> ResultEngine<Vec<BalanceDrift>> {
        with_tx!(self, |db_tx| {
            let drift = self.balance_drift(&db_tx).await?;
            for d in &drift {
                tracing::warn!(
                    "wallet {} balance drift: stored {}, ledger {}",
                    d.wallet_id,
                    d.stored_minor,
                    d.computed_minor
                );
            }
            Ok(drift)
        })
    }

    /// Recomputes balances from the log and rewrites any wallet that
    /// drifted, all inside one transaction. Returns what was repaired.
    pub async fn recompute_balances(&self) -> ResultEngine<Vec<BalanceDrift>> {
        with_tx!(self, |db_tx| {
            let drift = self.balance_drift(&db_tx).await?;
            for d in &drift {
                let model = wallets::ActiveModel {
                    id: ActiveValue::Set(d.wallet_id.to_string()),
                    balance: ActiveValue::Set(d.computed_minor),
                    updated_at: ActiveValue::Set(Utc::now()),
                    ..Default::default()
                };
                model.update(&db_tx).await?;
                tracing::info!(
                    "wallet {} balance repaired: {} -> {}",
                    d.wallet_id,
                    d.stored_minor,
                    d.computed_minor
                );
            }
            Ok(drift)
        })
    }

    /// Folds the full log per wallet and compares against stored balances.
    ///
    /// Replays oldest-first so a malformed row is reported at the point it
    /// was appended; every row must reference known wallets.
    async fn balance_drift(&self, db_tx: &DatabaseTransaction) -> ResultEngine<Vec<BalanceDrift>> {
        let wallet_models = wallets::Entity::find().all(db_tx).await?;

        let mut stored: Vec<(Uuid, i64)> = Vec::with_capacity(wallet_models.len());
        let mut computed: HashMap<Uuid, i64> = HashMap::with_capacity(wallet_models.len());
        for model in wallet_models {
            let wallet_id = parse_uuid(&model.id, "wallet")?;
            stored.push((wallet_id, model.balance));
            computed.insert(wallet_id, 0);
        }

        let rows = transactions::Entity::find()
            .order_by_asc(transactions::Column::OccurredAt)
            .order_by_asc(transactions::Column::Id)
            .all(db_tx)
            .await?;
        for model in rows {
            let tx = Transaction::try_from(model)?;
            if let Some(sender) = tx.sender_wallet {
                let entry = computed
                    .get_mut(&sender)
                    .ok_or_else(|| EngineError::WalletNotFound(sender.to_string()))?;
                *entry -= tx.amount_minor;
            }
            if let Some(receiver) = tx.receiver_wallet {
                let entry = computed
                    .get_mut(&receiver)
                    .ok_or_else(|| EngineError::WalletNotFound(receiver.to_string()))?;
                *entry += tx.amount_minor;
            }
        }

        let mut drift: Vec<BalanceDrift> = stored
            .into_iter()
            .filter_map(|(wallet_id, stored_minor)| {
                let computed_minor = *computed.get(&wallet_id)?;
                (stored_minor != computed_minor).then_some(BalanceDrift {
                    wallet_id,
                    stored_minor,
                    computed_minor,
                })
            })
            .collect();
        drift.sort_by_key(|d| d.wallet_id);
        Ok(drift)
    }
}
