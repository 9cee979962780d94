//! Balance mutations: top-ups and peer-to-peer transfers.
//!
//! Every operation runs inside one DB transaction: the log row is appended
//! first, then the denormalized balances are adjusted with arithmetic
//! `UPDATE`s so concurrent units cannot lose updates. The debit side of a
//! transfer re-checks the balance in the `UPDATE` itself; zero affected rows
//! aborts the whole unit, which keeps `balance >= 0` under any interleaving.

use chrono::Utc;
use sea_orm::{
    DatabaseTransaction, QueryFilter, TransactionTrait, prelude::*, sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    CreditCmd, EngineError, ResultEngine, Transaction, TransferCmd, Wallet,
    transactions::{self, top_up_row, transfer_row},
    util::normalize_optional_text,
    wallets,
};

use super::{Engine, with_tx};

/// Outcome of appending a log row under an idempotency key.
enum LogInsert {
    Inserted(transactions::Model),
    /// The key already named a committed transaction; nothing was written.
    Existing(Transaction),
}

impl Engine {
    /// Return a wallet snapshot from DB.
    pub async fn wallet(&self, wallet_id: Uuid) -> ResultEngine<Wallet> {
        with_tx!(self, |db_tx| {
            let model = self.require_wallet(&db_tx, wallet_id).await?;
            Wallet::try_from(model)
        })
    }

    /// Return the current committed balance in minor units.
    pub async fn balance_of(&self, wallet_id: Uuid) -> ResultEngine<i64> {
        Ok(self.wallet(wallet_id).await?.balance)
    }

    /// Tops up a wallet and appends the matching `top_up` log row.
    pub async fn credit(&self, cmd: CreditCmd) -> ResultEngine<Transaction> {
        if cmd.amount_minor <= 0 {
            return Err(EngineError::InvalidAmount(
                "amount_minor must be > 0".to_string(),
            ));
        }
        let note = normalize_optional_text(cmd.note.as_deref());
        with_tx!(self, |db_tx| {
            if let Some(existing) = self
                .find_by_idempotency_key(&db_tx, cmd.idempotency_key.as_deref())
                .await?
            {
                return Ok(existing);
            }
            self.require_wallet(&db_tx, cmd.wallet_id).await?;

            let row = top_up_row(
                cmd.wallet_id,
                cmd.amount_minor,
                cmd.occurred_at,
                note,
                cmd.idempotency_key.clone(),
            );
            let model = match self
                .insert_log_row(&db_tx, row, cmd.idempotency_key.as_deref())
                .await?
            {
                LogInsert::Existing(tx) => return Ok(tx),
                LogInsert::Inserted(model) => model,
            };

            self.apply_credit(&db_tx, cmd.wallet_id, cmd.amount_minor)
                .await?;

            Transaction::try_from(model)
        })
    }

    /// Moves `amount_minor` from the sender wallet to the receiver wallet.
    ///
    /// The funds check and both balance mutations are one atomic unit; on any
    /// error the unit aborts with no partial effect, including the appended
    /// log row.
    pub async fn transfer(&self, cmd: TransferCmd) -> ResultEngine<Transaction> {
        if cmd.amount_minor <= 0 {
            return Err(EngineError::InvalidAmount(
                "amount_minor must be > 0".to_string(),
            ));
        }
        if cmd.sender_wallet_id == cmd.receiver_wallet_id {
            return Err(EngineError::SameWalletTransfer(
                "sender and receiver wallets must differ".to_string(),
            ));
        }
        let note = normalize_optional_text(cmd.note.as_deref());
        with_tx!(self, |db_tx| {
            if let Some(existing) = self
                .find_by_idempotency_key(&db_tx, cmd.idempotency_key.as_deref())
                .await?
            {
                return Ok(existing);
            }
            let sender = self.require_wallet(&db_tx, cmd.sender_wallet_id).await?;
            self.require_wallet(&db_tx, cmd.receiver_wallet_id).await?;

            if sender.balance < cmd.amount_minor {
                return Err(EngineError::InsufficientFunds(format!(
                    "wallet {}: available {}, requested {}",
                    cmd.sender_wallet_id, sender.balance, cmd.amount_minor
                )));
            }

            let row = transfer_row(
                cmd.sender_wallet_id,
                cmd.receiver_wallet_id,
                cmd.amount_minor,
                cmd.occurred_at,
                note,
                cmd.idempotency_key.clone(),
            );
            let model = match self
                .insert_log_row(&db_tx, row, cmd.idempotency_key.as_deref())
                .await?
            {
                LogInsert::Existing(tx) => return Ok(tx),
                LogInsert::Inserted(model) => model,
            };

            // Issue both balance updates in ascending wallet-id order so
            // crossing transfers (A→B concurrent with B→A) cannot deadlock.
            let debit = (cmd.sender_wallet_id, -cmd.amount_minor);
            let credit = (cmd.receiver_wallet_id, cmd.amount_minor);
            let ordered = if cmd.sender_wallet_id < cmd.receiver_wallet_id {
                [debit, credit]
            } else {
                [credit, debit]
            };
            for (wallet_id, delta_minor) in ordered {
                if delta_minor < 0 {
                    let applied = self
                        .apply_guarded_debit(&db_tx, wallet_id, -delta_minor)
                        .await?;
                    if !applied {
                        // A concurrent debit drained the balance after our
                        // read; abort with no writes committed.
                        return Err(EngineError::InsufficientFunds(format!(
                            "wallet {}: balance changed concurrently, requested {}",
                            wallet_id, cmd.amount_minor
                        )));
                    }
                } else {
                    self.apply_credit(&db_tx, wallet_id, delta_minor).await?;
                }
            }

            Transaction::try_from(model)
        })
    }

    /// `balance += delta` as a single arithmetic UPDATE (no read-modify-write).
    async fn apply_credit(
        &self,
        db_tx: &DatabaseTransaction,
        wallet_id: Uuid,
        delta_minor: i64,
    ) -> ResultEngine<()> {
        let res = wallets::Entity::update_many()
            .col_expr(
                wallets::Column::Balance,
                Expr::col(wallets::Column::Balance).add(delta_minor),
            )
            .col_expr(wallets::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(wallets::Column::Id.eq(wallet_id.to_string()))
            .exec(db_tx)
            .await?;
        if res.rows_affected == 0 {
            return Err(EngineError::WalletNotFound(wallet_id.to_string()));
        }
        Ok(())
    }

    /// `balance -= amount`, guarded by `balance >= amount` in the same
    /// statement. Returns `false` when the guard rejected the debit.
    async fn apply_guarded_debit(
        &self,
        db_tx: &DatabaseTransaction,
        wallet_id: Uuid,
        amount_minor: i64,
    ) -> ResultEngine<bool> {
        let res = wallets::Entity::update_many()
            .col_expr(
                wallets::Column::Balance,
                Expr::col(wallets::Column::Balance).sub(amount_minor),
            )
            .col_expr(wallets::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(wallets::Column::Id.eq(wallet_id.to_string()))
            .filter(wallets::Column::Balance.gte(amount_minor))
            .exec(db_tx)
            .await?;
        Ok(res.rows_affected > 0)
    }

    async fn find_by_idempotency_key(
        &self,
        db_tx: &DatabaseTransaction,
        key: Option<&str>,
    ) -> ResultEngine<Option<Transaction>> {
        let Some(key) = key else {
            return Ok(None);
        };
        transactions::Entity::find()
            .filter(transactions::Column::IdempotencyKey.eq(key))
            .one(db_tx)
            .await?
            .map(Transaction::try_from)
            .transpose()
    }

    async fn insert_log_row(
        &self,
        db_tx: &DatabaseTransaction,
        row: transactions::ActiveModel,
        idempotency_key: Option<&str>,
    ) -> ResultEngine<LogInsert> {
        match row.insert(db_tx).await {
            Ok(model) => Ok(LogInsert::Inserted(model)),
            Err(err) => {
                // Unique-index race on the idempotency key: return the row the
                // winning unit committed instead of surfacing the conflict.
                if let Some(key) = idempotency_key
                    && let Some(existing) = transactions::Entity::find()
                        .filter(transactions::Column::IdempotencyKey.eq(key))
                        .one(db_tx)
                        .await?
                {
                    return Ok(LogInsert::Existing(Transaction::try_from(existing)?));
                }
                Err(err.into())
            }
        }
    }
}
