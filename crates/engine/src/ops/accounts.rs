//! Account registry: users, their wallets, and phone-number lookup.

use chrono::Utc;
use sea_orm::{ActiveValue, DatabaseTransaction, QueryFilter, TransactionTrait, prelude::*};

use crate::{
    EngineError, ResultEngine, User, Wallet, users,
    util::{normalize_phone, normalize_required_name},
    wallets,
};

use super::{Engine, with_tx};

impl Engine {
    /// Registers a new user and their zero-balance wallet as one atomic unit.
    ///
    /// Fails with `DuplicatePhone` when the phone is already registered; the
    /// unique index on `phone` backs the in-transaction check, so a racing
    /// registration cannot slip through.
    pub async fn register(&self, name: &str, phone: &str) -> ResultEngine<User> {
        let name = normalize_required_name(name, "user")?;
        let phone = normalize_phone(phone)?;
        with_tx!(self, |db_tx| {
            if self.user_model_by_phone(&db_tx, &phone).await?.is_some() {
                return Err(EngineError::DuplicatePhone(phone));
            }

            let now = Utc::now();
            let user = User::new(name, phone.clone(), now);
            let wallet = Wallet::new(user.id, now);

            if let Err(err) = users::ActiveModel::from(&user).insert(&db_tx).await {
                // Unique-index race: a concurrent register committed the same
                // phone between our check and our insert.
                if self.user_model_by_phone(&db_tx, &phone).await?.is_some() {
                    return Err(EngineError::DuplicatePhone(phone));
                }
                return Err(err.into());
            }
            wallets::ActiveModel::from(&wallet).insert(&db_tx).await?;

            Ok(user)
        })
    }

    /// Return the user registered under `phone`.
    pub async fn user_by_phone(&self, phone: &str) -> ResultEngine<User> {
        let phone = normalize_phone(phone)?;
        with_tx!(self, |db_tx| {
            let model = self.require_user_by_phone(&db_tx, &phone).await?;
            User::try_from(model)
        })
    }

    /// Resolve a phone number to the owner's wallet.
    pub async fn find_wallet_by_phone(&self, phone: &str) -> ResultEngine<Wallet> {
        let phone = normalize_phone(phone)?;
        with_tx!(self, |db_tx| {
            let user = self.require_user_by_phone(&db_tx, &phone).await?;
            let model = wallets::Entity::find()
                .filter(wallets::Column::UserId.eq(user.id.clone()))
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::WalletNotFound(format!("no wallet for {phone}")))?;
            Wallet::try_from(model)
        })
    }

    /// Moves a user to a new phone number.
    ///
    /// Re-submitting the user's current phone is a no-op success; a phone
    /// held by a different user fails with `DuplicatePhone`. Wallet and
    /// transaction history are untouched.
    pub async fn update_phone(&self, old_phone: &str, new_phone: &str) -> ResultEngine<()> {
        let old_phone = normalize_phone(old_phone)?;
        let new_phone = normalize_phone(new_phone)?;
        with_tx!(self, |db_tx| {
            let user = self.require_user_by_phone(&db_tx, &old_phone).await?;
            if user.phone == new_phone {
                return Ok(());
            }
            if self.user_model_by_phone(&db_tx, &new_phone).await?.is_some() {
                return Err(EngineError::DuplicatePhone(new_phone));
            }

            let active = users::ActiveModel {
                id: ActiveValue::Set(user.id),
                phone: ActiveValue::Set(new_phone.clone()),
                ..Default::default()
            };
            if let Err(err) = active.update(&db_tx).await {
                if self.user_model_by_phone(&db_tx, &new_phone).await?.is_some() {
                    return Err(EngineError::DuplicatePhone(new_phone));
                }
                return Err(err.into());
            }
            Ok(())
        })
    }

    async fn user_model_by_phone(
        &self,
        db_tx: &DatabaseTransaction,
        phone: &str,
    ) -> ResultEngine<Option<users::Model>> {
        Ok(users::Entity::find()
            .filter(users::Column::Phone.eq(phone))
            .one(db_tx)
            .await?)
    }

    pub(crate) async fn require_user_by_phone(
        &self,
        db_tx: &DatabaseTransaction,
        phone: &str,
    ) -> ResultEngine<users::Model> {
        self.user_model_by_phone(db_tx, phone)
            .await?
            .ok_or_else(|| EngineError::UserNotFound(phone.to_string()))
    }
}
