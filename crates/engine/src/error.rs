//! The module contains the errors the engine can throw.
//!
//! Variants group into four families:
//!
//! - validation: [`InvalidAmount`], [`SameWalletTransfer`], [`InvalidPhone`]
//!   (rejected before any store access)
//! - not found: [`UserNotFound`], [`WalletNotFound`]
//! - conflict: [`DuplicatePhone`]
//! - business rule: [`InsufficientFunds`]
//!
//! [`InvalidAmount`]: EngineError::InvalidAmount
//! [`SameWalletTransfer`]: EngineError::SameWalletTransfer
//! [`InvalidPhone`]: EngineError::InvalidPhone
//! [`UserNotFound`]: EngineError::UserNotFound
//! [`WalletNotFound`]: EngineError::WalletNotFound
//! [`DuplicatePhone`]: EngineError::DuplicatePhone
//! [`InsufficientFunds`]: EngineError::InsufficientFunds
use sea_orm::DbErr;
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Same wallet transfer: {0}")]
    SameWalletTransfer(String),
    #[error("Invalid phone: {0}")]
    InvalidPhone(String),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),
    #[error("Phone already registered: {0}")]
    DuplicatePhone(String),
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("Invalid id: {0}")]
    InvalidId(String),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::SameWalletTransfer(a), Self::SameWalletTransfer(b)) => a == b,
            (Self::InvalidPhone(a), Self::InvalidPhone(b)) => a == b,
            (Self::UserNotFound(a), Self::UserNotFound(b)) => a == b,
            (Self::WalletNotFound(a), Self::WalletNotFound(b)) => a == b,
            (Self::DuplicatePhone(a), Self::DuplicatePhone(b)) => a == b,
            (Self::InsufficientFunds(a), Self::InsufficientFunds(b)) => a == b,
            (Self::InvalidCursor(a), Self::InvalidCursor(b)) => a == b,
            (Self::InvalidId(a), Self::InvalidId(b)) => a == b,
            (Self::InvalidTransaction(a), Self::InvalidTransaction(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
