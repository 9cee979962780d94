//! Ledger core for passbook.
//!
//! The engine owns every balance mutation: user registration, top-ups,
//! peer-to-peer transfers, and the append-only transaction log that
//! justifies the stored balances. Callers get a programmatic API over a
//! [`sea_orm::DatabaseConnection`]; presentation layers live elsewhere.

pub use commands::{CreditCmd, TransferCmd};
pub use error::EngineError;
pub use money::MoneyCents;
pub use ops::{BalanceDrift, Engine, EngineBuilder, HistoryFilter};
pub use transactions::{Transaction, TransactionKind};
pub use users::User;
pub use wallets::Wallet;

mod commands;
mod error;
mod money;
mod ops;
mod transactions;
mod users;
mod util;
mod wallets;

pub type ResultEngine<T> = Result<T, EngineError>;
