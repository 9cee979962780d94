use std::error::Error;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use engine::{CreditCmd, Engine, HistoryFilter, MoneyCents, TransferCmd, Wallet};
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "passbook_admin")]
#[command(about = "Admin utilities for passbook (accounts, top-ups, transfers, audit)")]
struct Cli {
    /// Database connection string (also read from `DATABASE_URL`).
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:./passbook.db?mode=rwc"
    )]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    User(UserArgs),
    Wallet(WalletArgs),
    Ledger(LedgerArgs),
}

#[derive(Args, Debug)]
struct UserArgs {
    #[command(subcommand)]
    command: UserCommand,
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    Register(RegisterArgs),
    UpdatePhone(UpdatePhoneArgs),
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    phone: String,
}

#[derive(Args, Debug)]
struct UpdatePhoneArgs {
    #[arg(long)]
    old_phone: String,
    #[arg(long)]
    new_phone: String,
}

#[derive(Args, Debug)]
struct WalletArgs {
    #[command(subcommand)]
    command: WalletCommand,
}

#[derive(Subcommand, Debug)]
enum WalletCommand {
    Balance(BalanceArgs),
    Credit(CreditArgs),
    Transfer(TransferArgs),
    History(HistoryArgs),
}

#[derive(Args, Debug)]
struct BalanceArgs {
    #[arg(long)]
    phone: String,
}

#[derive(Args, Debug)]
struct CreditArgs {
    #[arg(long)]
    phone: String,
    /// Amount in major units, e.g. `10.50`.
    #[arg(long)]
    amount: String,
    #[arg(long, default_value = "Top-up")]
    note: String,
    #[arg(long)]
    idempotency_key: Option<String>,
}

#[derive(Args, Debug)]
struct TransferArgs {
    /// Sender phone number.
    #[arg(long)]
    from: String,
    /// Receiver phone number.
    #[arg(long)]
    to: String,
    /// Amount in major units, e.g. `10.50`.
    #[arg(long)]
    amount: String,
    #[arg(long, default_value = "P2P Transfer")]
    note: String,
    #[arg(long)]
    idempotency_key: Option<String>,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    #[arg(long)]
    phone: String,
    #[arg(long, default_value_t = 50)]
    limit: u64,
}

#[derive(Args, Debug)]
struct LedgerArgs {
    #[command(subcommand)]
    command: LedgerCommand,
}

#[derive(Subcommand, Debug)]
enum LedgerCommand {
    /// Recompute balances from the transaction log and report drift.
    Verify,
    /// Recompute balances from the transaction log and repair drifted wallets.
    Recompute,
}

fn parse_amount(raw: &str) -> Result<i64, String> {
    let cents: MoneyCents = raw
        .parse()
        .map_err(|err| format!("invalid amount {raw:?}: {err}"))?;
    if !cents.is_positive() {
        return Err(format!("amount must be positive: {raw}"));
    }
    Ok(cents.cents())
}

async fn connect_db(
    database_url: &str,
) -> Result<DatabaseConnection, Box<dyn Error + Send + Sync>> {
    let db = Database::connect(database_url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

fn print_history(wallet: &Wallet, transactions: &[engine::Transaction]) {
    if transactions.is_empty() {
        println!("no transactions");
        return;
    }
    for tx in transactions {
        let signed = MoneyCents::new(tx.signed_amount_for(wallet.id));
        let note = tx.note.as_deref().unwrap_or("-");
        println!(
            "{} #{:<6} {:<8} {:>12} {}",
            tx.occurred_at.format("%Y-%m-%d %H:%M:%S"),
            tx.id,
            tx.kind.as_str(),
            signed.to_string(),
            note
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("passbook_admin=info,engine=info")),
        )
        .init();

    let cli = Cli::parse();

    let db = connect_db(&cli.database_url).await?;
    let engine = Engine::builder().database(db).build().await?;

    match cli.command {
        Command::User(UserArgs {
            command: UserCommand::Register(args),
        }) => {
            let user = engine.register(&args.name, &args.phone).await?;
            let wallet = engine.find_wallet_by_phone(&user.phone).await?;
            println!(
                "registered {} ({}); wallet {}",
                user.name, user.phone, wallet.id
            );
        }
        Command::User(UserArgs {
            command: UserCommand::UpdatePhone(args),
        }) => {
            engine.update_phone(&args.old_phone, &args.new_phone).await?;
            println!("phone updated: {} -> {}", args.old_phone, args.new_phone);
        }
        Command::Wallet(WalletArgs {
            command: WalletCommand::Balance(args),
        }) => {
            let wallet = engine.find_wallet_by_phone(&args.phone).await?;
            println!(
                "balance for {}: {}",
                args.phone,
                MoneyCents::new(wallet.balance)
            );
        }
        Command::Wallet(WalletArgs {
            command: WalletCommand::Credit(args),
        }) => {
            let amount_minor = match parse_amount(&args.amount) {
                Ok(v) => v,
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(2);
                }
            };
            let wallet = engine.find_wallet_by_phone(&args.phone).await?;
            let mut cmd = CreditCmd::new(wallet.id, amount_minor, Utc::now()).note(args.note);
            if let Some(key) = args.idempotency_key {
                cmd = cmd.idempotency_key(key);
            }
            let tx = engine.credit(cmd).await?;
            println!(
                "credited {} to {} (txn {})",
                MoneyCents::new(amount_minor),
                args.phone,
                tx.id
            );
        }
        Command::Wallet(WalletArgs {
            command: WalletCommand::Transfer(args),
        }) => {
            let amount_minor = match parse_amount(&args.amount) {
                Ok(v) => v,
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(2);
                }
            };
            let sender = engine.find_wallet_by_phone(&args.from).await?;
            let receiver = engine.find_wallet_by_phone(&args.to).await?;
            let mut cmd =
                TransferCmd::new(sender.id, receiver.id, amount_minor, Utc::now()).note(args.note);
            if let Some(key) = args.idempotency_key {
                cmd = cmd.idempotency_key(key);
            }
            let tx = engine.transfer(cmd).await?;
            println!(
                "transferred {} from {} to {} (txn {})",
                MoneyCents::new(amount_minor),
                args.from,
                args.to,
                tx.id
            );
        }
        Command::Wallet(WalletArgs {
            command: WalletCommand::History(args),
        }) => {
            let wallet = engine.find_wallet_by_phone(&args.phone).await?;
            let transactions = engine
                .history_of(wallet.id, args.limit, &HistoryFilter::default())
                .await?;
            print_history(&wallet, &transactions);
        }
        Command::Ledger(LedgerArgs {
            command: LedgerCommand::Verify,
        }) => {
            let drift = engine.verify_balances().await?;
            if drift.is_empty() {
                println!("ledger consistent: no drift detected");
            } else {
                for d in &drift {
                    println!(
                        "wallet {}: stored {}, ledger {}",
                        d.wallet_id,
                        MoneyCents::new(d.stored_minor),
                        MoneyCents::new(d.computed_minor)
                    );
                }
                std::process::exit(1);
            }
        }
        Command::Ledger(LedgerArgs {
            command: LedgerCommand::Recompute,
        }) => {
            let repaired = engine.recompute_balances().await?;
            if repaired.is_empty() {
                println!("ledger consistent: nothing to repair");
            } else {
                for d in &repaired {
                    println!(
                        "wallet {}: {} -> {}",
                        d.wallet_id,
                        MoneyCents::new(d.stored_minor),
                        MoneyCents::new(d.computed_minor)
                    );
                }
                println!("repaired {} wallet(s)", repaired.len());
            }
        }
    }

    Ok(())
}
