#![forbid(unsafe_code)]
//! Command-line front end for a local StakeLedger node

use clap::{Parser, Subcommand};
use stakeledger::amount::{format_amount, parse_amount};
use stakeledger::blockchain::{AcceptStatus, Block};
use stakeledger::config::load_config;
use stakeledger::crypto::Address;
use stakeledger::events::LedgerEvent;
use stakeledger::wallet::{FeePolicy, LockState, Recipient};
use stakeledger::{LedgerEngine, Verdict};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Creates the database and key store if missing and prints the tip
    Init,
    /// Shows the best chain tip
    Tip,
    /// Shows the wallet balance, or the balance of one address
    Balance {
        address: Option<Address>,
    },
    /// Draws a fresh receiving address from the key pool
    NewAddress,
    /// Encrypts the key store with a passphrase
    Encrypt,
    /// Changes the key store passphrase
    ChangePassphrase,
    /// Sends coins to an address
    Send {
        to: Address,
        /// Amount in coins, e.g. 1.25
        amount: String,
        /// Fee per kilobyte in coins
        #[arg(long, default_value = "0.0001")]
        fee_per_kb: String,
    },
    /// Imports a file of bincode-encoded blocks
    Import {
        file: PathBuf,
    },
    /// Writes the best chain to a file of bincode-encoded blocks
    Export {
        file: PathBuf,
    },
    /// Re-validates the whole best chain
    Verify,
    /// Searches for stake kernels and mints blocks until interrupted
    Mint {
        /// Delay between kernel searches, e.g. "16s"
        #[arg(long, default_value = "16s", value_parser = humantime::parse_duration)]
        interval: Duration,
        /// Stop after this many minted blocks
        #[arg(long)]
        count: Option<usize>,
    },
    /// Mines proof-of-work blocks (development networks)
    Mine {
        beneficiary: Address,
        #[arg(long, default_value_t = 1)]
        blocks: u64,
    },
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("stakeledger").join("config.toml"))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from("stakeledger.toml"))
}

fn now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn prompt_passphrase(prompt: &str) -> Result<String, Box<dyn std::error::Error>> {
    Ok(rpassword::prompt_password(prompt)?)
}

/// Prompts for the passphrase when the wallet is encrypted and unlocks it.
fn unlock_if_needed(engine: &LedgerEngine, staking_only: bool) -> Result<(), Box<dyn std::error::Error>> {
    if engine.wallet_lock_state() != LockState::Locked {
        return Ok(());
    }
    let passphrase = prompt_passphrase("Wallet passphrase: ")?;
    if staking_only {
        engine.unlock_wallet_for_staking(&passphrase, None)?;
    } else {
        engine.unlock_wallet(&passphrase, Some(Duration::from_secs(60)))?;
    }
    Ok(())
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            token.cancel();
        }
    });
}

fn print_tip(engine: &LedgerEngine) {
    let tip = engine.get_chain_tip();
    let time = engine
        .with_ledger(|ledger| ledger.chain.block(&tip.hash).map(|b| b.header.timestamp))
        .and_then(|ts| chrono::DateTime::from_timestamp(ts as i64, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    println!("Height:     {}", tip.height);
    println!("Hash:       {}", hex::encode(tip.hash));
    println!("Score:      {}", tip.cumulative_score);
    println!("Timestamp:  {}", time);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_config(&config_path)?;
    info!("using configuration {}", config_path.display());
    let engine = Arc::new(LedgerEngine::open(config)?);

    match cli.command {
        Commands::Init | Commands::Tip => print_tip(&engine),
        Commands::Balance { address } => {
            let balance = engine.get_balance(address.as_ref());
            println!("Confirmed:   {}", format_amount(balance.confirmed));
            println!("Unconfirmed: {}", format_amount(balance.unconfirmed));
            println!("Immature:    {}", format_amount(balance.immature));
            println!("Staked:      {}", format_amount(balance.staked));
            println!("Total:       {}", format_amount(balance.total()));
        }
        Commands::NewAddress => {
            unlock_if_needed(&engine, false)?;
            println!("{}", engine.new_address()?);
        }
        Commands::Encrypt => {
            let passphrase = prompt_passphrase("New passphrase: ")?;
            if prompt_passphrase("Repeat passphrase: ")? != passphrase {
                return Err("passphrases do not match".into());
            }
            let warning = engine.encrypt_wallet(&passphrase)?;
            println!("{}", warning.message);
        }
        Commands::ChangePassphrase => {
            let old = prompt_passphrase("Current passphrase: ")?;
            let new = prompt_passphrase("New passphrase: ")?;
            engine.change_wallet_passphrase(&old, &new)?;
            println!("Passphrase changed");
        }
        Commands::Send { to, amount, fee_per_kb } => {
            let amount = parse_amount(&amount)?;
            let rate = parse_amount(&fee_per_kb)?;
            unlock_if_needed(&engine, false)?;
            let recipients = [Recipient { address: to, amount }];
            match engine.send(&recipients, FeePolicy::PerKilobyte(rate))? {
                Verdict::Accepted(txid) => println!("Submitted {}", hex::encode(txid)),
                Verdict::Rejected(rejection) => return Err(rejection.to_string().into()),
            }
            if engine.wallet_lock_state() != LockState::Unencrypted {
                engine.lock_wallet()?;
            }
        }
        Commands::Import { file } => {
            let bytes = std::fs::read(&file)?;
            let blocks: Vec<Block> = bincode::deserialize(&bytes)?;
            let token = CancellationToken::new();
            cancel_on_interrupt(token.clone());
            let worker = Arc::clone(&engine);
            let summary = tokio::task::spawn_blocking(move || worker.import_blocks(blocks, &token)).await??;
            println!(
                "Imported {} blocks ({} orphaned, {} rejected){}",
                summary.accepted,
                summary.orphaned,
                summary.rejected,
                if summary.cancelled { ", cancelled" } else { "" }
            );
            print_tip(&engine);
        }
        Commands::Export { file } => {
            let blocks: Vec<Block> = engine.with_ledger(|ledger| ledger.chain.best_chain_blocks().cloned().collect());
            std::fs::write(&file, bincode::serialize(&blocks)?)?;
            println!("Exported {} blocks to {}", blocks.len(), file.display());
        }
        Commands::Verify => {
            let token = CancellationToken::new();
            cancel_on_interrupt(token.clone());
            let worker = Arc::clone(&engine);
            let report = tokio::task::spawn_blocking(move || worker.verify_chain(&token)).await??;
            println!(
                "Chain verified up to height {} ({} unspent outputs)",
                report.height, report.utxos
            );
        }
        Commands::Mint { interval, count } => {
            unlock_if_needed(&engine, true)?;
            let token = CancellationToken::new();
            cancel_on_interrupt(token.clone());

            let mut events = engine.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    if let LedgerEvent::NewBlock { height, hash } = event {
                        println!("New block {} at height {}", hex::encode(hash), height);
                    }
                }
            });

            let mut minted = 0;
            while !token.is_cancelled() && count.map_or(true, |c| minted < c) {
                let worker = Arc::clone(&engine);
                let result = tokio::task::spawn_blocking(move || worker.mint_block(now())).await??;
                match result {
                    Some(Verdict::Accepted(acceptance)) if acceptance.status != AcceptStatus::Orphaned => {
                        minted += 1;
                        info!("minted block at height {}", acceptance.height);
                    }
                    Some(Verdict::Rejected(rejection)) => warn!("minted block rejected: {}", rejection),
                    _ => {}
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = token.cancelled() => {}
                }
            }
            println!("Minted {} blocks", minted);
        }
        Commands::Mine { beneficiary, blocks } => {
            for _ in 0..blocks {
                let worker = Arc::clone(&engine);
                let verdict =
                    tokio::task::spawn_blocking(move || worker.mine_work_block(beneficiary, now())).await??;
                match verdict {
                    Verdict::Accepted(acceptance) => println!(
                        "Mined block {} at height {}",
                        hex::encode(acceptance.hash),
                        acceptance.height
                    ),
                    Verdict::Rejected(rejection) => return Err(rejection.to_string().into()),
                }
            }
        }
    }

    Ok(())
}
