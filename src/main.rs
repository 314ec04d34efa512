//! Launchpad pipeline operator CLI
//!
//! Submits already signed transactions through the endpoint pool and inspects
//! bundles on the relay, using the same configuration as the library.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use launchpad_pipeline::bundle::{BundleRelayClient, BundleStatus, BundleStatusPoller};
use launchpad_pipeline::config::{LoggingConfig, PipelineConfig};
use launchpad_pipeline::metrics::metrics;
use launchpad_pipeline::rpc::{EndpointPool, SolanaLedgerClient};
use launchpad_pipeline::submit::TransactionPipeline;
use launchpad_pipeline::types::{Deadline, SignedTransaction};
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use base64::prelude::*;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "PIPELINE_CONFIG")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Overall time budget for the command, in seconds
    #[arg(long, default_value = "90")]
    deadline_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a fully signed transaction and wait for confirmation
    Submit {
        /// File holding the base64 serialized transaction
        #[arg(long)]
        file: String,

        /// Last block height at which the transaction's blockhash is valid
        #[arg(long)]
        last_valid_block_height: Option<u64>,
    },

    /// Query the relay for a bundle's status
    BundleStatus {
        #[arg(long)]
        id: String,

        /// Poll until the bundle reaches a terminal status
        #[arg(long)]
        wait: bool,
    },

    /// List the relay's tip accounts
    TipAccounts,

    /// Print process metrics in the prometheus text format
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = PipelineConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;
    init_logging(&config.logging, args.verbose)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Launchpad pipeline");

    let deadline = Deadline::after(Duration::from_secs(args.deadline_secs));

    match args.command {
        Command::Submit {
            file,
            last_valid_block_height,
        } => submit(&config, &file, last_valid_block_height, deadline).await,
        Command::BundleStatus { id, wait } => bundle_status(&config, &id, wait, deadline).await,
        Command::TipAccounts => {
            let relay = relay_client(&config)?;
            for account in relay.get_tip_accounts(deadline).await? {
                println!("{}", account);
            }
            Ok(())
        }
        Command::Metrics => {
            print!("{}", metrics().gather_text());
            Ok(())
        }
    }
}

/// Initialize logging subsystem
fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        "launchpad_pipeline=debug,info".to_string()
    } else {
        logging.level.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    }
    .context("Failed to install tracing subscriber")?;

    Ok(())
}

fn relay_client(config: &PipelineConfig) -> Result<BundleRelayClient> {
    if config.relay.endpoints.is_empty() {
        bail!("No relay endpoints configured (set relay.endpoints or RELAY_ENDPOINTS)");
    }
    BundleRelayClient::from_config(&config.relay, &config.bundle)
        .context("Failed to create relay client")
}

async fn submit(
    config: &PipelineConfig,
    file: &str,
    last_valid_block_height: Option<u64>,
    deadline: Deadline,
) -> Result<()> {
    let encoded = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read transaction file {}", file))?;
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .context("Transaction file is not valid base64")?;
    let tx: VersionedTransaction =
        bincode::deserialize(&bytes).context("Transaction file does not hold a transaction")?;

    let signed = SignedTransaction::new(tx);
    if !signed.is_fully_signed() {
        bail!("Transaction is missing signatures from {:?}", signed.missing_signers());
    }

    let pool = Arc::new(EndpointPool::from_config(&config.rpc));
    let client = Arc::new(SolanaLedgerClient::new(config.rpc.request_timeout()));
    let pipeline = TransactionPipeline::new(pool, client, config);

    let result = pipeline
        .submit_and_confirm(&signed, last_valid_block_height, deadline)
        .await
        .with_context(|| format!("Submission of {} failed", signed.signature()))?;

    info!(signature = %result.signature, slot = ?result.slot, "Confirmed");
    println!("{}", result.signature);
    Ok(())
}

async fn bundle_status(config: &PipelineConfig, id: &str, wait: bool, deadline: Deadline) -> Result<()> {
    let relay = relay_client(config)?;

    if wait {
        let outcome = BundleStatusPoller::from_config(&config.bundle_status)
            .poll(&relay, id, deadline)
            .await;
        if outcome.status == BundleStatus::Timeout {
            warn!(bundle_id = %id, polls = outcome.polls, "Bundle unresolved");
        }
        match outcome.landed_slot {
            Some(slot) => println!("{} (slot {})", outcome.status, slot),
            None => println!("{}", outcome.status),
        }
        return Ok(());
    }

    match relay.get_inflight_status(id, deadline).await? {
        Some(status) => {
            let status_name = BundleStatus::from(status.status);
            match status.landed_slot {
                Some(slot) => println!("{} (slot {})", status_name, slot),
                None => println!("{}", status_name),
            }
        }
        None => println!("unknown"),
    }
    Ok(())
}
