//! Stakechain node
//!
//! Runs the data, network and consensus services of one peer in a single
//! process, and doubles as a client for submitting transactions and reading
//! balances.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use parking_lot::Mutex;
use stakechain_consensus::{ConsensusServiceBuilder, StaticGenesis};
use stakechain_ledger::{
    wire::{self, Envelope, SubmissionAck},
    PeerAccount, Submission, TransactionCode, INITIAL_BALANCE,
};
use stakechain_network::{
    Fanout, FanoutConfig, NetworkService, NetworkValidator, PeerDirectory, RemotePeerDirectory,
    StaticPeerDirectory,
};
use stakechain_store::{
    ChainBackend, ChainStore, ChainStoreConfig, DataService, LocalChainBackend, RemoteChainBackend,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::NodeConfig;

/// Stakechain permissioned blockchain node
#[derive(Parser, Debug)]
#[command(name = "stakechain")]
#[command(about = "Minimal permissioned blockchain with stake-elected validators", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the data, network and consensus services
    Run(RunArgs),
    /// Submit a transaction to a consensus endpoint
    Submit(SubmitArgs),
    /// Compute a peer's balance from the persisted chain
    Balance(BalanceArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured peer id
    #[arg(long)]
    peer_id: Option<String>,

    /// Override the chunk directory
    #[arg(long)]
    chain_dir: Option<PathBuf>,

    #[arg(long)]
    data_addr: Option<String>,

    #[arg(long)]
    network_addr: Option<String>,

    #[arg(long)]
    consensus_addr: Option<String>,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    /// Consensus endpoint
    #[arg(long, default_value = "127.0.0.1:7300")]
    addr: String,

    /// Submitting peer
    #[arg(long)]
    peer_id: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "5")]
    timeout_secs: u64,

    #[command(subcommand)]
    kind: SubmitKind,
}

#[derive(Subcommand, Debug)]
enum SubmitKind {
    /// Bid to become a validator for the next block
    HoldStake {
        #[arg(long)]
        stake: u64,
        #[arg(long)]
        ip: String,
        #[arg(long)]
        port: u16,
    },
    Upload {
        #[arg(long)]
        filename: String,
    },
    Download {
        #[arg(long)]
        filename: String,
        #[arg(long)]
        receiver: String,
    },
}

#[derive(Args, Debug)]
struct BalanceArgs {
    /// Data-layer endpoint
    #[arg(long, default_value = "127.0.0.1:7100")]
    data_addr: String,

    #[arg(long)]
    peer_id: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "5")]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Run(args) => run_node(args).await,
        Command::Submit(args) => submit(args).await,
        Command::Balance(args) => balance(args).await,
    }
}

fn load_config(args: &RunArgs) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };

    if let Some(peer_id) = &args.peer_id {
        config.peer_id = peer_id.clone();
    }
    if let Some(dir) = &args.chain_dir {
        config.chain_dir = dir.clone();
    }
    if let Some(addr) = &args.data_addr {
        config.data_addr = addr.clone();
    }
    if let Some(addr) = &args.network_addr {
        config.network_addr = addr.clone();
    }
    if let Some(addr) = &args.consensus_addr {
        config.consensus_addr = addr.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Run all three services until Ctrl+C
async fn run_node(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;

    tracing::info!("Starting stakechain node {}", config.peer_id);
    tracing::info!("  Advertised IP: {}", config.ip);
    tracing::info!("  Data service: {}", config.data_addr);
    tracing::info!("  Network service: {}", config.network_addr);
    tracing::info!("  Consensus service: {}", config.consensus_addr);
    tracing::info!("  Chain directory: {:?}", config.chain_dir);

    // Chain store
    let store = Arc::new(Mutex::new(ChainStore::open(
        ChainStoreConfig::new(&config.chain_dir).with_chunk_size_limit(config.chunk_size_limit),
    )?));
    let backend: Arc<dyn ChainBackend> = Arc::new(LocalChainBackend::new(store.clone()));
    let data = Arc::new(DataService::new(store.clone(), config.idle_timeout()));

    // Network validator and fan-out
    let directory: Arc<dyn PeerDirectory> = match &config.directory_addr {
        Some(addr) => {
            tracing::info!("  Peer directory: {}", addr);
            Arc::new(RemotePeerDirectory::new(addr.clone(), config.request_timeout()))
        }
        None => {
            tracing::info!("  Static peers: {}", config.peers.len());
            Arc::new(StaticPeerDirectory::new(config.peers.clone()))
        }
    };
    let fanout = Arc::new(Fanout::new(
        FanoutConfig {
            peer_id: config.peer_id.clone(),
            shard_size: config.shard_size,
            max_outbound: config.max_outbound,
            request_timeout: config.request_timeout(),
        },
        directory,
    ));
    let validator = Arc::new(NetworkValidator::new(backend.clone(), fanout.clone()));
    validator.sync_tip().await?;

    // Consensus gossips its own blocks and follows the ones peers propose
    let consensus = Arc::new(
        ConsensusServiceBuilder::new(config.peer_id.clone())
            .idle_timeout(config.idle_timeout())
            .request_timeout(config.request_timeout())
            .max_inflight_messages(config.max_inflight_messages)
            .fanout(fanout)
            .build(backend.clone()),
    );
    validator.set_listener(consensus.clone());
    let network = Arc::new(NetworkService::new(validator, config.idle_timeout()));
    let role = consensus
        .bootstrap(&StaticGenesis::new(config.genesis_validators.clone()))
        .await?;
    tracing::info!("Node role: {:?}", role);

    let data_addr = config.data_addr.clone();
    let data_server = tokio::spawn(async move {
        if let Err(e) = data.run(&data_addr).await {
            tracing::error!("Data service error: {}", e);
        }
    });

    let network_addr = config.network_addr.clone();
    let network_server = tokio::spawn(async move {
        if let Err(e) = network.run(&network_addr).await {
            tracing::error!("Network service error: {}", e);
        }
    });

    let consensus_addr = config.consensus_addr.clone();
    let consensus_ref = consensus.clone();
    let consensus_server = tokio::spawn(async move {
        if let Err(e) = consensus_ref.run(&consensus_addr).await {
            tracing::error!("Consensus service error: {}", e);
        }
    });

    tracing::info!("Node running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    if let Some(outcome) = consensus.wait_for_emission().await {
        tracing::info!("Last emission finished: {:?}", outcome);
    }
    let stats = consensus.stats();
    tracing::info!(
        "{} transactions staged, {} forwarded, {} blocks emitted",
        stats.transactions_staged,
        stats.transactions_forwarded,
        stats.blocks_emitted
    );

    data_server.abort();
    network_server.abort();
    consensus_server.abort();

    tracing::info!("Node stopped");
    Ok(())
}

/// Send one transaction and print the acknowledgement
async fn submit(args: SubmitArgs) -> Result<()> {
    let mut submission = Submission {
        peer_id: Some(args.peer_id),
        ..Default::default()
    };
    let code = match args.kind {
        SubmitKind::HoldStake { stake, ip, port } => {
            submission.stake = Some(stake);
            submission.ip = Some(ip);
            submission.port = Some(port);
            TransactionCode::HoldStake
        }
        SubmitKind::Upload { filename } => {
            submission.filename = Some(filename);
            TransactionCode::Upload
        }
        SubmitKind::Download { filename, receiver } => {
            submission.filename = Some(filename);
            submission.receiver = Some(receiver);
            TransactionCode::Download
        }
    };

    let envelope = Envelope::new(code.as_i64(), &submission)?;
    let ack: SubmissionAck = wire::request(
        &args.addr,
        &envelope,
        Duration::from_secs(args.timeout_secs),
    )
    .await?;

    tracing::debug!("Submitted {:?} to {}", code, args.addr);
    println!("{}", serde_json::to_string(&ack)?);
    Ok(())
}

/// Print the peer's balance over the chain served by a data service
async fn balance(args: BalanceArgs) -> Result<()> {
    let backend = RemoteChainBackend::new(args.data_addr, Duration::from_secs(args.timeout_secs));
    let chain = backend.chain().await?;
    let account = PeerAccount::collect(&chain, &args.peer_id);

    println!(
        "{}",
        serde_json::json!({
            "peer_id": args.peer_id,
            "balance": account.balance(),
            "initial_balance": INITIAL_BALANCE,
            "transactions": account.transactions,
            "total_reward": account.total_reward,
            "total_cost": account.total_cost,
            "total_fee": account.total_fee,
        })
    );
    Ok(())
}
