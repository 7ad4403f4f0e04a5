use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use alloy_primitives::Address;
use dogenado_wallet::{
    format_amount, parse_amount, EvmRpcClient, Identity, Note, RpcConfig, WalletService,
    WalletStore,
};

#[derive(Parser)]
#[command(name = "dogenado-wallet", version, about = "dogenado shielded wallet tooling")]
struct Cli {
    /// EVM JSON-RPC endpoint.
    #[arg(long, env = "DOGENADO_RPC", default_value = "http://127.0.0.1:8545")]
    endpoint: String,

    /// Pool contract address.
    #[arg(long, env = "DOGENADO_POOL")]
    pool: String,

    /// Public wallet address the encrypted store is keyed by.
    #[arg(long, env = "DOGENADO_WALLET")]
    wallet: String,

    /// Directory holding encrypted wallet files.
    #[arg(long, env = "DOGENADO_DATA_DIR", default_value = "dogenado-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a fresh shielded identity and encrypted wallet file.
    Init,
    /// Print the shielded address.
    Address,
    /// Export the spending key as 64-hex.
    ExportKey,
    /// Restore a wallet from a 64-hex spending key.
    ImportKey {
        #[arg(long)]
        key: String,
    },
    /// List stored notes.
    Notes,
    /// Print the shareable encoding of one note.
    EncodeNote {
        #[arg(long)]
        index: usize,
    },
    /// Import a shareable `dogenado-note-v1-` string.
    ImportNote {
        #[arg(long)]
        note: String,
    },
    /// Run one scan pass over recent transfer events.
    Scan,
    /// Show the confirmed shielded balance for a token.
    Balance {
        #[arg(long, default_value = "DOGE")]
        token: String,
    },
    /// Parse a human amount into the token's smallest unit.
    ParseAmount {
        #[arg(long)]
        amount: String,
        #[arg(long, default_value_t = 18)]
        decimals: u8,
    },
}

fn read_passphrase() -> Result<String> {
    if let Ok(passphrase) = std::env::var("DOGENADO_PASSPHRASE") {
        return Ok(passphrase);
    }
    rpassword::prompt_password("Wallet passphrase: ").context("reading passphrase")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let wallet_address: Address = cli
        .wallet
        .parse()
        .map_err(|_| anyhow!("invalid wallet address {:?}", cli.wallet))?;
    let pool: Address = cli
        .pool
        .parse()
        .map_err(|_| anyhow!("invalid pool address {:?}", cli.pool))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli, wallet_address, pool))
}

async fn run(cli: Cli, wallet_address: Address, pool: Address) -> Result<()> {
    match cli.command {
        Commands::Init => {
            let passphrase = read_passphrase()?;
            let store = WalletStore::create(&cli.data_dir, wallet_address, &passphrase)?;
            let identity = Identity::generate()?;
            store.set_identity(identity.to_stored())?;
            println!("{}", identity.address_string());
            Ok(())
        }
        Commands::ImportKey { key } => {
            let passphrase = read_passphrase()?;
            let store = WalletStore::create(&cli.data_dir, wallet_address, &passphrase)?;
            let identity = Identity::import_spending_key(&key)?;
            store.set_identity(identity.to_stored())?;
            println!("{}", identity.address_string());
            Ok(())
        }
        Commands::ParseAmount { amount, decimals } => {
            println!("{}", parse_amount(&amount, decimals)?);
            Ok(())
        }
        command => {
            let passphrase = read_passphrase()?;
            let store = Arc::new(WalletStore::open(
                &cli.data_dir,
                wallet_address,
                &passphrase,
            )?);
            let identity = Identity::from_stored(
                &store
                    .identity()?
                    .ok_or_else(|| anyhow!("wallet file holds no identity; run init first"))?,
            )?;
            let adapter = Arc::new(EvmRpcClient::new(RpcConfig::with_endpoint(&cli.endpoint))?);
            let mut service =
                WalletService::new(identity, adapter, pool).with_store(store)?;

            match command {
                Commands::Address => {
                    println!("{}", service.identity().address_string());
                }
                Commands::ExportKey => {
                    println!("{}", service.identity().export_spending_key());
                }
                Commands::Notes => {
                    for (index, note) in service.notes().iter().enumerate() {
                        let status = match note.leaf_index {
                            Some(leaf) => format!("leaf {leaf}"),
                            None => "unconfirmed".to_string(),
                        };
                        println!(
                            "#{index} {} {} ({status})",
                            format_amount(note.amount, note.token.decimals),
                            note.token.symbol,
                        );
                    }
                }
                Commands::EncodeNote { index } => {
                    let note = service
                        .notes()
                        .get(index)
                        .ok_or_else(|| anyhow!("no note at index {index}"))?;
                    println!("{}", note.encode_shareable()?);
                }
                Commands::ImportNote { note } => {
                    let parsed = Note::decode_shareable(&note)?;
                    let adopted = service.import_received_note(parsed)?;
                    println!("{}", if adopted { "imported" } else { "already known" });
                }
                Commands::Scan => {
                    let summary = service.scan_events().await?;
                    println!(
                        "scan: {:?}, imported {} note(s)",
                        summary.outcome, summary.imported
                    );
                }
                Commands::Balance { token } => {
                    let registry_token = service
                        .tokens()
                        .get(&token)
                        .ok_or_else(|| anyhow!("unknown token {token}"))?;
                    println!(
                        "{} {}",
                        format_amount(service.shielded_balance(&token), registry_token.decimals),
                        registry_token.symbol,
                    );
                }
                Commands::Init | Commands::ImportKey { .. } | Commands::ParseAmount { .. } => {
                    unreachable!("handled above")
                }
            }
            Ok(())
        }
    }
}
