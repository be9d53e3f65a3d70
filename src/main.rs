use chain_state_sync::authority::{AuthorityError, HttpAuthorityClient};
use chain_state_sync::chain::{ChainId, Wallet};
use chain_state_sync::config::{
    ConfigError, DEFAULT_DERIVATION_PATH, NodeConfig, Preferences, default_preferences_path,
};
use chain_state_sync::nftstorage::{NftStorageClient, NftStorageError};
use chain_state_sync::node::NodeServices;
use chain_state_sync::rpc::messages::*;
use chain_state_sync::rpc::{self, RpcClient, RpcError, RpcMethod, RpcServer};
use chain_state_sync::storage::{Store, StoreError};
use chain_state_sync::sync::{SyncError, run_supervised};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about = "Local replica node for an authority-run chain")]
struct Cli {
    /// Root directory for the node database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    chain_id: Option<ChainId>,
    /// Base URL of the authority
    #[arg(long, global = true)]
    authority_address: Option<String>,
    /// Base URL of the NFT metadata gateway
    #[arg(long, global = true)]
    nft_storage_address: Option<String>,
    /// Address the daemon's RPC socket listens on
    #[arg(long, global = true)]
    rpc_address: Option<String>,
    /// Preferences file providing defaults for the flags above
    #[arg(long, global = true)]
    preferences: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync manager and the RPC server
    Daemon,
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
    Coins {
        #[command(subcommand)]
        command: CoinsCommands,
    },
    Tokens {
        #[command(subcommand)]
        command: TokensCommands,
    },
    Blockdata {
        #[command(subcommand)]
        command: BlockdataCommands,
    },
    Transactions {
        #[command(subcommand)]
        command: TransactionsCommands,
    },
    Wallet {
        #[command(subcommand)]
        command: WalletCommands,
    },
    /// Show whether a sync pass is running and the local tip
    Status,
    Preferences {
        #[command(subcommand)]
        command: PreferencesCommands,
    },
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Create a wallet and print its recovery phrase
    New {
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "")]
        label: String,
    },
    Get {
        address: String,
    },
    /// Accounts of all local wallets
    List,
}

#[derive(Subcommand)]
enum CoinsCommands {
    Transfer {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        value: u64,
        #[arg(long, default_value = "")]
        data: String,
        #[command(flatten)]
        credential: CredentialOpts,
    },
}

#[derive(Subcommand)]
enum TokensCommands {
    Get {
        token_id: u64,
    },
    /// Tokens owned by an address
    List {
        owner: String,
    },
    Transfer {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        token_id: u64,
        #[arg(long, default_value = "")]
        data: String,
        #[command(flatten)]
        credential: CredentialOpts,
    },
    Burn {
        #[arg(long)]
        from: String,
        #[arg(long)]
        token_id: u64,
        #[arg(long, default_value = "")]
        data: String,
        #[command(flatten)]
        credential: CredentialOpts,
    },
    /// NFT metadata of a token
    Nft {
        token_id: u64,
    },
}

#[derive(Subcommand)]
enum BlockdataCommands {
    Get {
        hash: String,
    },
    /// Block holding a transaction with this timestamp (Unix ms)
    ByTimestamp {
        timestamp: i64,
    },
}

#[derive(Subcommand)]
enum TransactionsCommands {
    /// Confirmed transactions sent or received by an address
    List {
        address: String,
    },
}

#[derive(Subcommand)]
enum WalletCommands {
    /// Print or write the encrypted wallet record
    Export {
        address: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import an exported wallet record from a JSON file
    Import {
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum PreferencesCommands {
    /// Persist the given global flags as defaults
    Save,
}

#[derive(Args)]
struct CredentialOpts {
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    mnemonic: Option<String>,
    #[arg(long, default_value = DEFAULT_DERIVATION_PATH)]
    derivation_path: String,
}

impl CredentialOpts {
    fn into_args(self) -> Result<CredentialArgs, CliError> {
        match (self.password, self.mnemonic) {
            (Some(password), None) => Ok(CredentialArgs::Password { password }),
            (None, Some(phrase)) => Ok(CredentialArgs::Mnemonic {
                phrase,
                derivation_path: self.derivation_path,
            }),
            _ => Err(CliError::UsageError(
                "pass exactly one of --password or --mnemonic".into(),
            )),
        }
    }
}

#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Authority error: {0}")]
    AuthorityError(#[from] AuthorityError),

    #[error("NFT storage error: {0}")]
    NftStorageError(#[from] NftStorageError),

    #[error("RPC error: {0}")]
    RpcError(#[from] RpcError),

    #[error("Sync error: {0}")]
    SyncError(#[from] SyncError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task error: {0}")]
    TaskError(#[from] tokio::task::JoinError),

    #[error("{0}")]
    UsageError(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::time())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let preferences_path = cli
        .preferences
        .clone()
        .unwrap_or_else(default_preferences_path);
    let flags = Preferences {
        data_dir: cli.data_dir.clone(),
        chain_id: cli.chain_id,
        authority_address: cli.authority_address.clone(),
        nft_storage_address: cli.nft_storage_address.clone(),
        rpc_address: cli.rpc_address.clone(),
    };
    let preferences = Preferences::load(&preferences_path)?.overlay(flags);
    let config = NodeConfig::from_preferences(&preferences);

    match cli.command {
        Commands::Daemon => run_daemon(config).await,
        Commands::Preferences {
            command: PreferencesCommands::Save,
        } => Ok(preferences.save(&preferences_path)?),
        Commands::Account { command } => match command {
            AccountCommands::New { password, label } => {
                let reply = call(&config, CreateAccountArgs { password, label }).await?;
                println!("address:  {}", reply.address);
                println!("mnemonic: {}", reply.mnemonic);
                println!("Write the mnemonic down; it is the only way to recover this wallet.");
                Ok(())
            }
            AccountCommands::Get { address } => {
                print_json(&call(&config, GetAccountArgs { address }).await?.account)
            }
            AccountCommands::List => print_json(
                &call(&config, AccountListingByLocalWalletsArgs::default())
                    .await?
                    .accounts,
            ),
        },
        Commands::Coins {
            command:
                CoinsCommands::Transfer {
                    from,
                    to,
                    value,
                    data,
                    credential,
                },
        } => {
            let args = CoinTransferArgs {
                from,
                to,
                value,
                data,
                credential: credential.into_args()?,
            };
            print_json(&call(&config, args).await?.signed_transaction)
        }
        Commands::Tokens { command } => match command {
            TokensCommands::Get { token_id } => {
                print_json(&call(&config, GetTokenArgs { token_id }).await?.token)
            }
            TokensCommands::List { owner } => print_json(
                &call(&config, ListTokensByOwnerAddressArgs { address: owner }).await?,
            ),
            TokensCommands::Transfer {
                from,
                to,
                token_id,
                data,
                credential,
            } => {
                let args = TokenTransferArgs {
                    from,
                    to,
                    token_id,
                    data,
                    credential: credential.into_args()?,
                };
                print_json(&call(&config, args).await?.signed_transaction)
            }
            TokensCommands::Burn {
                from,
                token_id,
                data,
                credential,
            } => {
                let args = TokenBurnArgs {
                    from,
                    token_id,
                    data,
                    credential: credential.into_args()?,
                };
                print_json(&call(&config, args).await?.signed_transaction)
            }
            TokensCommands::Nft { token_id } => {
                print_json(&call(&config, GetNonFungibleTokenArgs { token_id }).await?.nft)
            }
        },
        Commands::Blockdata { command } => match command {
            BlockdataCommands::Get { hash } => {
                print_json(&call(&config, GetBlockDataByHashArgs { hash }).await?.block_data)
            }
            BlockdataCommands::ByTimestamp { timestamp } => print_json(
                &call(&config, GetBlockDataByTransactionTimestampArgs { timestamp })
                    .await?
                    .block_data,
            ),
        },
        Commands::Transactions {
            command: TransactionsCommands::List { address },
        } => print_json(
            &call(&config, ListBlockTransactionsByAddressArgs { address })
                .await?
                .transactions,
        ),
        Commands::Wallet { command } => match command {
            WalletCommands::Export { address, out } => {
                let wallet = call(&config, ExportWalletArgs { address }).await?.wallet;
                match out {
                    Some(path) => {
                        std::fs::write(&path, serde_json::to_string_pretty(&wallet)?)?;
                        info!("Wrote wallet {} to {:?}", wallet.address, path);
                        Ok(())
                    }
                    None => print_json(&wallet),
                }
            }
            WalletCommands::Import { file } => {
                let wallet: Wallet = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
                print_json(&call(&config, ImportWalletArgs { wallet }).await?.wallet)
            }
        },
        Commands::Status => print_json(&call(&config, GetSyncStatusArgs::default()).await?),
    }
}

async fn call<M: RpcMethod>(config: &NodeConfig, args: M) -> Result<M::Reply, CliError> {
    let mut client = RpcClient::connect(&config.rpc_address).await?;
    Ok(client.call(args).await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_daemon(config: NodeConfig) -> Result<(), CliError> {
    info!(
        "Starting node for chain {} with data in {:?}",
        config.chain_id, config.data_dir
    );
    let store = Store::open(&config.data_dir)?;
    let authority = Arc::new(HttpAuthorityClient::new(
        &config.authority_address,
        config.request_timeout,
    )?);
    let nft_storage = NftStorageClient::new(&config.nft_storage_address, config.request_timeout)?;
    let services = Arc::new(NodeServices::new(
        store.clone(),
        authority.clone(),
        nft_storage,
        &config,
    ));

    let listener = rpc::bind(&config.rpc_address).await?;
    let server = RpcServer::new(services);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let rpc_cancel = cancel.clone();
    let rpc_task = tokio::spawn(async move { server.serve(listener, rpc_cancel).await });

    let sync_result = run_supervised(authority, store.clone(), config, cancel.clone()).await;
    cancel.cancel();
    let rpc_result = rpc_task.await?;
    store.flush()?;

    sync_result?;
    rpc_result?;
    info!("Node stopped");
    Ok(())
}
