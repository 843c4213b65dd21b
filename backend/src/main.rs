use clap::{Parser, Subcommand};
use exchange::api::{self, ProviderState};
use exchange::config::{load_config, Config};
use exchange::dataset::Dataset;
use exchange::db::{self, SqliteLedger};
use exchange::models::{Amount, ErrorReport, QueryMode};
use exchange::provider::HttpProviderClient;
use exchange::session::{self, SessionContext};
use exchange::settlement::{self, Reconciliation};
use exchange::state::{ExchangeState, DEFAULT_LEASE_TTL};
use exchange::ExchangeError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "exchange")]
#[command(about = "Buy aggregate statistics over private provider datasets")]
#[command(version)]
struct Cli {
    /// Exchange configuration file
    #[arg(long, global = true, env = "EXCHANGE_CONFIG", default_value = "exchange.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one purchase session for a condition
    Query {
        condition: String,
        /// Combine provider answers under homomorphic encryption
        #[arg(long)]
        encrypted: bool,
    },
    /// Serve a provider dataset over HTTP
    ServeProvider {
        #[arg(long, env = "PROVIDER_NAME", default_value = "provider")]
        name: String,
        #[arg(long, env = "PROVIDER_ADDR", default_value = "127.0.0.1:8001")]
        addr: String,
        /// JSON file of records; synthetic records are generated when omitted
        #[arg(long)]
        dataset: Option<PathBuf>,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        #[arg(long, default_value_t = 1_000)]
        records: usize,
    },
    /// Credit tokens to a ledger account
    Fund { holder: String, amount: u64 },
    /// Print all ledger balances
    Balances,
    /// Finish the payments of an interrupted or failed session
    Reconcile { session_id: Uuid },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(code = e.code(), error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode, ExchangeError> {
    match cli.command {
        Commands::Query { condition, encrypted } => {
            let config = read_config(&cli.config)?;
            query(config, &condition, encrypted).await
        }
        Commands::ServeProvider {
            name,
            addr,
            dataset,
            seed,
            records,
        } => serve_provider(name, &addr, dataset.as_deref(), seed, records).await,
        Commands::Fund { holder, amount } => {
            let ledger = open_ledger(&read_config(&cli.config)?).await?;
            let balance = ledger.credit(&holder, Amount::from(amount)).await?;
            info!(%holder, amount, "account funded");
            print_json(&BTreeMap::from([(holder, balance.to_string())]))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Balances => {
            let ledger = open_ledger(&read_config(&cli.config)?).await?;
            let balances: BTreeMap<String, String> = ledger
                .balances()
                .await?
                .into_iter()
                .map(|(holder, amount)| (holder, amount.to_string()))
                .collect();
            print_json(&balances)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reconcile { session_id } => {
            let ledger = open_ledger(&read_config(&cli.config)?).await?;
            reconcile(&ledger, session_id).await
        }
    }
}

fn read_config(path: &Path) -> Result<Config, ExchangeError> {
    load_config(path).map_err(|e| ExchangeError::Config(e.to_string()))
}

async fn open_ledger(config: &Config) -> Result<SqliteLedger, ExchangeError> {
    if let Some(dir) = config.ledger.database.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| ExchangeError::Internal(format!("create {}: {e}", dir.display())))?;
    }

    let db = db::connect(&config.ledger.database_url()).await?;
    db::init_schema(&db).await?;
    Ok(SqliteLedger::new(db))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, ExchangeError> {
    serde_json::to_string_pretty(value).map_err(|e| ExchangeError::Internal(format!("serialize: {e}")))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ExchangeError> {
    println!("{}", to_json(value)?);
    Ok(())
}

async fn query(config: Config, condition: &str, encrypted: bool) -> Result<ExitCode, ExchangeError> {
    let mode = if encrypted { QueryMode::Encrypted } else { config.exchange.mode };
    let ctx = SessionContext::from_config(&config, condition, mode)?;
    let ledger = open_ledger(&config).await?;

    db::insert_session(ledger.db(), ctx.session_id, &ctx.requestor, &ctx.condition).await?;

    let shared = Arc::new(ledger.clone());
    let state = ExchangeState::new(shared.clone(), Arc::new(HttpProviderClient::new()))
        .with_leases(shared, DEFAULT_LEASE_TTL);

    let outcome = tokio::select! {
        result = state.run_session(&ctx) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let (status, json, code) = match outcome {
        Some(Ok(report)) => ("settled", to_json(&report)?, ExitCode::SUCCESS),
        Some(Err(err)) => {
            let report = ErrorReport::new(ctx.session_id, &ctx.requestor, &ctx.condition, &err);
            ("aborted", to_json(&report)?, ExitCode::FAILURE)
        }
        None => {
            warn!(session_id = %ctx.session_id, "session interrupted");
            state.release_lease(&ctx).await;
            let report = session::interrupted_report(&ctx, &ledger).await;
            ("interrupted", to_json(&report)?, ExitCode::FAILURE)
        }
    };

    db::finish_session(ledger.db(), ctx.session_id, status, &json).await?;
    println!("{json}");
    Ok(code)
}

async fn reconcile(ledger: &SqliteLedger, session_id: Uuid) -> Result<ExitCode, ExchangeError> {
    let Some(entry) = db::get_session(ledger.db(), session_id).await? else {
        return Err(ExchangeError::Config(format!("unknown session {session_id}")));
    };

    match settlement::reconcile_session(ledger, session_id, &entry.requestor).await {
        Ok(Reconciliation::Completed(settlements)) => {
            info!(%session_id, paid = settlements.len(), "session reconciled");
            let json = to_json(&settlements)?;
            db::finish_session(ledger.db(), session_id, "reconciled", &json).await?;
            println!("{json}");
            Ok(ExitCode::SUCCESS)
        }
        Ok(outcome) => {
            print_json(&outcome.settlements())?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            let report = ErrorReport::new(session_id, &entry.requestor, &entry.condition, &err);
            let json = to_json(&report)?;
            db::finish_session(ledger.db(), session_id, "aborted", &json).await?;
            println!("{json}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn serve_provider(
    name: String,
    addr: &str,
    dataset: Option<&Path>,
    seed: u64,
    records: usize,
) -> Result<ExitCode, ExchangeError> {
    let dataset = match dataset {
        Some(path) => Dataset::load(path).map_err(|e| ExchangeError::Config(e.to_string()))?,
        None => Dataset::synthetic(seed, records),
    };
    info!(provider = %name, records = dataset.len(), "dataset loaded");

    let app = api::router(ProviderState::new(name, dataset));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ExchangeError::Internal(format!("bind {addr}: {e}")))?;

    info!(%addr, "provider listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| ExchangeError::Internal(format!("serve: {e}")))?;

    Ok(ExitCode::SUCCESS)
}
