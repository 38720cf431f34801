use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use controller::config::{ControllerConfig, SeedConfig};
use controller::store::{MemoryStore, PolicyStore, SqliteStore};
use controller::{ControlPlane, LoggingCommander, api};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "flowgate-controller")]
#[command(about = "Flowgate - tunnel policy controller", long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, env = "FLOWGATE_CONFIG")]
    config: Option<String>,

    /// API listen address
    #[arg(long, env = "FLOWGATE_API_ADDR")]
    api_addr: Option<String>,

    /// SQLite database path
    #[arg(long, env = "FLOWGATE_DATABASE_PATH")]
    database_path: Option<String>,

    /// Seed file applied at startup
    #[arg(long)]
    seed: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = ControllerConfig::load(args.config.as_deref().map(Path::new))?;
    if let Some(api_addr) = args.api_addr {
        cfg.api_addr = api_addr;
    }
    if let Some(database_path) = args.database_path {
        cfg.database_path = Some(database_path);
    }
    if let Some(seed) = args.seed {
        cfg.seed_path = Some(seed);
    }

    let _log_guard = common::init_tracing(cfg.log_dir.as_deref(), &cfg.log_file, &cfg.log_level);

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(threads) = cfg.runtime_threads {
        builder.worker_threads(threads);
    }
    let runtime = builder.build()?;

    runtime.block_on(run(cfg))
}

async fn run(cfg: ControllerConfig) -> Result<()> {
    info!("Starting controller with configuration: {:?}", cfg);
    let cfg = Arc::new(cfg);

    let store: Arc<dyn PolicyStore> = match &cfg.database_path {
        Some(path) => Arc::new(SqliteStore::connect(path).await?),
        None => {
            info!("No database configured, keeping records in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let control = Arc::new(ControlPlane::new(cfg.clone(), store, Arc::new(LoggingCommander)));
    control.load().await?;

    if let Some(seed_path) = &cfg.seed_path {
        let seed = SeedConfig::load(seed_path)?;
        control.apply_seed(&seed, Utc::now()).await?;
    }

    let cancel = CancellationToken::new();

    let reconcile_loop = tokio::spawn(control.clone().run(cancel.clone()));

    let mut api_server = {
        let control = control.clone();
        let cancel = cancel.clone();
        let api_addr = cfg.api_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = api::start_server(&api_addr, control, cancel).await {
                error!("API server error: {}", e);
            }
        })
    };

    info!("Controller started, API listening on {}", cfg.api_addr);

    let api_finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        _ = &mut api_server => {
            error!("API server stopped");
            true
        }
    };

    cancel.cancel();
    let _ = reconcile_loop.await;
    if !api_finished {
        let _ = api_server.await;
    }

    info!("Shutting down controller");
    Ok(())
}
