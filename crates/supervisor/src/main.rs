//! # Farmer Supervisor Entry Point
//!
//! ```text
//! fsv-supervisor [config.toml]
//! ```
//!
//! The config path comes from the first argument, else `FSV_CONFIG`, else
//! `./config.toml`. `FSV_*` variables override individual keys. A bad
//! configuration exits with status 1.
//!
//! ## Startup Flow
//! 1. Load, override and validate configuration
//! 2. Initialize tracing
//! 3. Open the account store and build the controller
//! 4. Start the reconciler
//! 5. Wait for Ctrl+C, then close the controller (drains pending writes)

use std::env;
use std::process;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fsv_common::SupervisorConfig;
use fsv_supervisor::{AccountController, FarmerPublic};

const DEFAULT_CONFIG_PATH: &str = "./config.toml";

fn config_path() -> String {
    env::args()
        .nth(1)
        .or_else(|| env::var("FSV_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

fn load_config(path: &str) -> anyhow::Result<SupervisorConfig> {
    let mut cfg = SupervisorConfig::load(path).with_context(|| format!("reading {}", path))?;
    cfg.apply_env().context("applying FSV_* overrides")?;
    cfg.validate().context("validating configuration")?;
    Ok(cfg)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let path = config_path();
    let cfg = match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {:#}", e);
            process::exit(1);
        }
    };

    init_tracing(&cfg.log.level);

    if let Err(e) = run(cfg).await {
        error!("supervisor failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cfg: SupervisorConfig) -> anyhow::Result<()> {
    info!("═══════════════════════════════════════════════════════════════");
    info!("                    Farmer Supervisor                           ");
    info!("═══════════════════════════════════════════════════════════════");
    info!("Store:        {} {}", cfg.store.backend, cfg.store.path.as_deref().unwrap_or(""));
    info!("Ping:         every {}s, lost after {}", cfg.farmer.ping.interval_secs, cfg.farmer.ping.lost_count);
    info!("Challenge:    {} answer within {}s", cfg.farmer.challenge.hash_algo, cfg.farmer.challenge.answer_delay_secs);
    info!("Reconciler:   every {}s, {} workers", cfg.reconciler.interval_secs, cfg.reconciler_workers());

    let controller = AccountController::open(&cfg).context("starting account controller")?;
    controller.start_reconciler();

    // Handed to whatever wire layer mounts the farmer-facing calls.
    let _public = FarmerPublic::new(controller.clone());
    info!("supervisor ready");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => error!("failed to listen for Ctrl+C: {}", e),
    }

    controller.close().await.context("closing account controller")?;
    info!("supervisor stopped");
    Ok(())
}
