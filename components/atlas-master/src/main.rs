mod command;
mod config;
mod group_store;
mod logging;
mod manager;
mod net;
mod repl;
mod scheduler;
mod slave_registry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use atlas_core::config::load_or_init;
use clap::Parser;
use log::{error, info, LevelFilter};
use tokio::time::{interval, Duration};

use crate::command::MasterCommand;
use crate::config::MasterConfig;
use crate::manager::Manager;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(1);
const QUEUE_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "atlas-master", about = "Fleet orchestrator master node")]
struct Args {
    /// Directory holding master.yaml, groups/, templates/ and logs/.
    #[arg(long, default_value = "state")]
    state_dir: PathBuf,

    /// Overrides master.yaml's bind_addr for this run.
    #[arg(long)]
    bind_addr: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level: LevelFilter = match args.log_level.parse() {
        Ok(level) => level,
        Err(_) => {
            eprintln!("invalid --log-level '{}'", args.log_level);
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = logging::init(level, &args.state_dir.join("logs/master.log")) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    let config_path = args.state_dir.join("master.yaml");
    let mut config: MasterConfig = match load_or_init(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load {}: {err}", config_path.display());
            return ExitCode::FAILURE;
        }
    };
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }

    let manager = match Manager::new(config.clone(), args.state_dir.clone()) {
        Ok(manager) => manager,
        Err(err) => {
            error!("failed to initialize manager: {err}");
            return ExitCode::FAILURE;
        }
    };

    let secret_key = Arc::new(config.secret_key.clone());
    let (handle, rx) = atlas_queue::mailbox::<MasterCommand>(QUEUE_CAPACITY);

    let manager_task = tokio::spawn(manager.run(rx));

    let net_handle = handle.clone();
    let bind_addr = config.bind_addr.clone();
    let net_task = tokio::spawn(async move {
        if let Err(err) = net::serve(&bind_addr, secret_key, net_handle).await {
            error!("slave listener stopped: {err}");
        }
    });

    let ticker_handle = handle.clone();
    let ticker_task = tokio::spawn(async move {
        let mut ticker = interval(RECONCILE_INTERVAL);
        loop {
            ticker.tick().await;
            if ticker_handle.send(MasterCommand::ScheduleServices).await.is_err() {
                break;
            }
        }
    });

    let repl_handle = handle.clone();
    let repl_task = tokio::task::spawn_blocking(move || repl::run(repl_handle));

    info!("atlas-master listening on {}", config.bind_addr);

    tokio::select! {
        _ = manager_task => {}
        _ = repl_task => {
            let _ = handle.send(MasterCommand::Shutdown).await;
        }
    }

    net_task.abort();
    ticker_task.abort();

    ExitCode::SUCCESS
}
