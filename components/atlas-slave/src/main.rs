mod callback;
mod command;
mod config;
mod logging;
mod master_conn;
mod process;
mod service_manager;
mod template;
mod workspace;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use atlas_core::config::load_or_init;
use clap::Parser;
use log::{error, info, LevelFilter};

use crate::command::SlaveCommand;
use crate::config::SlaveConfig;
use crate::service_manager::ServiceManager;
use crate::template::RsyncTemplateSync;

const QUEUE_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "atlas-slave", about = "Fleet orchestrator slave node")]
struct Args {
    /// Directory holding slave.yaml, templates/ and logs/.
    #[arg(long, default_value = "state")]
    state_dir: PathBuf,

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
    if let Err(err) = logging::init(level, &args.state_dir.join("logs/slave.log")) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    let config_path = args.state_dir.join("slave.yaml");
    let config: SlaveConfig = match load_or_init(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load {}: {err}", config_path.display());
            return ExitCode::FAILURE;
        }
    };

    let template_dir = args.state_dir.join("templates");
    let templates = match RsyncTemplateSync::new(config.file_server_host.clone(), config.file_server_port, template_dir) {
        Ok(templates) => Arc::new(templates),
        Err(err) => {
            error!("failed to initialize template sync: {err}");
            return ExitCode::FAILURE;
        }
    };

    let advertise_addr = advertise_addr(&config.bind_addr);
    let manager = ServiceManager::new(args.state_dir.clone(), templates, advertise_addr);
    let (handle, rx) = atlas_queue::mailbox::<SlaveCommand>(QUEUE_CAPACITY);

    let manager_task = tokio::spawn(manager.run(rx, handle.clone()));

    let callback_handle = handle.clone();
    let bind_addr = config.bind_addr.clone();
    let callback_task = tokio::spawn(async move {
        if let Err(err) = callback::serve(&bind_addr, callback_handle).await {
            error!("child callback listener stopped: {err}");
        }
    });

    let master_conn_handle = handle.clone();
    let master_conn_task = tokio::spawn(master_conn::run(config.clone(), master_conn_handle));

    info!("atlas-slave '{}' starting, reporting to {}", config.name, config.master_addr);

    tokio::select! {
        _ = manager_task => {}
        _ = master_conn_task => {}
    }

    callback_task.abort();
    ExitCode::SUCCESS
}

/// The slave advertises its callback listener to spawned children as
/// `127.0.0.1:<port>` regardless of what host `bind_addr` itself binds on
/// (typically `0.0.0.0`), since the child always runs on the same host.
fn advertise_addr(bind_addr: &str) -> String {
    match bind_addr.rsplit_once(':') {
        Some((_, port)) => format!("127.0.0.1:{port}"),
        None => bind_addr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertises_localhost_with_the_bound_port() {
        assert_eq!(advertise_addr("0.0.0.0:6000"), "127.0.0.1:6000");
    }
}
