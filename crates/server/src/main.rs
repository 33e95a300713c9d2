//! Entry point: parse configuration, load or initialize state, run the
//! event loop (spec §6, "External interfaces").

use clap::Parser;
use kvstore::Store;
use std::process::ExitCode;

use server::{Config, EventLoop};

fn main() -> ExitCode {
    let config = Config::parse();

    let filter = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> std::io::Result<()> {
    let master_addr = config
        .master_addr()
        .transpose()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("bad --replicaof port: {e}")))?;

    let mut store = Store::new();
    let info = match &master_addr {
        Some((host, port)) => {
            dispatcher::ServerInfo::new_replica(config.dir.clone(), config.dbfilename.clone(), config.port, host.clone(), *port)
        }
        None => {
            match rdb::load(&mut store, &config.dir, &config.dbfilename) {
                Ok(rdb::LoadOutcome::Loaded) => tracing::info!("loaded existing snapshot"),
                Ok(rdb::LoadOutcome::Absent) => tracing::info!("no existing snapshot, starting empty"),
                Err(e) => {
                    tracing::error!(error = %e, "corrupt snapshot, aborting startup");
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()));
                }
            }
            dispatcher::ServerInfo::new_master(config.dir.clone(), config.dbfilename.clone(), config.port)
        }
    };

    let mut event_loop = EventLoop::new(config.port, store, info)?;
    if let Some((host, port)) = master_addr {
        tracing::info!(%host, port, "connecting to master");
        event_loop.connect_to_master(&host, port)?;
    }

    tracing::info!(port = config.port, "listening");
    event_loop.run()
}
