//! `minidb-server`: opens (or creates) a database and a WAL file, runs
//! crash recovery, and serves the line protocol over TCP until
//! `SIGINT`/`SIGTERM` or the `shutdown` protocol word.

use std::process::ExitCode;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use minidb::config::Config;
use minidb::database;
use minidb::server;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_env_and_args(&args);

    let storage = match database::open(&config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to open database");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Arc::new(Notify::new());
    let addr = format!("127.0.0.1:{}", config.port);

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        signal_shutdown.notify_waiters();
    });

    let serve_result = server::serve(&addr, storage.clone(), shutdown).await;

    if let Err(e) = database::close(&storage) {
        error!(error = %e, "error while closing database during shutdown");
        return ExitCode::FAILURE;
    }

    match serve_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server loop exited with an error");
            ExitCode::FAILURE
        }
    }
}
