//! Entry point for `vigild`, the Vigil monitoring engine daemon.
//!
//! A single long-running process, not a multi-command CLI: it loads a
//! config directory, starts the scheduler/mesh/cluster router, and runs
//! until told to stop.

mod wiring;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "vigild", about = "Vigil monitoring engine daemon")]
struct Args {
    /// Directory containing vigil.toml (and vigil.local.toml, if present).
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

/// Exit codes: 0 normal shutdown, 1 configuration error, 2 runtime
/// fatal error (e.g. failed to bind the mesh listener or load certs).
const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_RUNTIME_FATAL: u8 = 2;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = match args.config_dir {
        Some(dir) => vigil_config::VigilConfig::load_from_dir(&dir),
        None => vigil_config::VigilConfig::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to start async runtime");
            return ExitCode::from(EXIT_RUNTIME_FATAL);
        }
    };

    runtime.block_on(async move {
        let shutdown = CancellationToken::new();
        install_signal_handlers(shutdown.clone());

        match wiring::run(config, shutdown).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(%err, "vigild exited with an error");
                ExitCode::from(EXIT_RUNTIME_FATAL)
            }
        }
    })
}

/// Cancels `shutdown` on Ctrl-C or SIGTERM, whichever arrives first.
fn install_signal_handlers(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    error!(%err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    shutdown.cancel();
                    return;
                }
            };

            tokio::select! {
                _ = ctrl_c => {}
                _ = terminate.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        shutdown.cancel();
    });
}
