//! Shutdown trigger
//!
//! Translates operator input into a cancelled stop token. Triggers are
//! SIGINT (Ctrl-C), SIGTERM on unix, and optionally a line reading `q` on
//! standard input.

use std::io::{self, BufRead};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The line an operator types to stop the pool
pub const QUIT_KEY: &str = "q";

/// Which operator inputs request a stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTriggers {
    /// Ctrl-C and SIGTERM
    pub signals: bool,
    /// `q` followed by enter on standard input
    pub quit_key: bool,
}

impl Default for ShutdownTriggers {
    fn default() -> Self {
        Self {
            signals: true,
            quit_key: true,
        }
    }
}

/// Install a handler that cancels `stop` on the first trigger
///
/// The returned task also finishes if `stop` is cancelled from elsewhere.
/// Stdin is read on a detached thread so a pending read never holds the
/// process open.
pub fn install_shutdown_handler(stop: CancellationToken, triggers: ShutdownTriggers) -> JoinHandle<()> {
    if triggers.quit_key {
        spawn_quit_key_listener(stop.clone());
    }

    tokio::spawn(async move {
        if !triggers.signals {
            stop.cancelled().await;
            return;
        }

        tokio::select! {
            _ = interrupt() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
            _ = terminate() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = stop.cancelled() => {
                debug!("Stop already requested");
            }
        }

        stop.cancel();
    })
}

/// Read lines until one is the quit key
///
/// Returns `Ok(false)` if the input ends first; a closed stdin is not a
/// request to stop.
pub fn wait_for_quit_key<R: BufRead>(reader: R) -> io::Result<bool> {
    for line in reader.lines() {
        if line?.trim().eq_ignore_ascii_case(QUIT_KEY) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn spawn_quit_key_listener(stop: CancellationToken) {
    let spawned = std::thread::Builder::new()
        .name("quit-key".to_string())
        .spawn(move || match wait_for_quit_key(io::stdin().lock()) {
            Ok(true) => {
                info!("Quit key pressed, initiating graceful shutdown");
                stop.cancel();
            }
            Ok(false) => debug!("Standard input closed, quit key disabled"),
            Err(e) => warn!(error = %e, "Failed to read standard input, quit key disabled"),
        });

    if let Err(e) = spawned {
        warn!(error = %e, "Failed to start quit key listener");
    }
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install SIGINT handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
