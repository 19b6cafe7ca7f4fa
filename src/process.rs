//! Managing the process the validator runs in.

use std::future::Future;
use log::{error, info};
use tokio::runtime::Runtime;
use crate::config::Config;
use crate::engine::Engine;
use crate::error::{ExitError, Failed};
use crate::log::Logger;
use crate::rtr;


//------------ Process ---------------------------------------------------------

/// A representation of the process the validator runs in.
///
/// This owns the resolved configuration and provides the few
/// platform-independent services the rest of the crate needs from its
/// environment: logging setup, directory preparation, and a Tokio
/// runtime to drive everything else from.
pub struct Process {
    config: Config,
}

impl Process {
    /// Performs the minimal setup needed before the configuration itself
    /// is available: installs the provisional stderr logger.
    pub fn init() -> Result<(), Failed> {
        Logger::init()
    }

    /// Creates a new process object from a resolved configuration.
    pub fn new(config: Config) -> Self {
        Process { config }
    }

    /// Returns a reference to the config.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Switches logging to the configured target.
    pub fn switch_logging(&self) -> Result<(), Failed> {
        Logger::switch_logging(&self.config)
    }

    /// Re-opens the log file, if logging to one. Used on SIGHUP.
    pub fn rotate_log(&self) -> Result<(), Failed> {
        Logger::rotate_log()
    }

    /// Returns a Tokio runtime to drive the validator on.
    pub fn runtime(&self) -> Result<Runtime, Failed> {
        Runtime::new().map_err(|err| {
            error!("Failed to create runtime: {err}");
            Failed
        })
    }

    /// Runs a future to completion atop a fresh Tokio runtime.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output, Failed> {
        Ok(self.runtime()?.block_on(future))
    }

    /// Runs the validator: repeated validation cycles feeding the RTR
    /// server, until the process receives a shutdown signal.
    pub fn run(self) -> Result<(), ExitError> {
        self.switch_logging().map_err(ExitError::from)?;
        let engine = Engine::new(&self.config).map_err(ExitError::from)?;
        let history = engine.history();
        let config = self.config.clone();
        self.block_on(async move {
            let cycles = engine.run();
            let server = rtr::server::run(history, config);
            tokio::select! {
                res = cycles => res,
                res = server => res,
                _ = shutdown_signal() => {
                    info!("Received shutdown signal, exiting.");
                    Ok(())
                }
                _ = watch_sighup() => unreachable!("SIGHUP watcher never completes"),
            }
        }).map_err(ExitError::from)?.map_err(ExitError::from)
    }
}

/// Re-opens the log file on every SIGHUP, forever.
///
/// Not a request to shut down -- this future never resolves on its own; it
/// is raced alongside [`shutdown_signal`] purely so a running process picks
/// up log rotation (e.g. after `logrotate` moves the file aside) without a
/// restart. On platforms without Unix signals, or if installing the
/// handler fails, it simply never fires.
async fn watch_sighup() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::hangup()) {
            Ok(mut hup) => loop {
                hup.recv().await;
                info!("Received SIGHUP, rotating log file.");
                let _ = Logger::rotate_log();
            },
            Err(_) => std::future::pending().await,
        }
    }
    #[cfg(not(unix))]
    std::future::pending::<()>().await
}

/// Waits for a Ctrl-C or, on Unix, a SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
