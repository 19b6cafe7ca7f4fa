//! Running repeated validation cycles.
//!
//! [`Engine`] owns everything a validation cycle needs that outlives any
//! single cycle: the loaded TAL set, the object store, the configuration,
//! and the [`History`] that cycles publish their results into.
//! [`Engine::run`] drives cycles at the configured refresh interval until
//! the returned future is dropped or resolves with an error; the caller
//! (`process.rs`) races it against the RTR server and the shutdown
//! signal.

use std::future::Future;
use std::sync::Arc;
use log::{error, info, warn};
use rpki::repository::tal::Tal;
use tokio::time::{interval, timeout, MissedTickBehavior};
use crate::config::Config;
use crate::error::Failed;
use crate::payload::{History, PayloadSnapshot, ValidationReport};
use crate::slurm::LocalExceptions;
use crate::store::Store;
use crate::tal;
use crate::walker;


//------------ Engine ------------------------------------------------------------

/// The set of trust anchors and the validated payload database they feed.
pub struct Engine {
    tals: Arc<Vec<Tal>>,
    store: Store,
    config: Config,
    history: History,
}

impl Engine {
    /// Loads the TAL set and prepares an inactive history.
    ///
    /// Loading is the only part of startup that can fail outright: a
    /// missing or malformed TAL is an operator error worth refusing to
    /// start over, per `tal::load_tals`.
    pub fn new(config: &Config) -> Result<Self, Failed> {
        let tals = tal::load_tals(&config.tal_dir)?;
        Ok(Engine {
            tals: Arc::new(tals),
            store: Store::new(config.cache_dir.clone()),
            config: config.clone(),
            history: History::from_config(config),
        })
    }

    /// A cloneable handle to the VRP database this engine publishes into.
    pub fn history(&self) -> History {
        self.history.clone()
    }

    /// Runs validation cycles at `config.refresh` intervals, forever.
    ///
    /// The first tick fires immediately (so the RTR server has data to
    /// serve as soon as possible after startup), then every `refresh`
    /// thereafter. A cycle that overruns the interval doesn't queue up a
    /// second one on top of it -- the next tick is simply delayed.
    pub fn run(self) -> impl Future<Output = Result<(), Failed>> {
        async move {
            let mut ticker = interval(self.config.refresh);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_cycle().await;
            }
        }
    }

    /// Walks every trust anchor, merges the results, applies the SLURM
    /// overlay, and commits the outcome to the database.
    async fn run_cycle(&self) {
        let exceptions = self.load_exceptions();
        let mut report = ValidationReport::new();

        let tasks: Vec<_> = (0..self.tals.len()).map(|index| {
            let tals = self.tals.clone();
            let store = self.store.clone();
            let config = self.config.clone();
            tokio::task::spawn_blocking(move || {
                walker::validate_tal(&tals[index], &store, &config)
            })
        }).collect();

        for task in tasks {
            match timeout(self.config.validation_timeout, task).await {
                Ok(Ok(tal_report)) => report.merge(tal_report),
                Ok(Err(_)) => {
                    error!("A trust anchor validation task panicked.");
                }
                Err(_) => {
                    warn!(
                        "A trust anchor exceeded its validation deadline, \
                         skipping it this cycle."
                    );
                }
            }
        }

        let snapshot = report.into_snapshot();
        let snapshot = match exceptions {
            Some(exceptions) => {
                let (vrps, router_keys) = exceptions.apply(
                    snapshot.vrps().to_vec(), snapshot.router_keys().to_vec(),
                );
                PayloadSnapshot::new(vrps, router_keys)
            }
            None => snapshot,
        };

        let vrp_count = snapshot.vrps().len();
        let router_key_count = snapshot.router_keys().len();
        if self.history.commit(snapshot) {
            info!(
                "Committed serial {}: {} VRPs, {} router keys.",
                self.history.serial(), vrp_count, router_key_count,
            );
        }
    }

    /// Loads the configured SLURM file anew for this cycle, if any.
    ///
    /// A missing or malformed exceptions file only drops the overlay for
    /// this cycle -- it never aborts validation, since the underlying VRP
    /// set is still good data.
    fn load_exceptions(&self) -> Option<LocalExceptions> {
        let path = self.config.exceptions.as_ref()?;
        match LocalExceptions::from_file(path) {
            Ok(exceptions) => Some(exceptions),
            Err(err) => {
                warn!(
                    "Failed to load local exceptions from {}: {}. \
                     Validating without the SLURM overlay this cycle.",
                    path.display(), err
                );
                None
            }
        }
    }
}
