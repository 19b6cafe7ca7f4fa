//! Payload data collected during validation runs.
//!
//! This module contains types to collect data during a validation run --
//! the [`ValidationReport`] -- and store the resulting data set afterwards.
//! A full such data set is a [`PayloadSnapshot`], with differences between
//! consecutive such snapshots available as [`PayloadDelta`]. A rolling
//! window of snapshot and deltas plus the session and serial bookkeeping
//! that RTR clients need is the [`History`].

pub use self::delta::PayloadDelta;
pub use self::history::{DeltaUpdate, History};
pub use self::router_key::RouterKey;
pub use self::snapshot::PayloadSnapshot;
pub use self::validation::ValidationReport;
pub use self::vrp::Vrp;

mod delta;
mod history;
mod router_key;
mod snapshot;
mod validation;
mod vrp;
