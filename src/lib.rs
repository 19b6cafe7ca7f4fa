//! RPKI relying-party validation.
//!
//! The _Resource Public Key Infrastructure_ (RPKI) is an application of
//! PKI to Internet routing security. It allows owners of IP address
//! prefixes to publish cryptographically signed associations of their
//! prefixes to autonomous systems, allowing the validation of the origin
//! of a route announcement in BGP.
//!
//! This crate implements the relying-party core: it reads a set of
//! locally mirrored repository publication points, walks each trust
//! anchor's certificate tree, validates every certificate, manifest, CRL
//! and signed object it finds, and assembles the result into a database
//! of Validated ROA Payloads (VRPs) and router keys. That database is
//! served to routers over the RTR protocol (RFC 8210), including both a
//! full snapshot (Reset Query) and incremental updates (Serial Query).
//!
//! Fetching the repository data itself -- rsync and RRDP transport -- is
//! out of scope; this crate expects a directory tree already populated
//! by some other means and only reads from it.
//!
//! The main entry point is [`engine::Engine`], which owns the set of
//! trust anchors, runs repeated validation cycles, and publishes results
//! through [`payload::History`].

#[macro_use] extern crate log;

pub mod config;
pub mod engine;
pub mod error;
pub mod log;
pub mod payload;
pub mod process;
pub mod resources;
pub mod rtr;
pub mod slurm;
pub mod state;
pub mod store;
pub mod tal;
pub mod utils;
pub mod walker;

pub use crate::config::Config;
pub use crate::error::{ExitError, Failed, ValidationError};
pub use crate::process::Process;
