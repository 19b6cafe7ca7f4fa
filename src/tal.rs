//! Trust anchor locators (§4.1).
//!
//! A TAL names the handful of URIs a trust anchor certificate can be
//! fetched from and the public key it must carry. This module only loads
//! the `*.tal` files from the configured directory; parsing the TAL
//! format itself and representing the resulting URI list and key are
//! delegated to [`rpki::repository::tal`].

use std::fs::File;
use std::io;
use std::path::Path;
use log::{error, warn};
use rpki::repository::tal::Tal;
use crate::error::Failed;


//------------ load_tals -----------------------------------------------------

/// Loads every `*.tal` file in `tal_dir`.
///
/// Each file's label (used in log messages and as the TAL's name in
/// output) is its file stem. A missing directory or an unreadable or
/// malformed TAL is fatal: TALs are operator-supplied trust roots, not
/// data the validator can route around.
pub fn load_tals(tal_dir: &Path) -> Result<Vec<Tal>, Failed> {
    let mut res = Vec::new();
    let dir = match std::fs::read_dir(tal_dir) {
        Ok(dir) => dir,
        Err(err) => {
            if err.kind() == io::ErrorKind::NotFound {
                error!(
                    "Missing TAL directory {}.",
                    tal_dir.display()
                );
            }
            else {
                error!(
                    "Failed to open TAL directory {}: {}",
                    tal_dir.display(), err
                );
            }
            return Err(Failed)
        }
    };
    for entry in dir {
        let entry = entry.map_err(|err| {
            error!(
                "Failed to iterate over TAL directory {}: {}",
                tal_dir.display(), err
            );
            Failed
        })?;

        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue
        }
        let path = entry.path();
        if path.extension().map(|ext| ext != "tal").unwrap_or(true) {
            continue
        }

        let mut tal = read_tal(&path)?;
        tal.prefer_https();
        res.push(tal);
    }
    if res.is_empty() {
        warn!(
            "No TALs found in {}. Validation cycles will produce an \
             empty VRP set.",
            tal_dir.display()
        );
    }
    Ok(res)
}

fn read_tal(path: &Path) -> Result<Tal, Failed> {
    let mut file = File::open(path).map_err(|err| {
        error!("Failed to open TAL {}: {}", path.display(), err);
        Failed
    })?;
    Tal::read_named(tal_label(path), &mut file).map_err(|err| {
        error!("Failed to parse TAL {}: {}", path.display(), err);
        Failed
    })
}

/// The label a TAL is known by: its file stem, e.g. `afrinic` for
/// `afrinic.tal`.
fn tal_label(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
