//! The object store (§4.2).
//!
//! The store maps a repository URI to a file under a locally mirrored
//! copy of the RPKI repository tree and reads it back. Mapping is purely
//! mechanical: the scheme is stripped and the authority and path are
//! preserved as directory components rooted at the configured mirror
//! directory, e.g. `rsync://repo.example/foo/bar.cer` becomes
//! `<mirror>/rsync/repo.example/foo/bar.cer` and
//! `https://repo.example/foo/bar.cer` becomes
//! `<mirror>/https/repo.example/foo/bar.cer`.
//!
//! Populating the mirror directory is somebody else's job -- an rsync or
//! RRDP fetcher external to this crate (§1, §6). The store never writes;
//! it only translates URIs to paths and reads.

use std::{fs, io};
use std::path::{Path, PathBuf};
use bytes::Bytes;
use log::error;
use ring::digest;
use rpki::uri;
use crate::error::Failed;


//------------ Store -----------------------------------------------------------

/// A read-only view of a locally mirrored RPKI repository tree.
#[derive(Clone, Debug)]
pub struct Store {
    base: PathBuf,
}

impl Store {
    pub fn new(base: PathBuf) -> Self {
        Store { base }
    }

    /// Translates a repository URI into the path it would be mirrored at.
    pub fn uri_to_path(&self, uri: &UriRef) -> PathBuf {
        let mut path = self.base.clone();
        match uri {
            UriRef::Rsync(uri) => {
                path.push("rsync");
                path.push(uri.authority());
                path.push(uri.module_name());
                for component in uri.path().split('/').filter(|c| !c.is_empty()) {
                    path.push(component);
                }
            }
            UriRef::Https(uri) => {
                path.push("https");
                path.push(uri.authority());
                for component in uri.path().split('/').filter(|c| !c.is_empty()) {
                    path.push(component);
                }
            }
        }
        path
    }

    /// Opens the file the given URI maps to.
    ///
    /// Returns [`StoreError::NotFound`] if the mapped path doesn't exist,
    /// [`StoreError::Io`] for any other failure. Neither is retried --
    /// per §4.2 these propagate straight to the caller, which in the
    /// walker means the containing subtree is invalidated.
    pub fn open(&self, uri: &UriRef) -> Result<OpenObject, StoreError> {
        let path = self.uri_to_path(uri);
        let file = fs::File::open(&path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound
            }
            else {
                error!("Failed to open {}: {}", path.display(), err);
                StoreError::Io
            }
        })?;
        let size = file.metadata().map_err(|err| {
            error!("Failed to stat {}: {}", path.display(), err);
            StoreError::Io
        })?.len();
        Ok(OpenObject { file, size, blocksize: DEFAULT_BLOCKSIZE })
    }

    /// Reads the whole object named by `uri` into memory.
    pub fn load(&self, uri: &UriRef) -> Result<Bytes, StoreError> {
        let path = self.uri_to_path(uri);
        match fs::read(&path) {
            Ok(data) => Ok(data.into()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound)
            }
            Err(err) => {
                error!("Failed to read {}: {}", path.display(), err);
                Err(StoreError::Io)
            }
        }
    }

    /// Computes the digest of the object named by `uri`.
    pub fn hash(
        &self, uri: &UriRef, algorithm: &'static digest::Algorithm,
    ) -> Result<digest::Digest, StoreError> {
        let data = self.load(uri)?;
        Ok(digest::digest(algorithm, &data))
    }

    /// Whether the object named by `uri` hashes to `expected` under
    /// `algorithm`.
    pub fn hash_matches(
        &self, uri: &UriRef, algorithm: &'static digest::Algorithm,
        expected: &[u8],
    ) -> Result<bool, StoreError> {
        Ok(self.hash(uri, algorithm)?.as_ref() == expected)
    }
}

/// The default blocksize reported alongside an opened object.
///
/// RPKI objects (certs, manifests, ROAs) are small; this is just a
/// sensible buffer size for whoever reads the stream, not a property of
/// the underlying filesystem.
const DEFAULT_BLOCKSIZE: usize = 8192;


//------------ OpenObject -------------------------------------------------------

/// A freshly opened object: its stream, size, and suggested read block
/// size, per the `open(uri) -> (stream, size, blocksize)` operation of
/// §4.2.
pub struct OpenObject {
    pub file: fs::File,
    pub size: u64,
    pub blocksize: usize,
}


//------------ UriRef ------------------------------------------------------------

/// A repository URI, either rsync or HTTPS (RRDP-published objects are
/// still named by an rsync URI in the manifest; HTTPS is here for trust
/// anchor certificates fetched directly via HTTPS per RFC 8630).
#[derive(Clone, Debug)]
pub enum UriRef {
    Rsync(uri::Rsync),
    Https(uri::Https),
}

impl From<uri::Rsync> for UriRef {
    fn from(uri: uri::Rsync) -> Self {
        UriRef::Rsync(uri)
    }
}

impl From<uri::Https> for UriRef {
    fn from(uri: uri::Https) -> Self {
        UriRef::Https(uri)
    }
}

impl std::fmt::Display for UriRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            UriRef::Rsync(uri) => uri.fmt(f),
            UriRef::Https(uri) => uri.fmt(f),
        }
    }
}


//------------ StoreError --------------------------------------------------------

/// The two ways a store operation can fail, per §4.2: not found, or some
/// other I/O error. Neither carries a retry -- the caller decides.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreError {
    NotFound,
    Io,
}

impl From<StoreError> for Failed {
    fn from(_: StoreError) -> Failed {
        Failed
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            StoreError::NotFound => "object not found",
            StoreError::Io => "I/O error",
        })
    }
}


#[cfg(test)]
mod test {
    use std::str::FromStr;
    use super::*;

    #[test]
    fn translates_rsync_uri_mechanically() {
        let store = Store::new(PathBuf::from("/mirror"));
        let uri = uri::Rsync::from_str(
            "rsync://repo.example/foo/bar/baz.cer"
        ).unwrap();
        let path = store.uri_to_path(&UriRef::Rsync(uri));
        assert_eq!(
            path,
            PathBuf::from("/mirror/rsync/repo.example/foo/bar/baz.cer")
        );
    }
}
