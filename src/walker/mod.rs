//! The tree walker (§4.4).
//!
//! [`validate_tal`] is the entry point: it drives one trust anchor from
//! its TAL down through every certificate, manifest, CRL and signed
//! object it can reach, and collects the result into a
//! [`ValidationReport`]. ASN.1 decoding, X.509 signature verification and
//! RFC 3779 resource-extension parsing are all delegated to the `rpki`
//! crate; this module supplies the tree-recursion, the containment and
//! revocation checks threaded through it, and the dispatch from manifest
//! entry to VRP or router key.
//!
//! A failure below the trust anchor itself never aborts the whole cycle:
//! a malformed or revoked object just isn't walked into, and its siblings
//! are still processed (§4.4, §7). Only a failure to validate the trust
//! anchor certificate against its TAL abandons that TA's tree entirely --
//! and even then, a TAL naming several URIs is tried in order until one
//! works.

use bytes::Bytes;
use log::{debug, warn};
use rpki::repository::cert::{Cert, KeyUsage, ResourceCert};
use rpki::repository::crl::Crl;
use rpki::repository::manifest::{Manifest, ManifestHash};
use rpki::repository::sigobj::SignedObject;
use rpki::repository::tal::{Tal, TalUri};
use rpki::repository::x509::ValidationError as CertError;
use rpki::uri;
use crate::config::{Config, FilterPolicy};
use crate::payload::ValidationReport;
use crate::resources::{self, ResourceSet};
use crate::state::{PubKeyState, ValidationState};
use crate::store::{Store, UriRef};

mod roa;
mod router_key;

/// Manifests with more entries than this get their CRL's revoked-serial
/// list cached up front rather than re-scanned for every entry (mirrors
/// the cutoff the `rpki` crate's own CRL type exposes the knob for).
const CRL_CACHE_LIMIT: usize = 50;


//------------ validate_tal ----------------------------------------------------

/// Validates one trust anchor and returns everything found under it.
///
/// Tries each URI the TAL names, in order, until one yields a trust
/// anchor certificate whose key matches the TAL and whose tree can be
/// walked. If none do, the returned report is empty.
pub fn validate_tal(tal: &Tal, store: &Store, config: &Config) -> ValidationReport {
    let mut report = ValidationReport::new();
    for tal_uri in tal.uris() {
        let mut state = ValidationState::prepare();
        let ok = validate_ta(tal_uri, tal, store, config, &mut state, &mut report);
        state.destroy();
        if ok {
            return report
        }
    }
    warn!("{}: no usable trust anchor certificate found.", tal.info().name());
    report
}

fn tal_uri_ref(uri: &TalUri) -> UriRef {
    match uri {
        TalUri::Rsync(uri) => UriRef::Rsync(uri.clone()),
        TalUri::Https(uri) => UriRef::Https(uri.clone()),
    }
}

fn validate_ta(
    tal_uri: &TalUri, tal: &Tal, store: &Store, config: &Config,
    state: &mut ValidationState, report: &mut ValidationReport,
) -> bool {
    let bytes = match store.load(&tal_uri_ref(tal_uri)) {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!("{}: {}.", tal_uri, err);
            return false
        }
    };
    let cert = match Cert::decode(bytes) {
        Ok(cert) => cert,
        Err(_) => {
            warn!("{}: failed to decode trust anchor certificate.", tal_uri);
            return false
        }
    };
    if cert.subject_public_key_info() != tal.key_info() {
        warn!("{}: key does not match TAL.", tal_uri);
        state.set_pubkey_state(PubKeyState::Invalid);
        return false
    }
    state.set_pubkey_state(PubKeyState::Valid);

    let resolved = resources::parse_cert_resources(&cert);

    let cert = match cert.validate_ta(tal.info().clone(), config.strict) {
        Ok(cert) => cert,
        Err(_) => {
            warn!("{}: trust anchor certificate failed to validate.", tal_uri);
            return false
        }
    };

    let resources = match resolved {
        resources::Resolved::Inherit => {
            warn!("{}: trust anchor certificate inherits its resources.", tal_uri);
            return false
        }
        resources::Resolved::Set(set) => set,
    };

    if state.push_cert(cert, resources, true).is_err() {
        return false
    }
    debug!("{}: trust anchor valid, walking its tree.", tal_uri);
    walk_point(store, config, state, report);
    state.pop_cert();
    true
}


//------------ walking a single publication point -------------------------------

/// Fetches and processes the manifest, CRL and children of the
/// certificate currently on top of `state`.
fn walk_point(
    store: &Store, config: &Config,
    state: &mut ValidationState, report: &mut ValidationReport,
) {
    let cert = state.peek_cert().expect("walk_point needs a current certificate").clone();

    let manifest_uri = match cert.rpki_manifest() {
        Some(uri) => uri.clone(),
        None => {
            warn!("certificate has no manifest URI, its subtree is unreachable.");
            return
        }
    };
    let ca_repository = match cert.ca_repository() {
        Some(uri) => uri.clone(),
        None => {
            warn!("{}: issuing certificate has no repository URI.", manifest_uri);
            return
        }
    };

    let bytes = match store.load(&UriRef::Rsync(manifest_uri.clone())) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("{}: {}.", manifest_uri, err);
            return
        }
    };
    let manifest = match Manifest::decode(bytes, config.strict) {
        Ok(manifest) => manifest,
        Err(_) => {
            warn!("{}: failed to decode manifest.", manifest_uri);
            return
        }
    };
    let (ee_cert, content) = match manifest.validate(&cert, config.strict) {
        Ok(parts) => parts,
        Err(_) => {
            warn!("{}: manifest failed to validate.", manifest_uri);
            return
        }
    };
    if content.is_stale() && !apply_stale_policy(config.stale_manifest, "manifest", &manifest_uri) {
        return
    }

    let crl_uri = match ee_cert.crl_uri() {
        Some(uri) if uri.ends_with(".crl") => uri.clone(),
        _ => {
            warn!("{}: manifest EE certificate names no CRL.", manifest_uri);
            return
        }
    };

    let mut crl_bytes = None;
    for entry in content.iter() {
        let (file, hash) = entry.into_pair();
        if !file.ends_with(b".crl") {
            continue
        }
        let uri = match ca_repository.join(&file) {
            Ok(uri) => uri,
            Err(_) => {
                warn!("{}: illegal file name on manifest.", manifest_uri);
                continue
            }
        };
        if uri != crl_uri {
            warn!("{}: unexpected CRL {} listed on manifest.", manifest_uri, uri);
            continue
        }
        let bytes = match store.load(&UriRef::Rsync(uri.clone())) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("{}: {}.", uri, err);
                continue
            }
        };
        if ManifestHash::new(hash, content.file_hash_alg()).verify(&bytes).is_err() {
            warn!("{}: manifest hash mismatch.", uri);
            continue
        }
        crl_bytes = Some(bytes);
    }
    let crl_bytes = match crl_bytes {
        Some(bytes) => bytes,
        None => {
            warn!("{}: CRL not found on manifest.", manifest_uri);
            return
        }
    };
    let mut crl = match Crl::decode(crl_bytes) {
        Ok(crl) => crl,
        Err(_) => {
            warn!("{}: CRL failed to decode.", crl_uri);
            return
        }
    };
    if crl.validate(cert.subject_public_key_info()).is_err() {
        warn!("{}: CRL failed to validate.", crl_uri);
        return
    }
    if crl.is_stale() && !apply_stale_policy(config.stale_manifest, "CRL", &crl_uri) {
        return
    }
    if content.len() > CRL_CACHE_LIMIT {
        crl.cache_serials();
    }
    if crl.contains(ee_cert.serial_number()) {
        warn!("{}: manifest EE certificate has been revoked.", manifest_uri);
        return
    }

    let parent_resources = state.peek_resources()
        .expect("walk_point needs a current resource set").clone();

    for entry in content.iter() {
        let (file, hash) = entry.into_pair();
        if file.ends_with(b".crl") {
            continue
        }
        let uri = match ca_repository.join(&file) {
            Ok(uri) => uri,
            Err(_) => {
                warn!("{}: illegal file name on manifest.", manifest_uri);
                continue
            }
        };
        let bytes = match store.load(&UriRef::Rsync(uri.clone())) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("{}: {}.", uri, err);
                continue
            }
        };
        if ManifestHash::new(hash, content.file_hash_alg()).verify(&bytes).is_err() {
            warn!("{}: manifest hash mismatch, object skipped.", uri);
            continue
        }
        dispatch(
            &uri, bytes, store, config, state, report,
            &crl_uri, &crl, &parent_resources,
        );
    }
}

fn apply_stale_policy(policy: FilterPolicy, what: &str, uri: &impl std::fmt::Display) -> bool {
    match policy {
        FilterPolicy::Reject => {
            warn!("{}: {} is stale, rejected.", uri, what);
            false
        }
        FilterPolicy::Warn => {
            warn!("{}: {} is stale.", uri, what);
            true
        }
        FilterPolicy::Accept => true,
    }
}

/// Checks a certificate's CRL URI against the manifest's registered CRL
/// and its serial number against the CRL's revocation list.
fn check_crl(cert: &Cert, crl_uri: &uri::Rsync, crl: &Crl) -> Result<(), CertError> {
    match cert.crl_uri() {
        Some(uri) if uri == crl_uri => {}
        _ => return Err(CertError),
    }
    if crl.contains(cert.serial_number()) {
        return Err(CertError)
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    uri: &uri::Rsync, bytes: Bytes, store: &Store, config: &Config,
    state: &mut ValidationState, report: &mut ValidationReport,
    crl_uri: &uri::Rsync, crl: &Crl, parent_resources: &ResourceSet,
) {
    let uri_ref = UriRef::Rsync(uri.clone());
    if uri.ends_with(".cer") {
        process_cer(uri, &uri_ref, bytes, store, config, state, report, crl_uri, crl, parent_resources);
    }
    else if uri.ends_with(".roa") {
        let issuer = state.peek_cert().expect("certificate on chain").clone();
        roa::process(bytes, &issuer, crl_uri, crl, config, report, &uri_ref);
    }
    else if uri.ends_with(".gbr") {
        let issuer = state.peek_cert().expect("certificate on chain").clone();
        process_gbr(&uri_ref, bytes, &issuer, crl_uri, crl, config);
    }
    else {
        warn!("{}: unrecognized object type, skipped.", uri);
    }
}

#[allow(clippy::too_many_arguments)]
fn process_cer(
    uri: &uri::Rsync, uri_ref: &UriRef, bytes: Bytes, store: &Store, config: &Config,
    state: &mut ValidationState, report: &mut ValidationReport,
    crl_uri: &uri::Rsync, crl: &Crl, parent_resources: &ResourceSet,
) {
    let cert = match Cert::decode(bytes) {
        Ok(cert) => cert,
        Err(_) => {
            warn!("{}: failed to decode certificate.", uri);
            return
        }
    };
    if cert.key_usage() == KeyUsage::Ca {
        process_ca(uri, cert, store, config, state, report, crl_uri, crl, parent_resources);
    }
    else {
        let issuer = state.peek_cert().expect("certificate on chain").clone();
        router_key::process(
            cert, &issuer, parent_resources, crl_uri, crl, config, report, uri_ref,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn process_ca(
    uri: &uri::Rsync, cert: Cert, store: &Store, config: &Config,
    state: &mut ValidationState, report: &mut ValidationReport,
    crl_uri: &uri::Rsync, crl: &Crl, parent_resources: &ResourceSet,
) {
    if state.chain_contains(&cert) {
        warn!("{}: certificate loop detected, skipped.", uri);
        return
    }
    let resolved = resources::parse_cert_resources(&cert);
    let issuer = state.peek_cert().expect("certificate on chain").clone();
    let cert = match cert.validate_ca(&issuer, config.strict) {
        Ok(cert) => cert,
        Err(_) => {
            warn!("{}: CA certificate failed to validate.", uri);
            return
        }
    };
    if check_crl(&cert, crl_uri, crl).is_err() {
        warn!("{}: CA certificate has been revoked.", uri);
        return
    }
    let resources = resolved.resolve(parent_resources);
    if !parent_resources.contains(&resources) {
        warn!("{}: CA certificate over-claims its issuer's resources.", uri);
        return
    }

    state.push_cert(cert, resources, false)
        .expect("push_cert only rejects empty trust anchors");
    walk_point(store, config, state, report);
    state.pop_cert();
}

fn process_gbr(
    uri: &UriRef, bytes: Bytes, issuer: &ResourceCert,
    crl_uri: &uri::Rsync, crl: &Crl, config: &Config,
) {
    let obj = match SignedObject::decode(bytes, config.strict) {
        Ok(obj) => obj,
        Err(_) => {
            warn!("{}: failed to decode ghostbusters record.", uri);
            return
        }
    };
    match obj.process(issuer, config.strict, |cert| check_crl(cert, crl_uri, crl)) {
        Ok(_) => debug!("{}: ghostbusters record validated.", uri),
        Err(_) => warn!("{}: ghostbusters record failed to validate.", uri),
    }
}


#[cfg(test)]
mod test {
    use super::*;

    /// The Open Question (a) resolution (SPEC_FULL.md §9): a stale
    /// manifest or CRL is rejected, warned-and-kept, or silently
    /// accepted depending on `Config::stale_manifest`.
    #[test]
    fn stale_policy_reject_invalidates() {
        assert!(!apply_stale_policy(FilterPolicy::Reject, "manifest", &"rsync://test/a.mft"));
    }

    #[test]
    fn stale_policy_warn_keeps_the_object() {
        assert!(apply_stale_policy(FilterPolicy::Warn, "manifest", &"rsync://test/a.mft"));
    }

    #[test]
    fn stale_policy_accept_keeps_the_object() {
        assert!(apply_stale_policy(FilterPolicy::Accept, "CRL", &"rsync://test/a.crl"));
    }
}
