//! Turning a validated BGPsec router certificate into router keys (§4.4.2).

use bytes::Bytes;
use log::warn;
use rpki::repository::cert::{Cert, ResourceCert};
use rpki::repository::crl::Crl;
use rpki::uri;
use crate::config::Config;
use crate::payload::{RouterKey, ValidationReport};
use crate::resources::{self, ResourceSet};
use crate::store::UriRef;

/// Decodes, validates and extracts the router keys of one EE certificate
/// carrying the BGPsec router extended key usage.
///
/// A router certificate's AS resource extension can name a range of ASNs
/// rather than a single one; per §4.4.2, one [`RouterKey`] is emitted for
/// each AS the certificate is authorized for, all sharing the same
/// subject key identifier and public key.
pub fn process(
    cert: Cert,
    issuer: &ResourceCert,
    parent_resources: &ResourceSet,
    crl_uri: &uri::Rsync,
    crl: &Crl,
    config: &Config,
    report: &mut ValidationReport,
    uri: &UriRef,
) {
    let resolved = resources::parse_as_extension(&cert);

    let cert = match cert.validate_router(issuer, config.strict) {
        Ok(cert) => cert,
        Err(_) => {
            warn!("{}: router certificate failed to validate.", uri);
            return
        }
    };
    if super::check_crl(&cert, crl_uri, crl).is_err() {
        warn!("{}: router certificate has been revoked.", uri);
        return
    }

    let resources = resolved.resolve(parent_resources);
    if resources.as_ranges().is_empty() {
        warn!("{}: router certificate carries no AS resources.", uri);
        return
    }
    if !parent_resources.contains(&resources) {
        warn!("{}: router certificate over-claims its issuer's AS resources.", uri);
        return
    }

    let mut ski = [0u8; 20];
    let ski_bytes: &[u8] = cert.subject_key_identifier().as_ref();
    if ski_bytes.len() != ski.len() {
        warn!("{}: unexpected subject key identifier length, skipped.", uri);
        return
    }
    ski.copy_from_slice(ski_bytes);
    let spki: Bytes = cert.subject_public_key_info().to_info_bytes();

    emit(&resources, ski, spki, report);
}

/// Emits one [`RouterKey`] per AS number covered by `resources`, all
/// sharing `ski`/`spki` (§4.4.2).
///
/// Split out from [`process`] so the fan-out from an AS *range* (as
/// opposed to a single ASN) is exercisable without needing a decoded
/// certificate.
fn emit(
    resources: &ResourceSet, ski: [u8; 20], spki: Bytes,
    report: &mut ValidationReport,
) {
    for range in resources.as_ranges() {
        for asn in range.0..=range.1 {
            report.push_router_key(RouterKey::new(asn, ski, spki.clone()));
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::resources::AsRange;

    #[test]
    fn emits_one_key_per_asn_in_range() {
        let resources = ResourceSet::from_parts(
            Vec::new(), vec![AsRange::new(64496, 64498)],
        );
        let mut report = ValidationReport::new();
        emit(&resources, [7u8; 20], Bytes::from_static(b"spki"), &mut report);
        assert_eq!(report.router_keys().len(), 3);
        let asns: Vec<u32> = report.router_keys().iter().map(|k| k.asn).collect();
        assert_eq!(asns, vec![64496, 64497, 64498]);
        assert!(report.router_keys().iter().all(|k| k.ski == [7u8; 20]));
    }

    #[test]
    fn emits_single_key_for_single_asn() {
        let resources = ResourceSet::from_parts(
            Vec::new(), vec![AsRange::new(64500, 64500)],
        );
        let mut report = ValidationReport::new();
        emit(&resources, [1u8; 20], Bytes::from_static(b"spki"), &mut report);
        assert_eq!(report.router_keys().len(), 1);
        assert_eq!(report.router_keys()[0].asn, 64500);
    }

    #[test]
    fn no_as_resources_emits_nothing() {
        let resources = ResourceSet::empty();
        let mut report = ValidationReport::new();
        emit(&resources, [1u8; 20], Bytes::from_static(b"spki"), &mut report);
        assert!(report.router_keys().is_empty());
    }
}
