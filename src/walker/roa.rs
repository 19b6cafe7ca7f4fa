//! Turning a validated ROA into VRPs (§4.4.1).

use std::net::IpAddr;
use bytes::Bytes;
use log::warn;
use rpki::repository::cert::{Cert, ResourceCert};
use rpki::repository::crl::Crl;
use rpki::repository::roa::Roa;
use rpki::uri;
use crate::config::Config;
use crate::payload::{ValidationReport, Vrp};
use crate::resources::{Afi, Prefix};
use crate::store::UriRef;

/// Decodes, validates and extracts the VRPs of one `.roa` object, pushing
/// them onto `report`.
///
/// One ROA can cover several prefixes, each with its own maxLength; every
/// `(prefix, maxLength)` pair that passes the sanity check in §4.4.1
/// becomes one VRP sharing the ROA's single AS number.
pub fn process(
    bytes: Bytes,
    issuer: &ResourceCert,
    crl_uri: &uri::Rsync,
    crl: &Crl,
    config: &Config,
    report: &mut ValidationReport,
    uri: &UriRef,
) {
    let roa = match Roa::decode(bytes, config.strict) {
        Ok(roa) => roa,
        Err(_) => {
            warn!("{}: failed to decode ROA.", uri);
            return
        }
    };
    let route = match roa.process(
        issuer, config.strict,
        |cert: &Cert| super::check_crl(cert, crl_uri, crl),
    ) {
        Ok(route) => route,
        Err(_) => {
            warn!("{}: ROA failed to validate.", uri);
            return
        }
    };

    let asn = u32::from(route.as_id());
    for addr in route.iter() {
        let (family, value) = match addr.address() {
            IpAddr::V4(addr) => (Afi::Ipv4, u32::from(addr) as u128),
            IpAddr::V6(addr) => (Afi::Ipv6, u128::from(addr)),
        };
        let prefix = Prefix::new(family, value, addr.address_length());
        let max_length = addr.max_length();
        if !max_length_ok(&prefix, max_length, family) {
            warn!(
                "{}: ROA entry for {} has an invalid maxLength {}, skipped.",
                uri, prefix, max_length
            );
            continue
        }
        report.push_vrp(Vrp::new(asn, prefix, max_length));
    }
}

/// Whether `maxLength` is sane for a ROA entry covering `prefix` (§3): it
/// must be at least the prefix length and at most the address family's
/// bit width.
fn max_length_ok(prefix: &Prefix, max_length: u8, family: Afi) -> bool {
    max_length >= prefix.len && max_length <= family.width()
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn max_length_within_bounds_is_ok() {
        let prefix = Prefix::new(Afi::Ipv4, 0xC0000200, 24);
        assert!(max_length_ok(&prefix, 24, Afi::Ipv4));
        assert!(max_length_ok(&prefix, 32, Afi::Ipv4));
    }

    #[test]
    fn max_length_shorter_than_prefix_is_rejected() {
        let prefix = Prefix::new(Afi::Ipv4, 0xC0000200, 24);
        assert!(!max_length_ok(&prefix, 16, Afi::Ipv4));
    }

    #[test]
    fn max_length_beyond_family_width_is_rejected() {
        let prefix = Prefix::new(Afi::Ipv6, 0x2001_0db8_0000_0000_0000_0000_0000_0000, 32);
        assert!(!max_length_ok(&prefix, 200, Afi::Ipv6));
    }
}
