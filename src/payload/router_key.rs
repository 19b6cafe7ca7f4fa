//! Router keys for BGPsec (§3, §4.4.2).

use std::cmp::Ordering;
use bytes::Bytes;


//------------ RouterKey --------------------------------------------------------

/// A BGPsec router key: authorizes `asn` to sign BGPsec updates with the
/// key identified by `ski` and carried in `spki`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouterKey {
    pub asn: u32,
    pub ski: [u8; 20],
    pub spki: Bytes,
}

impl RouterKey {
    pub fn new(asn: u32, ski: [u8; 20], spki: Bytes) -> Self {
        RouterKey { asn, ski, spki }
    }
}

impl PartialOrd for RouterKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RouterKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.asn.cmp(&other.asn) {
            Ordering::Equal => {}
            other => return other,
        }
        match self.ski.cmp(&other.ski) {
            Ordering::Equal => {}
            other => return other,
        }
        // Keeps Ord consistent with the derived Eq: two keys sharing an
        // ASN and SKI but carrying different key material must not
        // compare equal, or the snapshot merge-diff in delta.rs would
        // treat a key rotation as a no-op.
        self.spki.as_ref().cmp(other.spki.as_ref())
    }
}
