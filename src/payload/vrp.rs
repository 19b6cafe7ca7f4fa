//! Validated ROA Payloads (§3).

use std::cmp::Ordering;
use std::fmt;
use crate::resources::Prefix;


//------------ Vrp -------------------------------------------------------------

/// A Validated ROA Payload: an authorization for `asn` to originate routes
/// for `prefix`, up to `max_length` bits long.
///
/// `prefix.len <= max_length <= prefix.family.width()` is an invariant of
/// every `Vrp` produced by the walker (§3); a ROA claiming otherwise is
/// rejected before a `Vrp` is built (§4.4.1).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Vrp {
    pub asn: u32,
    pub prefix: Prefix,
    pub max_length: u8,
}

impl Vrp {
    pub fn new(asn: u32, prefix: Prefix, max_length: u8) -> Self {
        Vrp { asn, prefix, max_length }
    }
}

impl fmt::Display for Vrp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} => {}-{}", self.prefix, self.max_length, self.asn)
    }
}

impl PartialOrd for Vrp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Vrp {
    fn cmp(&self, other: &Self) -> Ordering {
        // More specific prefixes first, then by prefix, then by origin. A
        // stable order lets the delta builder diff two sorted snapshots
        // with a single linear merge (§4.6). The family comparison is
        // what keeps this consistent with the derived `Eq`: an IPv4 and
        // an IPv6 prefix can share the same numeric address (both stored
        // as `u128`), so without it two unrelated VRPs could compare
        // equal and silently vanish from a diff.
        match (self.prefix.family as u8).cmp(&(other.prefix.family as u8)) {
            Ordering::Equal => {}
            other => return other,
        }
        match other.max_length.cmp(&self.max_length) {
            Ordering::Equal => {}
            other => return other,
        }
        match self.prefix.addr.cmp(&other.prefix.addr) {
            Ordering::Equal => {}
            other => return other,
        }
        match self.prefix.len.cmp(&other.prefix.len) {
            Ordering::Equal => {}
            other => return other,
        }
        self.asn.cmp(&other.asn)
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::resources::Afi;

    fn vrp(asn: u32, addr: u32, len: u8, max_length: u8) -> Vrp {
        Vrp::new(asn, Prefix::new(Afi::Ipv4, addr as u128, len), max_length)
    }

    #[test]
    fn more_specific_sorts_first() {
        let a = vrp(64496, 0xC0000200, 24, 24);
        let b = vrp(64496, 0xC0000200, 24, 32);
        assert!(b < a);
    }
}
