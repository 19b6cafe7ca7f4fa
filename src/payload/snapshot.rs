//! The complete set of validated payload data at one point in time (§3).

use chrono::{DateTime, Utc};
use super::router_key::RouterKey;
use super::vrp::Vrp;


//------------ PayloadSnapshot -------------------------------------------------

/// An immutable, sorted set of VRPs and router keys (§3, §4.6).
///
/// Sorted order lets [`super::delta::PayloadDelta::construct`] diff two
/// snapshots with a single linear merge instead of a hash-based set
/// difference.
#[derive(Clone, Debug)]
pub struct PayloadSnapshot {
    vrps: Vec<Vrp>,
    router_keys: Vec<RouterKey>,
    created: DateTime<Utc>,
}

impl PayloadSnapshot {
    pub fn new(
        mut vrps: Vec<Vrp>, mut router_keys: Vec<RouterKey>,
    ) -> Self {
        vrps.sort_unstable();
        vrps.dedup();
        router_keys.sort_unstable();
        router_keys.dedup();
        PayloadSnapshot { vrps, router_keys, created: Utc::now() }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn vrps(&self) -> &[Vrp] {
        &self.vrps
    }

    pub fn router_keys(&self) -> &[RouterKey] {
        &self.router_keys
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn is_empty(&self) -> bool {
        self.vrps.is_empty() && self.router_keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vrps.len() + self.router_keys.len()
    }
}

impl Default for PayloadSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::resources::{Afi, Prefix};

    fn vrp(asn: u32) -> Vrp {
        Vrp::new(asn, Prefix::new(Afi::Ipv4, 0xC0000200, 24), 24)
    }

    #[test]
    fn new_sorts_and_dedups() {
        let snapshot = PayloadSnapshot::new(
            vec![vrp(2), vrp(1), vrp(1)], Vec::new(),
        );
        assert_eq!(snapshot.vrps().len(), 2);
    }
}
