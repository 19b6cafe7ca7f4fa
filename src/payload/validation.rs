//! Accumulating the payload produced while walking one trust anchor.
//!
//! [`ValidationReport`] collects the VRPs and router keys the tree walker
//! (§4.4) discovers. Several reports -- one per trust anchor -- are merged
//! into a single [`PayloadSnapshot`] at the end of a validation cycle.

use super::router_key::RouterKey;
use super::snapshot::PayloadSnapshot;
use super::vrp::Vrp;


//------------ ValidationReport -------------------------------------------------

/// The VRPs and router keys produced while walking a single trust anchor.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    vrps: Vec<Vrp>,
    router_keys: Vec<RouterKey>,
}

impl ValidationReport {
    pub fn new() -> Self {
        ValidationReport { vrps: Vec::new(), router_keys: Vec::new() }
    }

    /// Records a VRP produced by a validated ROA (§4.4.1).
    pub fn push_vrp(&mut self, vrp: Vrp) {
        self.vrps.push(vrp);
    }

    /// Records a router key produced by a validated BGPsec router
    /// certificate (§4.4.2).
    pub fn push_router_key(&mut self, key: RouterKey) {
        self.router_keys.push(key);
    }

    pub fn vrps(&self) -> &[Vrp] {
        &self.vrps
    }

    pub fn router_keys(&self) -> &[RouterKey] {
        &self.router_keys
    }

    /// Merges another trust anchor's report into this one.
    pub fn merge(&mut self, other: ValidationReport) {
        self.vrps.extend(other.vrps);
        self.router_keys.extend(other.router_keys);
    }

    /// Turns the accumulated reports of every trust anchor into a single
    /// snapshot.
    ///
    /// [`PayloadSnapshot::new`] sorts and deduplicates, which is what
    /// resolves duplicate VRPs published under more than one trust
    /// anchor: identical payloads collapse to one entry regardless of
    /// which TA produced them.
    pub fn into_snapshot(self) -> PayloadSnapshot {
        PayloadSnapshot::new(self.vrps, self.router_keys)
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
    fn merge_combines_reports() {
        let mut a = ValidationReport::new();
        a.push_vrp(vrp(1));
        let mut b = ValidationReport::new();
        b.push_vrp(vrp(2));
        a.merge(b);
        assert_eq!(a.vrps().len(), 2);
    }

    #[test]
    fn into_snapshot_sorts_and_dedups() {
        let mut report = ValidationReport::new();
        report.push_vrp(vrp(2));
        report.push_vrp(vrp(1));
        report.push_vrp(vrp(1));
        let snapshot = report.into_snapshot();
        assert_eq!(snapshot.vrps().len(), 2);
    }
}
