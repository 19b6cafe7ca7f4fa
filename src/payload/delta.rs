//! The difference between two successive snapshots (§3, §4.6).

use crate::rtr::serial::Serial;
use super::router_key::RouterKey;
use super::snapshot::PayloadSnapshot;
use super::vrp::Vrp;


//------------ PayloadDelta ----------------------------------------------------

/// The VRPs and router keys added and removed between two snapshots.
///
/// A delta stored at `to_serial` carries the change from `to_serial - 1` to
/// `to_serial` (§4.6). `adds` and `removes` are disjoint from each other.
#[derive(Clone, Debug)]
pub struct PayloadDelta {
    from_serial: Serial,
    to_serial: Serial,
    added_vrps: Vec<Vrp>,
    removed_vrps: Vec<Vrp>,
    added_router_keys: Vec<RouterKey>,
    removed_router_keys: Vec<RouterKey>,
}

impl PayloadDelta {
    /// Computes the delta from `old` to `new`, numbered `to_serial`.
    ///
    /// Returns `None` if the two snapshots are identical -- per the commit
    /// procedure in §4.6, an empty delta means nothing to commit.
    pub fn construct(
        old: &PayloadSnapshot, new: &PayloadSnapshot,
        from_serial: Serial, to_serial: Serial,
    ) -> Option<Self> {
        let (added_vrps, removed_vrps) = diff(old.vrps(), new.vrps());
        let (added_router_keys, removed_router_keys) =
            diff(old.router_keys(), new.router_keys());
        if added_vrps.is_empty() && removed_vrps.is_empty()
            && added_router_keys.is_empty()
            && removed_router_keys.is_empty()
        {
            return None
        }
        Some(PayloadDelta {
            from_serial, to_serial,
            added_vrps, removed_vrps,
            added_router_keys, removed_router_keys,
        })
    }

    pub fn from_serial(&self) -> Serial {
        self.from_serial
    }

    pub fn to_serial(&self) -> Serial {
        self.to_serial
    }

    pub fn added_vrps(&self) -> &[Vrp] {
        &self.added_vrps
    }

    pub fn removed_vrps(&self) -> &[Vrp] {
        &self.removed_vrps
    }

    pub fn added_router_keys(&self) -> &[RouterKey] {
        &self.added_router_keys
    }

    pub fn removed_router_keys(&self) -> &[RouterKey] {
        &self.removed_router_keys
    }

    pub fn is_empty(&self) -> bool {
        self.added_vrps.is_empty() && self.removed_vrps.is_empty()
            && self.added_router_keys.is_empty()
            && self.removed_router_keys.is_empty()
    }
}

/// Computes `(added, removed)` between two sorted, deduplicated slices.
fn diff<T: Ord + Clone>(old: &[T], new: &[T]) -> (Vec<T>, Vec<T>) {
    let mut added = Vec::new();
    let mut removed = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        match old[i].cmp(&new[j]) {
            std::cmp::Ordering::Equal => { i += 1; j += 1; }
            std::cmp::Ordering::Less => { removed.push(old[i].clone()); i += 1; }
            std::cmp::Ordering::Greater => { added.push(new[j].clone()); j += 1; }
        }
    }
    removed.extend_from_slice(&old[i..]);
    added.extend_from_slice(&new[j..]);
    (added, removed)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::resources::{Afi, Prefix};

    fn vrp(asn: u32) -> Vrp {
        Vrp::new(asn, Prefix::new(Afi::Ipv4, 0xC0000200, 24), 24)
    }

    #[test]
    fn identical_snapshots_produce_no_delta() {
        let old = PayloadSnapshot::new(vec![vrp(1)], Vec::new());
        let new = PayloadSnapshot::new(vec![vrp(1)], Vec::new());
        assert!(
            PayloadDelta::construct(
                &old, &new, Serial::from(1), Serial::from(2),
            ).is_none()
        );
    }

    #[test]
    fn added_and_removed_are_computed() {
        let old = PayloadSnapshot::new(vec![vrp(1), vrp(2)], Vec::new());
        let new = PayloadSnapshot::new(vec![vrp(2), vrp(3)], Vec::new());
        let delta = PayloadDelta::construct(
            &old, &new, Serial::from(1), Serial::from(2),
        ).unwrap();
        assert_eq!(delta.added_vrps(), &[vrp(3)]);
        assert_eq!(delta.removed_vrps(), &[vrp(1)]);
    }
}
