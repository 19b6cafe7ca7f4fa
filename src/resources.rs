//! Resource sets: IP address ranges and AS number ranges.
//!
//! This module implements §4.1 of the design: canonicalized, disjoint
//! sequences of IP and AS ranges, with containment and intersection. The
//! heavy lifting of decoding the RFC 3779 certificate extensions (ASN.1,
//! `IPAddrBlocks`/`ASIdentifiers`) is delegated to the `rpki` crate; this
//! module only consumes the already-decoded blocks it hands back and does
//! its own canonicalization and set arithmetic, since that's the part a
//! relying party actually needs to get right.

use std::cmp;
use std::fmt;
use rpki::repository::cert::{Cert, Overclaim};
use rpki::repository::resources::{AsBlock, AsResources, IpBlock, IpResources};
use rpki::repository::x509::Validity;


//------------ Afi ------------------------------------------------------------

/// Address family: IPv4 or IPv6.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Afi {
    Ipv4,
    Ipv6,
}

impl Afi {
    /// The number of bits in an address of this family.
    pub fn width(self) -> u8 {
        match self {
            Afi::Ipv4 => 32,
            Afi::Ipv6 => 128,
        }
    }
}

impl fmt::Display for Afi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Afi::Ipv4 => "v4",
            Afi::Ipv6 => "v6",
        })
    }
}


//------------ IpRange --------------------------------------------------------

/// A closed range of IP addresses of a single family.
///
/// Addresses are represented as `u128` regardless of family: IPv4
/// addresses simply occupy the low 32 bits. `start <= end` always holds
/// for a well-formed range.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IpRange {
    pub family: Afi,
    pub start: u128,
    pub end: u128,
}

impl IpRange {
    pub fn new(family: Afi, start: u128, end: u128) -> Self {
        IpRange { family, start, end }
    }

    /// Whether `self` fully covers `other`.
    pub fn contains(&self, other: &IpRange) -> bool {
        self.family == other.family
        && self.start <= other.start
        && self.end >= other.end
    }

    /// Whether two ranges touch or overlap, i.e. can be merged into one.
    fn adjoins(&self, other: &IpRange) -> bool {
        self.family == other.family
        && self.start <= other.end.saturating_add(1)
        && other.start <= self.end.saturating_add(1)
    }

    fn intersection(&self, other: &IpRange) -> Option<IpRange> {
        if self.family != other.family {
            return None
        }
        let start = cmp::max(self.start, other.start);
        let end = cmp::min(self.end, other.end);
        if start > end {
            None
        }
        else {
            Some(IpRange::new(self.family, start, end))
        }
    }

}


//------------ AsRange --------------------------------------------------------

/// A closed range of AS numbers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AsRange(pub u32, pub u32);

impl AsRange {
    pub fn new(min: u32, max: u32) -> Self {
        AsRange(min, max)
    }

    pub fn contains(&self, other: &AsRange) -> bool {
        self.0 <= other.0 && self.1 >= other.1
    }

    fn adjoins(&self, other: &AsRange) -> bool {
        self.0 <= other.1.saturating_add(1)
        && other.0 <= self.1.saturating_add(1)
    }

    fn intersection(&self, other: &AsRange) -> Option<AsRange> {
        let min = cmp::max(self.0, other.0);
        let max = cmp::min(self.1, other.1);
        if min > max { None } else { Some(AsRange::new(min, max)) }
    }
}


//------------ Resolved --------------------------------------------------------

/// The result of resolving a certificate's resource extensions: either an
/// explicit, canonicalized set, or a marker that the certificate inherits
/// its issuer's resources verbatim.
///
/// Inheritance is deliberately not resolved at parse time (§4.1): the
/// effective set of an "inherit" certificate depends on its parent's
/// *effective* set at validation time, which may itself be inherited.
#[derive(Clone, Debug)]
pub enum Resolved {
    Inherit,
    Set(ResourceSet),
}

impl Resolved {
    /// Resolves against the issuer's already-effective resource set.
    pub fn resolve(self, issuer: &ResourceSet) -> ResourceSet {
        match self {
            Resolved::Inherit => issuer.clone(),
            Resolved::Set(set) => set,
        }
    }
}


//------------ ResourceSet -----------------------------------------------------

/// A canonicalized, disjoint set of IP and AS ranges.
///
/// Canonical form: both sequences are sorted by start address/number and
/// any touching or overlapping ranges have been fused. Two resource sets
/// with the same content always compare equal range-for-range once
/// canonicalized, which is what makes `canonicalize` idempotent
/// (testable property 5).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceSet {
    ips: Vec<IpRange>,
    asns: Vec<AsRange>,
}

impl ResourceSet {
    pub fn empty() -> Self {
        ResourceSet { ips: Vec::new(), asns: Vec::new() }
    }

    pub fn from_parts(
        mut ips: Vec<IpRange>, mut asns: Vec<AsRange>
    ) -> Self {
        canonicalize_ips(&mut ips);
        canonicalize_asns(&mut asns);
        ResourceSet { ips, asns }
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.asns.is_empty()
    }

    pub fn ip_ranges(&self) -> &[IpRange] {
        &self.ips
    }

    pub fn as_ranges(&self) -> &[AsRange] {
        &self.asns
    }

    /// Re-applies canonicalization. Idempotent: canonicalizing an
    /// already-canonical set returns an identical set.
    pub fn canonicalize(&self) -> Self {
        ResourceSet::from_parts(self.ips.clone(), self.asns.clone())
    }

    /// Whether every element of `other` lies within `self`.
    pub fn contains(&self, other: &ResourceSet) -> bool {
        other.ips.iter().all(|want| {
            self.ips.iter().any(|have| have.contains(want))
        })
        && other.asns.iter().all(|want| {
            self.asns.iter().any(|have| have.contains(want))
        })
    }

    /// Whether `self` contains the single IP range `prefix`.
    pub fn contains_ip(&self, prefix: &IpRange) -> bool {
        self.ips.iter().any(|have| have.contains(prefix))
    }

    pub fn intersect(&self, other: &ResourceSet) -> ResourceSet {
        let mut ips = Vec::new();
        for a in &self.ips {
            for b in &other.ips {
                if let Some(r) = a.intersection(b) {
                    ips.push(r)
                }
            }
        }
        let mut asns = Vec::new();
        for a in &self.asns {
            for b in &other.asns {
                if let Some(r) = a.intersection(b) {
                    asns.push(r)
                }
            }
        }
        ResourceSet::from_parts(ips, asns)
    }

    /// `self` minus `other`: the parts of `self` not covered by `other`.
    pub fn difference(&self, other: &ResourceSet) -> ResourceSet {
        let mut ips = Vec::new();
        for a in &self.ips {
            ips.extend(subtract_ip(*a, &other.ips));
        }
        let mut asns = Vec::new();
        for a in &self.asns {
            asns.extend(subtract_as(*a, &other.asns));
        }
        ResourceSet::from_parts(ips, asns)
    }
}

fn subtract_ip(remaining: IpRange, holes: &[IpRange]) -> Vec<IpRange> {
    let mut out = vec![remaining];
    for hole in holes {
        let mut next = Vec::new();
        for r in out {
            if let Some(cut) = r.intersection(hole) {
                if cut.start > r.start {
                    next.push(IpRange::new(r.family, r.start, cut.start - 1));
                }
                if cut.end < r.end {
                    next.push(IpRange::new(r.family, cut.end + 1, r.end));
                }
            }
            else {
                next.push(r);
            }
        }
        out = next;
    }
    out
}

fn subtract_as(r: AsRange, holes: &[AsRange]) -> Vec<AsRange> {
    let mut out = vec![r];
    for hole in holes {
        let mut next = Vec::new();
        for r in out {
            if let Some(cut) = r.intersection(hole) {
                if cut.0 > r.0 {
                    next.push(AsRange::new(r.0, cut.0 - 1));
                }
                if cut.1 < r.1 {
                    next.push(AsRange::new(cut.1 + 1, r.1));
                }
            }
            else {
                next.push(r);
            }
        }
        out = next;
    }
    out
}

fn canonicalize_ips(ips: &mut Vec<IpRange>) {
    ips.sort_by(|a, b| (a.family as u8, a.start).cmp(&(b.family as u8, b.start)));
    let mut merged: Vec<IpRange> = Vec::with_capacity(ips.len());
    for range in ips.drain(..) {
        match merged.last_mut() {
            Some(last) if last.adjoins(&range) => {
                last.end = cmp::max(last.end, range.end);
            }
            _ => merged.push(range),
        }
    }
    *ips = merged;
}

fn canonicalize_asns(asns: &mut Vec<AsRange>) {
    asns.sort_by_key(|r| r.0);
    let mut merged: Vec<AsRange> = Vec::with_capacity(asns.len());
    for range in asns.drain(..) {
        match merged.last_mut() {
            Some(last) if last.adjoins(&range) => {
                last.1 = cmp::max(last.1, range.1);
            }
            _ => merged.push(range),
        }
    }
    *asns = merged;
}


//------------ Prefix -----------------------------------------------------------

/// An IP prefix in CIDR notation: an address together with a prefix
/// length, normalized so that the trailing host bits are zero.
///
/// This is the VRP's notion of a prefix (§3): a ROA's `(prefix, maxLength)`
/// pair is normalized into one of these rather than kept as an arbitrary
/// address range.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Prefix {
    pub family: Afi,
    pub addr: u128,
    pub len: u8,
}

impl Prefix {
    pub fn new(family: Afi, addr: u128, len: u8) -> Self {
        let mask = Self::host_mask(family, len);
        Prefix { family, addr: addr & !mask, len }
    }

    fn host_mask(family: Afi, len: u8) -> u128 {
        let width = family.width();
        if len >= width {
            0
        }
        else {
            // `width - len` can be 128 (an IPv6 `::/0`), which is out of
            // range for a `u128` shift -- handle that host-bits-is-everything
            // case directly rather than shifting by the bit width.
            let host_bits = width - len;
            if host_bits >= 128 {
                u128::MAX
            }
            else {
                (1u128 << host_bits) - 1
            }
        }
    }

    /// The closed address range this prefix covers.
    pub fn range(&self) -> IpRange {
        let mask = Self::host_mask(self.family, self.len);
        IpRange::new(self.family, self.addr, self.addr | mask)
    }
}

/// Error parsing a prefix in `addr/len` notation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParsePrefixError;

impl fmt::Display for ParsePrefixError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("invalid IP prefix")
    }
}

impl std::str::FromStr for Prefix {
    type Err = ParsePrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s.split_once('/').ok_or(ParsePrefixError)?;
        let len = len.parse::<u8>().map_err(|_| ParsePrefixError)?;
        match addr.parse::<std::net::IpAddr>().map_err(|_| ParsePrefixError)? {
            std::net::IpAddr::V4(addr) => {
                if len > 32 { return Err(ParsePrefixError) }
                Ok(Prefix::new(Afi::Ipv4, u32::from(addr) as u128, len))
            }
            std::net::IpAddr::V6(addr) => {
                if len > 128 { return Err(ParsePrefixError) }
                Ok(Prefix::new(Afi::Ipv6, u128::from(addr), len))
            }
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.family {
            Afi::Ipv4 => {
                let addr = self.addr as u32;
                write!(
                    f, "{}.{}.{}.{}/{}",
                    (addr >> 24) & 0xff, (addr >> 16) & 0xff,
                    (addr >> 8) & 0xff, addr & 0xff, self.len
                )
            }
            Afi::Ipv6 => {
                write!(f, "{}/{}", std::net::Ipv6Addr::from(self.addr), self.len)
            }
        }
    }
}


//------------ Extracting resources from a certificate -------------------------

/// Consumes a certificate's already ASN.1-decoded RFC 3779 IP resource
/// extension and produces either `Inherit` or a canonicalized
/// [`ResourceSet`] covering only the IP ranges (AS ranges empty).
///
/// Per §4.1: an empty, non-inherited extension is not itself an error
/// here -- it only becomes fatal when it appears on a trust anchor, which
/// `state::push_cert` checks.
pub fn parse_ip_extension(cert: &Cert) -> Resolved {
    let mut ips = Vec::new();
    let mut inherits = false;
    for (resources, family) in [
        (cert.v4_resources(), Afi::Ipv4), (cert.v6_resources(), Afi::Ipv6)
    ] {
        match resources {
            IpResources::Inherit => inherits = true,
            IpResources::Blocks(blocks) => {
                for block in blocks.iter() {
                    ips.push(ip_block_to_range(block, family));
                }
            }
        }
    }
    if inherits && ips.is_empty() {
        Resolved::Inherit
    }
    else {
        Resolved::Set(ResourceSet::from_parts(ips, Vec::new()))
    }
}

/// As [`parse_ip_extension`] but for the RFC 3779 AS identifier extension.
pub fn parse_as_extension(cert: &Cert) -> Resolved {
    match cert.as_resources() {
        AsResources::Inherit => Resolved::Inherit,
        AsResources::Blocks(blocks) => {
            let asns = blocks.iter().map(as_block_to_range).collect();
            Resolved::Set(ResourceSet::from_parts(Vec::new(), asns))
        }
    }
}

/// Combines the IP and AS extensions of a certificate into one resolved
/// resource set (inherited only if *both* extensions inherit; RPKI
/// certificates in practice never mix inherited and explicit forms across
/// IP/AS, but nothing stops us from handling it range-by-range).
pub fn parse_cert_resources(cert: &Cert) -> Resolved {
    match (parse_ip_extension(cert), parse_as_extension(cert)) {
        (Resolved::Inherit, Resolved::Inherit) => Resolved::Inherit,
        (Resolved::Inherit, Resolved::Set(asns)) => Resolved::Set(asns),
        (Resolved::Set(ips), Resolved::Inherit) => Resolved::Set(ips),
        (Resolved::Set(ips), Resolved::Set(asns)) => Resolved::Set(
            ResourceSet::from_parts(
                ips.ips, asns.asns
            )
        ),
    }
}

fn ip_block_to_range(block: IpBlock, family: Afi) -> IpRange {
    let (start, end) = block.range();
    IpRange::new(family, start.into(), end.into())
}

fn as_block_to_range(block: AsBlock) -> AsRange {
    let (min, max) = block.range();
    AsRange::new(min.into(), max.into())
}

/// How strictly to treat resource over-claiming while validating a
/// certificate against its issuer, per RFC 6487's "verified" vs "reject"
/// modes. The walker always uses `Refuse` -- a containment failure
/// invalidates the subtree (§4.4) -- but `Cert::validate` from the `rpki`
/// crate still wants this to be spelled out explicitly.
pub fn overclaim_policy() -> Overclaim {
    Overclaim::Refuse
}

/// Checks the not-before/not-after window of a certificate's validity
/// against a reference time; used by the manifest staleness check and by
/// CRL handling.
pub fn validity_covers(validity: Validity, now: rpki::repository::x509::Time) -> bool {
    validity.not_before() <= now && now < validity.not_after()
}


#[cfg(test)]
mod test {
    use super::*;

    fn ip4(start: u32, end: u32) -> IpRange {
        IpRange::new(Afi::Ipv4, start as u128, end as u128)
    }

    #[test]
    fn canonicalize_merges_overlaps() {
        let set = ResourceSet::from_parts(
            vec![ip4(10, 20), ip4(15, 25), ip4(30, 30)], Vec::new()
        );
        assert_eq!(set.ip_ranges(), &[ip4(10, 25), ip4(30, 30)]);
    }

    #[test]
    fn canonicalize_merges_adjacent() {
        let set = ResourceSet::from_parts(
            vec![ip4(0, 9), ip4(10, 19)], Vec::new()
        );
        assert_eq!(set.ip_ranges(), &[ip4(0, 19)]);
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let set = ResourceSet::from_parts(
            vec![ip4(5, 9), ip4(0, 4), ip4(20, 30)], Vec::new()
        );
        let twice = set.canonicalize().canonicalize();
        assert_eq!(set.canonicalize(), twice);
    }

    #[test]
    fn contains_checks_full_coverage() {
        let parent = ResourceSet::from_parts(
            vec![ip4(0, 0xFF_FFFF)],
            vec![AsRange::new(64500, 64510)],
        );
        let child_ok = ResourceSet::from_parts(
            vec![ip4(0, 0xFFFF)],
            vec![AsRange::new(64501, 64502)],
        );
        let child_bad = ResourceSet::from_parts(
            vec![ip4(0, 0xFF_FFFFF)],
            Vec::new(),
        );
        assert!(parent.contains(&child_ok));
        assert!(!parent.contains(&child_bad));
    }

    #[test]
    fn intersect_keeps_only_overlap() {
        let a = ResourceSet::from_parts(vec![ip4(0, 100)], Vec::new());
        let b = ResourceSet::from_parts(vec![ip4(50, 200)], Vec::new());
        assert_eq!(a.intersect(&b).ip_ranges(), &[ip4(50, 100)]);
    }

    #[test]
    fn prefix_from_str_masks_host_bits() {
        let prefix: Prefix = "10.0.0.5/24".parse().unwrap();
        assert_eq!(prefix, Prefix::new(Afi::Ipv4, 0x0A00_0000, 24));
    }

    #[test]
    fn difference_removes_covered_parts() {
        let a = ResourceSet::from_parts(vec![ip4(0, 100)], Vec::new());
        let b = ResourceSet::from_parts(vec![ip4(30, 60)], Vec::new());
        assert_eq!(a.difference(&b).ip_ranges(), &[ip4(0, 29), ip4(61, 100)]);
    }

    #[test]
    fn ipv6_zero_prefix_does_not_overflow() {
        let prefix = Prefix::new(Afi::Ipv6, 0, 0);
        assert_eq!(prefix.range(), IpRange::new(Afi::Ipv6, 0, u128::MAX));
    }
}
