//! SLURM local exceptions (RFC 8416), §4.5.
//!
//! A SLURM file is a JSON document with two top-level sections:
//! `validationOutputFilters`, which removes VRPs and router keys that
//! would otherwise have been accepted, and `locallyAddedAssertions`,
//! which adds synthetic ones regardless of what validation produced.
//! [`LocalExceptions`] loads that document and exposes the query
//! interface the commit stage consults -- it is never consulted by the
//! walker itself.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use bytes::Bytes;
use serde::Deserialize;
use crate::payload::{RouterKey, Vrp};
use crate::resources::{Afi, Prefix};


//------------ LocalExceptions -------------------------------------------------

/// A loaded SLURM file's query interface.
#[derive(Clone, Debug, Default)]
pub struct LocalExceptions {
    prefix_filters: Vec<PrefixFilter>,
    bgpsec_filters: Vec<BgpsecFilter>,
    prefix_assertions: Vec<Vrp>,
    bgpsec_assertions: Vec<RouterKey>,
}

impl LocalExceptions {
    /// An exceptions set with no filters and no assertions.
    pub fn empty() -> Self {
        LocalExceptions::default()
    }

    /// Loads and parses a SLURM file from disk.
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses a SLURM file already read into memory.
    pub fn from_json(content: &str) -> Result<Self, LoadError> {
        let file: SlurmFile = serde_json::from_str(content)?;

        let mut prefix_filters = Vec::new();
        for filter in file.validation_output_filters.prefix_filters {
            prefix_filters.push(PrefixFilter {
                prefix: filter.prefix.as_deref().map(Prefix::from_str)
                    .transpose().map_err(|_| ParseError::InvalidPrefix)?,
                asn: filter.asn,
            });
        }

        let mut bgpsec_filters = Vec::new();
        for filter in file.validation_output_filters.bgpsec_filters {
            bgpsec_filters.push(BgpsecFilter {
                asn: filter.asn,
                ski: filter.ski.as_deref().map(decode_ski)
                    .transpose()?,
            });
        }

        let mut prefix_assertions = Vec::new();
        for assertion in file.locally_added_assertions.prefix_assertions {
            let prefix = Prefix::from_str(&assertion.prefix)
                .map_err(|_| ParseError::InvalidPrefix)?;
            let max_length = assertion.max_prefix_length.unwrap_or(prefix.len);
            if max_length < prefix.len || max_length > prefix.family.width() {
                return Err(ParseError::InvalidMaxLength.into())
            }
            prefix_assertions.push(Vrp::new(assertion.asn, prefix, max_length));
        }

        let mut bgpsec_assertions = Vec::new();
        for assertion in file.locally_added_assertions.bgpsec_assertions {
            let ski = decode_ski(&assertion.ski)?;
            let spki = base64::decode(&assertion.router_public_key)
                .map_err(|_| ParseError::InvalidBase64)?;
            bgpsec_assertions.push(
                RouterKey::new(assertion.asn, ski, Bytes::from(spki))
            );
        }

        Ok(LocalExceptions {
            prefix_filters, bgpsec_filters,
            prefix_assertions, bgpsec_assertions,
        })
    }

    /// Whether any loaded prefix filter matches `vrp`.
    ///
    /// A filter with only a prefix matches any VRP whose prefix is
    /// contained in it; a filter with only an ASN matches on origin
    /// alone; a filter with both matches only if both agree.
    pub fn is_vrp_filtered(&self, vrp: &Vrp) -> bool {
        self.prefix_filters.iter().any(|filter| {
            let prefix_matches = filter.prefix.map_or(true, |prefix| {
                prefix.range().contains(&vrp.prefix.range())
            });
            let asn_matches = filter.asn.map_or(true, |asn| asn == vrp.asn);
            prefix_matches && asn_matches
        })
    }

    /// Whether any loaded BGPsec filter matches `key`.
    pub fn is_router_key_filtered(&self, key: &RouterKey) -> bool {
        self.bgpsec_filters.iter().any(|filter| {
            let asn_matches = filter.asn.map_or(true, |asn| asn == key.asn);
            let ski_matches = filter.ski.map_or(true, |ski| ski == key.ski);
            asn_matches && ski_matches
        })
    }

    /// The synthetic VRPs to be added regardless of validation outcome.
    pub fn iterate_prefix_assertions(&self) -> impl Iterator<Item = &Vrp> {
        self.prefix_assertions.iter()
    }

    /// The synthetic router keys to be added regardless of validation
    /// outcome.
    pub fn iterate_bgpsec_assertions(&self) -> impl Iterator<Item = &RouterKey> {
        self.bgpsec_assertions.iter()
    }

    /// Applies the overlay to a freshly validated payload set.
    ///
    /// Filtered entries are removed first, then the assertions are
    /// unioned in; an assertion that collides with a surviving entry on
    /// its key (ASN + prefix, or ASN + SKI) replaces it (§4.5 commit
    /// policy).
    pub fn apply(
        &self, vrps: Vec<Vrp>, router_keys: Vec<RouterKey>,
    ) -> (Vec<Vrp>, Vec<RouterKey>) {
        let mut vrps: Vec<Vrp> = vrps.into_iter()
            .filter(|vrp| !self.is_vrp_filtered(vrp))
            .collect();
        for assertion in &self.prefix_assertions {
            match vrps.iter_mut().find(|vrp| {
                vrp.asn == assertion.asn && vrp.prefix == assertion.prefix
            }) {
                Some(existing) => *existing = *assertion,
                None => vrps.push(*assertion),
            }
        }

        let mut router_keys: Vec<RouterKey> = router_keys.into_iter()
            .filter(|key| !self.is_router_key_filtered(key))
            .collect();
        for assertion in &self.bgpsec_assertions {
            match router_keys.iter_mut().find(|key| {
                key.asn == assertion.asn && key.ski == assertion.ski
            }) {
                Some(existing) => *existing = assertion.clone(),
                None => router_keys.push(assertion.clone()),
            }
        }

        (vrps, router_keys)
    }
}

fn decode_ski(value: &str) -> Result<[u8; 20], ParseError> {
    let bytes = base64::decode(value)
        .map_err(|_| ParseError::InvalidBase64)?;
    bytes.try_into().map_err(|_| ParseError::InvalidSki)
}


//------------ PrefixFilter / BgpsecFilter --------------------------------------

/// A loaded `prefixFilters` entry; at least one of `prefix`/`asn` is set.
#[derive(Clone, Copy, Debug)]
struct PrefixFilter {
    prefix: Option<Prefix>,
    asn: Option<u32>,
}

/// A loaded `bgpsecFilters` entry; at least one of `asn`/`ski` is set.
#[derive(Clone, Copy, Debug)]
struct BgpsecFilter {
    asn: Option<u32>,
    ski: Option<[u8; 20]>,
}


//------------ JSON wire format (RFC 8416) --------------------------------------

#[derive(Deserialize)]
struct SlurmFile {
    #[serde(rename = "validationOutputFilters", default)]
    validation_output_filters: OutputFilters,
    #[serde(rename = "locallyAddedAssertions", default)]
    locally_added_assertions: LocalAssertions,
}

#[derive(Default, Deserialize)]
struct OutputFilters {
    #[serde(rename = "prefixFilters", default)]
    prefix_filters: Vec<JsonPrefixFilter>,
    #[serde(rename = "bgpsecFilters", default)]
    bgpsec_filters: Vec<JsonBgpsecFilter>,
}

#[derive(Default, Deserialize)]
struct LocalAssertions {
    #[serde(rename = "prefixAssertions", default)]
    prefix_assertions: Vec<JsonPrefixAssertion>,
    #[serde(rename = "bgpsecAssertions", default)]
    bgpsec_assertions: Vec<JsonBgpsecAssertion>,
}

#[derive(Deserialize)]
struct JsonPrefixFilter {
    asn: Option<u32>,
    prefix: Option<String>,
}

#[derive(Deserialize)]
struct JsonBgpsecFilter {
    asn: Option<u32>,
    #[serde(rename = "SKI")]
    ski: Option<String>,
}

#[derive(Deserialize)]
struct JsonPrefixAssertion {
    asn: u32,
    prefix: String,
    #[serde(rename = "maxPrefixLength")]
    max_prefix_length: Option<u8>,
}

#[derive(Deserialize)]
struct JsonBgpsecAssertion {
    asn: u32,
    #[serde(rename = "SKI")]
    ski: String,
    #[serde(rename = "routerPublicKey")]
    router_public_key: String,
}


//------------ LoadError / ParseError --------------------------------------------

/// The ways loading a SLURM file from disk can fail.
#[derive(Debug)]
pub enum LoadError {
    Io(io::Error),
    Parse(ParseError),
}

impl From<io::Error> for LoadError {
    fn from(err: io::Error) -> Self {
        LoadError::Io(err)
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(err: serde_json::Error) -> Self {
        LoadError::Parse(ParseError::Json(err))
    }
}

impl From<ParseError> for LoadError {
    fn from(err: ParseError) -> Self {
        LoadError::Parse(err)
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadError::Io(err) => write!(f, "I/O error: {}", err),
            LoadError::Parse(err) => write!(f, "parse error: {}", err),
        }
    }
}

/// The ways a syntactically valid JSON document can fail to be a valid
/// SLURM file.
#[derive(Debug)]
pub enum ParseError {
    Json(serde_json::Error),
    InvalidPrefix,
    InvalidMaxLength,
    InvalidBase64,
    InvalidSki,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::Json(err) => write!(f, "invalid JSON: {}", err),
            ParseError::InvalidPrefix => f.write_str("invalid prefix"),
            ParseError::InvalidMaxLength => {
                f.write_str("maxPrefixLength outside prefix/family bounds")
            }
            ParseError::InvalidBase64 => f.write_str("invalid base64 value"),
            ParseError::InvalidSki => f.write_str("SKI is not 20 bytes"),
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn vrp(asn: u32, prefix: &str, max_length: u8) -> Vrp {
        Vrp::new(asn, Prefix::from_str(prefix).unwrap(), max_length)
    }

    #[test]
    fn prefix_filter_matches_contained_prefix() {
        let json = r#"{
            "slurmVersion": 1,
            "validationOutputFilters": {
                "prefixFilters": [
                    { "prefix": "10.0.0.0/8", "comment": "test" }
                ],
                "bgpsecFilters": []
            },
            "locallyAddedAssertions": {
                "prefixAssertions": [],
                "bgpsecAssertions": []
            }
        }"#;
        let exceptions = LocalExceptions::from_json(json).unwrap();
        assert!(exceptions.is_vrp_filtered(&vrp(64500, "10.1.0.0/16", 24)));
        assert!(!exceptions.is_vrp_filtered(&vrp(64500, "11.1.0.0/16", 24)));
    }

    #[test]
    fn prefix_assertion_is_added() {
        let json = r#"{
            "slurmVersion": 1,
            "validationOutputFilters": {
                "prefixFilters": [], "bgpsecFilters": []
            },
            "locallyAddedAssertions": {
                "prefixAssertions": [
                    {
                        "asn": 64496,
                        "prefix": "192.0.2.0/24",
                        "maxPrefixLength": 24,
                        "comment": "test"
                    }
                ],
                "bgpsecAssertions": []
            }
        }"#;
        let exceptions = LocalExceptions::from_json(json).unwrap();
        let asserted: Vec<_> = exceptions.iterate_prefix_assertions().collect();
        assert_eq!(asserted.len(), 1);
        assert_eq!(asserted[0].asn, 64496);
    }

    #[test]
    fn apply_filters_then_asserts() {
        let json = r#"{
            "slurmVersion": 1,
            "validationOutputFilters": {
                "prefixFilters": [{ "prefix": "10.0.0.0/8" }],
                "bgpsecFilters": []
            },
            "locallyAddedAssertions": {
                "prefixAssertions": [
                    { "asn": 64496, "prefix": "192.0.2.0/24" }
                ],
                "bgpsecAssertions": []
            }
        }"#;
        let exceptions = LocalExceptions::from_json(json).unwrap();
        let vrps = vec![vrp(64500, "10.1.0.0/16", 24), vrp(64497, "198.51.100.0/24", 24)];
        let (vrps, _) = exceptions.apply(vrps, Vec::new());
        assert_eq!(vrps.len(), 2);
        assert!(vrps.iter().any(|v| v.asn == 64496));
        assert!(vrps.iter().any(|v| v.asn == 64497));
        assert!(!vrps.iter().any(|v| v.asn == 64500));
    }
}
