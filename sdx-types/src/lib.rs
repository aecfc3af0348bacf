// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core types shared across the SDX controller components.
//!
//! This crate provides the identifiers, prefixes and route representations
//! exchanged between the VMAC encoder, the RIB, the CIB and the loop
//! detector. It has minimal dependencies so every other crate in the
//! workspace can use it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// Participant identifier. Participant ids are global across a federation,
/// a participant attached to several exchanges carries the same id at each.
pub type ParticipantId = u32;

/// Exchange (SDX) identifier.
pub type SdxId = u32;

/// Autonomous system number.
pub type Asn = u32;

/// A set of exchange identifiers.
pub type SdxSet = BTreeSet<SdxId>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrefixParseError {
    #[error("expected CIDR representation <addr>/<length>")]
    Cidr,

    #[error("malformed ip addr {0}")]
    Addr(String),

    #[error("malformed length {0}")]
    Length(String),

    #[error("prefix length {0} exceeds 32")]
    TooLong(u8),
}

/// An IPv4 route destination.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub struct Prefix {
    pub value: Ipv4Addr,
    pub length: u8,
}

impl PartialOrd for Prefix {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prefix {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.value != other.value {
            return self.value.cmp(&other.value);
        }
        self.length.cmp(&other.length)
    }
}

impl Prefix {
    const HOST_MASK: u8 = 32;

    /// Create a new `Prefix` from an IP address and net mask.
    /// The newly created `Prefix` will have its host bits zeroed upon creation
    /// e.g.
    /// ```
    /// use sdx_types::Prefix;
    /// use std::net::Ipv4Addr;
    /// let p = Prefix::new(Ipv4Addr::new(10, 0, 0, 10), 24);
    /// assert_eq!(p.value, Ipv4Addr::new(10, 0, 0, 0));
    /// ```
    pub fn new(ip: Ipv4Addr, length: u8) -> Self {
        let mut new = Self { value: ip, length };
        new.unset_host_bits();
        new
    }

    fn mask(&self) -> u32 {
        match self.length {
            0 => 0,
            n => (!0u32) << (Self::HOST_MASK - n),
        }
    }

    fn unset_host_bits(&mut self) {
        self.value = Ipv4Addr::from_bits(self.value.to_bits() & self.mask())
    }

    /// The number of usable host addresses in this prefix. The network
    /// address is never handed out, and for prefixes shorter than /31 the
    /// broadcast address is excluded as well.
    pub fn host_count(&self) -> u64 {
        let size = 1u64 << (Self::HOST_MASK - self.length);
        match self.length {
            32 => 1,
            31 => 2,
            _ => size - 2,
        }
    }

    /// The `n`th usable host address of this prefix, counting from zero.
    pub fn nth_host(&self, n: u64) -> Option<Ipv4Addr> {
        if n >= self.host_count() {
            return None;
        }
        let offset = match self.length {
            31 | 32 => n,
            _ => n + 1,
        };
        let base = u64::from(self.value.to_bits());
        u32::try_from(base + offset).ok().map(Ipv4Addr::from_bits)
    }

    pub fn db_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.length)
    }
}

impl FromStr for Prefix {
    type Err = PrefixParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, length) = s.split_once('/').ok_or(PrefixParseError::Cidr)?;
        let value: Ipv4Addr = value
            .parse()
            .map_err(|_| PrefixParseError::Addr(value.to_string()))?;
        let length: u8 = length
            .parse()
            .map_err(|_| PrefixParseError::Length(length.to_string()))?;
        if length > Self::HOST_MASK {
            return Err(PrefixParseError::TooLong(length));
        }
        Ok(Self::new(value, length))
    }
}

// Prefixes travel as CIDR strings on every wire format the controller
// speaks, so serialize through Display/FromStr rather than as a struct.
impl Serialize for Prefix {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Prefix {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A physical port a participant is attached to the fabric with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: u32,
    pub mac: String,
    pub ip: Ipv4Addr,
}

/// A route as held in the adj-RIB-in of the route server, announced by
/// `participant`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub participant: ParticipantId,
    pub prefix: Prefix,
    pub as_path: Vec<Asn>,
    pub next_hop: Ipv4Addr,
    pub local_pref: Option<u32>,
    pub med: Option<u32>,
}

/// A route announcement or withdrawal delivered by the BGP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteUpdate {
    pub participant: ParticipantId,
    pub prefix: Prefix,
    #[serde(default)]
    pub as_path: Vec<Asn>,
    pub next_hop: Ipv4Addr,
    #[serde(default)]
    pub local_pref: Option<u32>,
    #[serde(default)]
    pub med: Option<u32>,
    #[serde(default)]
    pub withdraw: bool,
}

impl RouteUpdate {
    pub fn announce(
        participant: ParticipantId,
        prefix: Prefix,
        as_path: Vec<Asn>,
        next_hop: Ipv4Addr,
    ) -> Self {
        Self {
            participant,
            prefix,
            as_path,
            next_hop,
            local_pref: None,
            med: None,
            withdraw: false,
        }
    }

    pub fn withdraw(participant: ParticipantId, prefix: Prefix) -> Self {
        Self {
            participant,
            prefix,
            as_path: Vec::new(),
            next_hop: Ipv4Addr::UNSPECIFIED,
            local_pref: None,
            med: None,
            withdraw: true,
        }
    }
}

impl From<RouteUpdate> for Route {
    fn from(u: RouteUpdate) -> Self {
        Self {
            participant: u.participant,
            prefix: u.prefix,
            as_path: u.as_path,
            next_hop: u.next_hop,
            local_pref: u.local_pref,
            med: u.med,
        }
    }
}

/// Egress participants an ingress participant must not be steered to for a
/// prefix, because doing so risks a forwarding loop across exchanges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForbiddenPaths {
    paths: BTreeMap<ParticipantId, BTreeMap<Prefix, BTreeSet<ParticipantId>>>,
}

impl ForbiddenPaths {
    pub fn is_forbidden(
        &self,
        ingress: ParticipantId,
        prefix: &Prefix,
        egress: ParticipantId,
    ) -> bool {
        self.get(ingress, prefix)
            .is_some_and(|egresses| egresses.contains(&egress))
    }

    pub fn get(
        &self,
        ingress: ParticipantId,
        prefix: &Prefix,
    ) -> Option<&BTreeSet<ParticipantId>> {
        self.paths.get(&ingress)?.get(prefix)
    }

    /// Returns true if `egress` was not already forbidden.
    pub fn insert(
        &mut self,
        ingress: ParticipantId,
        prefix: Prefix,
        egress: ParticipantId,
    ) -> bool {
        self.paths
            .entry(ingress)
            .or_default()
            .entry(prefix)
            .or_default()
            .insert(egress)
    }

    /// Returns true if `egress` was forbidden.
    pub fn remove(
        &mut self,
        ingress: ParticipantId,
        prefix: &Prefix,
        egress: ParticipantId,
    ) -> bool {
        let Some(prefixes) = self.paths.get_mut(&ingress) else {
            return false;
        };
        let Some(egresses) = prefixes.get_mut(prefix) else {
            return false;
        };
        let removed = egresses.remove(&egress);
        if egresses.is_empty() {
            prefixes.remove(prefix);
        }
        if prefixes.is_empty() {
            self.paths.remove(&ingress);
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn prefix_parse_clears_host_bits() {
        let p: Prefix = "10.1.2.3/8".parse().unwrap();
        assert_eq!(p.to_string(), "10.0.0.0/8");
        assert_eq!("10.0.0.0".parse::<Prefix>(), Err(PrefixParseError::Cidr));
        assert_eq!(
            "10.0.0.0/33".parse::<Prefix>(),
            Err(PrefixParseError::TooLong(33))
        );
    }

    #[test]
    fn prefix_hosts() {
        let p: Prefix = "172.16.0.0/30".parse().unwrap();
        assert_eq!(p.host_count(), 2);
        assert_eq!(p.nth_host(0), Some(Ipv4Addr::new(172, 16, 0, 1)));
        assert_eq!(p.nth_host(1), Some(Ipv4Addr::new(172, 16, 0, 2)));
        assert_eq!(p.nth_host(2), None);
    }

    #[test]
    fn forbidden_paths_prune_empty_entries() {
        let pfx: Prefix = "10.0.0.0/8".parse().unwrap();
        let mut fp = ForbiddenPaths::default();
        assert!(fp.insert(1, pfx, 5));
        assert!(!fp.insert(1, pfx, 5));
        assert!(fp.is_forbidden(1, &pfx, 5));
        assert!(!fp.is_forbidden(2, &pfx, 5));
        assert!(fp.remove(1, &pfx, 5));
        assert!(!fp.remove(1, &pfx, 5));
        assert!(fp.is_empty());
    }

    #[test]
    fn prefix_serializes_as_cidr() {
        let p: Prefix = "192.0.2.0/24".parse().unwrap();
        let s = serde_json::to_string(&p).unwrap();
        assert_eq!(s, "\"192.0.2.0/24\"");
        let back: Prefix = serde_json::from_str(&s).unwrap();
        assert_eq!(back, p);
        assert!(serde_json::from_str::<Prefix>("\"bogus\"").is_err());
    }
}
