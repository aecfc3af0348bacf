// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use sdx_types::{ParticipantId, Prefix, SdxId, SdxSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SEP: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Announce,
    Withdraw,
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Announce => write!(f, "announce"),
            Self::Withdraw => write!(f, "withdraw"),
        }
    }
}

/// The advisory version a correctness message was stamped with by its
/// sender. Versions only order messages about the same input row, there is
/// no ordering across rows or exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub timestamp: f64,
    pub random_value: u64,
}

impl Version {
    pub fn is_older_than(&self, other: &Version) -> bool {
        (self.timestamp, self.random_value)
            < (other.timestamp, other.random_value)
    }
}

fn parse_field<T: FromStr>(key: &str, field: Option<&str>) -> Result<T, Error> {
    field
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| Error::DbKey(key.to_string()))
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct InputKey {
    pub ingress: ParticipantId,
    pub prefix: Prefix,
    pub sender_sdx: SdxId,
}

impl InputKey {
    pub fn db_key(&self) -> String {
        format!("{}{SEP}{}", LocalKey::from(*self).db_key(), self.sender_sdx)
    }

    pub fn from_db_key(key: &str) -> Result<Self, Error> {
        let mut fields = key.split(SEP);
        let k = Self {
            ingress: parse_field(key, fields.next())?,
            prefix: parse_field(key, fields.next())?,
            sender_sdx: parse_field(key, fields.next())?,
        };
        match fields.next() {
            None => Ok(k),
            Some(_) => Err(Error::DbKey(key.to_string())),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LocalKey {
    pub ingress: ParticipantId,
    pub prefix: Prefix,
}

impl LocalKey {
    pub fn db_key(&self) -> String {
        format!("{}{SEP}{}", self.ingress, self.prefix.db_key())
    }

    /// The key prefix shared by every input row that feeds this local row.
    pub fn input_scan_prefix(&self) -> String {
        format!("{}{SEP}", self.db_key())
    }

    pub fn from_db_key(key: &str) -> Result<Self, Error> {
        let mut fields = key.split(SEP);
        let k = Self {
            ingress: parse_field(key, fields.next())?,
            prefix: parse_field(key, fields.next())?,
        };
        match fields.next() {
            None => Ok(k),
            Some(_) => Err(Error::DbKey(key.to_string())),
        }
    }
}

impl From<InputKey> for LocalKey {
    fn from(k: InputKey) -> Self {
        Self {
            ingress: k.ingress,
            prefix: k.prefix,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct OutputKey {
    pub egress: ParticipantId,
    pub prefix: Prefix,
}

impl OutputKey {
    pub fn db_key(&self) -> String {
        format!("{}{SEP}{}", self.egress, self.prefix.db_key())
    }

    pub fn from_db_key(key: &str) -> Result<Self, Error> {
        let LocalKey { ingress, prefix } = LocalKey::from_db_key(key)?;
        Ok(Self {
            egress: ingress,
            prefix,
        })
    }
}

/// An input row: the exchanges a neighbor reported on the path behind an
/// ingress participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRow {
    pub sdx_set: SdxSet,
    #[serde(default)]
    pub version: Option<Version>,
}

/// An output row: what this exchange advertises about the path behind an
/// egress participant, and the downstream participant it is advertised for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRow {
    pub receiver: ParticipantId,
    pub sdx_set: SdxSet,
}

/// The outcome of a table update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update<V> {
    pub changed: bool,
    pub old: Option<V>,
    pub new: Option<V>,
}

impl<V: Clone> Update<V> {
    pub fn unchanged(current: Option<V>) -> Self {
        Self {
            changed: false,
            old: current.clone(),
            new: current,
        }
    }
}

/// A snapshot of all three tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CibDump {
    pub input: Vec<(InputKey, InputRow)>,
    pub local: Vec<(LocalKey, SdxSet)>,
    pub output: Vec<(OutputKey, OutputRow)>,
}

#[cfg(test)]
mod test {
    use super::{InputKey, LocalKey, OutputKey, Version};
    use pretty_assertions::assert_eq;

    #[test]
    fn keys_round_trip() {
        let k = InputKey {
            ingress: 3,
            prefix: "10.0.0.0/8".parse().unwrap(),
            sender_sdx: 2,
        };
        assert_eq!(k.db_key(), "3|10.0.0.0/8|2");
        assert_eq!(InputKey::from_db_key("3|10.0.0.0/8|2").unwrap(), k);

        let l = LocalKey::from(k);
        assert_eq!(l.input_scan_prefix(), "3|10.0.0.0/8|");
        assert!(k.db_key().starts_with(&l.input_scan_prefix()));

        assert!(InputKey::from_db_key("3|10.0.0.0/8").is_err());
        assert!(InputKey::from_db_key("3|10.0.0.0/8|2|1").is_err());
        assert!(LocalKey::from_db_key("x|10.0.0.0/8").is_err());
        assert_eq!(
            OutputKey::from_db_key("5|192.0.2.0/24").unwrap(),
            OutputKey {
                egress: 5,
                prefix: "192.0.2.0/24".parse().unwrap()
            }
        );
    }

    #[test]
    fn version_order() {
        let a = Version {
            timestamp: 10.5,
            random_value: 7,
        };
        let b = Version {
            timestamp: 10.5,
            random_value: 9,
        };
        let c = Version {
            timestamp: 11.0,
            random_value: 1,
        };
        assert!(a.is_older_than(&b));
        assert!(b.is_older_than(&c));
        assert!(!c.is_older_than(&a));
        assert!(!a.is_older_than(&a));
    }
}
