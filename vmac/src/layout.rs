// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::bits::Bits;
use crate::error::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Widths of the three VMAC fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub superset_id_size: u8,
    pub membership_size: u8,
    pub best_path_size: u8,
}

/// The decoded fields of a VMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmacFields {
    pub superset_id: u64,
    pub membership: u64,
    pub best_path: u64,
}

impl Layout {
    fn widths(&self) -> [u8; 3] {
        [
            self.superset_id_size,
            self.membership_size,
            self.best_path_size,
        ]
    }

    pub fn width(&self) -> u8 {
        self.superset_id_size + self.membership_size + self.best_path_size
    }

    pub fn compose(&self, fields: &VmacFields) -> Result<Vmac, Error> {
        Ok(Vmac(Bits::join(&[
            Bits::encode(fields.superset_id, self.superset_id_size)?,
            Bits::encode(fields.membership, self.membership_size)?,
            Bits::encode(fields.best_path, self.best_path_size)?,
        ])?))
    }

    pub fn decompose(&self, vmac: &Vmac) -> Result<VmacFields, Error> {
        let v = vmac.0.decode(&self.widths())?;
        Ok(VmacFields {
            superset_id: v[0],
            membership: v[1],
            best_path: v[2],
        })
    }

    /// The membership field value with only `position` set. Position 0 is
    /// the most significant bit of the field.
    pub fn membership_bit(&self, position: usize) -> Result<u64, Error> {
        if position >= usize::from(self.membership_size) {
            return Err(Error::PositionOverflow {
                position,
                size: self.membership_size,
            });
        }
        Ok(1u64 << (usize::from(self.membership_size) - 1 - position))
    }

    /// The all-ones value of a field `width` bits wide.
    pub fn field_ones(width: u8) -> Result<u64, Error> {
        Ok(Bits::ones(width)?.value())
    }
}

/// A virtual MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vmac(pub Bits);

impl Vmac {
    pub fn bits(&self) -> Bits {
        self.0
    }

    pub fn mac(&self) -> Result<String, Error> {
        self.0.to_mac()
    }

    pub fn from_mac(mac: &str) -> Result<Self, Error> {
        Ok(Self(Bits::from_mac(mac)?))
    }
}

impl fmt::Display for Vmac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.to_mac() {
            Ok(mac) => write!(f, "{mac}"),
            Err(_) => write!(f, "{}", self.0),
        }
    }
}

impl Serialize for Vmac {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Vmac {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Vmac::from_mac(&s).map_err(serde::de::Error::custom)
    }
}
