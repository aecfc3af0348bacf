// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed width bit strings and their MAC address rendering.

use crate::error::Error;
use std::fmt;
use std::str::FromStr;

/// A bit string of at most 64 bits. Bit 0 is the most significant bit,
/// which is also the leftmost character of the textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bits {
    value: u64,
    width: u8,
}

fn mask(width: u8) -> u64 {
    match width {
        0 => 0,
        64.. => u64::MAX,
        w => (1u64 << w) - 1,
    }
}

impl Bits {
    pub const MAX_WIDTH: u8 = 64;

    /// Encode `value` as an unsigned big-endian bit string of exactly
    /// `width` bits.
    pub fn encode(value: u64, width: u8) -> Result<Self, Error> {
        if width > Self::MAX_WIDTH {
            return Err(Error::WidthOverflow(width.into()));
        }
        if value & !mask(width) != 0 {
            return Err(Error::FieldOverflow { value, width });
        }
        Ok(Self { value, width })
    }

    pub fn zero(width: u8) -> Result<Self, Error> {
        Self::encode(0, width)
    }

    pub fn ones(width: u8) -> Result<Self, Error> {
        Self::encode(mask(width), width)
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    /// Whether bit `i`, counted from the most significant end, is set.
    pub fn bit(&self, i: u8) -> bool {
        if i >= self.width {
            return false;
        }
        self.value >> (self.width - 1 - i) & 1 == 1
    }

    /// Append `other` to the least significant end of `self`.
    pub fn concat(&self, other: Bits) -> Result<Self, Error> {
        let width = u16::from(self.width) + u16::from(other.width);
        if width > u16::from(Self::MAX_WIDTH) {
            return Err(Error::WidthOverflow(width));
        }
        let value = match other.width {
            64 => other.value,
            w => self.value << w | other.value,
        };
        Ok(Self {
            value,
            width: width as u8,
        })
    }

    /// Concatenate `fields` in order, the first becoming the most
    /// significant.
    pub fn join(fields: &[Bits]) -> Result<Self, Error> {
        fields
            .iter()
            .try_fold(Bits { value: 0, width: 0 }, |acc, f| acc.concat(*f))
    }

    /// Split `self` into unsigned integers, one per entry of `widths`, most
    /// significant first. The widths must sum to the width of `self`.
    pub fn decode(&self, widths: &[u8]) -> Result<Vec<u64>, Error> {
        let total: u16 = widths.iter().map(|w| u16::from(*w)).sum();
        if total != u16::from(self.width) {
            return Err(Error::WidthMismatch {
                expected: self.width,
                found: total,
            });
        }
        let mut remaining = self.width;
        let mut out = Vec::with_capacity(widths.len());
        for w in widths {
            remaining -= w;
            let shifted = match remaining {
                64 => 0,
                r => self.value >> r,
            };
            out.push(shifted & mask(*w));
        }
        Ok(out)
    }

    /// Render as a colon separated hexadecimal MAC address, two digits per
    /// octet.
    pub fn to_mac(&self) -> Result<String, Error> {
        if self.width % 8 != 0 {
            return Err(Error::NotOctetAligned(self.width));
        }
        let octets = self.width / 8;
        Ok((0..octets)
            .map(|i| {
                let shift = 8 * u32::from(octets - 1 - i);
                format!("{:02x}", (self.value >> shift) & 0xff)
            })
            .collect::<Vec<_>>()
            .join(":"))
    }

    /// Parse a colon separated hexadecimal MAC address. The width of the
    /// result is eight bits per octet.
    pub fn from_mac(mac: &str) -> Result<Self, Error> {
        let malformed = || Error::MalformedMac(mac.to_string());
        let mut value = 0u64;
        let mut width = 0u16;
        for octet in mac.split(':') {
            if octet.len() != 2 {
                return Err(malformed());
            }
            let o = u8::from_str_radix(octet, 16).map_err(|_| malformed())?;
            width += 8;
            if width > u16::from(Self::MAX_WIDTH) {
                return Err(malformed());
            }
            value = value << 8 | u64::from(o);
        }
        Ok(Self {
            value,
            width: width as u8,
        })
    }
}

impl fmt::Display for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.width == 0 {
            return Ok(());
        }
        write!(f, "{:0width$b}", self.value, width = usize::from(self.width))
    }
}

impl FromStr for Bits {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > usize::from(Self::MAX_WIDTH) {
            return Err(Error::MalformedBits(s.to_string()));
        }
        let mut value = 0u64;
        for c in s.chars() {
            let b = match c {
                '0' => 0,
                '1' => 1,
                _ => return Err(Error::MalformedBits(s.to_string())),
            };
            value = value << 1 | b;
        }
        Ok(Self {
            value,
            width: s.len() as u8,
        })
    }
}

#[cfg(test)]
mod test {
    use super::Bits;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_pads_to_width() {
        let b = Bits::encode(5, 6).unwrap();
        assert_eq!(b.to_string(), "000101");
        assert_eq!(
            Bits::encode(64, 6),
            Err(Error::FieldOverflow {
                value: 64,
                width: 6
            })
        );
        assert_eq!(Bits::encode(0, 0).unwrap().to_string(), "");
        assert_eq!(Bits::ones(64).unwrap().value(), u64::MAX);
        assert_eq!(Bits::encode(1, 65), Err(Error::WidthOverflow(65)));
    }

    #[test]
    fn bit_indexing_is_msb_first() {
        let b: Bits = "100100".parse().unwrap();
        assert!(b.bit(0));
        assert!(!b.bit(1));
        assert!(b.bit(3));
        assert!(!b.bit(6));
    }

    #[test]
    fn concat_and_decode() {
        let b = Bits::join(&[
            Bits::encode(0b10, 2).unwrap(),
            Bits::encode(0b0110, 4).unwrap(),
            Bits::encode(0b11, 2).unwrap(),
        ])
        .unwrap();
        assert_eq!(b.to_string(), "10011011");
        assert_eq!(b.decode(&[2, 4, 2]).unwrap(), vec![0b10, 0b0110, 0b11]);
        assert_eq!(
            b.decode(&[4, 2]),
            Err(Error::WidthMismatch {
                expected: 8,
                found: 6
            })
        );

        let wide = Bits::ones(60)
            .unwrap()
            .concat(Bits::zero(4).unwrap())
            .unwrap();
        assert_eq!(wide.width(), 64);
        assert!(wide.concat(Bits::ones(1).unwrap()).is_err());
    }

    #[test]
    fn mac_rendering() {
        let b = Bits::join(&[
            Bits::encode(1, 6).unwrap(),
            Bits::encode(0b101, 30).unwrap(),
            Bits::encode(7, 12).unwrap(),
        ])
        .unwrap();
        let mac = b.to_mac().unwrap();
        assert_eq!(mac, "04:00:00:00:50:07");
        assert_eq!(Bits::from_mac(&mac).unwrap(), b);

        assert_eq!(
            Bits::encode(1, 12).unwrap().to_mac(),
            Err(Error::NotOctetAligned(12))
        );
        assert!(Bits::from_mac("04:0:00").is_err());
        assert!(Bits::from_mac("zz:00").is_err());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("10a1".parse::<Bits>().is_err());
        assert!("1".repeat(65).parse::<Bits>().is_err());
    }
}
