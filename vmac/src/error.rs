// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use sdx_types::{ParticipantId, Prefix};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("value {value} does not fit in {width} bits")]
    FieldOverflow { value: u64, width: u8 },

    #[error("bit string of width {0} exceeds 64 bits")]
    WidthOverflow(u16),

    #[error("field widths add up to {found} bits, expected {expected}")]
    WidthMismatch { expected: u8, found: u16 },

    #[error("width {0} is not a whole number of octets")]
    NotOctetAligned(u8),

    #[error("malformed bit string {0:?}")]
    MalformedBits(String),

    #[error("malformed mac address {0:?}")]
    MalformedMac(String),

    #[error("invalid vmac configuration: {0}")]
    Config(String),

    #[error("participant id {participant} does not fit {width} best path bits")]
    ParticipantIdOverflow {
        participant: ParticipantId,
        width: u8,
    },

    #[error("{needed} supersets needed but only {available} ids available")]
    SupersetSpaceExhausted { needed: usize, available: usize },

    #[error("position {position} exceeds superset size {size}")]
    PositionOverflow { position: usize, size: u8 },

    #[error("virtual next hop pool {0} exhausted")]
    VnhPoolExhausted(Prefix),
}
