// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual MAC (VMAC) encoding for the SDX fabric.
//!
//! A VMAC is a fixed width bit string stamped on packets at the edge of the
//! exchange. It carries three fields, most significant first.
//!
//! ```text
//! | superset id | membership bitmap | best path participant |
//! ```
//!
//! The membership bitmap has one bit per position of the superset named by
//! the id field. A set bit means the participant at that position announced
//! the destination prefix, which lets the fabric match "can this packet be
//! sent to participant X" with a single masked compare. Supersets are
//! maintained by [`superset::SupersetTable`] and the whole encoding is driven
//! by [`encoder::VmacEncoder`].

pub mod bits;
pub mod config;
pub mod encoder;
pub mod error;
pub mod layout;
mod log;
pub mod superset;
pub mod vnh;

mod proptest;

pub use bits::Bits;
pub use config::VmacConfig;
pub use encoder::VmacEncoder;
pub use error::Error;
pub use layout::Vmac;
pub use superset::{SupersetChange, SupersetTable};

pub const COMPONENT_VMAC: &str = "vmac";
pub const MOD_ENCODER: &str = "encoder";
