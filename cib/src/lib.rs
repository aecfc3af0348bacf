// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The correctness information base (cib).
//!
//! Each exchange keeps three tables describing which federated exchanges
//! lie on the forwarding path of a (participant, prefix) pair.
//!
//! - `input`: what each neighboring exchange told us, keyed by
//!   (ingress participant, prefix, sending exchange).
//! - `local`: the union of the input rows sharing an (ingress participant,
//!   prefix) key.
//! - `output`: what we tell the exchanges hosting the receiver behind an
//!   egress participant, keyed by (egress participant, prefix).
//!
//! Tables sit behind the [`table::Table`] trait and can be kept in memory
//! or in a sled database.

pub mod db;
pub mod error;
mod log;
mod proptest;
pub mod table;
#[cfg(test)]
pub mod test;
pub mod types;

pub use db::Cib;
pub use types::{
    CibDump, InputKey, InputRow, LocalKey, OutputKey, OutputRow, Update,
    UpdateType, Version,
};

pub const COMPONENT_CIB: &str = "cib";
pub const MOD_DB: &str = "database";

const INPUT: &str = "input";
const LOCAL: &str = "local";
const OUTPUT: &str = "output";
const WITHDRAWN: &str = "withdrawn";
