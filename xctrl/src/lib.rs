// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The exchange controller.
//!
//! An exchange runs a VMAC encoder and a loop detector over a shared route
//! information base. Route events from the route server and correctness
//! messages from federated exchanges arrive over TCP, are queued to a single
//! consumer thread that owns all mutable state, and any correctness
//! messages that result are handed to a sender thread for delivery.
//!
//! ```text
//!  route events ──► listener ─┐
//!                             ├─► consumer ──► sender ──► peers
//!  peer messages ─► listener ─┘
//! ```

pub mod config;
pub mod detector;
pub mod error;
pub mod exchange;
pub mod listener;
mod log;
pub mod messages;
pub mod runtime;
pub mod sender;
pub mod topology;

pub use config::FederationConfig;
pub use exchange::Exchange;
pub use runtime::ExchangeRuntime;

pub const COMPONENT_XCTRL: &str = "xctrl";
pub const MOD_DETECTOR: &str = "loop detector";
pub const MOD_RUNTIME: &str = "runtime";
