// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Federation configuration.
//!
//! One JSON document describes every exchange of the federation and every
//! participant attached to them. Each exchange daemon loads the whole
//! document and picks out its own view by exchange id.

use crate::error::Error;
use sdx_types::{Asn, ParticipantId, Port, SdxId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use vmac::VmacConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub id: SdxId,

    /// Where the exchange accepts correctness messages.
    pub address: SocketAddr,

    /// Where the exchange accepts route events from its route server.
    #[serde(default)]
    pub route_address: Option<SocketAddr>,

    pub participants: BTreeSet<ParticipantId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantConfig {
    pub id: ParticipantId,
    pub asn: Asn,

    #[serde(default)]
    pub ports: Vec<Port>,

    /// Participants this one accepts routes from.
    #[serde(default)]
    pub peers_in: BTreeSet<ParticipantId>,

    /// Participants that may forward traffic to this one.
    #[serde(default)]
    pub peers_out: BTreeSet<ParticipantId>,
}

/// Queue depths and socket timeouts of the exchange runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub event_queue_depth: usize,
    pub outbound_queue_depth: usize,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    /// How often idle threads look at their shutdown flag.
    pub poll_interval_ms: u64,
    pub max_message_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_queue_depth: 1024,
            outbound_queue_depth: 1024,
            connect_timeout_ms: 1000,
            io_timeout_ms: 1000,
            poll_interval_ms: 100,
            max_message_size: 64 * 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Zero depths would turn the queues into rendezvous points, a zero
    /// socket timeout is refused by the socket, and a zero poll interval
    /// spins.
    pub fn validate(&self) -> Result<(), Error> {
        for (name, value) in [
            ("event_queue_depth", self.event_queue_depth as u64),
            ("outbound_queue_depth", self.outbound_queue_depth as u64),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("io_timeout_ms", self.io_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("max_message_size", self.max_message_size as u64),
        ] {
            if value == 0 {
                return Err(Error::Config(format!(
                    "runtime {name} must be non-zero"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationConfig {
    pub vmac: VmacConfig,
    pub exchanges: Vec<ExchangeConfig>,
    pub participants: Vec<ParticipantConfig>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl FederationConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Parse and validate a configuration document.
    pub fn from_json(data: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.vmac.validate()?;
        self.runtime.validate()?;

        let mut participants = BTreeSet::new();
        for p in &self.participants {
            if !participants.insert(p.id) {
                return Err(Error::Config(format!(
                    "duplicate participant {}",
                    p.id
                )));
            }
        }
        for p in &self.participants {
            for peer in p.peers_in.iter().chain(p.peers_out.iter()) {
                if !participants.contains(peer) {
                    return Err(Error::Config(format!(
                        "participant {} references unknown peer {peer}",
                        p.id
                    )));
                }
            }
        }

        let mut exchanges = BTreeSet::new();
        for x in &self.exchanges {
            if !exchanges.insert(x.id) {
                return Err(Error::Config(format!(
                    "duplicate exchange {}",
                    x.id
                )));
            }
            if let Some(p) =
                x.participants.iter().find(|p| !participants.contains(p))
            {
                return Err(Error::Config(format!(
                    "exchange {} hosts unknown participant {p}",
                    x.id
                )));
            }
            self.vmac.validate_participants(&x.participants)?;
        }
        Ok(())
    }

    pub fn exchange(&self, id: SdxId) -> Option<&ExchangeConfig> {
        self.exchanges.iter().find(|x| x.id == id)
    }

    pub fn participant(
        &self,
        id: ParticipantId,
    ) -> Option<&ParticipantConfig> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// The inbound peering of every participant at exchange `id`,
    /// restricted to participants present there.
    pub fn peers_in(
        &self,
        id: SdxId,
    ) -> Result<BTreeMap<ParticipantId, BTreeSet<ParticipantId>>, Error> {
        let x = self.exchange(id).ok_or(Error::UnknownExchange(id))?;
        x.participants
            .iter()
            .map(|p| {
                let cfg =
                    self.participant(*p).ok_or(Error::UnknownParticipant(*p))?;
                let peers = cfg
                    .peers_in
                    .intersection(&x.participants)
                    .copied()
                    .collect();
                Ok((*p, peers))
            })
            .collect()
    }

    /// Where to reach the listener of every exchange.
    pub fn addresses(&self) -> BTreeMap<SdxId, SocketAddr> {
        self.exchanges.iter().map(|x| (x.id, x.address)).collect()
    }
}
