// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The state of one exchange.
//!
//! An [`Exchange`] owns the rib, the VMAC encoder and the loop detector.
//! It is driven by exactly one thread, the runtime consumer, which feeds
//! it [`Event`]s in arrival order.

use crate::config::FederationConfig;
use crate::detector::{LoopDetector, Outbound};
use crate::error::Error;
use crate::log::{runtime_log, UNIT_CONSUMER};
use crate::messages::CorrectnessMessage;
use crate::topology::Topology;
use cib::{Cib, CibDump};
use rib::Rib;
use sdx_types::{ParticipantId, RouteUpdate, SdxId};
use slog::Logger;
use std::net::Ipv4Addr;
use std::sync::mpsc::Sender;
use vmac::{SupersetChange, Vmac, VmacEncoder};

/// Work for the consumer thread.
#[derive(Debug)]
pub enum Event {
    Route(RouteUpdate),
    Correctness(CorrectnessMessage),
    ActivatePolicy {
        ingress: ParticipantId,
        egress: ParticipantId,
        reply: Sender<Result<bool, Error>>,
    },
    DeactivatePolicy {
        ingress: ParticipantId,
        egress: ParticipantId,
        reply: Sender<Result<bool, Error>>,
    },
    Vmac {
        vnh: Ipv4Addr,
        participant: ParticipantId,
        reply: Sender<Result<Vmac, Error>>,
    },
    Watch {
        name: String,
        sender: Sender<SupersetChange>,
    },
    Dump {
        reply: Sender<Result<CibDump, Error>>,
    },
    Shutdown,
}

pub struct Exchange {
    sdx_id: SdxId,
    rib: Rib,
    encoder: VmacEncoder,
    detector: LoopDetector,
    watchers: Vec<(String, Sender<SupersetChange>)>,
    log: Logger,
}

impl Exchange {
    pub fn new(
        config: &FederationConfig,
        sdx_id: SdxId,
        cib: Cib,
        log: Logger,
    ) -> Result<Self, Error> {
        let topology = Topology::new(config, sdx_id)?;
        let peers_in = config.peers_in(sdx_id)?;
        let rib = Rib::new(peers_in.clone(), log.clone());
        let encoder =
            VmacEncoder::new(config.vmac.clone(), peers_in, log.clone())?;
        let detector = LoopDetector::new(topology, cib, log.clone())?;
        Ok(Self {
            sdx_id,
            rib,
            encoder,
            detector,
            watchers: Vec::new(),
            log,
        })
    }

    pub fn sdx_id(&self) -> SdxId {
        self.sdx_id
    }

    pub fn rib(&self) -> &Rib {
        &self.rib
    }

    pub fn encoder(&self) -> &VmacEncoder {
        &self.encoder
    }

    pub fn detector(&self) -> &LoopDetector {
        &self.detector
    }

    /// Apply a route announcement or withdrawal from the route server.
    ///
    /// The loop detector sees every route the rib accepted, even when the
    /// superset table cannot cover the new basic set. That failure is
    /// logged and the table stays as it was.
    pub fn route_update(
        &mut self,
        update: RouteUpdate,
    ) -> Result<Vec<Outbound>, Error> {
        let prefix = update.prefix;
        if !self.rib.apply(update.clone())? {
            return Ok(Vec::new());
        }
        match self.encoder.update_supersets(&self.rib, &[update]) {
            Ok(Some(change)) => self.notify(change),
            Ok(None) => {}
            Err(e) => {
                runtime_log!(self.log, error, UNIT_CONSUMER,
                    "supersets not updated: {e}";
                    "prefix" => prefix.to_string()
                );
            }
        }
        self.detector.handle_route_change(&self.rib, prefix)
    }

    pub fn correctness(
        &mut self,
        msg: &CorrectnessMessage,
    ) -> Result<Vec<Outbound>, Error> {
        self.detector.handle_correctness(&self.rib, msg)
    }

    pub fn activate_policy(
        &mut self,
        ingress: ParticipantId,
        egress: ParticipantId,
    ) -> Result<(bool, Vec<Outbound>), Error> {
        self.detector.activate_policy(&self.rib, ingress, egress)
    }

    pub fn deactivate_policy(
        &mut self,
        ingress: ParticipantId,
        egress: ParticipantId,
    ) -> Result<(bool, Vec<Outbound>), Error> {
        self.detector.deactivate_policy(&self.rib, ingress, egress)
    }

    /// The VMAC stamped on traffic from `participant` toward the prefix
    /// behind `vnh`, honoring the current forbidden paths.
    pub fn vmac(
        &self,
        vnh: &Ipv4Addr,
        participant: ParticipantId,
    ) -> Result<Vmac, Error> {
        Ok(self.encoder.vmac(
            vnh,
            participant,
            &self.rib,
            self.detector.forbidden_paths(),
        )?)
    }

    /// Register a consumer of superset changes. It is sent the current
    /// table right away if there is one.
    pub fn watch(&mut self, name: String, sender: Sender<SupersetChange>) {
        if !self.encoder.supersets().is_empty()
            && sender.send(self.encoder.supersets().snapshot()).is_err()
        {
            return;
        }
        runtime_log!(self.log, info, UNIT_CONSUMER, "watcher registered";
            "watcher" => &name
        );
        self.watchers.push((name, sender));
    }

    fn notify(&mut self, change: SupersetChange) {
        let log = &self.log;
        self.watchers.retain(|(name, sender)| {
            match sender.send(change.clone()) {
                Ok(()) => true,
                Err(_) => {
                    runtime_log!(log, info, UNIT_CONSUMER, "watcher gone";
                        "watcher" => name
                    );
                    false
                }
            }
        });
    }

    pub fn dump(&self) -> Result<CibDump, Error> {
        Ok(self.detector.cib().dump()?)
    }

    /// Handle one event. Returns the messages to send, or `None` once the
    /// exchange has been asked to stop.
    pub fn handle(&mut self, event: Event) -> Option<Vec<Outbound>> {
        let result = match event {
            Event::Route(update) => self.route_update(update),
            Event::Correctness(msg) => self.correctness(&msg),
            Event::ActivatePolicy {
                ingress,
                egress,
                reply,
            } => self.reply(reply, |x| x.activate_policy(ingress, egress)),
            Event::DeactivatePolicy {
                ingress,
                egress,
                reply,
            } => self.reply(reply, |x| x.deactivate_policy(ingress, egress)),
            Event::Vmac {
                vnh,
                participant,
                reply,
            } => {
                let _ = reply.send(self.vmac(&vnh, participant));
                Ok(Vec::new())
            }
            Event::Watch { name, sender } => {
                self.watch(name, sender);
                Ok(Vec::new())
            }
            Event::Dump { reply } => {
                let _ = reply.send(self.dump());
                Ok(Vec::new())
            }
            Event::Shutdown => return None,
        };
        match result {
            Ok(out) => Some(out),
            Err(e) => {
                runtime_log!(self.log, error, UNIT_CONSUMER,
                    "event failed: {e}";
                    "error" => format!("{e:?}")
                );
                Some(Vec::new())
            }
        }
    }

    /// Run a policy operation, hand its verdict to the requester and keep
    /// the resulting messages for the sender.
    fn reply<F>(
        &mut self,
        reply: Sender<Result<bool, Error>>,
        op: F,
    ) -> Result<Vec<Outbound>, Error>
    where
        F: FnOnce(&mut Self) -> Result<(bool, Vec<Outbound>), Error>,
    {
        let (verdict, out) = match op(self) {
            Ok((verdict, out)) => (Ok(verdict), out),
            Err(e) => (Err(e), Vec::new()),
        };
        let _ = reply.send(verdict);
        Ok(out)
    }
}
