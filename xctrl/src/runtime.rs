// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Threads of a running exchange.
//!
//! The consumer is the only thread that touches the [`Exchange`]. Listeners
//! and API callers reach it through a bounded event queue, and it hands the
//! correctness messages it produces to the sender through a second bounded
//! queue. Requests that need an answer carry their own reply channel.

use crate::config::{FederationConfig, RuntimeConfig};
use crate::detector::Outbound;
use crate::error::Error;
use crate::exchange::{Event, Exchange};
use crate::listener;
use crate::log::{runtime_log, UNIT_CONSUMER};
use crate::messages::CorrectnessMessage;
use crate::sender;
use cib::CibDump;
use sdx_common::thread::ManagedThread;
use sdx_types::{ParticipantId, RouteUpdate, SdxId};
use slog::Logger;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{
    channel, sync_channel, Receiver, RecvTimeoutError, SyncSender,
    TrySendError,
};
use std::sync::Arc;
use vmac::{SupersetChange, Vmac};

pub struct ExchangeRuntime {
    sdx_id: SdxId,
    events: SyncSender<Event>,
    addr: SocketAddr,
    route_addr: Option<SocketAddr>,

    // Dropped front to back: listeners stop producing before the consumer
    // stops, and the consumer stops before the sender.
    threads: Vec<ManagedThread>,

    log: Logger,
}

impl ExchangeRuntime {
    /// Bind the addresses configured for the exchange and start it.
    pub fn start(
        exchange: Exchange,
        config: &FederationConfig,
        log: Logger,
    ) -> Result<Self, Error> {
        let sdx_id = exchange.sdx_id();
        let x = config
            .exchange(sdx_id)
            .ok_or(Error::UnknownExchange(sdx_id))?;
        let peer_listener = listener::bind(x.address)?;
        let route_listener =
            x.route_address.map(listener::bind).transpose()?;
        Self::start_with(exchange, config, peer_listener, route_listener, log)
    }

    /// Start an exchange on listeners the caller already bound.
    pub fn start_with(
        exchange: Exchange,
        config: &FederationConfig,
        peer_listener: TcpListener,
        route_listener: Option<TcpListener>,
        log: Logger,
    ) -> Result<Self, Error> {
        let sdx_id = exchange.sdx_id();
        let rt = config.runtime.clone();
        let addr = peer_listener.local_addr()?;
        let route_addr = route_listener
            .as_ref()
            .map(|l| l.local_addr())
            .transpose()?;

        let (event_tx, event_rx) = sync_channel(rt.event_queue_depth);
        let (out_tx, out_rx) = sync_channel(rt.outbound_queue_depth);
        let mut threads = Vec::new();

        {
            let events = event_tx.clone();
            let rt = rt.clone();
            let log = log.clone();
            threads.push(ManagedThread::spawn(
                &format!("xctrl-listener-{sdx_id}"),
                move |shutdown| {
                    listener::run(
                        "correctness",
                        peer_listener,
                        events,
                        |m: CorrectnessMessage| {
                            m.validate()?;
                            Ok(Event::Correctness(m))
                        },
                        rt,
                        shutdown,
                        log,
                    )
                },
            )?);
        }

        if let Some(route_listener) = route_listener {
            let events = event_tx.clone();
            let rt = rt.clone();
            let log = log.clone();
            threads.push(ManagedThread::spawn(
                &format!("xctrl-routes-{sdx_id}"),
                move |shutdown| {
                    listener::run(
                        "routes",
                        route_listener,
                        events,
                        |u: RouteUpdate| Ok(Event::Route(u)),
                        rt,
                        shutdown,
                        log,
                    )
                },
            )?);
        }

        {
            let rt = rt.clone();
            let log = log.clone();
            threads.push(ManagedThread::spawn(
                &format!("xctrl-consumer-{sdx_id}"),
                move |shutdown| {
                    consume(exchange, event_rx, out_tx, rt, shutdown, log)
                },
            )?);
        }

        {
            let addresses = config.addresses();
            let log = log.clone();
            threads.push(ManagedThread::spawn(
                &format!("xctrl-sender-{sdx_id}"),
                move |shutdown| {
                    sender::run(out_rx, addresses, rt, shutdown, log)
                },
            )?);
        }

        runtime_log!(log, info, UNIT_CONSUMER, "exchange {sdx_id} started";
            "addr" => addr.to_string(),
            "route_addr" => format!("{route_addr:?}")
        );

        Ok(Self {
            sdx_id,
            events: event_tx,
            addr,
            route_addr,
            threads,
            log,
        })
    }

    pub fn sdx_id(&self) -> SdxId {
        self.sdx_id
    }

    /// Where the exchange accepts correctness messages.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Where the exchange accepts route events, if it does.
    pub fn route_addr(&self) -> Option<SocketAddr> {
        self.route_addr
    }

    /// Whether every thread of the exchange is still up.
    pub fn is_running(&self) -> bool {
        self.threads.iter().all(|t| t.is_running())
    }

    fn send(&self, event: Event) -> Result<(), Error> {
        self.events.send(event).map_err(|_| Error::Shutdown)
    }

    pub fn route_update(&self, update: RouteUpdate) -> Result<(), Error> {
        self.send(Event::Route(update))
    }

    pub fn correctness(&self, msg: CorrectnessMessage) -> Result<(), Error> {
        msg.validate()?;
        self.send(Event::Correctness(msg))
    }

    pub fn activate_policy(
        &self,
        ingress: ParticipantId,
        egress: ParticipantId,
    ) -> Result<bool, Error> {
        let (reply, rx) = channel();
        self.send(Event::ActivatePolicy {
            ingress,
            egress,
            reply,
        })?;
        rx.recv().map_err(|_| Error::Shutdown)?
    }

    pub fn deactivate_policy(
        &self,
        ingress: ParticipantId,
        egress: ParticipantId,
    ) -> Result<bool, Error> {
        let (reply, rx) = channel();
        self.send(Event::DeactivatePolicy {
            ingress,
            egress,
            reply,
        })?;
        rx.recv().map_err(|_| Error::Shutdown)?
    }

    pub fn vmac(
        &self,
        vnh: Ipv4Addr,
        participant: ParticipantId,
    ) -> Result<Vmac, Error> {
        let (reply, rx) = channel();
        self.send(Event::Vmac {
            vnh,
            participant,
            reply,
        })?;
        rx.recv().map_err(|_| Error::Shutdown)?
    }

    /// Subscribe to superset changes.
    pub fn watch(
        &self,
        name: &str,
    ) -> Result<Receiver<SupersetChange>, Error> {
        let (sender, rx) = channel();
        self.send(Event::Watch {
            name: name.to_string(),
            sender,
        })?;
        Ok(rx)
    }

    pub fn dump(&self) -> Result<CibDump, Error> {
        let (reply, rx) = channel();
        self.send(Event::Dump { reply })?;
        rx.recv().map_err(|_| Error::Shutdown)?
    }

    /// Stop every thread and wait for them to exit.
    pub fn shutdown(self) {
        let sdx_id = self.sdx_id;
        runtime_log!(self.log, info, UNIT_CONSUMER,
            "exchange {sdx_id} shutting down"
        );
        for t in &self.threads {
            t.signal();
        }
        // joined on drop
    }
}

pub(crate) fn consume(
    mut exchange: Exchange,
    events: Receiver<Event>,
    outbound: SyncSender<Outbound>,
    config: RuntimeConfig,
    shutdown: Arc<AtomicBool>,
    log: Logger,
) {
    'events: while !shutdown.load(Ordering::Acquire) {
        let event = match events.recv_timeout(config.poll_interval()) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let Some(out) = exchange.handle(event) else {
            break;
        };
        for o in out {
            if !enqueue(&outbound, o, &log) {
                break 'events;
            }
        }
    }
    if let Err(e) = exchange.detector().cib().flush() {
        runtime_log!(log, error, UNIT_CONSUMER, "cib flush failed: {e}");
    }
    runtime_log!(log, info, UNIT_CONSUMER, "shut down");
}

/// Hand a message to the sender without waiting on it. A full queue means
/// the sender is stuck on unresponsive peers, and the message is dropped
/// like any other undeliverable one. Returns false once the sender is gone.
fn enqueue(outbound: &SyncSender<Outbound>, o: Outbound, log: &Logger) -> bool {
    match outbound.try_send(o) {
        Ok(()) => true,
        Err(TrySendError::Full(o)) => {
            runtime_log!(log, warn, UNIT_CONSUMER, "outbound queue full";
                "sdx" => o.sdx,
                "type" => o.message.kind.to_string(),
                "prefix" => o.message.prefix.to_string()
            );
            true
        }
        Err(TrySendError::Disconnected(_)) => {
            runtime_log!(log, error, UNIT_CONSUMER, "sender gone");
            false
        }
    }
}
