// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delivery of correctness messages to federated exchanges.
//!
//! Delivery is fire and forget. Each message gets its own connection, and a
//! peer that cannot be reached only costs a log line. The protocol converges
//! from later messages.

use crate::config::RuntimeConfig;
use crate::detector::Outbound;
use crate::error::Error;
use crate::log::{runtime_log, UNIT_SENDER};
use crate::messages::CorrectnessMessage;
use sdx_types::SdxId;
use slog::Logger;
use std::collections::BTreeMap;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;

/// Connect to `addr`, write `msg` and close.
pub fn send_message(
    addr: SocketAddr,
    msg: &CorrectnessMessage,
    config: &RuntimeConfig,
) -> Result<(), Error> {
    let mut stream =
        TcpStream::connect_timeout(&addr, config.connect_timeout())?;
    stream.set_write_timeout(Some(config.io_timeout()))?;
    stream.write_all(&serde_json::to_vec(msg)?)?;
    stream.shutdown(Shutdown::Write)?;
    Ok(())
}

/// Drain `outbound` until `shutdown` is set or every producer is gone.
pub fn run(
    outbound: Receiver<Outbound>,
    addresses: BTreeMap<SdxId, SocketAddr>,
    config: RuntimeConfig,
    shutdown: Arc<AtomicBool>,
    log: Logger,
) {
    while !shutdown.load(Ordering::Acquire) {
        let Outbound { sdx, message } =
            match outbound.recv_timeout(config.poll_interval()) {
                Ok(o) => o,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

        let result = addresses
            .get(&sdx)
            .ok_or(Error::UnknownExchange(sdx))
            .and_then(|addr| send_message(*addr, &message, &config));
        match result {
            Ok(()) => {
                runtime_log!(log, debug, UNIT_SENDER, "message sent";
                    "sdx" => sdx,
                    "type" => message.kind.to_string(),
                    "prefix" => message.prefix.to_string(),
                    "ingress" => message.ingress_participant
                );
            }
            Err(e) => {
                runtime_log!(log, warn, UNIT_SENDER,
                    "dropping message to sdx {sdx}: {e}";
                    "prefix" => message.prefix.to_string()
                );
            }
        }
    }
    runtime_log!(log, info, UNIT_SENDER, "shut down");
}
