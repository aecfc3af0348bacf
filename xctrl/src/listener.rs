// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Accept loop for one-message-per-connection JSON endpoints.
//!
//! Both the correctness endpoint and the route event endpoint work the same
//! way: a client connects, writes one JSON object, and closes its side. The
//! listener reads to EOF, decodes the object, and queues the resulting
//! event for the consumer. Anything that fails along the way is logged and
//! the connection dropped.

use crate::config::RuntimeConfig;
use crate::error::Error;
use crate::exchange::Event;
use crate::log::{runtime_log, UNIT_LISTENER};
use serde::de::DeserializeOwned;
use slog::Logger;
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

/// Read one message from `stream`. Fails if the peer writes more than
/// `max_size` bytes before closing.
pub fn read_message<T: DeserializeOwned>(
    stream: &mut TcpStream,
    max_size: usize,
) -> Result<T, Error> {
    let mut buf = Vec::new();
    stream.by_ref().take(max_size as u64 + 1).read_to_end(&mut buf)?;
    if buf.len() > max_size {
        return Err(Error::MessageTooLarge(max_size));
    }
    Ok(serde_json::from_slice(&buf)?)
}

/// Accept connections on `listener` until `shutdown` is set or the consumer
/// goes away. `to_event` turns each decoded message into a consumer event.
#[allow(clippy::too_many_arguments)]
pub fn run<T, F>(
    name: &'static str,
    listener: TcpListener,
    events: SyncSender<Event>,
    to_event: F,
    config: RuntimeConfig,
    shutdown: Arc<AtomicBool>,
    log: Logger,
) where
    T: DeserializeOwned,
    F: Fn(T) -> Result<Event, Error>,
{
    if let Err(e) = listener.set_nonblocking(true) {
        runtime_log!(log, error, UNIT_LISTENER,
            "{name}: cannot poll listener: {e}"
        );
        return;
    }
    let local = listener.local_addr().ok();
    runtime_log!(log, info, UNIT_LISTENER, "{name}: listening";
        "addr" => format!("{local:?}")
    );

    while !shutdown.load(Ordering::Acquire) {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(config.poll_interval());
                continue;
            }
            Err(e) => {
                runtime_log!(log, warn, UNIT_LISTENER,
                    "{name}: accept failed: {e}"
                );
                std::thread::sleep(config.poll_interval());
                continue;
            }
        };

        let event = match receive(stream, &config, &to_event) {
            Ok(event) => event,
            Err(e) => {
                runtime_log!(log, warn, UNIT_LISTENER,
                    "{name}: dropping message: {e}";
                    "peer" => peer.to_string()
                );
                continue;
            }
        };
        runtime_log!(log, trace, UNIT_LISTENER, "{name}: message queued";
            "peer" => peer.to_string()
        );
        if events.send(event).is_err() {
            runtime_log!(log, info, UNIT_LISTENER,
                "{name}: consumer gone, exiting"
            );
            return;
        }
    }
    runtime_log!(log, info, UNIT_LISTENER, "{name}: shut down");
}

fn receive<T, F>(
    mut stream: TcpStream,
    config: &RuntimeConfig,
    to_event: &F,
) -> Result<Event, Error>
where
    T: DeserializeOwned,
    F: Fn(T) -> Result<Event, Error>,
{
    // accepted sockets inherit the listener's nonblocking mode on some
    // platforms
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(config.io_timeout()))?;
    let msg: T = read_message(&mut stream, config.max_message_size)?;
    to_event(msg)
}

/// Bind a listener, mapping resolution failures to configuration errors.
pub fn bind(addr: SocketAddr) -> Result<TcpListener, Error> {
    TcpListener::bind(addr)
        .map_err(|e| Error::Config(format!("cannot bind {addr}: {e}")))
}
