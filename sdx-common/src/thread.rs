// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thread management utilities for consistent lifecycle handling.

use crate::lock;
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::JoinHandle,
};

/// A named worker thread bundled with its shutdown flag.
///
/// The body of the thread receives the flag and is expected to poll it and
/// return once it is set. Dropping the `ManagedThread` sets the flag and
/// joins the thread, so the owner never leaks a worker.
///
/// A `ManagedThread` is not `Clone`; wrap it in an `Arc` to share it so
/// that `Drop` runs exactly once.
#[derive(Debug)]
pub struct ManagedThread {
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl ManagedThread {
    /// Spawn `body` on a new OS thread called `name`.
    pub fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))?;
        Ok(Self {
            handle: Mutex::new(Some(handle)),
            shutdown,
        })
    }

    /// Ask the thread to stop without waiting for it.
    pub fn signal(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Check if the thread body has not returned yet.
    pub fn is_running(&self) -> bool {
        match lock!(self.handle).as_ref() {
            Some(h) => !h.is_finished(),
            None => false,
        }
    }

    /// Signal the thread and wait for it to exit.
    pub fn join(&self) {
        self.signal();
        let handle = lock!(self.handle).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for ManagedThread {
    fn drop(&mut self) {
        self.join();
    }
}
