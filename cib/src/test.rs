// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test utilities for cib tests.

use crate::{error::Error, Cib};
use sdx_common::log::discard_logger;
use sdx_types::SdxId;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

/// A sled backed cib that removes its database directory when dropped, but
/// only if the test succeeded. Failed tests leave the database in /tmp for
/// inspection.
pub struct TestCib {
    cib: Cib,
    path: String,
}

impl TestCib {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Deref for TestCib {
    type Target = Cib;

    fn deref(&self) -> &Self::Target {
        &self.cib
    }
}

impl DerefMut for TestCib {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.cib
    }
}

impl Drop for TestCib {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let _ = std::fs::remove_dir_all(&self.path);
        } else {
            eprintln!("Test failed - database left at: {}", self.path);
        }
    }
}

/// Get a persistent cib at a unique path under /tmp.
///
/// Paths include the process id and a counter so tests running in parallel
/// never share a database.
pub fn get_test_cib(test_name: &str, sdx_id: SdxId) -> Result<TestCib, Error> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let path = format!(
        "/tmp/{}_{}_{}.db",
        test_name,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    );

    // left over from a crashed run
    if std::path::Path::new(&path).exists() {
        let _ = std::fs::remove_dir_all(&path);
    }

    let cib = Cib::persistent(sdx_id, &path, discard_logger())?;
    Ok(TestCib { cib, path })
}
