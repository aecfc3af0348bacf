// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use sdx_types::Prefix;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Virtual next hop assignment. Each prefix announced at the exchange gets
/// one address from the pool, handed out sequentially and never reused
/// while the table lives.
#[derive(Debug, Clone)]
pub struct VnhTable {
    pool: Prefix,
    next: u64,
    by_prefix: BTreeMap<Prefix, Ipv4Addr>,
    by_vnh: BTreeMap<Ipv4Addr, Prefix>,
}

impl VnhTable {
    pub fn new(pool: Prefix) -> Self {
        Self {
            pool,
            next: 0,
            by_prefix: BTreeMap::new(),
            by_vnh: BTreeMap::new(),
        }
    }

    /// Return the VNH of `prefix`, allocating one on first sight.
    pub fn assign(&mut self, prefix: Prefix) -> Result<Ipv4Addr, Error> {
        if let Some(vnh) = self.by_prefix.get(&prefix) {
            return Ok(*vnh);
        }
        let vnh = self
            .pool
            .nth_host(self.next)
            .ok_or(Error::VnhPoolExhausted(self.pool))?;
        self.next += 1;
        self.by_prefix.insert(prefix, vnh);
        self.by_vnh.insert(vnh, prefix);
        Ok(vnh)
    }

    pub fn vnh(&self, prefix: &Prefix) -> Option<Ipv4Addr> {
        self.by_prefix.get(prefix).copied()
    }

    pub fn prefix(&self, vnh: &Ipv4Addr) -> Option<Prefix> {
        self.by_vnh.get(vnh).copied()
    }

    pub fn len(&self) -> usize {
        self.by_prefix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_prefix.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::VnhTable;
    use crate::error::Error;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    #[test]
    fn sequential_and_stable() {
        let pool = "172.0.0.0/30".parse().unwrap();
        let mut t = VnhTable::new(pool);
        let a = "10.0.0.0/8".parse().unwrap();
        let b = "192.0.2.0/24".parse().unwrap();
        let c = "198.51.100.0/24".parse().unwrap();

        assert_eq!(t.assign(a), Ok(Ipv4Addr::new(172, 0, 0, 1)));
        assert_eq!(t.assign(b), Ok(Ipv4Addr::new(172, 0, 0, 2)));
        assert_eq!(t.assign(a), Ok(Ipv4Addr::new(172, 0, 0, 1)));
        assert_eq!(t.prefix(&Ipv4Addr::new(172, 0, 0, 2)), Some(b));
        assert_eq!(t.assign(c), Err(Error::VnhPoolExhausted(pool)));
        assert_eq!(t.len(), 2);
    }
}
