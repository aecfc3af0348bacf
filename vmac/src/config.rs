// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::layout::Layout;
use sdx_types::{ParticipantId, Prefix};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Bit layout and superset tuning for one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmacConfig {
    /// Total width of a VMAC in bits.
    pub vmac_size: u8,

    /// Width of the superset id field.
    pub superset_id_size: u8,

    /// Width of the membership bitmap, which is also the maximum number of
    /// participants in one superset.
    pub max_superset_size: u8,

    /// Width of the best path participant field.
    pub best_path_size: u8,

    /// Once the superset table holds more than this many supersets it is
    /// recomputed from scratch.
    pub superset_threshold: usize,

    /// Upper bound on superset size when merging during a full recompute.
    /// Leaving headroom below `max_superset_size` lets later incremental
    /// updates extend supersets in place. Defaults to `max_superset_size`.
    #[serde(default)]
    pub max_initial_superset_size: Option<u8>,

    /// Addresses handed out as virtual next hops, one per prefix.
    #[serde(default = "default_vnh_pool")]
    pub vnh_pool: Prefix,
}

fn default_vnh_pool() -> Prefix {
    Prefix::new(Ipv4Addr::new(172, 0, 0, 0), 16)
}

impl Default for VmacConfig {
    fn default() -> Self {
        Self {
            vmac_size: 48,
            superset_id_size: 6,
            max_superset_size: 30,
            best_path_size: 12,
            superset_threshold: 10,
            max_initial_superset_size: None,
            vnh_pool: default_vnh_pool(),
        }
    }
}

impl VmacConfig {
    /// Check the layout is self consistent. Any error here is fatal at
    /// startup.
    pub fn validate(&self) -> Result<(), Error> {
        let found = u16::from(self.superset_id_size)
            + u16::from(self.max_superset_size)
            + u16::from(self.best_path_size);
        if found != u16::from(self.vmac_size) {
            return Err(Error::WidthMismatch {
                expected: self.vmac_size,
                found,
            });
        }
        if self.vmac_size == 0 || self.vmac_size % 8 != 0 {
            return Err(Error::NotOctetAligned(self.vmac_size));
        }
        if self.vmac_size > crate::Bits::MAX_WIDTH {
            return Err(Error::WidthOverflow(self.vmac_size.into()));
        }
        if self.superset_id_size == 0 {
            return Err(Error::Config(
                "superset_id_size must be non-zero".into(),
            ));
        }
        if self.max_superset_size == 0 {
            return Err(Error::Config(
                "max_superset_size must be non-zero".into(),
            ));
        }
        if self.best_path_size == 0 {
            return Err(Error::Config("best_path_size must be non-zero".into()));
        }
        if self.superset_threshold == 0 {
            return Err(Error::Config(
                "superset_threshold must be non-zero".into(),
            ));
        }
        if let Some(m) = self.max_initial_superset_size {
            if m == 0 || m > self.max_superset_size {
                return Err(Error::Config(format!(
                    "max_initial_superset_size {m} must be in 1..={}",
                    self.max_superset_size
                )));
            }
        }
        if self.vnh_pool.host_count() == 0 {
            return Err(Error::Config(format!(
                "vnh pool {} has no usable addresses",
                self.vnh_pool
            )));
        }
        Ok(())
    }

    /// Check every participant id fits the best path field and that the
    /// participants can all be placed in supersets.
    pub fn validate_participants<'a, I>(&self, ids: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = &'a ParticipantId>,
    {
        let mut count = 0usize;
        for id in ids {
            // zero in the best path field means no route
            if *id == 0 || u64::from(*id) >= 1u64 << self.best_path_size {
                return Err(Error::ParticipantIdOverflow {
                    participant: *id,
                    width: self.best_path_size,
                });
            }
            count += 1;
        }
        let capacity = self.max_supersets() * self.superset_limit();
        if count > capacity {
            return Err(Error::SupersetSpaceExhausted {
                needed: count.div_ceil(self.superset_limit()),
                available: self.max_supersets(),
            });
        }
        Ok(())
    }

    /// The number of superset ids usable for supersets. The all-ones id is
    /// reserved for port VMACs.
    pub fn max_supersets(&self) -> usize {
        (1usize << self.superset_id_size.min(32)) - 1
    }

    pub fn superset_limit(&self) -> usize {
        usize::from(self.max_superset_size)
    }

    pub fn initial_superset_limit(&self) -> usize {
        usize::from(
            self.max_initial_superset_size
                .unwrap_or(self.max_superset_size),
        )
    }

    pub fn layout(&self) -> Layout {
        Layout {
            superset_id_size: self.superset_id_size,
            membership_size: self.max_superset_size,
            best_path_size: self.best_path_size,
        }
    }
}

#[cfg(test)]
mod test {
    use super::VmacConfig;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_is_valid() {
        let c = VmacConfig::default();
        assert_eq!(c.validate(), Ok(()));
        assert_eq!(c.max_supersets(), 63);
        assert_eq!(c.initial_superset_limit(), 30);
    }

    #[test]
    fn widths_must_add_up() {
        let c = VmacConfig {
            best_path_size: 11,
            ..Default::default()
        };
        assert_eq!(
            c.validate(),
            Err(Error::WidthMismatch {
                expected: 48,
                found: 47
            })
        );
    }

    #[test]
    fn degenerate_layouts_rejected() {
        let c = VmacConfig {
            vmac_size: 44,
            best_path_size: 8,
            ..Default::default()
        };
        assert_eq!(c.validate(), Err(Error::NotOctetAligned(44)));

        let c = VmacConfig {
            max_superset_size: 0,
            best_path_size: 42,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(Error::Config(_))));

        let c = VmacConfig {
            max_initial_superset_size: Some(31),
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn participants_must_fit() {
        let c = VmacConfig {
            vmac_size: 8,
            superset_id_size: 2,
            max_superset_size: 2,
            best_path_size: 4,
            ..Default::default()
        };
        assert_eq!(c.validate(), Ok(()));
        assert_eq!(c.validate_participants(&[1, 2, 15]), Ok(()));
        assert_eq!(
            c.validate_participants(&[16]),
            Err(Error::ParticipantIdOverflow {
                participant: 16,
                width: 4
            })
        );
        assert!(c.validate_participants(&[0]).is_err());
        // three usable superset ids of two participants each
        assert_eq!(c.validate_participants(&[1, 2, 3, 4, 5, 6]), Ok(()));
        assert_eq!(
            c.validate_participants(&[1, 2, 3, 4, 5, 6, 7]),
            Err(Error::SupersetSpaceExhausted {
                needed: 4,
                available: 3
            })
        );
    }
}
