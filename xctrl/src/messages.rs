// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Messages exchanged between federated exchanges.

use crate::error::Error;
use cib::{UpdateType, Version};
use sdx_types::{ParticipantId, Prefix, SdxId, SdxSet};
use serde::{Deserialize, Serialize};

/// Tells a downstream exchange which exchanges lie on the path behind one
/// of its participants.
///
/// `ingress_participant` names the participant through which traffic for
/// `prefix` enters the receiving exchange from the sender. `sdx_set` is
/// absent on withdrawals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectnessMessage {
    #[serde(rename = "type")]
    pub kind: UpdateType,
    pub prefix: Prefix,
    pub sender_sdx: SdxId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdx_set: Option<SdxSet>,
    pub ingress_participant: ParticipantId,
    pub timestamp: f64,
    pub random_value: u64,
}

impl CorrectnessMessage {
    pub fn announce(
        sender_sdx: SdxId,
        ingress_participant: ParticipantId,
        prefix: Prefix,
        sdx_set: SdxSet,
    ) -> Self {
        Self::stamped(
            UpdateType::Announce,
            sender_sdx,
            ingress_participant,
            prefix,
            Some(sdx_set),
        )
    }

    pub fn withdraw(
        sender_sdx: SdxId,
        ingress_participant: ParticipantId,
        prefix: Prefix,
    ) -> Self {
        Self::stamped(
            UpdateType::Withdraw,
            sender_sdx,
            ingress_participant,
            prefix,
            None,
        )
    }

    fn stamped(
        kind: UpdateType,
        sender_sdx: SdxId,
        ingress_participant: ParticipantId,
        prefix: Prefix,
        sdx_set: Option<SdxSet>,
    ) -> Self {
        let now = chrono::Utc::now();
        let timestamp = now.timestamp() as f64
            + f64::from(now.timestamp_subsec_micros()) / 1e6;
        Self {
            kind,
            prefix,
            sender_sdx,
            sdx_set,
            ingress_participant,
            timestamp,
            random_value: rand::random(),
        }
    }

    pub fn version(&self) -> Version {
        Version {
            timestamp: self.timestamp,
            random_value: self.random_value,
        }
    }

    /// Reject messages that parse but cannot be acted on.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.timestamp.is_finite() {
            return Err(Error::MalformedMessage(format!(
                "timestamp {} is not finite",
                self.timestamp
            )));
        }
        match (self.kind, &self.sdx_set) {
            (UpdateType::Announce, None) => Err(Error::MalformedMessage(
                "announce without sdx_set".into(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::CorrectnessMessage;
    use cib::UpdateType;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    #[test]
    fn wire_format() {
        let m: CorrectnessMessage = serde_json::from_str(
            r#"{"type": "announce", "prefix": "10.0.0.0/8", "sender_sdx": 2,
                "sdx_set": [2, 3], "ingress_participant": 4,
                "timestamp": 1700000000.25, "random_value": 77}"#,
        )
        .unwrap();
        assert_eq!(m.kind, UpdateType::Announce);
        assert_eq!(m.sdx_set, Some(BTreeSet::from([2, 3])));
        assert_eq!(m.version().random_value, 77);
        m.validate().unwrap();

        let pfx = "10.0.0.0/8".parse().unwrap();
        let w = CorrectnessMessage::withdraw(1, 5, pfx);
        let text = serde_json::to_string(&w).unwrap();
        assert!(text.contains(r#""type":"withdraw""#));
        assert!(!text.contains("sdx_set"));
        w.validate().unwrap();
        assert!(w.timestamp > 0.0);

        let bad: CorrectnessMessage = serde_json::from_str(
            r#"{"type": "announce", "prefix": "10.0.0.0/8", "sender_sdx": 2,
                "ingress_participant": 4, "timestamp": 1.0,
                "random_value": 1}"#,
        )
        .unwrap();
        assert!(bad.validate().is_err());

        assert!(serde_json::from_str::<CorrectnessMessage>(
            r#"{"type": "replace", "prefix": "10.0.0.0/8"}"#
        )
        .is_err());
    }
}
