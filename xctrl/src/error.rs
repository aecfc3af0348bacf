// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use sdx_types::{ParticipantId, SdxId};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cib error {0}")]
    Cib(#[from] cib::error::Error),

    #[error("vmac error {0}")]
    Vmac(#[from] vmac::Error),

    #[error("rib error {0}")]
    Rib(#[from] rib::error::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown exchange {0}")]
    UnknownExchange(SdxId),

    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("message exceeds {0} bytes")]
    MessageTooLarge(usize),

    #[error("exchange is shut down")]
    Shutdown,
}
