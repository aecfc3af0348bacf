// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use sdx_types::ParticipantId;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),
}
