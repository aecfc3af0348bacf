// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

macro_rules! cib_log {
    ($self:expr, $level:ident, $table:expr, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_CIB,
            "module" => crate::MOD_DB,
            "unit" => $table,
            "sdx" => $self.sdx_id,
            $($key => $value),*
        )
    };
}

pub(crate) use cib_log;
