// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub(crate) const UNIT_CONSUMER: &str = "consumer";
pub(crate) const UNIT_LISTENER: &str = "listener";
pub(crate) const UNIT_SENDER: &str = "sender";

macro_rules! detector_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_XCTRL,
            "module" => crate::MOD_DETECTOR,
            "sdx" => $self.topology.sdx_id(),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_XCTRL,
            "module" => crate::MOD_DETECTOR,
            "sdx" => $self.topology.sdx_id(),
        )
    };
}

macro_rules! runtime_log {
    ($log:expr, $level:ident, $unit:expr, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($log,
            $msg;
            "component" => crate::COMPONENT_XCTRL,
            "module" => crate::MOD_RUNTIME,
            "unit" => $unit,
            $($key => $value),*
        )
    };
    ($log:expr, $level:ident, $unit:expr, $msg:expr) => {
        slog::$level!($log,
            $msg;
            "component" => crate::COMPONENT_XCTRL,
            "module" => crate::MOD_RUNTIME,
            "unit" => $unit,
        )
    };
}

pub(crate) use detector_log;
pub(crate) use runtime_log;
