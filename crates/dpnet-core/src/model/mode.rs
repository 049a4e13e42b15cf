// ── Network mode ──

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};

/// Whether the monitor may reapply routing on its own.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ControlMode {
    Auto,
    #[default]
    Manual,
}

/// Whether LAN clients may reach the internet.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SharingMode {
    #[default]
    Normal,
    LocalOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkMode {
    pub control: ControlMode,
    pub sharing: SharingMode,
}

impl NetworkMode {
    pub fn is_local_only(self) -> bool {
        self.sharing == SharingMode::LocalOnly
    }

    pub fn is_auto(self) -> bool {
        self.control == ControlMode::Auto
    }

    /// Single-word label for scripting: `local-only` wins over the control mode.
    pub fn label(self) -> String {
        if self.is_local_only() {
            self.sharing.to_string()
        } else {
            self.control.to_string()
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.control, self.sharing)
    }
}
