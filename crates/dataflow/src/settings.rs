//! # Session settings
//!
//! A [`Settings`] snapshot is taken when a session is created and never
//! changes afterwards. Settings can be read from the `[settings]` table of a
//! `cellflow.toml` file.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::SliceKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Normal,
    Reactive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionSchedule {
    #[default]
    LivenessBased,
    DagBased,
    Strict,
    /// Liveness-based readiness, DAG-based waiter closure
    Hybrid,
}

impl ExecutionSchedule {
    /// Whether waiters are propagated along the cell DAG
    pub const fn uses_dag_waiters(self) -> bool {
        matches!(self, Self::DagBased | Self::Hybrid)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    AnyOrder,
    #[default]
    InOrder,
}

macro_rules! impl_setting_enum {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(ConfigError::UnknownValue {
                        setting: stringify!($ty),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

impl_setting_enum!(ExecutionMode { Normal => "normal", Reactive => "reactive" });
impl_setting_enum!(ExecutionSchedule {
    LivenessBased => "liveness_based",
    DagBased => "dag_based",
    Strict => "strict",
    Hybrid => "hybrid",
});
impl_setting_enum!(FlowDirection { AnyOrder => "any_order", InOrder => "in_order" });

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exec_mode: ExecutionMode,
    pub exec_schedule: ExecutionSchedule,
    pub flow_direction: FlowDirection,
    pub static_slicing_enabled: bool,
    pub dynamic_slicing_enabled: bool,
    /// How many nested calls are followed when computing a cell's live symbols
    pub max_call_depth: usize,
    /// When false, stale symbols never make a cell waiting
    pub mark_waiting_symbol_usages_unsafe: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exec_mode: ExecutionMode::Normal,
            exec_schedule: ExecutionSchedule::LivenessBased,
            flow_direction: FlowDirection::InOrder,
            static_slicing_enabled: true,
            dynamic_slicing_enabled: true,
            max_call_depth: 3,
            mark_waiting_symbol_usages_unsafe: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    settings: Settings,
}

impl Settings {
    /// Load settings from a `cellflow.toml` file
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: SettingsFile = toml::from_str(content).map_err(|e| {
            tracing::error!("Failed to parse TOML: {}", e);
            e
        })?;
        Ok(file.settings)
    }

    pub const fn is_in_order(&self) -> bool {
        matches!(self.flow_direction, FlowDirection::InOrder)
    }

    /// Slicing kinds currently enabled, static first
    pub fn slicing_kinds(&self) -> Vec<SliceKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.static_slicing_enabled {
            kinds.push(SliceKind::Static);
        }
        if self.dynamic_slicing_enabled {
            kinds.push(SliceKind::Dynamic);
        }
        kinds
    }
}
