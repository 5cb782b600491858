//! Engine configuration, built in code or deserialized by the host.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// How requests naming entities absent from the slice are treated.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UnknownEntityMode {
    /// Unknown entities have no attributes and no ancestors.
    #[default]
    Empty,
    /// A request whose principal or resource is unknown is denied outright.
    Strict,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub unknown_entities: UnknownEntityMode,
    /// Measure scope matching and condition evaluation separately and
    /// report them through `MetricsSink::on_evaluation_phases`.
    pub collect_phase_timings: bool,
}

impl EngineConfig {
    pub fn strict() -> Self {
        EngineConfig {
            unknown_entities: UnknownEntityMode::Strict,
            ..EngineConfig::default()
        }
    }

    pub fn with_phase_timings(mut self, enabled: bool) -> Self {
        self.collect_phase_timings = enabled;
        self
    }
}
