//! Configuration surface (spec §6 table).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the bridge selection and cascade core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Bridge load/health tunables.
    pub bridge: BridgeConfig,

    /// Selection strategy configuration.
    pub selection: SelectionConfig,

    /// Cascade topology strategy configuration.
    pub topology: TopologyConfig,

    /// Failing-ICE detection tunables.
    pub ice_failure_detection: IceFailureConfig,

    /// Load redistribution sweep tunables.
    pub load_redistribution: LoadRedistributionConfig,

    /// Health-check subsystem tunables.
    pub health_checks: HealthCheckConfig,

    /// Multi-bridge ("octo") policy.
    pub octo: OctoConfig,

    /// Single-participant-timeout sweep tunables. Spec §6's config table
    /// does not enumerate this one explicitly even though §4.I describes
    /// the sweep; kept here rather than hardcoded so a host can still
    /// configure it alongside everything else (see DESIGN.md).
    pub single_participant_timeout: SingleParticipantTimeoutConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            selection: SelectionConfig::default(),
            topology: TopologyConfig::default(),
            ice_failure_detection: IceFailureConfig::default(),
            load_redistribution: LoadRedistributionConfig::default(),
            health_checks: HealthCheckConfig::default(),
            octo: OctoConfig::default(),
            single_participant_timeout: SingleParticipantTimeoutConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Validate configuration for internal consistency.
    pub fn validate(&self) -> Result<(), String> {
        if self.bridge.stress_threshold <= 0.0 {
            return Err("bridge.stress_threshold must be positive".to_string());
        }
        if self.bridge.average_participant_stress < 0.0 {
            return Err("bridge.average_participant_stress cannot be negative".to_string());
        }
        if self.ice_failure_detection.enabled && self.ice_failure_detection.min_endpoints == 0 {
            return Err("ice_failure_detection.min_endpoints must be > 0 when enabled".to_string());
        }
        if self.health_checks.use_presence && self.health_checks.presence_timeout.is_zero() {
            return Err(
                "health_checks.presence_timeout must be nonzero when use_presence is set"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// Bridge load/health tunables (§3, §4.A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Threshold above which `correctedStress` makes a bridge overloaded.
    pub stress_threshold: f64,

    /// Default per-participant stress weight, overridable by telemetry.
    pub average_participant_stress: f64,

    /// Window over which the newcomer-endpoint rate is tracked.
    pub participant_rampup_interval: Duration,

    /// Per-(bridge,conference) participant cap. `None` = no cap.
    pub max_bridge_participants: Option<u32>,

    /// How long a bridge stays sticky-non-operational after any failure.
    pub failure_reset_threshold: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            stress_threshold: 1.0,
            average_participant_stress: 0.01,
            participant_rampup_interval: Duration::from_secs(10),
            max_bridge_participants: None,
            failure_reset_threshold: Duration::from_secs(60),
        }
    }
}

/// Which selection strategy variant to run (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionStrategyKind {
    Single,
    Split,
    Region,
    /// Dispatches per-class to `participant` / `visitor` sub-strategies.
    ClassSplit,
}

/// Selection configuration (§4.D, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Default/overall selection strategy.
    pub selection_strategy: SelectionStrategyKind,

    /// Strategy used for participant-class joins when `ClassSplit` is
    /// active.
    pub participant_selection_strategy: SelectionStrategyKind,

    /// Strategy used for visitor-class joins when `ClassSplit` is
    /// active.
    pub visitor_selection_strategy: SelectionStrategyKind,

    /// region -> equivalence set, widening region-based selection.
    pub region_groups: HashMap<String, Vec<String>>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            selection_strategy: SelectionStrategyKind::Region,
            participant_selection_strategy: SelectionStrategyKind::Region,
            visitor_selection_strategy: SelectionStrategyKind::Region,
            region_groups: HashMap::new(),
        }
    }
}

/// Which topology strategy variant to run (§4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyStrategyKind {
    SingleMesh,
    Visitor,
}

/// Topology configuration (§4.F, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub topology_strategy: TopologyStrategyKind,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            topology_strategy: TopologyStrategyKind::SingleMesh,
        }
    }
}

/// Failing-ICE detection tunables (§4.H, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceFailureConfig {
    pub enabled: bool,
    /// Window over which restart requests accumulate.
    pub interval: Duration,
    /// Minimum local endpoint count before the ratio check applies.
    pub min_endpoints: u32,
    /// Ratio of accumulated restarts to endpoints that trips the
    /// failing-ICE verdict.
    pub threshold: f64,
    /// How long the failing-ICE verdict stays sticky.
    pub timeout: Duration,
}

impl Default for IceFailureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            min_endpoints: 3,
            threshold: 0.5,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Load redistribution sweep tunables (§4.I, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRedistributionConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub timeout: Duration,
    pub stress_threshold: f64,
    /// Max number of endpoints to move per sweep.
    pub endpoints: u32,
}

impl Default for LoadRedistributionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
            stress_threshold: 0.8,
            endpoints: 1,
        }
    }
}

/// Health-check subsystem tunables (§4.B, §4.I, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub retry_delay: Duration,
    /// Use telemetry presence, not an explicit health checker, to
    /// determine bridge health.
    pub use_presence: bool,
    /// How long telemetry may go stale before presence-based health
    /// flips unhealthy.
    pub presence_timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10),
            retry_delay: Duration::from_secs(5),
            use_presence: false,
            presence_timeout: Duration::from_secs(20),
        }
    }
}

/// Multi-bridge ("octo"/cascade) policy (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OctoConfig {
    pub enabled: bool,
    pub allow_mixed_versions: bool,
}

impl Default for OctoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_mixed_versions: false,
        }
    }
}

/// Single-participant-timeout sweep tunables (§4.I).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SingleParticipantTimeoutConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for SingleParticipantTimeoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_stress_threshold() {
        let mut cfg = CoreConfig::default();
        cfg.bridge.stress_threshold = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_presence_health_without_timeout() {
        let mut cfg = CoreConfig::default();
        cfg.health_checks.use_presence = true;
        cfg.health_checks.presence_timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }
}
