use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_max_iterations() -> u32 {
    200
}
const fn default_position_tolerance() -> f64 {
    1e-4
}
const fn default_orientation_tolerance() -> f64 {
    1e-3
}
const fn default_damping() -> f64 {
    1e-3
}
const fn default_step_scale() -> f64 {
    0.7
}
const fn default_max_step() -> f64 {
    0.35
}
const fn default_acceptance_threshold() -> f64 {
    0.6
}
const fn default_min_solve_interval_ms() -> u64 {
    50
}
const fn default_moderate_gap_ms() -> u64 {
    500
}
const fn default_long_gap_ms() -> u64 {
    2000
}
const fn default_moderate_budget_scale() -> f64 {
    1.5
}
const fn default_long_budget_scale() -> f64 {
    2.0
}
const fn default_relaxed_tolerance_scale() -> f64 {
    10.0
}
const fn default_wrist_neutral_offset_deg() -> f64 {
    95.0
}
fn default_ee_point() -> String {
    "gripper_frame".into()
}

// ---------------------------------------------------------------------------
// SolverConfig
// ---------------------------------------------------------------------------

/// Iterative solver configuration.
///
/// Angles and steps are radians; distances are in the chain's length units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Iteration cap per solve (default: 200).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Position convergence tolerance (default: 1e-4).
    #[serde(default = "default_position_tolerance")]
    pub position_tolerance: f64,

    /// Orientation convergence tolerance in radians (default: 1e-3).
    #[serde(default = "default_orientation_tolerance")]
    pub orientation_tolerance: f64,

    /// DLS damping factor λ (default: 1e-3). Must be > 0; λ²I keeps the
    /// normal-equation matrix invertible near singularities.
    #[serde(default = "default_damping")]
    pub damping: f64,

    /// Global scale applied to every computed step (default: 0.7).
    #[serde(default = "default_step_scale")]
    pub step_scale: f64,

    /// Per-iteration step cap in radians for joints without an explicit
    /// override (default: 0.35).
    #[serde(default = "default_max_step")]
    pub max_step: f64,

    /// Per-joint step cap overrides in radians. Distal joints get tighter
    /// caps than the base in the built-in presets.
    #[serde(default)]
    pub max_step_per_joint: HashMap<String, f64>,

    /// Default weight per control point when a target does not carry its
    /// own. Unlisted points weigh 1.0.
    #[serde(default)]
    pub target_weights: HashMap<String, f64>,

    /// Name of the end-effector control point (default: "gripper_frame").
    #[serde(default = "default_ee_point")]
    pub ee_point: String,

    /// Validator acceptance threshold: maximum raw distance between any
    /// tracked point and its target for a candidate solution to be
    /// committed (default: 0.6).
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,

    /// Joint limit overrides in degrees. Joints not listed keep the
    /// chain's built-in limits.
    #[serde(default)]
    pub limit_overrides: Option<JointLimitsConfig>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            position_tolerance: default_position_tolerance(),
            orientation_tolerance: default_orientation_tolerance(),
            damping: default_damping(),
            step_scale: default_step_scale(),
            max_step: default_max_step(),
            max_step_per_joint: HashMap::default(),
            target_weights: HashMap::default(),
            ee_point: default_ee_point(),
            acceptance_threshold: default_acceptance_threshold(),
            limit_overrides: None,
        }
    }
}

impl SolverConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_iterations".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.position_tolerance <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "position_tolerance".into(),
                message: "must be > 0".into(),
            });
        }
        if self.orientation_tolerance <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "orientation_tolerance".into(),
                message: "must be > 0".into(),
            });
        }
        if self.damping <= 0.0 {
            return Err(ConfigError::InvalidDamping(self.damping));
        }
        if self.step_scale <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "step_scale".into(),
                message: "must be > 0".into(),
            });
        }
        if self.max_step <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "max_step".into(),
                message: "must be > 0".into(),
            });
        }
        for (joint, &step) in &self.max_step_per_joint {
            if step <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("max_step_per_joint.{joint}"),
                    message: "must be > 0".into(),
                });
            }
        }
        for (target, &weight) in &self.target_weights {
            if weight <= 0.0 {
                return Err(ConfigError::InvalidWeight {
                    target: target.clone(),
                    value: weight,
                });
            }
        }
        if self.acceptance_threshold <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "acceptance_threshold".into(),
                message: "must be > 0".into(),
            });
        }
        if let Some(limits) = &self.limit_overrides {
            limits.validate()?;
        }
        Ok(())
    }

    /// Step cap in radians for the named joint.
    #[must_use]
    pub fn max_step_for(&self, joint: &str) -> f64 {
        self.max_step_per_joint
            .get(joint)
            .copied()
            .unwrap_or(self.max_step)
    }

    /// Default weight for the named control point.
    #[must_use]
    pub fn weight_for(&self, point: &str) -> f64 {
        self.target_weights.get(point).copied().unwrap_or(1.0)
    }
}

// ---------------------------------------------------------------------------
// JointLimitsConfig
// ---------------------------------------------------------------------------

/// Joint angle limits in degrees, keyed by joint name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JointLimitsConfig {
    #[serde(default)]
    pub per_joint: HashMap<String, [f64; 2]>,
    #[serde(default)]
    pub default: Option<[f64; 2]>,
}

impl JointLimitsConfig {
    /// Validate that every configured range satisfies lo <= hi.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (joint, &[lo, hi]) in &self.per_joint {
            if lo > hi {
                return Err(ConfigError::InvalidLimitRange {
                    joint: joint.clone(),
                    lo,
                    hi,
                });
            }
        }
        if let Some([lo, hi]) = self.default {
            if lo > hi {
                return Err(ConfigError::InvalidLimitRange {
                    joint: "default".into(),
                    lo,
                    hi,
                });
            }
        }
        Ok(())
    }

    /// Limit range in degrees for the named joint, if configured.
    #[must_use]
    pub fn range_for(&self, joint: &str) -> Option<[f64; 2]> {
        self.per_joint.get(joint).copied().or(self.default)
    }
}

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

/// Adaptive solve scheduling configuration.
///
/// The scheduler throttles solve attempts to at most one per
/// `min_solve_interval_ms` and grows the iteration budget when the last
/// *accepted* solve is old (the chain has likely drifted further from its
/// target).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minimum milliseconds between solve attempts (default: 50).
    #[serde(default = "default_min_solve_interval_ms")]
    pub min_solve_interval_ms: u64,

    /// Gap since last accepted solve that triggers a moderate budget
    /// increase (default: 500 ms).
    #[serde(default = "default_moderate_gap_ms")]
    pub moderate_gap_ms: u64,

    /// Gap since last accepted solve that triggers the full budget
    /// increase and relaxed tolerance (default: 2000 ms).
    #[serde(default = "default_long_gap_ms")]
    pub long_gap_ms: u64,

    /// Iteration budget multiplier for a moderate gap (default: 1.5).
    #[serde(default = "default_moderate_budget_scale")]
    pub moderate_budget_scale: f64,

    /// Iteration budget multiplier for a long gap (default: 2.0).
    #[serde(default = "default_long_budget_scale")]
    pub long_budget_scale: f64,

    /// Position tolerance multiplier for a long gap (default: 10.0).
    #[serde(default = "default_relaxed_tolerance_scale")]
    pub relaxed_tolerance_scale: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_solve_interval_ms: default_min_solve_interval_ms(),
            moderate_gap_ms: default_moderate_gap_ms(),
            long_gap_ms: default_long_gap_ms(),
            moderate_budget_scale: default_moderate_budget_scale(),
            long_budget_scale: default_long_budget_scale(),
            relaxed_tolerance_scale: default_relaxed_tolerance_scale(),
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.moderate_gap_ms > self.long_gap_ms {
            return Err(ConfigError::InvalidValue {
                field: "moderate_gap_ms".into(),
                message: "must be <= long_gap_ms".into(),
            });
        }
        if self.moderate_budget_scale < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "moderate_budget_scale".into(),
                message: "must be >= 1.0".into(),
            });
        }
        if self.long_budget_scale < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "long_budget_scale".into(),
                message: "must be >= 1.0".into(),
            });
        }
        if self.relaxed_tolerance_scale < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "relaxed_tolerance_scale".into(),
                message: "must be >= 1.0".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RigCalibration
// ---------------------------------------------------------------------------

/// Rig-specific calibration constants.
///
/// These express quirks of a particular physical arm, not solver behavior:
/// actuators whose drive direction mirrors the model's rotation convention,
/// and fixed angle remaps between the model's zero pose and the rig's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigCalibration {
    /// Joints whose computed iteration step is sign-inverted before being
    /// applied (default: none).
    #[serde(default)]
    pub invert_step: Vec<String>,

    /// Degrees added to the raw wrist angle by the geometric solver to
    /// align its "straight" convention with the rig's neutral pose
    /// (default: 95.0).
    #[serde(default = "default_wrist_neutral_offset_deg")]
    pub wrist_neutral_offset_deg: f64,

    /// Per-joint output remap in degrees: the angle reported to the rig is
    /// the model angle minus this offset (default: 0 for every joint).
    #[serde(default)]
    pub joint_offsets_deg: HashMap<String, f64>,
}

impl Default for RigCalibration {
    fn default() -> Self {
        Self {
            invert_step: Vec::new(),
            wrist_neutral_offset_deg: default_wrist_neutral_offset_deg(),
            joint_offsets_deg: HashMap::default(),
        }
    }
}

impl RigCalibration {
    /// Whether the named joint's step direction is inverted.
    #[must_use]
    pub fn inverts(&self, joint: &str) -> bool {
        self.invert_step.iter().any(|j| j == joint)
    }

    /// Output offset in degrees for the named joint.
    #[must_use]
    pub fn offset_deg_for(&self, joint: &str) -> f64 {
        self.joint_offsets_deg.get(joint).copied().unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// ArmConfig
// ---------------------------------------------------------------------------

/// Complete arm configuration loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmConfig {
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub calibration: RigCalibration,
}

impl ArmConfig {
    /// Validate all sections. Returns Err on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.solver.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
