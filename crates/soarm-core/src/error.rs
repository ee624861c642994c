use thiserror::Error;

/// Top-level error type for soarm-core.
///
/// Only structural and configuration problems surface as errors. Numerical
/// outcomes of a solve (non-convergence, singular Jacobian, rejected
/// solutions) are reported through solve status values, never through this
/// type.
#[derive(Debug, Error)]
pub enum SoArmError {
    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Chain-topology errors raised before any iteration begins.
///
/// Clone + static shapes for cheap propagation from name-resolution paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("Joint not found in chain: {0}")]
    JointNotFound(String),

    #[error("Control point not found in chain: {0}")]
    ControlPointNotFound(String),

    #[error("Angle vector length mismatch: expected {expected}, got {got}")]
    AngleCountMismatch { expected: usize, got: usize },

    #[error("Chain has {dof} joints but at least {required} are required")]
    ChainTooShort { required: usize, dof: usize },

    #[error("Solve requested with no targets")]
    NoTargets,

    #[error("Too many targets: {got} (at most {max} tracked points)")]
    TooManyTargets { got: usize, max: usize },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid damping: {0} (must be > 0)")]
    InvalidDamping(f64),

    #[error("Invalid weight for target {target}: {value} (must be > 0)")]
    InvalidWeight { target: String, value: f64 },

    #[error("Invalid limit range for joint {joint}: [{lo}, {hi}]")]
    InvalidLimitRange { joint: String, lo: f64, hi: f64 },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soarm_error_from_structural_error() {
        let err = StructuralError::JointNotFound("Elbow_Flex".into());
        let top: SoArmError = err.into();
        assert!(matches!(top, SoArmError::Structural(_)));
        assert!(top.to_string().contains("Elbow_Flex"));
    }

    #[test]
    fn soarm_error_from_config_error() {
        let err = ConfigError::InvalidDamping(0.0);
        let top: SoArmError = err.into();
        assert!(matches!(top, SoArmError::Config(_)));
        assert!(top.to_string().contains('0'));
    }

    #[test]
    fn config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let config_err: ConfigError = io_err.into();
        assert!(matches!(config_err, ConfigError::Io(_)));
    }

    #[test]
    fn structural_error_is_clone_eq() {
        let err = StructuralError::NoTargets;
        let err2 = err.clone();
        assert_eq!(err, err2);
    }

    #[test]
    fn structural_error_display_messages() {
        assert_eq!(
            StructuralError::JointNotFound("Wrist_Flex".into()).to_string(),
            "Joint not found in chain: Wrist_Flex"
        );
        assert_eq!(
            StructuralError::ControlPointNotFound("gripper_frame".into()).to_string(),
            "Control point not found in chain: gripper_frame"
        );
        assert_eq!(
            StructuralError::AngleCountMismatch {
                expected: 5,
                got: 3
            }
            .to_string(),
            "Angle vector length mismatch: expected 5, got 3"
        );
        assert_eq!(
            StructuralError::ChainTooShort { required: 4, dof: 2 }.to_string(),
            "Chain has 2 joints but at least 4 are required"
        );
        assert_eq!(
            StructuralError::NoTargets.to_string(),
            "Solve requested with no targets"
        );
        assert_eq!(
            StructuralError::TooManyTargets { got: 4, max: 3 }.to_string(),
            "Too many targets: 4 (at most 3 tracked points)"
        );
    }

    #[test]
    fn config_error_display_messages() {
        assert_eq!(
            ConfigError::InvalidDamping(-0.5).to_string(),
            "Invalid damping: -0.5 (must be > 0)"
        );
        assert_eq!(
            ConfigError::InvalidWeight {
                target: "hand".into(),
                value: 0.0
            }
            .to_string(),
            "Invalid weight for target hand: 0 (must be > 0)"
        );
        assert_eq!(
            ConfigError::InvalidLimitRange {
                joint: "Shoulder_Lift".into(),
                lo: 2.0,
                hi: -1.0
            }
            .to_string(),
            "Invalid limit range for joint Shoulder_Lift: [2, -1]"
        );
        assert_eq!(
            ConfigError::InvalidValue {
                field: "max_iterations".into(),
                message: "must be at least 1".into()
            }
            .to_string(),
            "Invalid value for max_iterations: must be at least 1"
        );
    }
}
