use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// JointAxis
// ---------------------------------------------------------------------------

/// Local rotation axis of a single-DOF revolute joint.
///
/// Serializes to the lowercase axis letter used as the per-joint key in
/// outbound angle commands (`"joints": { "Base_Rotation": { "y": ... } }`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JointAxis {
    X,
    Y,
    Z,
}

impl JointAxis {
    /// Lowercase axis letter.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Y => "y",
            Self::Z => "z",
        }
    }
}

impl fmt::Display for JointAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joint_axis_as_str() {
        assert_eq!(JointAxis::X.as_str(), "x");
        assert_eq!(JointAxis::Y.as_str(), "y");
        assert_eq!(JointAxis::Z.as_str(), "z");
    }

    #[test]
    fn joint_axis_display() {
        assert_eq!(format!("{}", JointAxis::Y), "y");
    }

    #[test]
    fn joint_axis_serde_lowercase() {
        let json = serde_json::to_string(&JointAxis::Z).unwrap();
        assert_eq!(json, "\"z\"");
        let axis: JointAxis = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(axis, JointAxis::X);
    }
}
