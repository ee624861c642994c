//! Closed-form solver for observed arm keypoints.
//!
//! Cheaper companion to the iterative solver: it maps the four observed
//! keypoints of a human-like arm (shoulder, elbow, wrist, hand) straight
//! onto the first four joints of a yaw-pitch-pitch-pitch chain. No
//! iteration, no validation; the whole pose either resolves in one pass or
//! not at all.

use nalgebra::Vector3;
use soarm_core::error::StructuralError;

use crate::chain::KinematicChain;

/// Segment directions shorter than this cannot be normalized.
const SEGMENT_EPS: f64 = 1e-9;

/// Observed world positions of the four arm keypoints, where detected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmKeypoints {
    pub shoulder: Option<Vector3<f64>>,
    pub elbow: Option<Vector3<f64>>,
    pub wrist: Option<Vector3<f64>>,
    pub hand: Option<Vector3<f64>>,
}

/// Joint angles produced by the closed-form pass, in degrees, already
/// clamped into the chain's limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometricAngles {
    pub base_yaw_deg: f64,
    pub shoulder_pitch_deg: f64,
    pub elbow_deg: f64,
    pub wrist_deg: f64,
}

impl GeometricAngles {
    /// Angles for the first four chain joints, in chain order, radians.
    #[must_use]
    pub fn as_radians(&self) -> [f64; 4] {
        [
            self.base_yaw_deg.to_radians(),
            self.shoulder_pitch_deg.to_radians(),
            self.elbow_deg.to_radians(),
            self.wrist_deg.to_radians(),
        ]
    }
}

/// Maps keypoint geometry onto the leading four joints of a chain.
///
/// Angle conventions: yaw is measured in the horizontal plane from the
/// forward axis; shoulder pitch is 0 pointing straight up and 90 pointing
/// horizontal; elbow and wrist angles are the bend between adjacent
/// segments offset so a straight continuation reads -180. The wrist
/// additionally carries a fixed neutral offset aligning the observed
/// straight hand with the rig's neutral wrist pose.
#[derive(Debug, Clone)]
pub struct GeometricSolver {
    limits_deg: [[f64; 2]; 4],
    wrist_neutral_offset_deg: f64,
}

impl GeometricSolver {
    /// Builds a solver clamping into the limits of `chain`'s first four
    /// joints. Fails when the chain has fewer than four.
    pub fn for_chain(
        chain: &KinematicChain,
        wrist_neutral_offset_deg: f64,
    ) -> Result<Self, StructuralError> {
        if chain.dof() < 4 {
            return Err(StructuralError::ChainTooShort {
                required: 4,
                dof: chain.dof(),
            });
        }
        let mut limits_deg = [[0.0; 2]; 4];
        for (range, joint) in limits_deg.iter_mut().zip(chain.joints()) {
            *range = [joint.lower_limit.to_degrees(), joint.upper_limit.to_degrees()];
        }
        Ok(Self {
            limits_deg,
            wrist_neutral_offset_deg,
        })
    }

    /// Resolves one observed pose.
    ///
    /// Returns `None` when any keypoint is missing or two adjacent
    /// keypoints coincide.
    pub fn solve(&self, keypoints: &ArmKeypoints) -> Option<GeometricAngles> {
        let shoulder = keypoints.shoulder?;
        let elbow = keypoints.elbow?;
        let wrist = keypoints.wrist?;
        let hand = keypoints.hand?;

        let upper = (elbow - shoulder).try_normalize(SEGMENT_EPS)?;
        let forearm = (wrist - elbow).try_normalize(SEGMENT_EPS)?;
        let hand_dir = (hand - wrist).try_normalize(SEGMENT_EPS)?;

        // Horizontal-plane heading of the upper arm. A vertical segment has
        // a degenerate projection and reads as zero yaw.
        let base_yaw_deg = upper.x.atan2(upper.z).to_degrees();
        let elevation_deg = upper.y.atan2(upper.x.hypot(upper.z)).to_degrees();
        let shoulder_pitch_deg = 90.0 - elevation_deg;
        let elbow_deg = bend_deg(&upper, &forearm) - 180.0;
        let wrist_deg = bend_deg(&forearm, &hand_dir) - 180.0 + self.wrist_neutral_offset_deg;

        Some(GeometricAngles {
            base_yaw_deg: clamp_deg(base_yaw_deg, self.limits_deg[0]),
            shoulder_pitch_deg: clamp_deg(shoulder_pitch_deg, self.limits_deg[1]),
            elbow_deg: clamp_deg(elbow_deg, self.limits_deg[2]),
            wrist_deg: clamp_deg(wrist_deg, self.limits_deg[3]),
        })
    }
}

/// Angle in degrees between two unit directions, in `[0, 180]`.
fn bend_deg(u: &Vector3<f64>, v: &Vector3<f64>) -> f64 {
    u.dot(v).clamp(-1.0, 1.0).acos().to_degrees()
}

fn clamp_deg(value: f64, [lo, hi]: [f64; 2]) -> f64 {
    value.clamp(lo, hi)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
