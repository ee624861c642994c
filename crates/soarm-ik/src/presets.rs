//! Built-in chain presets for supported arm rigs.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use soarm_core::config::SolverConfig;
use soarm_core::types::JointAxis;
use std::f64::consts::PI;

use crate::chain::{ControlPoint, JointSpec, KinematicChain};

/// Joint names of the SO-101 style five-joint arm, in chain order.
pub const BASE_ROTATION: &str = "Base_Rotation";
pub const SHOULDER_LIFT: &str = "Shoulder_Lift";
pub const ELBOW_FLEX: &str = "Elbow_Flex";
pub const WRIST_FLEX: &str = "Wrist_Flex";
pub const WRIST_ROLL: &str = "Wrist_Roll";

/// Control point names of the preset chain.
pub const SHOULDER_POINT: &str = "shoulder";
pub const ELBOW_POINT: &str = "elbow";
pub const WRIST_POINT: &str = "wrist";
pub const GRIPPER_FRAME: &str = "gripper_frame";

pub const ARM_JOINTS: [&str; 5] = [
    BASE_ROTATION,
    SHOULDER_LIFT,
    ELBOW_FLEX,
    WRIST_FLEX,
    WRIST_ROLL,
];

/// Five-joint SO-101 style arm.
///
/// The frame is y-up with +z forward. Base yaw turns about +y; the three
/// pitch joints turn about their local x. Lift angle 0 points the upper
/// arm straight up and 90 points it horizontal. Elbow and wrist carry a
/// half-turn pre-rotation in their origins so that angle 0 is the folded
/// rest pose and a straight continuation of the previous link reads -180,
/// matching the rig's native angle convention. At all-zero angles the arm
/// is folded into its compact rest zigzag.
#[must_use]
pub fn so101() -> KinematicChain {
    let joints = vec![
        JointSpec::new(
            BASE_ROTATION,
            Isometry3::translation(0.0, 0.05, 0.0),
            JointAxis::Y,
            (-109.0_f64).to_radians(),
            109.0_f64.to_radians(),
        ),
        JointSpec::new(
            SHOULDER_LIFT,
            Isometry3::translation(0.0, 0.05, 0.0),
            JointAxis::X,
            0.0,
            190.0_f64.to_radians(),
        ),
        JointSpec::new(
            ELBOW_FLEX,
            flipped_origin(0.25),
            JointAxis::X,
            -PI,
            0.0,
        ),
        JointSpec::new(
            WRIST_FLEX,
            flipped_origin(0.20),
            JointAxis::X,
            (-170.0_f64).to_radians(),
            0.0,
        ),
        JointSpec::new(
            WRIST_ROLL,
            Isometry3::translation(0.0, 0.08, 0.0),
            JointAxis::Y,
            -PI,
            PI,
        ),
    ];
    let points = vec![
        ControlPoint::new(SHOULDER_POINT, SHOULDER_LIFT, Vector3::zeros()),
        ControlPoint::new(ELBOW_POINT, ELBOW_FLEX, Vector3::zeros()),
        ControlPoint::new(WRIST_POINT, WRIST_FLEX, Vector3::zeros()),
        ControlPoint::new(GRIPPER_FRAME, WRIST_ROLL, Vector3::new(0.0, 0.07, 0.0)),
    ];
    KinematicChain::new(joints, points).expect("preset names are consistent")
}

/// Solver configuration tuned for [`so101`].
///
/// Distal joints get tighter step caps than the base so the wrist does not
/// whip around while the large links are still converging.
#[must_use]
pub fn so101_solver_config() -> SolverConfig {
    let mut config = SolverConfig::default();
    config.max_step_per_joint.insert(SHOULDER_LIFT.into(), 0.3);
    config.max_step_per_joint.insert(ELBOW_FLEX.into(), 0.3);
    config.max_step_per_joint.insert(WRIST_FLEX.into(), 0.12);
    config.max_step_per_joint.insert(WRIST_ROLL.into(), 0.12);
    config.ee_point = GRIPPER_FRAME.into();
    config
}

/// Link origin carrying the half-turn pre-rotation about x.
fn flipped_origin(link_length: f64) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(0.0, link_length, 0.0),
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
