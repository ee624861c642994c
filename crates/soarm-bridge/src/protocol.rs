//! Wire messages for driving the arm from observed poses.
//!
//! Defines the JSON-serialisable request types arriving from pose observers
//! and the single outbound angle command handed to the actuation channel.
//! Inbound messages are tagged by `method`; the transport that carries them
//! (broker, pipe, socket) stays outside this crate.
//!
//! All messages are newline-delimited JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use soarm_core::types::JointAxis;
use soarm_ik::ArmKeypoints;

/// Method name of the angle command, inbound and outbound.
pub const SET_JOINT_ANGLES: &str = "set_joint_angles";

/// Units field of the angle command. Angles on the wire are always degrees.
pub const UNITS_DEGREES: &str = "degrees";

/// Mode field of the angle command.
pub const MODE_FOLLOWER: &str = "follower";

/// Joint name of the gripper passthrough entry.
pub const GRIPPER: &str = "Gripper";

// ---------------------------------------------------------------------------
// Keypoints
// ---------------------------------------------------------------------------

/// One observed 3D sample. Senders may omit components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl Keypoint {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    /// World vector when all three components are present.
    #[must_use]
    pub fn vector(&self) -> Option<Vector3<f64>> {
        Some(Vector3::new(self.x?, self.y?, self.z?))
    }

    /// World vector with per-component fallbacks for absent values.
    #[must_use]
    pub fn vector_or(&self, fallback: Vector3<f64>) -> Vector3<f64> {
        Vector3::new(
            self.x.unwrap_or(fallback.x),
            self.y.unwrap_or(fallback.y),
            self.z.unwrap_or(fallback.z),
        )
    }
}

/// Named keypoints of one observed arm pose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KeypointSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoulder: Option<Keypoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elbow: Option<Keypoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrist: Option<Keypoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hand: Option<Keypoint>,
}

impl KeypointSet {
    /// Keypoints that are fully specified, as world vectors.
    #[must_use]
    pub fn arm_keypoints(&self) -> ArmKeypoints {
        ArmKeypoints {
            shoulder: self.shoulder.and_then(|k| k.vector()),
            elbow: self.elbow.and_then(|k| k.vector()),
            wrist: self.wrist.and_then(|k| k.vector()),
            hand: self.hand.and_then(|k| k.vector()),
        }
    }
}

/// Parameters of the keypoint-bearing requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KeypointParams {
    #[serde(default)]
    pub joints: KeypointSet,
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// An inbound message, tagged by `method`.
///
/// # Example
///
/// ```
/// use soarm_bridge::protocol::Request;
///
/// let json = r#"{"method":"set_openpose_joints","params":{"joints":{"hand":{"x":0.1,"y":0.2,"z":0.3}}}}"#;
/// let req: Request = serde_json::from_str(json).unwrap();
/// assert!(matches!(req, Request::SetOpenposeJoints { .. }));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    /// Four observed arm keypoints, routed to the closed-form solver.
    SetJointsFromArmPose {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
        params: KeypointParams,
    },
    /// Pose-estimation keypoints; the hand entry is the position target
    /// for the iterative solver.
    SetOpenposeJoints {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
        params: KeypointParams,
    },
    /// State echo carrying the rig's current angles; reseeds the chain.
    SetJointAngles {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
        params: CommandParams,
    },
}

// ---------------------------------------------------------------------------
// Outbound command
// ---------------------------------------------------------------------------

/// Angle entries keyed by joint name. Each joint carries its single
/// rotation axis as `{ "<axis>": <degrees> }`.
pub type JointAngleMap = BTreeMap<String, BTreeMap<JointAxis, f64>>;

/// Parameters of the `set_joint_angles` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandParams {
    #[serde(default = "default_units")]
    pub units: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    pub joints: JointAngleMap,
}

fn default_units() -> String {
    UNITS_DEGREES.to_owned()
}

fn default_mode() -> String {
    MODE_FOLLOWER.to_owned()
}

/// The outbound joint-angle command.
///
/// ```json
/// {
///   "method": "set_joint_angles",
///   "timestamp": "2025-06-01T12:00:00Z",
///   "params": {
///     "units": "degrees",
///     "mode": "follower",
///     "joints": { "Base_Rotation": { "y": -12.5 } }
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointCommand {
    pub method: String,
    pub timestamp: DateTime<Utc>,
    pub params: CommandParams,
}

impl JointCommand {
    /// Builds a command around the given angle map.
    #[must_use]
    pub fn new(joints: JointAngleMap, timestamp: DateTime<Utc>) -> Self {
        Self {
            method: SET_JOINT_ANGLES.to_owned(),
            timestamp,
            params: CommandParams {
                units: UNITS_DEGREES.to_owned(),
                mode: MODE_FOLLOWER.to_owned(),
                joints,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
