//! Kinematic chain model with forward kinematics and named control points.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, UnitVector3, Vector3};
use soarm_core::config::JointLimitsConfig;
use soarm_core::error::StructuralError;
use soarm_core::types::JointAxis;

/// A single revolute joint in a kinematic chain.
#[derive(Debug, Clone)]
pub struct JointSpec {
    /// Joint name (unique within the chain).
    pub name: String,
    /// Static transform from the parent joint's moving frame to this
    /// joint's frame, applied before the joint rotation.
    pub origin: Isometry3<f64>,
    /// Local rotation axis.
    pub axis: JointAxis,
    /// Lower angle limit in radians.
    pub lower_limit: f64,
    /// Upper angle limit in radians.
    pub upper_limit: f64,
}

impl JointSpec {
    pub fn new(
        name: impl Into<String>,
        origin: Isometry3<f64>,
        axis: JointAxis,
        lower_limit: f64,
        upper_limit: f64,
    ) -> Self {
        Self {
            name: name.into(),
            origin,
            axis,
            lower_limit,
            upper_limit,
        }
    }
}

/// A named point rigidly attached to a link.
///
/// The point rides on the moving frame of the joint it is attached to:
/// `local_offset` is expressed in that frame, after the joint rotation.
#[derive(Debug, Clone)]
pub struct ControlPoint {
    pub name: String,
    /// Name of the joint whose moving frame carries this point.
    pub joint: String,
    /// Offset from the joint's moving frame, in that frame.
    pub local_offset: Vector3<f64>,
}

impl ControlPoint {
    pub fn new(name: impl Into<String>, joint: impl Into<String>, local_offset: Vector3<f64>) -> Self {
        Self {
            name: name.into(),
            joint: joint.into(),
            local_offset,
        }
    }
}

/// An ordered chain of single-axis revolute joints.
///
/// The chain owns the committed joint angle vector. Forward kinematics is
/// pure: every query takes an explicit angle slice, so solvers can evaluate
/// candidate vectors without touching the committed state.
#[derive(Debug, Clone)]
pub struct KinematicChain {
    joints: Vec<JointSpec>,
    points: Vec<ControlPoint>,
    /// Joint index each control point is attached to, parallel to `points`.
    point_joints: Vec<usize>,
    angles: Vec<f64>,
}

impl KinematicChain {
    /// Builds a chain from joints and control point attachments.
    ///
    /// The committed angle vector starts at zero, clamped into the joint
    /// limits. Fails if a control point names a joint that is not in the
    /// chain.
    pub fn new(joints: Vec<JointSpec>, points: Vec<ControlPoint>) -> Result<Self, StructuralError> {
        let mut point_joints = Vec::with_capacity(points.len());
        for point in &points {
            let index = joints
                .iter()
                .position(|j| j.name == point.joint)
                .ok_or_else(|| StructuralError::JointNotFound(point.joint.clone()))?;
            point_joints.push(index);
        }
        let mut angles: Vec<f64> = vec![0.0; joints.len()];
        for (angle, joint) in angles.iter_mut().zip(&joints) {
            *angle = angle.clamp(joint.lower_limit, joint.upper_limit);
        }
        Ok(Self {
            joints,
            points,
            point_joints,
            angles,
        })
    }

    /// Number of joints.
    #[must_use]
    pub fn dof(&self) -> usize {
        self.joints.len()
    }

    /// Joint names in chain order.
    #[must_use]
    pub fn joint_names(&self) -> Vec<&str> {
        self.joints.iter().map(|j| j.name.as_str()).collect()
    }

    /// All joints in chain order.
    #[must_use]
    pub fn joints(&self) -> &[JointSpec] {
        &self.joints
    }

    /// All control points.
    #[must_use]
    pub fn control_points(&self) -> &[ControlPoint] {
        &self.points
    }

    /// The committed joint angle vector, in radians.
    #[must_use]
    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    /// Replaces the committed angle vector, clamping into joint limits.
    ///
    /// Values already inside the limits are stored unchanged, so restoring
    /// a previously committed vector is exact.
    pub fn set_angles(&mut self, q: &[f64]) -> Result<(), StructuralError> {
        if q.len() != self.joints.len() {
            return Err(StructuralError::AngleCountMismatch {
                expected: self.joints.len(),
                got: q.len(),
            });
        }
        for ((stored, &value), joint) in self.angles.iter_mut().zip(q).zip(&self.joints) {
            *stored = value.clamp(joint.lower_limit, joint.upper_limit);
        }
        Ok(())
    }

    /// Index of a joint by name.
    pub fn joint_index(&self, name: &str) -> Result<usize, StructuralError> {
        self.joints
            .iter()
            .position(|j| j.name == name)
            .ok_or_else(|| StructuralError::JointNotFound(name.to_owned()))
    }

    /// Index of a control point by name.
    pub fn point_index(&self, name: &str) -> Result<usize, StructuralError> {
        self.points
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| StructuralError::ControlPointNotFound(name.to_owned()))
    }

    /// Joint index a control point is attached to.
    #[must_use]
    pub(crate) fn point_joint(&self, point_index: usize) -> usize {
        self.point_joints[point_index]
    }

    /// World pose of a named control point at the given angles.
    ///
    /// Returns the point's world position and the orientation of the frame
    /// carrying it.
    pub fn world_pose(
        &self,
        q: &[f64],
        point: &str,
    ) -> Result<(Vector3<f64>, UnitQuaternion<f64>), StructuralError> {
        let index = self.point_index(point)?;
        Ok(self.point_pose(q, index))
    }

    /// World position of a named control point at the given angles.
    pub fn world_position(&self, q: &[f64], point: &str) -> Result<Vector3<f64>, StructuralError> {
        Ok(self.world_pose(q, point)?.0)
    }

    /// World pose of a control point by index.
    pub(crate) fn point_pose(&self, q: &[f64], point_index: usize) -> (Vector3<f64>, UnitQuaternion<f64>) {
        let frame = self.frame_through(q, self.point_joints[point_index]);
        let position = frame.translation.vector + frame.rotation * self.points[point_index].local_offset;
        (position, frame.rotation)
    }

    /// World position of a control point by index.
    pub(crate) fn point_position(&self, q: &[f64], point_index: usize) -> Vector3<f64> {
        self.point_pose(q, point_index).0
    }

    /// World frame after applying joints `0..=joint_index`.
    fn frame_through(&self, q: &[f64], joint_index: usize) -> Isometry3<f64> {
        assert_eq!(q.len(), self.joints.len(), "joint angle vector length mismatch");
        let mut transform = Isometry3::identity();
        for (joint, &angle) in self.joints.iter().zip(q).take(joint_index + 1) {
            transform *= joint.origin;
            transform *= joint_rotation(joint.axis, angle);
        }
        transform
    }

    /// World origin and rotation axis of every joint at the given angles.
    ///
    /// Both are taken before the joint's own rotation is applied, which is
    /// the form the Jacobian columns need.
    #[must_use]
    pub fn joint_frames(&self, q: &[f64]) -> (Vec<Vector3<f64>>, Vec<Vector3<f64>>) {
        assert_eq!(q.len(), self.joints.len(), "joint angle vector length mismatch");
        let mut origins = Vec::with_capacity(self.joints.len());
        let mut axes = Vec::with_capacity(self.joints.len());
        let mut transform = Isometry3::identity();
        for (joint, &angle) in self.joints.iter().zip(q) {
            transform *= joint.origin;
            origins.push(transform.translation.vector);
            axes.push(transform.rotation * axis_unit(joint.axis).into_inner());
            transform *= joint_rotation(joint.axis, angle);
        }
        (origins, axes)
    }

    /// Clamps an angle vector into the joint limits, in place.
    pub fn clamp_angles(&self, q: &mut [f64]) {
        for (value, joint) in q.iter_mut().zip(&self.joints) {
            *value = value.clamp(joint.lower_limit, joint.upper_limit);
        }
    }

    /// Applies configured limit overrides, given in degrees.
    ///
    /// The default range, if present, replaces every joint's limits first;
    /// per-joint entries are applied on top. The committed angle vector is
    /// re-clamped into the new limits. Fails if a per-joint entry names an
    /// unknown joint.
    pub fn apply_limit_overrides(&mut self, limits: &JointLimitsConfig) -> Result<(), StructuralError> {
        for name in limits.per_joint.keys() {
            self.joint_index(name)?;
        }
        if let Some([lo, hi]) = limits.default {
            for joint in &mut self.joints {
                joint.lower_limit = lo.to_radians();
                joint.upper_limit = hi.to_radians();
            }
        }
        for (name, [lo, hi]) in &limits.per_joint {
            for joint in &mut self.joints {
                if joint.name == *name {
                    joint.lower_limit = lo.to_radians();
                    joint.upper_limit = hi.to_radians();
                }
            }
        }
        let mut angles = std::mem::take(&mut self.angles);
        self.clamp_angles(&mut angles);
        self.angles = angles;
        Ok(())
    }
}

/// Unit vector for a local joint axis.
pub(crate) fn axis_unit(axis: JointAxis) -> UnitVector3<f64> {
    match axis {
        JointAxis::X => Vector3::x_axis(),
        JointAxis::Y => Vector3::y_axis(),
        JointAxis::Z => Vector3::z_axis(),
    }
}

/// Rotation of a revolute joint at the given angle.
fn joint_rotation(axis: JointAxis, angle: f64) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::identity(),
        UnitQuaternion::from_axis_angle(&axis_unit(axis), angle),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
