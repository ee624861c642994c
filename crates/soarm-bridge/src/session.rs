//! Serial message-processing loop over one arm.
//!
//! A [`Session`] owns the chain's committed angles, both solvers, the
//! scheduler, and the rig calibration, and processes one inbound message
//! at a time: the host must deliver messages serially, one fully handled
//! before the next begins. Each message yields at most one outbound
//! command; throttled, incomplete, and rejected messages yield nothing and
//! leave the previous pose committed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use tracing::{debug, warn};

use soarm_core::config::{ArmConfig, RigCalibration, SolverConfig};
use soarm_core::error::{SoArmError, StructuralError};
use soarm_core::time::MonoTime;
use soarm_core::types::JointAxis;
use soarm_ik::{
    GeometricSolver, IkSolver, KinematicChain, SolveBudget, SolveResult, SolveScheduler, Target,
};

use crate::protocol::{
    CommandParams, JointAngleMap, JointCommand, KeypointParams, Request, GRIPPER, UNITS_DEGREES,
};

/// Hand target components used when a pose message omits them.
const HAND_FALLBACK: [f64; 3] = [0.18, 0.05, 0.22];

/// Drives the arm from inbound messages.
///
/// Strategy selection follows the message method: observed arm keypoints
/// go through the closed-form pass, pose-estimation keypoints through the
/// iterative solver, and state echoes reseed the chain without solving.
#[derive(Debug, Clone)]
pub struct Session {
    chain: KinematicChain,
    solver: IkSolver,
    geometric: GeometricSolver,
    scheduler: SolveScheduler,
    calibration: RigCalibration,
    gripper_deg: f64,
}

impl Session {
    /// Builds a session over `chain`, applying the configuration's limit
    /// overrides and resolving every configured name against the chain.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid or references
    /// joints or control points the chain does not have.
    pub fn new(mut chain: KinematicChain, config: ArmConfig) -> Result<Self, SoArmError> {
        config.validate()?;
        if let Some(limits) = &config.solver.limit_overrides {
            chain.apply_limit_overrides(limits)?;
        }
        chain.point_index(&config.solver.ee_point)?;
        for name in config.solver.max_step_per_joint.keys() {
            chain.joint_index(name)?;
        }
        for name in &config.calibration.invert_step {
            chain.joint_index(name)?;
        }
        let geometric =
            GeometricSolver::for_chain(&chain, config.calibration.wrist_neutral_offset_deg)?;
        let scheduler = SolveScheduler::new(config.scheduler);
        let solver = IkSolver::new(config.solver)
            .with_inverted_joints(config.calibration.invert_step.clone());
        Ok(Self {
            chain,
            solver,
            geometric,
            scheduler,
            calibration: config.calibration,
            gripper_deg: 0.0,
        })
    }

    /// The chain with its committed angles.
    #[must_use]
    pub fn chain(&self) -> &KinematicChain {
        &self.chain
    }

    /// Committed angles in radians, in joint order.
    #[must_use]
    pub fn angles(&self) -> &[f64] {
        self.chain.angles()
    }

    /// Current gripper passthrough value in degrees.
    #[must_use]
    pub const fn gripper_deg(&self) -> f64 {
        self.gripper_deg
    }

    /// The solver configuration the session was built with.
    #[must_use]
    pub fn solver_config(&self) -> &SolverConfig {
        self.solver.config()
    }

    /// Processes one inbound message.
    ///
    /// Returns the outbound command when the message led to an accepted
    /// pose, `None` when it was throttled, incomplete, or rejected.
    ///
    /// # Errors
    ///
    /// Returns an error only for structural problems; every configured
    /// name was resolved at construction, so these do not occur in normal
    /// operation.
    pub fn process(
        &mut self,
        request: &Request,
        now: MonoTime,
        stamp: DateTime<Utc>,
    ) -> Result<Option<JointCommand>, SoArmError> {
        match request {
            Request::SetJointsFromArmPose { params, .. } => self.arm_pose(params, now, stamp),
            Request::SetOpenposeJoints { params, .. } => self.openpose(params, now, stamp),
            Request::SetJointAngles { params, .. } => {
                self.reseed(params)?;
                Ok(None)
            }
        }
    }

    /// Runs one line of the newline-delimited JSON loop.
    ///
    /// Malformed lines are logged and skipped, as are lines that hit a
    /// structural error, so one bad message never stops the loop.
    pub fn process_line(
        &mut self,
        line: &str,
        now: MonoTime,
        stamp: DateTime<Utc>,
    ) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let request: Request = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "skipping malformed message");
                return None;
            }
        };
        let command = match self.process(&request, now, stamp) {
            Ok(command) => command?,
            Err(err) => {
                warn!(%err, "dropping message after structural error");
                return None;
            }
        };
        match serde_json::to_string(&command) {
            Ok(json) => Some(json),
            Err(err) => {
                warn!(%err, "failed to serialise command");
                None
            }
        }
    }

    /// Runs one explicit-target solve toward the end-effector point and
    /// leaves the committed pose per the validator's decision.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured end-effector point or a
    /// configured joint name is absent from the chain.
    pub fn solve_target(
        &mut self,
        position: Vector3<f64>,
        now: MonoTime,
    ) -> Result<SolveResult, SoArmError> {
        let budget = SolveBudget::from_config(self.solver.config());
        let result = self.solve_toward(position, budget)?;
        if result.accepted() {
            self.scheduler.record_accepted(now);
        }
        Ok(result)
    }

    /// Formats the committed pose as the outbound command: degrees, with
    /// calibration offsets applied and the gripper passthrough appended.
    #[must_use]
    pub fn command(&self, stamp: DateTime<Utc>) -> JointCommand {
        let mut joints = JointAngleMap::new();
        for (joint, &angle) in self.chain.joints().iter().zip(self.chain.angles()) {
            let command_deg = angle.to_degrees() - self.calibration.offset_deg_for(&joint.name);
            joints.insert(joint.name.clone(), BTreeMap::from([(joint.axis, command_deg)]));
        }
        joints.insert(
            GRIPPER.to_owned(),
            BTreeMap::from([(JointAxis::Z, self.gripper_deg)]),
        );
        JointCommand::new(joints, stamp)
    }

    fn arm_pose(
        &mut self,
        params: &KeypointParams,
        now: MonoTime,
        stamp: DateTime<Utc>,
    ) -> Result<Option<JointCommand>, SoArmError> {
        if self.scheduler.plan(now, self.solver.config()).is_none() {
            debug!("solve throttled inside minimum interval");
            return Ok(None);
        }
        let keypoints = params.joints.arm_keypoints();
        let Some(angles) = self.geometric.solve(&keypoints) else {
            warn!("keypoint set incomplete or degenerate, keeping previous pose");
            return Ok(None);
        };
        let mut q = self.chain.angles().to_vec();
        q[..4].copy_from_slice(&angles.as_radians());
        self.chain.set_angles(&q)?;
        self.scheduler.record_accepted(now);
        debug!(
            base_yaw_deg = angles.base_yaw_deg,
            shoulder_pitch_deg = angles.shoulder_pitch_deg,
            elbow_deg = angles.elbow_deg,
            wrist_deg = angles.wrist_deg,
            "pose resolved by the closed-form pass"
        );
        Ok(Some(self.command(stamp)))
    }

    fn openpose(
        &mut self,
        params: &KeypointParams,
        now: MonoTime,
        stamp: DateTime<Utc>,
    ) -> Result<Option<JointCommand>, SoArmError> {
        let Some(budget) = self.scheduler.plan(now, self.solver.config()) else {
            debug!("solve throttled inside minimum interval");
            return Ok(None);
        };
        let Some(hand) = params.joints.hand else {
            warn!("pose message without a hand keypoint, keeping previous pose");
            return Ok(None);
        };
        let position = hand.vector_or(Vector3::new(
            HAND_FALLBACK[0],
            HAND_FALLBACK[1],
            HAND_FALLBACK[2],
        ));
        let result = self.solve_toward(position, budget)?;
        if !result.accepted() {
            warn!(
                max_distance = result.max_distance,
                "solution rejected, keeping previous pose"
            );
            return Ok(None);
        }
        self.scheduler.record_accepted(now);
        debug!(
            iterations = result.iterations,
            residual = result.residual,
            status = ?result.status,
            "target solve committed"
        );
        Ok(Some(self.command(stamp)))
    }

    fn solve_toward(
        &mut self,
        position: Vector3<f64>,
        budget: SolveBudget,
    ) -> Result<SolveResult, StructuralError> {
        let ee_point = self.solver.config().ee_point.clone();
        let weight = self.solver.config().weight_for(&ee_point);
        let target = Target::new(ee_point, position).with_weight(weight);
        self.solver.solve_budgeted(&mut self.chain, &[target], budget)
    }

    /// Applies a state echo: overwrites the committed angles with the
    /// rig-reported values mapped back into model angles, clamped into
    /// limits. Entries the chain cannot place are skipped.
    fn reseed(&mut self, params: &CommandParams) -> Result<(), SoArmError> {
        if params.units != UNITS_DEGREES {
            warn!(units = %params.units, "ignoring state echo with unrecognised units");
            return Ok(());
        }
        let mut q = self.chain.angles().to_vec();
        for (name, axes) in &params.joints {
            if name == GRIPPER {
                if let Some(&value) = axes.get(&JointAxis::Z) {
                    self.gripper_deg = value;
                }
                continue;
            }
            let Ok(index) = self.chain.joint_index(name) else {
                warn!(joint = %name, "state echo names a joint the chain does not have");
                continue;
            };
            let axis = self.chain.joints()[index].axis;
            let Some(&command_deg) = axes.get(&axis) else {
                warn!(joint = %name, "state echo entry is missing the joint's axis");
                continue;
            };
            let model_deg = command_deg + self.calibration.offset_deg_for(name);
            q[index] = model_deg.to_radians();
        }
        self.chain.set_angles(&q)?;
        debug!("chain reseeded from state echo");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Keypoint, KeypointSet};
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use soarm_core::config::JointLimitsConfig;
    use soarm_ik::presets::{so101, so101_solver_config};
    use std::collections::HashMap;

    fn test_session() -> Session {
        let config = ArmConfig {
            solver: so101_solver_config(),
            ..ArmConfig::default()
        };
        Session::new(so101(), config).unwrap()
    }

    fn t(ms: u64) -> MonoTime {
        MonoTime::from_millis(ms)
    }

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn openpose_request(x: f64, y: f64, z: f64) -> Request {
        Request::SetOpenposeJoints {
            timestamp: None,
            params: KeypointParams {
                joints: KeypointSet {
                    hand: Some(Keypoint::new(x, y, z)),
                    ..KeypointSet::default()
                },
            },
        }
    }

    fn straight_up_pose_request() -> Request {
        Request::SetJointsFromArmPose {
            timestamp: None,
            params: KeypointParams {
                joints: KeypointSet {
                    shoulder: Some(Keypoint::new(0.0, 0.10, 0.0)),
                    elbow: Some(Keypoint::new(0.0, 0.35, 0.0)),
                    wrist: Some(Keypoint::new(0.0, 0.55, 0.0)),
                    hand: Some(Keypoint::new(0.0, 0.70, 0.0)),
                },
            },
        }
    }

    fn angle_of(command: &JointCommand, joint: &str, axis: JointAxis) -> f64 {
        command.params.joints[joint].get(&axis).copied().unwrap()
    }

    // ---- closed-form path ----

    #[test]
    fn arm_pose_message_drives_closed_form_solve() {
        let mut session = test_session();
        let command = session
            .process(&straight_up_pose_request(), t(0), stamp())
            .unwrap()
            .expect("straight-up pose should produce a command");

        assert_eq!(command.method, "set_joint_angles");
        assert_eq!(command.params.units, "degrees");
        assert_eq!(command.params.mode, "follower");
        assert_relative_eq!(
            angle_of(&command, "Base_Rotation", JointAxis::Y),
            0.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            angle_of(&command, "Shoulder_Lift", JointAxis::X),
            0.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            angle_of(&command, "Elbow_Flex", JointAxis::X),
            -180.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            angle_of(&command, "Wrist_Flex", JointAxis::X),
            -85.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(angle_of(&command, "Gripper", JointAxis::Z), 0.0);
        assert_relative_eq!(
            session.angles()[2],
            (-180.0f64).to_radians(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn arm_pose_with_missing_keypoint_produces_nothing() {
        let mut session = test_session();
        let request = Request::SetJointsFromArmPose {
            timestamp: None,
            params: KeypointParams {
                joints: KeypointSet {
                    shoulder: Some(Keypoint::new(0.0, 0.10, 0.0)),
                    elbow: Some(Keypoint::new(0.0, 0.35, 0.0)),
                    wrist: Some(Keypoint::new(0.0, 0.55, 0.0)),
                    hand: None,
                },
            },
        };
        let command = session.process(&request, t(0), stamp()).unwrap();
        assert!(command.is_none());
        assert!(session.angles().iter().all(|&a| a == 0.0));
    }

    // ---- iterative path ----

    #[test]
    fn openpose_message_drives_iterative_solve() {
        let mut session = test_session();
        let command = session
            .process(&openpose_request(0.0, 0.0, 0.3), t(0), stamp())
            .unwrap()
            .expect("reachable target should commit");

        // All five chain joints plus the gripper passthrough.
        assert_eq!(command.params.joints.len(), 6);
        assert_relative_eq!(angle_of(&command, "Gripper", JointAxis::Z), 0.0);

        let reached = session
            .chain()
            .world_position(session.angles(), "gripper_frame")
            .unwrap();
        assert!((reached - Vector3::new(0.0, 0.0, 0.3)).norm() < 1e-2);
    }

    #[test]
    fn openpose_without_hand_produces_nothing() {
        let mut session = test_session();
        let request = Request::SetOpenposeJoints {
            timestamp: None,
            params: KeypointParams {
                joints: KeypointSet {
                    shoulder: Some(Keypoint::new(0.0, 0.1, 0.0)),
                    ..KeypointSet::default()
                },
            },
        };
        let command = session.process(&request, t(0), stamp()).unwrap();
        assert!(command.is_none());
        assert!(session.angles().iter().all(|&a| a == 0.0));
    }

    #[test]
    fn openpose_fills_missing_hand_components() {
        let mut session = test_session();
        let request = Request::SetOpenposeJoints {
            timestamp: None,
            params: KeypointParams {
                joints: KeypointSet {
                    hand: Some(Keypoint::default()),
                    ..KeypointSet::default()
                },
            },
        };
        let command = session.process(&request, t(0), stamp()).unwrap();
        assert!(command.is_some());

        let reached = session
            .chain()
            .world_position(session.angles(), "gripper_frame")
            .unwrap();
        let fallback = Vector3::new(0.18, 0.05, 0.22);
        assert!((reached - fallback).norm() < 1e-2);
    }

    #[test]
    fn rejected_solve_keeps_previous_pose() {
        let mut session = test_session();
        let command = session
            .process(&openpose_request(0.0, 0.0, 5.0), t(0), stamp())
            .unwrap();
        assert!(command.is_none());
        assert!(session.angles().iter().all(|&a| a == 0.0));
    }

    // ---- scheduling ----

    #[test]
    fn messages_inside_minimum_interval_are_dropped() {
        let mut session = test_session();
        let request = openpose_request(0.0, 0.0, 0.3);

        assert!(session.process(&request, t(0), stamp()).unwrap().is_some());
        assert!(session.process(&request, t(10), stamp()).unwrap().is_none());
        assert!(session.process(&request, t(60), stamp()).unwrap().is_some());
    }

    // ---- state echo ----

    #[test]
    fn state_echo_reseeds_chain_and_gripper() {
        let mut session = test_session();
        let mut joints = JointAngleMap::new();
        joints.insert(
            "Shoulder_Lift".into(),
            BTreeMap::from([(JointAxis::X, 45.0)]),
        );
        joints.insert("Gripper".into(), BTreeMap::from([(JointAxis::Z, 30.0)]));
        let request = Request::SetJointAngles {
            timestamp: None,
            params: CommandParams {
                units: UNITS_DEGREES.to_owned(),
                mode: "follower".to_owned(),
                joints,
            },
        };

        let command = session.process(&request, t(0), stamp()).unwrap();
        assert!(command.is_none());
        assert_relative_eq!(session.angles()[1], 45.0f64.to_radians(), epsilon = 1e-9);
        assert_relative_eq!(session.gripper_deg(), 30.0);

        let next = session.command(stamp());
        assert_relative_eq!(angle_of(&next, "Gripper", JointAxis::Z), 30.0);
    }

    #[test]
    fn state_echo_clamps_into_limits() {
        let mut session = test_session();
        let mut joints = JointAngleMap::new();
        joints.insert(
            "Base_Rotation".into(),
            BTreeMap::from([(JointAxis::Y, 700.0)]),
        );
        let request = Request::SetJointAngles {
            timestamp: None,
            params: CommandParams {
                units: UNITS_DEGREES.to_owned(),
                mode: "follower".to_owned(),
                joints,
            },
        };
        session.process(&request, t(0), stamp()).unwrap();
        assert_relative_eq!(session.angles()[0], 109.0f64.to_radians(), epsilon = 1e-9);
    }

    #[test]
    fn state_echo_skips_unknown_joint() {
        let mut session = test_session();
        let mut joints = JointAngleMap::new();
        joints.insert("Phantom".into(), BTreeMap::from([(JointAxis::X, 10.0)]));
        let request = Request::SetJointAngles {
            timestamp: None,
            params: CommandParams {
                units: UNITS_DEGREES.to_owned(),
                mode: "follower".to_owned(),
                joints,
            },
        };
        session.process(&request, t(0), stamp()).unwrap();
        assert!(session.angles().iter().all(|&a| a == 0.0));
    }

    #[test]
    fn state_echo_with_unrecognised_units_is_ignored() {
        let mut session = test_session();
        let mut joints = JointAngleMap::new();
        joints.insert(
            "Shoulder_Lift".into(),
            BTreeMap::from([(JointAxis::X, 1.0)]),
        );
        let request = Request::SetJointAngles {
            timestamp: None,
            params: CommandParams {
                units: "radians".to_owned(),
                mode: "follower".to_owned(),
                joints,
            },
        };
        session.process(&request, t(0), stamp()).unwrap();
        assert!(session.angles().iter().all(|&a| a == 0.0));
    }

    #[test]
    fn commands_parse_back_as_state_echo() {
        let mut session = test_session();
        let command = session
            .process(&openpose_request(0.0, 0.0, 0.3), t(0), stamp())
            .unwrap()
            .unwrap();
        let json = serde_json::to_string(&command).unwrap();
        let echo: Request = serde_json::from_str(&json).unwrap();

        let mut replica = test_session();
        replica.process(&echo, t(0), stamp()).unwrap();
        for (a, b) in session.angles().iter().zip(replica.angles()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    // ---- calibration ----

    #[test]
    fn calibration_offsets_shift_reported_angles() {
        let mut offsets = HashMap::new();
        offsets.insert("Shoulder_Lift".to_owned(), 90.0);
        let config = ArmConfig {
            solver: so101_solver_config(),
            calibration: RigCalibration {
                joint_offsets_deg: offsets,
                ..RigCalibration::default()
            },
            ..ArmConfig::default()
        };
        let mut session = Session::new(so101(), config).unwrap();

        let mut joints = JointAngleMap::new();
        joints.insert(
            "Shoulder_Lift".into(),
            BTreeMap::from([(JointAxis::X, -45.0)]),
        );
        let request = Request::SetJointAngles {
            timestamp: None,
            params: CommandParams {
                units: UNITS_DEGREES.to_owned(),
                mode: "follower".to_owned(),
                joints,
            },
        };
        session.process(&request, t(0), stamp()).unwrap();
        assert_relative_eq!(session.angles()[1], 45.0f64.to_radians(), epsilon = 1e-9);

        let command = session.command(stamp());
        assert_relative_eq!(
            angle_of(&command, "Shoulder_Lift", JointAxis::X),
            -45.0,
            epsilon = 1e-9
        );
    }

    // ---- construction ----

    #[test]
    fn session_rejects_unknown_end_effector() {
        let config = ArmConfig {
            solver: soarm_core::config::SolverConfig {
                ee_point: "tool_tip".into(),
                ..so101_solver_config()
            },
            ..ArmConfig::default()
        };
        let err = Session::new(so101(), config).unwrap_err();
        assert!(matches!(
            err,
            SoArmError::Structural(StructuralError::ControlPointNotFound(_))
        ));
    }

    #[test]
    fn session_rejects_unknown_inverted_joint() {
        let config = ArmConfig {
            solver: so101_solver_config(),
            calibration: RigCalibration {
                invert_step: vec!["Phantom".into()],
                ..RigCalibration::default()
            },
            ..ArmConfig::default()
        };
        let err = Session::new(so101(), config).unwrap_err();
        assert!(matches!(
            err,
            SoArmError::Structural(StructuralError::JointNotFound(_))
        ));
    }

    #[test]
    fn session_rejects_unknown_step_cap_joint() {
        let mut solver = so101_solver_config();
        solver.max_step_per_joint.insert("Phantom".into(), 0.1);
        let config = ArmConfig {
            solver,
            ..ArmConfig::default()
        };
        assert!(Session::new(so101(), config).is_err());
    }

    #[test]
    fn limit_overrides_narrow_the_chain() {
        let mut per_joint = HashMap::new();
        per_joint.insert("Base_Rotation".to_owned(), [-30.0, 30.0]);
        let config = ArmConfig {
            solver: soarm_core::config::SolverConfig {
                limit_overrides: Some(JointLimitsConfig {
                    per_joint,
                    default: None,
                }),
                ..so101_solver_config()
            },
            ..ArmConfig::default()
        };
        let mut session = Session::new(so101(), config).unwrap();

        let mut joints = JointAngleMap::new();
        joints.insert(
            "Base_Rotation".into(),
            BTreeMap::from([(JointAxis::Y, 50.0)]),
        );
        let request = Request::SetJointAngles {
            timestamp: None,
            params: CommandParams {
                units: UNITS_DEGREES.to_owned(),
                mode: "follower".to_owned(),
                joints,
            },
        };
        session.process(&request, t(0), stamp()).unwrap();
        assert_relative_eq!(session.angles()[0], 30.0f64.to_radians(), epsilon = 1e-9);
    }

    // ---- line loop ----

    #[test]
    fn process_line_skips_malformed_json() {
        let mut session = test_session();
        assert!(session.process_line("not json", t(0), stamp()).is_none());
        assert!(session.process_line("", t(0), stamp()).is_none());
        assert!(session.angles().iter().all(|&a| a == 0.0));
    }

    #[test]
    fn process_line_runs_end_to_end() {
        let mut session = test_session();
        let line = serde_json::to_string(&openpose_request(0.0, 0.0, 0.3)).unwrap();
        let out = session
            .process_line(&line, t(0), stamp())
            .expect("reachable target should produce a command line");
        assert!(out.contains("\"method\":\"set_joint_angles\""));
        assert!(out.contains("\"units\":\"degrees\""));
    }

    // ---- explicit target ----

    #[test]
    fn solve_target_commits_reachable_target() {
        let mut session = test_session();
        let result = session
            .solve_target(Vector3::new(0.0, 0.0, 0.3), t(0))
            .unwrap();
        assert!(result.accepted());
        assert!(result.max_distance < 1e-2);
    }
}
