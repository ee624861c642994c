//! Damped least squares solve loop with validation and rollback.

use soarm_core::config::SolverConfig;
use soarm_core::error::StructuralError;
use tracing::debug;

use crate::chain::KinematicChain;
use crate::dls::dls_step;
use crate::jacobian::{build_system, measure, resolve_targets, Target};

/// How the iteration loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Residual dropped below tolerance.
    Converged,
    /// Iteration budget ran out first.
    BudgetExhausted,
    /// The damped system went singular at the pivot threshold.
    SingularAbort,
}

/// What the validator did with the candidate solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveOutcome {
    /// Candidate committed as the chain's angle vector.
    Committed,
    /// Candidate discarded, the pre-solve angles restored unchanged.
    RejectedRolledBack,
}

/// Result of one solve.
#[derive(Debug, Clone)]
pub struct SolveResult {
    /// Committed angle vector after validation: the candidate when it was
    /// accepted, the restored pre-solve angles when it was rejected.
    pub angles: Vec<f64>,
    pub status: SolveStatus,
    pub outcome: SolveOutcome,
    /// Iterations executed before the loop stopped.
    pub iterations: u32,
    /// Aggregate residual of the candidate: largest stacked error norm
    /// over all targets.
    pub residual: f64,
    /// Raw position distance of the candidate per target, in target order.
    pub target_distances: Vec<f64>,
    /// Largest raw position distance, the value compared against the
    /// acceptance threshold.
    pub max_distance: f64,
}

impl SolveResult {
    /// Whether the candidate was committed.
    #[must_use]
    pub fn accepted(&self) -> bool {
        self.outcome == SolveOutcome::Committed
    }
}

/// Iteration budget and tolerance for one solve attempt.
///
/// Derived from [`SolverConfig`] and scaled up by the scheduler when the
/// chain has gone a while without an accepted solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveBudget {
    pub max_iterations: u32,
    pub position_tolerance: f64,
}

impl SolveBudget {
    #[must_use]
    pub fn from_config(config: &SolverConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            position_tolerance: config.position_tolerance,
        }
    }
}

/// Per-joint step shaping resolved against a chain.
struct StepPolicy {
    max_step: Vec<f64>,
    invert: Vec<bool>,
}

/// Damped least squares solver over a kinematic chain.
///
/// A solve runs to completion: it snapshots the committed angles, iterates
/// on a candidate vector, then validates the candidate against the
/// acceptance threshold. Rejection restores the snapshot exactly.
#[derive(Debug, Clone)]
pub struct IkSolver {
    config: SolverConfig,
    inverted: Vec<String>,
}

impl IkSolver {
    #[must_use]
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            inverted: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(SolverConfig::default())
    }

    /// Names of joints whose computed steps are applied with flipped sign.
    #[must_use]
    pub fn with_inverted_joints(mut self, joints: Vec<String>) -> Self {
        self.inverted = joints;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solves with the budget taken straight from the configuration.
    pub fn solve(
        &self,
        chain: &mut KinematicChain,
        targets: &[Target],
    ) -> Result<SolveResult, StructuralError> {
        let budget = SolveBudget::from_config(&self.config);
        self.solve_budgeted(chain, targets, budget)
    }

    /// Solves under an explicit iteration budget and tolerance.
    pub fn solve_budgeted(
        &self,
        chain: &mut KinematicChain,
        targets: &[Target],
        budget: SolveBudget,
    ) -> Result<SolveResult, StructuralError> {
        let targets = resolve_targets(chain, targets)?;
        let policy = self.step_policy(chain)?;

        let snapshot = chain.angles().to_vec();
        let mut q = snapshot.clone();
        let mut status = SolveStatus::BudgetExhausted;
        let mut iterations = 0;

        for iteration in 0..budget.max_iterations {
            let report = measure(chain, &q, &targets);
            if report.residual() < budget.position_tolerance
                && report.max_angle() < self.config.orientation_tolerance
            {
                status = SolveStatus::Converged;
                break;
            }

            let (jacobian, error) = build_system(chain, &q, &targets);
            let Some(dq) = dls_step(&jacobian, &error, self.config.damping) else {
                status = SolveStatus::SingularAbort;
                break;
            };

            for (i, joint) in chain.joints().iter().enumerate() {
                let mut step = dq[i] * self.config.step_scale;
                step = step.clamp(-policy.max_step[i], policy.max_step[i]);
                if policy.invert[i] {
                    step = -step;
                }
                q[i] = (q[i] + step).clamp(joint.lower_limit, joint.upper_limit);
            }
            iterations = iteration + 1;
        }

        chain.set_angles(&q)?;
        let report = measure(chain, &q, &targets);
        let max_distance = report.max_distance();
        let outcome = if max_distance > self.config.acceptance_threshold {
            debug!(
                max_distance,
                threshold = self.config.acceptance_threshold,
                "candidate rejected, rolling back"
            );
            chain.set_angles(&snapshot)?;
            SolveOutcome::RejectedRolledBack
        } else {
            SolveOutcome::Committed
        };

        Ok(SolveResult {
            angles: chain.angles().to_vec(),
            status,
            outcome,
            iterations,
            residual: report.residual(),
            target_distances: report.distances,
            max_distance,
        })
    }

    /// Resolves step caps and sign inversions against the chain's joints.
    fn step_policy(&self, chain: &KinematicChain) -> Result<StepPolicy, StructuralError> {
        for name in self.config.max_step_per_joint.keys() {
            chain.joint_index(name)?;
        }
        for name in &self.inverted {
            chain.joint_index(name)?;
        }
        let max_step = chain
            .joints()
            .iter()
            .map(|j| self.config.max_step_for(&j.name))
            .collect();
        let invert = chain
            .joints()
            .iter()
            .map(|j| self.inverted.iter().any(|n| n == &j.name))
            .collect();
        Ok(StepPolicy { max_step, invert })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ControlPoint, JointSpec};
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Vector3};
    use soarm_core::types::JointAxis;

    const WIDE: f64 = 3.0;

    fn three_link() -> KinematicChain {
        let joints = vec![
            JointSpec::new(
                "yaw",
                Isometry3::translation(0.0, 0.1, 0.0),
                JointAxis::Y,
                -WIDE,
                WIDE,
            ),
            JointSpec::new(
                "pitch",
                Isometry3::translation(0.0, 0.1, 0.0),
                JointAxis::X,
                -WIDE,
                WIDE,
            ),
            JointSpec::new(
                "wrist",
                Isometry3::translation(0.0, 0.4, 0.0),
                JointAxis::X,
                -WIDE,
                WIDE,
            ),
        ];
        let points = vec![
            ControlPoint::new("mid", "pitch", Vector3::new(0.0, 0.4, 0.0)),
            ControlPoint::new("tip", "wrist", Vector3::new(0.0, 0.3, 0.0)),
        ];
        KinematicChain::new(joints, points).unwrap()
    }

    // ---- convergence ----

    #[test]
    fn solve_roundtrip_reaches_forward_target() {
        let mut chain = three_link();
        let goal = chain.world_position(&[0.4, 0.9, -0.5], "tip").unwrap();
        let solver = IkSolver::with_defaults();
        let result = solver
            .solve(&mut chain, &[Target::new("tip", goal)])
            .unwrap();
        assert_eq!(result.status, SolveStatus::Converged);
        assert_eq!(result.outcome, SolveOutcome::Committed);
        let reached = chain.world_position(chain.angles(), "tip").unwrap();
        assert_relative_eq!(reached, goal, epsilon = 1e-3);
    }

    #[test]
    fn solve_again_at_target_is_idempotent() {
        let mut chain = three_link();
        let goal = chain.world_position(&[0.3, 0.6, -0.4], "tip").unwrap();
        let solver = IkSolver::with_defaults();
        let target = [Target::new("tip", goal)];
        solver.solve(&mut chain, &target).unwrap();
        let settled = chain.angles().to_vec();

        let again = solver.solve(&mut chain, &target).unwrap();
        assert_eq!(again.status, SolveStatus::Converged);
        assert_eq!(again.iterations, 0);
        assert_eq!(chain.angles(), settled.as_slice());
    }

    #[test]
    fn solve_is_deterministic() {
        let goal = Vector3::new(0.2, 0.5, 0.3);
        let solver = IkSolver::with_defaults();
        let mut first = three_link();
        let mut second = three_link();
        let r1 = solver.solve(&mut first, &[Target::new("tip", goal)]).unwrap();
        let r2 = solver
            .solve(&mut second, &[Target::new("tip", goal)])
            .unwrap();
        assert_eq!(r1.angles, r2.angles);
        assert_eq!(r1.iterations, r2.iterations);
    }

    #[test]
    fn budget_exhausted_within_threshold_still_commits() {
        let mut chain = three_link();
        // Max reach along +y is 0.9; 1.2 is out of reach but close enough
        // for the validator.
        let target = [Target::new("tip", Vector3::new(0.0, 1.2, 0.0))];
        let mut config = SolverConfig::default();
        config.max_iterations = 40;
        let solver = IkSolver::new(config);
        chain.set_angles(&[0.2, -0.3, 0.4]).unwrap();
        let result = solver.solve(&mut chain, &target).unwrap();
        assert_eq!(result.status, SolveStatus::BudgetExhausted);
        assert_eq!(result.outcome, SolveOutcome::Committed);
        assert!(result.max_distance < 0.6);
    }

    // ---- validation and rollback ----

    #[test]
    fn far_target_is_rejected_and_rolled_back_exactly() {
        let mut chain = three_link();
        chain.set_angles(&[0.2, -0.3, 0.4]).unwrap();
        let before = chain.angles().to_vec();
        let solver = IkSolver::with_defaults();
        let result = solver
            .solve(&mut chain, &[Target::new("tip", Vector3::new(0.0, 3.0, 0.0))])
            .unwrap();
        assert_eq!(result.outcome, SolveOutcome::RejectedRolledBack);
        assert!(result.max_distance > 0.6);
        assert_eq!(chain.angles(), before.as_slice());
        assert_eq!(result.angles, before);
    }

    #[test]
    fn singular_abort_still_validates_candidate() {
        // A single yaw joint whose control point sits on the rotation axis:
        // the Jacobian is identically zero, and with zero damping the
        // normal matrix has no usable pivot.
        let joints = vec![JointSpec::new(
            "yaw",
            Isometry3::translation(0.0, 0.1, 0.0),
            JointAxis::Y,
            -WIDE,
            WIDE,
        )];
        let points = vec![ControlPoint::new("tip", "yaw", Vector3::new(0.0, 0.2, 0.0))];
        let mut chain = KinematicChain::new(joints, points).unwrap();
        let mut config = SolverConfig::default();
        config.damping = 0.0;
        let solver = IkSolver::new(config);
        let result = solver
            .solve(&mut chain, &[Target::new("tip", Vector3::new(0.3, 0.3, 0.0))])
            .unwrap();
        assert_eq!(result.status, SolveStatus::SingularAbort);
        // The untouched candidate is still within the acceptance threshold.
        assert_eq!(result.outcome, SolveOutcome::Committed);
        assert_eq!(result.iterations, 0);
        assert_eq!(chain.angles(), &[0.0]);
    }

    // ---- limits and step shaping ----

    #[test]
    fn committed_angles_respect_joint_limits() {
        let joints = vec![
            JointSpec::new(
                "yaw",
                Isometry3::translation(0.0, 0.1, 0.0),
                JointAxis::Y,
                -0.5,
                0.5,
            ),
            JointSpec::new(
                "pitch",
                Isometry3::translation(0.0, 0.1, 0.0),
                JointAxis::X,
                0.0,
                0.4,
            ),
        ];
        let points = vec![ControlPoint::new("tip", "pitch", Vector3::new(0.0, 0.4, 0.0))];
        let mut chain = KinematicChain::new(joints, points).unwrap();
        let solver = IkSolver::with_defaults();
        // Demands far more pitch than the limits allow.
        let result = solver
            .solve(&mut chain, &[Target::new("tip", Vector3::new(0.0, 0.2, 0.45))])
            .unwrap();
        for (value, joint) in result.angles.iter().zip(chain.joints()) {
            assert!(*value >= joint.lower_limit - 1e-6);
            assert!(*value <= joint.upper_limit + 1e-6);
        }
    }

    #[test]
    fn per_joint_step_cap_bounds_first_iteration() {
        let mut chain = three_link();
        let mut config = SolverConfig::default();
        config.max_iterations = 1;
        config.max_step_per_joint.insert("wrist".into(), 0.01);
        let solver = IkSolver::new(config);
        let result = solver
            .solve(&mut chain, &[Target::new("tip", Vector3::new(0.0, 0.8, 0.3))])
            .unwrap();
        assert!(result.angles[2].abs() <= 0.01 + 1e-12);
        assert!(result.angles[1].abs() <= 0.35 + 1e-12);
    }

    #[test]
    fn inverted_joint_steps_mirror() {
        let goal = Vector3::new(0.0, 0.4, 0.4);
        let mut config = SolverConfig::default();
        config.max_iterations = 1;
        // Wide acceptance so the mirrored candidate also commits.
        config.acceptance_threshold = 10.0;
        let plain = IkSolver::new(config.clone());
        let flipped =
            IkSolver::new(config).with_inverted_joints(vec!["pitch".into(), "wrist".into()]);

        let mut chain_a = three_link();
        let mut chain_b = three_link();
        let ra = plain.solve(&mut chain_a, &[Target::new("tip", goal)]).unwrap();
        let rb = flipped
            .solve(&mut chain_b, &[Target::new("tip", goal)])
            .unwrap();
        assert_relative_eq!(ra.angles[1], -rb.angles[1], epsilon = 1e-12);
        assert_relative_eq!(ra.angles[2], -rb.angles[2], epsilon = 1e-12);
    }

    // ---- weighting ----

    #[test]
    fn heavier_target_tracks_closer() {
        let goal_mid = Vector3::new(0.0, 0.6, 0.0);
        let goal_tip = Vector3::new(0.0, 0.0, 0.6);
        let solve_with = |mid_weight: f64| {
            let mut chain = three_link();
            let solver = IkSolver::with_defaults();
            let targets = [
                Target::new("mid", goal_mid).with_weight(mid_weight),
                Target::new("tip", goal_tip),
            ];
            solver.solve(&mut chain, &targets).unwrap().target_distances[0]
        };
        assert!(solve_with(10.0) < solve_with(1.0));
    }

    // ---- structural errors ----

    #[test]
    fn unknown_target_point_fails_before_iterating() {
        let mut chain = three_link();
        let solver = IkSolver::with_defaults();
        let err = solver
            .solve(&mut chain, &[Target::new("palm", Vector3::zeros())])
            .unwrap_err();
        assert_eq!(err, StructuralError::ControlPointNotFound("palm".into()));
    }

    #[test]
    fn unknown_joint_in_step_caps_fails() {
        let mut chain = three_link();
        let mut config = SolverConfig::default();
        config.max_step_per_joint.insert("thumb".into(), 0.1);
        let solver = IkSolver::new(config);
        let err = solver
            .solve(&mut chain, &[Target::new("tip", Vector3::zeros())])
            .unwrap_err();
        assert_eq!(err, StructuralError::JointNotFound("thumb".into()));
    }

    #[test]
    fn unknown_inverted_joint_fails() {
        let mut chain = three_link();
        let solver = IkSolver::with_defaults().with_inverted_joints(vec!["thumb".into()]);
        let err = solver
            .solve(&mut chain, &[Target::new("tip", Vector3::zeros())])
            .unwrap_err();
        assert_eq!(err, StructuralError::JointNotFound("thumb".into()));
    }

    // ---- budgets ----

    #[test]
    fn relaxed_tolerance_converges_in_fewer_iterations() {
        let goal = Vector3::new(0.2, 0.4, 0.4);
        let solver = IkSolver::with_defaults();
        let run = |tolerance: f64| {
            let mut chain = three_link();
            let budget = SolveBudget {
                max_iterations: 200,
                position_tolerance: tolerance,
            };
            solver
                .solve_budgeted(&mut chain, &[Target::new("tip", goal)], budget)
                .unwrap()
        };
        let strict = run(1e-4);
        let relaxed = run(5e-2);
        assert_eq!(strict.status, SolveStatus::Converged);
        assert_eq!(relaxed.status, SolveStatus::Converged);
        assert!(relaxed.iterations <= strict.iterations);
    }
}
