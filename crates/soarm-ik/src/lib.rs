//! Inverse kinematics for small serial arms driven by observed keypoints.
//!
//! Provides forward kinematics over named control points, a damped least
//! squares solver with validation and rollback, a closed-form geometric
//! solver for four-keypoint arm poses, and a scheduler that throttles and
//! budgets solve attempts.
//!
//! # Architecture
//!
//! ```text
//! KinematicChain ──► IkSolver ──► validated joint angles
//!        │                ▲
//!        │                └── SolveScheduler (budget per attempt)
//!        └──► GeometricSolver ──► closed-form joint angles
//! ```
//!
//! The chain owns the committed angle vector. A solve snapshots it,
//! iterates on a candidate, and either commits the candidate or restores
//! the snapshot unchanged.

pub mod chain;
mod dls;
pub mod geometric;
pub mod jacobian;
pub mod presets;
pub mod scheduler;
pub mod solver;

pub use chain::{ControlPoint, JointSpec, KinematicChain};
pub use geometric::{ArmKeypoints, GeometricAngles, GeometricSolver};
pub use jacobian::{Target, MAX_TARGETS};
pub use scheduler::SolveScheduler;
pub use solver::{IkSolver, SolveBudget, SolveOutcome, SolveResult, SolveStatus};
