//! Weighted task-space error and Jacobian assembly for multi-point tracking.

use nalgebra::{DMatrix, DVector, UnitQuaternion, Vector3};
use soarm_core::error::StructuralError;

use crate::chain::KinematicChain;

/// Maximum number of simultaneously tracked control points.
pub const MAX_TARGETS: usize = 3;

/// A task-space target for one control point.
#[derive(Debug, Clone)]
pub struct Target {
    /// Name of the control point to drive.
    pub point: String,
    /// Desired world position.
    pub position: Vector3<f64>,
    /// Desired world orientation, if tracked.
    pub orientation: Option<UnitQuaternion<f64>>,
    /// Weight applied to this target's rows in the stacked system.
    pub weight: f64,
}

impl Target {
    /// Position-only target with unit weight.
    pub fn new(point: impl Into<String>, position: Vector3<f64>) -> Self {
        Self {
            point: point.into(),
            position,
            orientation: None,
            weight: 1.0,
        }
    }

    /// Adds an orientation to track alongside the position.
    #[must_use]
    pub fn with_orientation(mut self, orientation: UnitQuaternion<f64>) -> Self {
        self.orientation = Some(orientation);
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// A target with its control point resolved to an index.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedTarget {
    pub point_index: usize,
    pub position: Vector3<f64>,
    pub orientation: Option<UnitQuaternion<f64>>,
    pub weight: f64,
}

/// Resolves target control point names against a chain.
///
/// Rejects empty and oversized target sets before any iteration starts.
pub(crate) fn resolve_targets(
    chain: &KinematicChain,
    targets: &[Target],
) -> Result<Vec<ResolvedTarget>, StructuralError> {
    if targets.is_empty() {
        return Err(StructuralError::NoTargets);
    }
    if targets.len() > MAX_TARGETS {
        return Err(StructuralError::TooManyTargets {
            got: targets.len(),
            max: MAX_TARGETS,
        });
    }
    targets
        .iter()
        .map(|target| {
            Ok(ResolvedTarget {
                point_index: chain.point_index(&target.point)?,
                position: target.position,
                orientation: target.orientation,
                weight: target.weight,
            })
        })
        .collect()
}

/// Builds the stacked weighted Jacobian and error vector.
///
/// Each target contributes three position rows, plus three orientation rows
/// when an orientation is tracked. Both the Jacobian rows and the matching
/// error entries are scaled by the target's weight. Joints distal to a
/// target's attachment cannot move it, so their columns stay zero.
pub(crate) fn build_system(
    chain: &KinematicChain,
    q: &[f64],
    targets: &[ResolvedTarget],
) -> (DMatrix<f64>, DVector<f64>) {
    let rows: usize = targets
        .iter()
        .map(|t| if t.orientation.is_some() { 6 } else { 3 })
        .sum();
    let (origins, axes) = chain.joint_frames(q);
    let mut jacobian = DMatrix::zeros(rows, chain.dof());
    let mut error = DVector::zeros(rows);

    let mut row = 0;
    for target in targets {
        let (position, rotation) = chain.point_pose(q, target.point_index);
        let last_joint = chain.point_joint(target.point_index);

        let position_error = (target.position - position) * target.weight;
        for i in 0..=last_joint {
            let lever = position - origins[i];
            let column = axes[i].cross(&lever) * target.weight;
            jacobian[(row, i)] = column.x;
            jacobian[(row + 1, i)] = column.y;
            jacobian[(row + 2, i)] = column.z;
        }
        error[row] = position_error.x;
        error[row + 1] = position_error.y;
        error[row + 2] = position_error.z;
        row += 3;

        if let Some(target_rotation) = target.orientation {
            let rotation_error = orientation_error(&target_rotation, &rotation) * target.weight;
            for i in 0..=last_joint {
                jacobian[(row, i)] = axes[i].x * target.weight;
                jacobian[(row + 1, i)] = axes[i].y * target.weight;
                jacobian[(row + 2, i)] = axes[i].z * target.weight;
            }
            error[row] = rotation_error.x;
            error[row + 1] = rotation_error.y;
            error[row + 2] = rotation_error.z;
            row += 3;
        }
    }
    (jacobian, error)
}

/// Axis-angle rotation taking `current` into `target`.
pub(crate) fn orientation_error(
    target: &UnitQuaternion<f64>,
    current: &UnitQuaternion<f64>,
) -> Vector3<f64> {
    let delta = target * current.inverse();
    match delta.axis_angle() {
        Some((axis, angle)) => axis.into_inner() * angle,
        None => Vector3::zeros(),
    }
}

/// Raw (unweighted) per-target errors at a candidate angle vector.
#[derive(Debug, Clone)]
pub(crate) struct ErrorReport {
    /// Euclidean position distance per target, in input order.
    pub distances: Vec<f64>,
    /// Orientation error angle per target, zero where not tracked.
    pub angles: Vec<f64>,
}

impl ErrorReport {
    /// Aggregate residual: the largest stacked error norm over all targets.
    pub fn residual(&self) -> f64 {
        self.distances
            .iter()
            .zip(&self.angles)
            .map(|(d, a)| d.hypot(*a))
            .fold(0.0, f64::max)
    }

    /// Largest raw position distance over all targets.
    pub fn max_distance(&self) -> f64 {
        self.distances.iter().copied().fold(0.0, f64::max)
    }

    /// Largest orientation error angle over all targets.
    pub fn max_angle(&self) -> f64 {
        self.angles.iter().copied().fold(0.0, f64::max)
    }
}

/// Measures raw per-target errors at the given angles.
pub(crate) fn measure(
    chain: &KinematicChain,
    q: &[f64],
    targets: &[ResolvedTarget],
) -> ErrorReport {
    let mut distances = Vec::with_capacity(targets.len());
    let mut angles = Vec::with_capacity(targets.len());
    for target in targets {
        let (position, rotation) = chain.point_pose(q, target.point_index);
        distances.push((target.position - position).norm());
        angles.push(match target.orientation {
            Some(target_rotation) => orientation_error(&target_rotation, &rotation).norm(),
            None => 0.0,
        });
    }
    ErrorReport { distances, angles }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
