//! PnP (Perspective-n-Point) solver with consensus-based outlier rejection.
//!
//! The pose is refined with Levenberg-Marquardt over a 6-vector
//! (axis-angle rotation, translation) minimising pixel reprojection error
//! through the full camera model, distortion included.
//!
//! Seeds, in order: the caller's prior, a DLT linear solve (needs at least
//! six non-coplanar points), then a handful of canonical orientations with a
//! weak-perspective translation. The prior is accepted as soon as it
//! converges below the rejection threshold; otherwise the seed with the
//! lowest error wins.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{
    DVector, Dyn, Matrix3, Matrix3x4, OMatrix, OVector, Owned, SMatrix, SymmetricEigen,
    UnitQuaternion, Vector2, Vector3, Vector6, U6,
};
use tracing::debug;

use crate::geometry::{so3, SE3};
use crate::tracking::frame::CameraModel;

/// Residual used for points that land behind the camera.
const BEHIND_CAMERA_RESIDUAL: f64 = 1e4;

/// Step for the central-difference Jacobian.
const JACOBIAN_STEP: f64 = 1e-6;

/// Hypotheses are scored with errors capped at this fraction of the
/// outlier threshold.
const CONSENSUS_TOLERANCE_FRACTION: f64 = 0.5;

/// Minimum number of correspondences for any 6-DoF solve.
pub const MIN_PNP_POINTS: usize = 4;

/// One 3D-2D correspondence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// Point in object (sensor) coordinates.
    pub object: Vector3<f64>,
    /// Observed (distorted) pixel.
    pub image: Vector2<f64>,
}

/// Configuration for [`solve_pnp_detailed`].
#[derive(Debug, Clone, Copy)]
pub struct PnPConfig {
    /// A correspondence with a reprojection error above this (pixels) is an
    /// outlier.
    pub outlier_threshold_px: f64,
    /// Give up once fewer correspondences than this remain.
    pub min_inliers: usize,
}

impl Default for PnPConfig {
    fn default() -> Self {
        Self {
            outlier_threshold_px: 8.0,
            min_inliers: MIN_PNP_POINTS,
        }
    }
}

/// Result of a PnP solve with outlier rejection.
#[derive(Debug, Clone)]
pub struct PnPResult {
    /// Estimated pose (T_cs, object-to-camera).
    pub pose: SE3,
    /// Inlier mask per input correspondence.
    pub inlier_mask: Vec<bool>,
    /// Reprojection residual (observed - projected) per input correspondence,
    /// `None` when the point projects behind the camera.
    pub residuals: Vec<Option<Vector2<f64>>>,
    /// RMS reprojection error over the inliers (pixels).
    pub rms_error_px: f64,
}

impl PnPResult {
    pub fn num_inliers(&self) -> usize {
        self.inlier_mask.iter().filter(|&&b| b).count()
    }

    /// Indices of correspondences that were rejected.
    pub fn outlier_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.inlier_mask
            .iter()
            .enumerate()
            .filter(|(_, &inlier)| !inlier)
            .map(|(i, _)| i)
    }
}

/// Reprojection residual (observed - projected) of one correspondence.
pub fn reprojection_residual(
    pose: &SE3,
    camera: &CameraModel,
    c: &Correspondence,
) -> Option<Vector2<f64>> {
    let projected = camera.project(&pose.transform_point(&c.object))?;
    Some(c.image - projected)
}

/// Solve PnP over all given correspondences (no rejection).
///
/// Returns `None` for fewer than [`MIN_PNP_POINTS`] correspondences or when
/// no seed converges to a finite pose with every point in front of the
/// camera.
pub fn solve_pnp(
    correspondences: &[Correspondence],
    camera: &CameraModel,
    prior: Option<&SE3>,
    accept_error_px: f64,
) -> Option<(SE3, f64)> {
    if correspondences.len() < MIN_PNP_POINTS || !camera.is_valid() {
        return None;
    }

    if let Some(prior) = prior {
        if let Some((pose, rms)) = refine_pose(correspondences, camera, prior) {
            if rms <= accept_error_px {
                return Some((pose, rms));
            }
        }
    }

    let mut seeds = Vec::new();
    if let Some(dlt) = dlt_pose(correspondences, camera) {
        seeds.push(dlt);
    }
    for rotation in canonical_rotations() {
        if let Some(seed) = weak_perspective_pose(correspondences, camera, rotation) {
            seeds.push(seed);
        }
    }

    let mut best: Option<(SE3, f64)> = None;
    for seed in &seeds {
        if let Some((pose, rms)) = refine_pose(correspondences, camera, seed) {
            if best.as_ref().map_or(true, |(_, best_rms)| rms < *best_rms) {
                best = Some((pose, rms));
            }
        }
    }
    best
}

/// Solve PnP with consensus-based outlier rejection.
///
/// Each round fits the active set as a whole and once with each
/// correspondence left out. Every hypothesis is scored on the whole active
/// set with a truncated squared error, so a fit bent by an outlier scores
/// worse than the fit that excludes it. The winner's consensus (points within
/// `config.outlier_threshold_px`) is refined, and the active set shrinks to
/// the points within the threshold of the refined pose until it is stable.
///
/// Returns `None` when fewer than `config.min_inliers` correspondences
/// survive or no solve succeeds.
pub fn solve_pnp_detailed(
    correspondences: &[Correspondence],
    camera: &CameraModel,
    prior: Option<&SE3>,
    config: &PnPConfig,
) -> Option<PnPResult> {
    let min_inliers = config.min_inliers.max(MIN_PNP_POINTS);
    let threshold = config.outlier_threshold_px;
    let mut active: Vec<usize> = (0..correspondences.len()).collect();

    loop {
        if active.len() < min_inliers {
            return None;
        }
        let subset = gather(correspondences, &active);
        let hypothesis = best_hypothesis(&subset, camera, prior, threshold, min_inliers)?;

        let consensus = within_threshold(correspondences, &active, camera, &hypothesis, threshold);
        if consensus.len() < min_inliers {
            return None;
        }
        let (pose, _) = refine_pose(&gather(correspondences, &consensus), camera, &hypothesis)?;
        let inliers = within_threshold(correspondences, &active, camera, &pose, threshold);

        if inliers.len() == active.len() {
            let residuals: Vec<Option<Vector2<f64>>> = correspondences
                .iter()
                .map(|c| reprojection_residual(&pose, camera, c))
                .collect();
            let mut inlier_mask = vec![false; correspondences.len()];
            let mut sum_sq = 0.0;
            for &i in &active {
                inlier_mask[i] = true;
                sum_sq += residuals[i].map_or(f64::INFINITY, |r| r.norm_squared());
            }
            return Some(PnPResult {
                pose,
                inlier_mask,
                residuals,
                rms_error_px: (sum_sq / active.len() as f64).sqrt(),
            });
        }

        for &i in active.iter().filter(|&&i| !inliers.contains(&i)) {
            debug!(index = i, "PnP rejecting correspondence");
        }
        active = inliers;
    }
}

/// Lowest-scoring pose among the fit of `subset` and its leave-one-out fits.
fn best_hypothesis(
    subset: &[Correspondence],
    camera: &CameraModel,
    prior: Option<&SE3>,
    threshold: f64,
    min_inliers: usize,
) -> Option<SE3> {
    let tolerance = threshold * CONSENSUS_TOLERANCE_FRACTION;
    let (full, _) = solve_pnp(subset, camera, prior, threshold)?;
    let mut best = (truncated_cost(subset, camera, &full, tolerance), full);
    if subset.len() <= min_inliers {
        return Some(best.1);
    }

    let seed = prior.copied().unwrap_or(full);
    for skip in 0..subset.len() {
        let rest: Vec<Correspondence> = subset
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != skip)
            .map(|(_, c)| *c)
            .collect();
        if let Some((pose, _)) = solve_pnp(&rest, camera, Some(&seed), threshold) {
            let cost = truncated_cost(subset, camera, &pose, tolerance);
            if cost < best.0 {
                best = (cost, pose);
            }
        }
    }
    Some(best.1)
}

/// Sum of squared reprojection errors, each capped at `tolerance`.
fn truncated_cost(
    correspondences: &[Correspondence],
    camera: &CameraModel,
    pose: &SE3,
    tolerance: f64,
) -> f64 {
    correspondences
        .iter()
        .map(|c| {
            let err = reprojection_residual(pose, camera, c).map_or(tolerance, |r| r.norm());
            err.min(tolerance).powi(2)
        })
        .sum()
}

/// Indices from `active` whose reprojection error under `pose` is within
/// `threshold`.
fn within_threshold(
    correspondences: &[Correspondence],
    active: &[usize],
    camera: &CameraModel,
    pose: &SE3,
    threshold: f64,
) -> Vec<usize> {
    active
        .iter()
        .copied()
        .filter(|&i| {
            reprojection_residual(pose, camera, &correspondences[i])
                .map_or(false, |r| r.norm() <= threshold)
        })
        .collect()
}

fn gather(correspondences: &[Correspondence], indices: &[usize]) -> Vec<Correspondence> {
    indices.iter().map(|&i| correspondences[i]).collect()
}

/// Pose refinement problem for the LM solver.
struct PnPProblem<'a> {
    camera: &'a CameraModel,
    correspondences: &'a [Correspondence],
    params: Vector6<f64>,
}

impl PnPProblem<'_> {
    fn residuals_at(&self, params: &Vector6<f64>) -> DVector<f64> {
        let pose = SE3::from_params(params);
        let mut residuals = DVector::zeros(self.correspondences.len() * 2);
        for (i, c) in self.correspondences.iter().enumerate() {
            let r = reprojection_residual(&pose, self.camera, c)
                .unwrap_or_else(|| Vector2::repeat(BEHIND_CAMERA_RESIDUAL));
            residuals[i * 2] = r.x;
            residuals[i * 2 + 1] = r.y;
        }
        residuals
    }
}

impl LeastSquaresProblem<f64, Dyn, U6> for PnPProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, U6>;
    type ParameterStorage = Owned<f64, U6>;

    fn set_params(&mut self, x: &OVector<f64, U6>) {
        self.params = *x;
    }

    fn params(&self) -> OVector<f64, U6> {
        self.params
    }

    fn residuals(&self) -> Option<OVector<f64, Dyn>> {
        Some(self.residuals_at(&self.params))
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, U6>> {
        let rows = self.correspondences.len() * 2;
        let mut jacobian = OMatrix::<f64, Dyn, U6>::zeros(rows);
        for col in 0..6 {
            let mut plus = self.params;
            let mut minus = self.params;
            plus[col] += JACOBIAN_STEP;
            minus[col] -= JACOBIAN_STEP;
            let diff =
                (self.residuals_at(&plus) - self.residuals_at(&minus)) / (2.0 * JACOBIAN_STEP);
            jacobian.set_column(col, &diff);
        }
        Some(jacobian)
    }
}

/// LM refinement from one seed. Returns the pose and its RMS error.
fn refine_pose(
    correspondences: &[Correspondence],
    camera: &CameraModel,
    seed: &SE3,
) -> Option<(SE3, f64)> {
    let problem = PnPProblem {
        camera,
        correspondences,
        params: seed.to_params(),
    };
    let (problem, report) = LevenbergMarquardt::new().minimize(problem);

    let pose = SE3::from_params(&problem.params);
    let mut sum_sq = 0.0;
    for c in correspondences {
        let r = reprojection_residual(&pose, camera, c)?;
        sum_sq += r.norm_squared();
    }
    let rms = (sum_sq / correspondences.len() as f64).sqrt();
    if !rms.is_finite() || !pose.translation.iter().all(|v| v.is_finite()) {
        debug!(termination = ?report.termination, "PnP refinement diverged");
        return None;
    }
    Some((pose, rms))
}

/// Linear pose from the Direct Linear Transform on undistorted normalized
/// coordinates. Object points are centered and scaled for conditioning.
fn dlt_pose(correspondences: &[Correspondence], camera: &CameraModel) -> Option<SE3> {
    let n = correspondences.len();
    if n < 6 {
        return None;
    }

    let centroid = correspondences
        .iter()
        .fold(Vector3::zeros(), |acc, c| acc + c.object)
        / n as f64;
    let mean_dist = correspondences
        .iter()
        .map(|c| (c.object - centroid).norm())
        .sum::<f64>()
        / n as f64;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let scale = 3f64.sqrt() / mean_dist;

    let mut ata = SMatrix::<f64, 12, 12>::zeros();
    for c in correspondences {
        let p = (c.object - centroid) * scale;
        let m = camera.pixel_to_normalized(&c.image);
        let ph = [p.x, p.y, p.z, 1.0];

        let mut row_u = [0.0; 12];
        let mut row_v = [0.0; 12];
        for k in 0..4 {
            row_u[k] = ph[k];
            row_u[8 + k] = -m.x * ph[k];
            row_v[4 + k] = ph[k];
            row_v[8 + k] = -m.y * ph[k];
        }
        for row in [row_u, row_v] {
            for i in 0..12 {
                for j in 0..12 {
                    ata[(i, j)] += row[i] * row[j];
                }
            }
        }
    }

    let eigen = SymmetricEigen::new(ata);
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |acc, (i, &v)| if v < acc.1 { (i, v) } else { acc });
    let h: Vec<f64> = eigen.eigenvectors.column(min_idx).iter().copied().collect();

    let mut p = Matrix3x4::from_row_slice(&h);
    let mut m = p.fixed_view::<3, 3>(0, 0).into_owned();
    if m.determinant() < 0.0 {
        p = -p;
        m = -m;
    }
    let s = m.determinant().cbrt();
    if !s.is_finite() || s.abs() < 1e-12 {
        return None;
    }

    let rotation = so3::project_to_so3(&(m / s))?;
    let last = Vector3::new(p[(0, 3)], p[(1, 3)], p[(2, 3)]);
    let translation = last / (s * scale) - rotation * centroid;
    let pose = SE3::from_rt(rotation, translation);

    // The DLT has a sign ambiguity that the determinant fix does not
    // always resolve; reject seeds with the object behind the camera.
    if pose.transform_point(&centroid).z <= 0.0 {
        return None;
    }
    Some(pose)
}

/// Orientations tried when there is no prior and the DLT is unavailable.
fn canonical_rotations() -> Vec<Matrix3<f64>> {
    use std::f64::consts::{FRAC_PI_2, PI};
    [
        (0.0, 0.0, 0.0),
        (0.0, FRAC_PI_2, 0.0),
        (0.0, -FRAC_PI_2, 0.0),
        (0.0, PI, 0.0),
        (FRAC_PI_2, 0.0, 0.0),
        (-FRAC_PI_2, 0.0, 0.0),
        (PI, 0.0, 0.0),
        (0.0, 0.0, PI),
    ]
    .iter()
    .map(|&(roll, pitch, yaw)| {
        UnitQuaternion::from_euler_angles(roll, pitch, yaw)
            .to_rotation_matrix()
            .into_inner()
    })
    .collect()
}

/// Translation for a fixed rotation under a scaled-orthographic model.
fn weak_perspective_pose(
    correspondences: &[Correspondence],
    camera: &CameraModel,
    rotation: Matrix3<f64>,
) -> Option<SE3> {
    let n = correspondences.len() as f64;
    let rotated: Vec<Vector3<f64>> = correspondences.iter().map(|c| rotation * c.object).collect();
    let normalized: Vec<Vector2<f64>> = correspondences
        .iter()
        .map(|c| camera.pixel_to_normalized(&c.image))
        .collect();

    let c3 = rotated.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;
    let c2 = normalized.iter().fold(Vector2::zeros(), |acc, p| acc + p) / n;

    let spread3 = rotated.iter().map(|p| (p.xy() - c3.xy()).norm()).sum::<f64>() / n;
    let spread2 = normalized.iter().map(|p| (p - c2).norm()).sum::<f64>() / n;
    if spread2 <= f64::EPSILON || spread3 <= f64::EPSILON {
        return None;
    }

    let z = spread3 / spread2;
    let translation = Vector3::new(c2.x * z, c2.y * z, z) - c3;
    Some(SE3::from_rt(rotation, translation))
}
