//! Planar pose initialisation from a plane-to-image homography.
//!
//! The correspondences are expressed in a local frame of the target plane,
//! a normalized DLT homography is fitted against the normalized image
//! coordinates and the homography is decomposed into `[r1 r2 t]`.

use crate::ops::{compute_centroid, mat3_from_rows, mat3_to_rows, matrix_to_rvec};
use crate::rigid::nearest_rotation;
use crate::types::{NumericTol, PnPError, PnPResult, PnPSolver};
use glam::{DMat3, DVec3};
use nalgebra::{DMatrix, Matrix3, Vector3};

/// Marker type for the planar homography solver.
pub struct PlanarHomography;

/// Parameters for [`PlanarHomography`].
#[derive(Debug, Clone)]
pub struct HomographyParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
    /// Relative out-of-plane spread (smallest over largest principal deviation)
    /// above which the points are rejected as non-coplanar.
    pub planarity_tol: f64,
}

impl Default for HomographyParams {
    fn default() -> Self {
        Self {
            tol: NumericTol::default(),
            planarity_tol: 1e-6,
        }
    }
}

impl PnPSolver for PlanarHomography {
    type Param = HomographyParams;

    fn solve(
        points_world: &[[f64; 3]],
        points_image: &[[f64; 2]],
        k: &[[f64; 3]; 3],
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        solve_homography(points_world, points_image, k, params)
    }
}

/// Orthonormal frame attached to a (near) planar point set.
pub(crate) struct PlaneFrame {
    /// Plane origin (centroid of the points) in world coordinates.
    pub origin: DVec3,
    /// Columns are the in-plane axes and the plane normal, expressed in world coordinates.
    pub basis: DMat3,
    /// Principal standard deviations sorted in descending order.
    pub sigmas: [f64; 3],
}

/// Fit the principal frame of a point set.
pub(crate) fn principal_frame(points_world: &[[f64; 3]]) -> PlaneFrame {
    let n = points_world.len() as f64;
    let c = compute_centroid(points_world);

    let mut cov = Matrix3::<f64>::zeros();
    for p in points_world {
        let d = Vector3::new(p[0] - c[0], p[1] - c[1], p[2] - c[2]);
        cov += d * d.transpose();
    }
    cov /= n;

    let eig = cov.symmetric_eigen();
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

    let axis = |i: usize| {
        let v = eig.eigenvectors.column(order[i]);
        DVec3::new(v[0], v[1], v[2])
    };

    let e1 = axis(0).normalize();
    let e3 = axis(2).normalize();
    // right-handed in-plane basis
    let e2 = e3.cross(e1);

    PlaneFrame {
        origin: DVec3::from_array(c),
        basis: DMat3::from_cols(e1, e2, e3),
        sigmas: order.map(|i| eig.eigenvalues[i].max(0.0).sqrt()),
    }
}

/// Whether a point set lies on a single plane up to `rel_tol`.
pub fn is_coplanar(points_world: &[[f64; 3]], rel_tol: f64) -> bool {
    let frame = principal_frame(points_world);
    frame.sigmas[2] <= rel_tol * frame.sigmas[0].max(f64::MIN_POSITIVE)
}

/// Similarity transform that moves the centroid to the origin and scales
/// the mean distance to `sqrt(2)`.
fn normalization_transform(pts: &[[f64; 2]]) -> Matrix3<f64> {
    let n = pts.len() as f64;
    let (sx, sy) = pts
        .iter()
        .fold((0.0, 0.0), |(ax, ay), p| (ax + p[0], ay + p[1]));
    let (mx, my) = (sx / n, sy / n);

    let mean_dist = pts
        .iter()
        .map(|p| ((p[0] - mx).powi(2) + (p[1] - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let s = if mean_dist > 0.0 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    Matrix3::new(
        s, 0.0, -s * mx, //
        0.0, s, -s * my, //
        0.0, 0.0, 1.0,
    )
}

fn apply(t: &Matrix3<f64>, p: &[f64; 2]) -> [f64; 2] {
    let v = t * Vector3::new(p[0], p[1], 1.0);
    [v.x / v.z, v.y / v.z]
}

/// Direct linear transform estimate of the homography mapping `src` onto `dst`.
pub(crate) fn find_homography_dlt(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
) -> Result<Matrix3<f64>, PnPError> {
    let n = src.len();
    if n < 4 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 4,
            actual: n,
        });
    }

    let t_src = normalization_transform(src);
    let t_dst = normalization_transform(dst);

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let [x, y] = apply(&t_src, s);
        let [u, v] = apply(&t_dst, d);

        let r = 2 * i;
        a[(r, 0)] = -x;
        a[(r, 1)] = -y;
        a[(r, 2)] = -1.0;
        a[(r, 6)] = u * x;
        a[(r, 7)] = u * y;
        a[(r, 8)] = u;

        a[(r + 1, 3)] = -x;
        a[(r + 1, 4)] = -y;
        a[(r + 1, 5)] = -1.0;
        a[(r + 1, 6)] = v * x;
        a[(r + 1, 7)] = v * y;
        a[(r + 1, 8)] = v;
    }

    // h is the eigenvector of AᵀA with the smallest eigenvalue
    let ata = a.transpose() * &a;
    let eig = ata.symmetric_eigen();
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or_else(|| PnPError::SvdFailed("empty eigen decomposition".to_string()))?;
    let h = eig.eigenvectors.column(min_idx);

    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst.try_inverse().ok_or_else(|| {
        PnPError::DegenerateConfiguration("image points are not invertibly normalizable".to_string())
    })?;

    let hm = t_dst_inv * h_norm * t_src;
    if !hm.iter().all(|v| v.is_finite()) {
        return Err(PnPError::DegenerateConfiguration(
            "homography estimate is not finite".to_string(),
        ));
    }
    Ok(hm)
}

/// Decompose a homography between the plane and normalized image coordinates
/// into a camera-from-plane rotation and translation with the plane in front of the camera.
pub(crate) fn decompose_homography(h: &Matrix3<f64>) -> Result<(DMat3, DVec3), PnPError> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let denom = 0.5 * (h1.norm() + h2.norm());
    if denom <= 1e-12 {
        return Err(PnPError::DegenerateConfiguration(
            "degenerate homography for planar pose extraction".to_string(),
        ));
    }
    let mut lambda = 1.0 / denom;
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let t = h3 * lambda;
    let r3 = r1.cross(&r2);

    let mut r_mat = Matrix3::<f64>::zeros();
    r_mat.set_column(0, &r1);
    r_mat.set_column(1, &r2);
    r_mat.set_column(2, &r3);

    let r = nearest_rotation(&r_mat).map_err(|e| PnPError::SvdFailed(e.to_string()))?;
    Ok((r, DVec3::new(t.x, t.y, t.z)))
}

/// Planar pose from a homography fitted over all correspondences.
///
/// The world points must be coplanar. Image points are expected free of lens distortion.
pub fn solve_homography(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    params: &HomographyParams,
) -> Result<PnPResult, PnPError> {
    let n = points_world.len();
    if n != points_image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: n,
            right_name: "image points",
            right_len: points_image.len(),
        });
    }
    if n < 4 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 4,
            actual: n,
        });
    }

    let frame = principal_frame(points_world);
    if frame.sigmas[1] <= params.tol.eps * frame.sigmas[0].max(1.0) {
        return Err(PnPError::DegenerateConfiguration(
            "world points are collinear".to_string(),
        ));
    }
    if frame.sigmas[2] > params.planarity_tol * frame.sigmas[0] {
        return Err(PnPError::DegenerateConfiguration(
            "world points are not coplanar".to_string(),
        ));
    }

    let basis_t = frame.basis.transpose();
    let plane_pts: Vec<[f64; 2]> = points_world
        .iter()
        .map(|p| {
            let local = basis_t * (DVec3::from_array(*p) - frame.origin);
            [local.x, local.y]
        })
        .collect();

    let k_inv = mat3_from_rows(k).inverse();
    if !k_inv.is_finite() {
        return Err(PnPError::CameraError(
            "intrinsics matrix is not invertible".to_string(),
        ));
    }
    let normalized: Vec<[f64; 2]> = points_image
        .iter()
        .map(|uv| {
            let v = k_inv * DVec3::new(uv[0], uv[1], 1.0);
            [v.x / v.z, v.y / v.z]
        })
        .collect();

    let h = find_homography_dlt(&plane_pts, &normalized)?;
    let (r_plane, t_plane) = decompose_homography(&h)?;

    // Pc = R_plane * Bᵀ (Pw - c) + t_plane
    let r = r_plane * basis_t;
    let t = t_plane - r * frame.origin;

    let rotation = mat3_to_rows(&r);
    let translation = t.to_array();

    let reproj_rmse = crate::ops::sum_sq_reprojection(
        points_world,
        points_image,
        &rotation,
        &translation,
        &crate::CameraModel::pinhole(crate::CameraIntrinsics::new(
            k[0][0], k[1][1], k[0][2], k[1][2],
        )),
    )
    .map(|s| (s / n as f64).sqrt());

    Ok(PnPResult {
        rotation,
        translation,
        rvec: matrix_to_rvec(&rotation),
        reproj_rmse,
        num_iterations: None,
        converged: Some(true),
    })
}
