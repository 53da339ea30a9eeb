//! Efficient Perspective-n-Point (EPnP) solver for non-planar point sets
//! Paper: https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf
//! Reference: https://github.com/opencv/opencv/blob/4.x/modules/calib3d/src/epnp.cpp

use crate::ops::{compute_centroid, gauss_newton, matrix_to_rvec};
use crate::rigid::umeyama;
use crate::types::{NumericTol, PnPError, PnPResult, PnPSolver};
use glam::{DMat3, DVec3};
use nalgebra::{DMatrix, DVector, Matrix3, Vector4};

/// Marker type representing the Efficient PnP algorithm.
pub struct EPnP;

impl PnPSolver for EPnP {
    type Param = EPnPParams;

    fn solve(
        points_world: &[[f64; 3]],
        points_image: &[[f64; 2]],
        k: &[[f64; 3]; 3],
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        solve_epnp(points_world, points_image, k, params)
    }
}

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone, Default)]
pub struct EPnPParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
}

/// Solve Perspective-n-Point (EPnP).
///
/// # Arguments
/// * `points_world` – 3-D coordinates in the world frame, shape *(N,3)* with `N≥4`.
/// * `points_image` – Corresponding undistorted pixel coordinates, shape *(N,2)*.
/// * `k` – Camera intrinsics matrix.
///
/// # Returns
/// A [`PnPResult`] whose rotation maps **world → camera**.
pub fn solve_epnp(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    k: &[[f64; 3]; 3],
    params: &EPnPParams,
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

    let cw = select_control_points(points_world)?;

    let alphas = compute_barycentric(points_world, &cw, params.tol.eps);

    // Build the 2N×12 design matrix M
    let m_rows = build_m(&alphas, points_image, k);

    let m_flat: Vec<f64> = m_rows.iter().flat_map(|row| row.iter()).cloned().collect();
    let m_mat = DMatrix::<f64>::from_row_slice(2 * n, 12, &m_flat);

    // Null-space of M: column i holds the eigenvector of MᵀM with the i-th smallest eigenvalue.
    let mtm = m_mat.transpose() * &m_mat;
    let eig = mtm.symmetric_eigen();

    let mut order: Vec<(f64, usize)> = eig
        .eigenvalues
        .iter()
        .enumerate()
        .map(|(index, value)| (value.abs(), index))
        .collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0));

    let null4 = DMatrix::from_columns(&[
        eig.eigenvectors.column(order[0].1),
        eig.eigenvectors.column(order[1].1),
        eig.eigenvectors.column(order[2].1),
        eig.eigenvectors.column(order[3].1),
    ]);

    let l = build_l6x10(&null4);
    let rho = rho_ctrlpts(&cw);
    let rho_vec = DVector::<f64>::from_column_slice(&rho);

    let betas: Vec<[f64; 4]> = [
        estimate_beta([0, 1, 3, 6], &l, &rho_vec, params.tol.svd),
        estimate_beta([0, 1, 2], &l, &rho_vec, params.tol.svd),
        estimate_beta([0, 1, 2, 3, 4], &l, &rho_vec, params.tol.svd),
    ]
    .into_iter()
    .flatten()
    .map(|b| gauss_newton(b, &null4, &rho))
    .collect();

    let mut best: Option<(f64, [[f64; 3]; 3], [f64; 3])> = None;
    for bet in &betas {
        let Ok((r_c, t_c)) = pose_from_betas(bet, &null4, &cw, &alphas) else {
            continue;
        };
        let err = rmse_px(points_world, points_image, &r_c, &t_c, k);
        if err.is_finite() && best.as_ref().map_or(true, |(e, _, _)| err < *e) {
            best = Some((err, r_c, t_c));
        }
    }

    let (best_err, best_r, best_t) = best.ok_or_else(|| {
        PnPError::DegenerateConfiguration("no EPnP beta hypothesis produced a pose".to_string())
    })?;

    Ok(PnPResult {
        rotation: best_r,
        translation: best_t,
        rvec: matrix_to_rvec(&best_r),
        reproj_rmse: Some(best_err),
        num_iterations: None,
        converged: Some(true),
    })
}

/// Compute pose (R, t) from a set of betas using the null-space vectors.
fn pose_from_betas(
    betas: &[f64; 4],
    null4: &DMatrix<f64>, // 12×4 matrix (V)
    cw: &[[f64; 3]; 4],   // control points in world frame
    alphas: &[[f64; 4]],  // barycentric coordinates for each world point
) -> Result<([[f64; 3]; 3], [f64; 3]), PnPError> {
    let beta_vec = Vector4::from_column_slice(betas);
    let cc_flat = null4 * beta_vec; // 12×1 vector

    let mut cc = [DVec3::ZERO; 4];
    for (i, c) in cc.iter_mut().enumerate() {
        *c = DVec3::new(cc_flat[3 * i], cc_flat[3 * i + 1], cc_flat[3 * i + 2]);
    }

    // camera-frame points must lie in front of the camera
    let a0 = alphas[0];
    let pc0: DVec3 = (0..4).map(|j| cc[j] * a0[j]).sum();
    if pc0.z < 0.0 {
        for pt in &mut cc {
            *pt = -*pt;
        }
    }

    let cw_vec3: Vec<DVec3> = cw.iter().map(|p| DVec3::from_array(*p)).collect();

    let (r, t, _s) =
        umeyama(&cw_vec3, &cc).map_err(|e| PnPError::SvdFailed(e.to_string()))?;

    Ok((r, t))
}

/// Root-mean-square reprojection error in pixels (pinhole, no distortion).
fn rmse_px(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    r: &[[f64; 3]; 3],
    t: &[f64; 3],
    k: &[[f64; 3]; 3],
) -> f64 {
    let fx = k[0][0];
    let fy = k[1][1];
    let cx = k[0][2];
    let cy = k[1][2];

    let mut sum_sq = 0.0;
    let n = points_world.len() as f64;

    for (p, &img) in points_world.iter().zip(points_image.iter()) {
        // Camera-frame coordinates: Pc = R * Pw + t
        let x_c = r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0];
        let y_c = r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1];
        let z_c = r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2];

        let inv_z = 1.0 / z_c;
        let du = fx * x_c * inv_z + cx - img[0];
        let dv = fy * y_c * inv_z + cy - img[1];
        sum_sq += du * du + dv * dv;
    }

    (sum_sq / n).sqrt()
}

fn select_control_points(points_world: &[[f64; 3]]) -> Result<[[f64; 3]; 4], PnPError> {
    let n = points_world.len() as f64;
    let c = compute_centroid(points_world);

    let mut cov = Matrix3::<f64>::zeros();
    for p in points_world {
        let diff = nalgebra::Vector3::new(p[0] - c[0], p[1] - c[1], p[2] - c[2]);
        cov += diff * diff.transpose();
    }
    cov /= n;

    let eig = cov.symmetric_eigen();
    let mut axes_sig: Vec<(f64, [f64; 3])> = (0..3)
        .map(|i| {
            let v = eig.eigenvectors.column(i);
            (eig.eigenvalues[i].max(0.0).sqrt(), [v[0], v[1], v[2]])
        })
        .collect();
    axes_sig.sort_by(|a, b| b.0.total_cmp(&a.0));

    if axes_sig[1].0 <= f64::EPSILON * axes_sig[0].0.max(1.0) {
        return Err(PnPError::DegenerateConfiguration(
            "world points are collinear".to_string(),
        ));
    }

    // centroid + principal-axis displacements
    let mut cw = [c; 4];
    for (i, (sigma, axis)) in axes_sig.iter().enumerate() {
        cw[i + 1][0] = c[0] + sigma * axis[0];
        cw[i + 1][1] = c[1] + sigma * axis[1];
        cw[i + 1][2] = c[2] + sigma * axis[2];
    }

    Ok(cw)
}

/// Compute barycentric coordinates of world-space points with respect to the
/// 4 control points returned by `select_control_points`.
///
/// If the determinant of `B = [C1 - C0, C2 - C0, C3 - C0]` is smaller than
/// `eps` (planar point sets), a Moore–Penrose pseudo-inverse is used instead
/// of the exact inverse.
///
/// Each returned element `[α0, α1, α2, α3]` satisfies `Σ αj = 1` and
/// `pw_i = Σ αj Cw_j` (in the span of the control points).
fn compute_barycentric(points_world: &[[f64; 3]], cw: &[[f64; 3]; 4], eps: f64) -> Vec<[f64; 4]> {
    let c0 = DVec3::from_array(cw[0]);
    let d1 = DVec3::from_array(cw[1]) - c0;
    let d2 = DVec3::from_array(cw[2]) - c0;
    let d3 = DVec3::from_array(cw[3]) - c0;

    let b = DMat3::from_cols(d1, d2, d3);

    let b_inv = if b.determinant().abs() > eps {
        b.inverse()
    } else {
        // B⁺ = V Σ⁺ Uᵀ
        let b_na = Matrix3::new(
            d1.x, d2.x, d3.x, //
            d1.y, d2.y, d3.y, //
            d1.z, d2.z, d3.z,
        );
        let pinv = b_na
            .pseudo_inverse(eps)
            .unwrap_or_else(|_| Matrix3::zeros());
        DMat3::from_cols_array(&[
            pinv[(0, 0)],
            pinv[(1, 0)],
            pinv[(2, 0)],
            pinv[(0, 1)],
            pinv[(1, 1)],
            pinv[(2, 1)],
            pinv[(0, 2)],
            pinv[(1, 2)],
            pinv[(2, 2)],
        ])
    };

    points_world
        .iter()
        .map(|p| {
            let lamb = b_inv * (DVec3::from_array(*p) - c0);
            [1.0 - (lamb.x + lamb.y + lamb.z), lamb.x, lamb.y, lamb.z]
        })
        .collect()
}

/// Construct the 2N×12 design matrix **M** used by EPnP.
///
/// * `alphas` – Barycentric coordinates for each world point; shape *(N,4)*.
/// * `points_image` – Pixel coordinates for each correspondence; shape *(N,2)*.
/// * `k` – Camera intrinsics 3×3 matrix.
fn build_m(alphas: &[[f64; 4]], points_image: &[[f64; 2]], k: &[[f64; 3]; 3]) -> Vec<[f64; 12]> {
    let n = alphas.len();

    let fu = k[0][0];
    let fv = k[1][1];
    let uc = k[0][2];
    let vc = k[1][2];

    let mut m = vec![[0.0f64; 12]; 2 * n];

    for (i, (a, uv)) in alphas.iter().zip(points_image.iter()).enumerate() {
        let row_x = 2 * i;
        let row_y = row_x + 1;

        for (j, &alpha) in a.iter().enumerate() {
            let base = 3 * j;
            m[row_x][base] = alpha * fu;
            m[row_x][base + 2] = alpha * (uc - uv[0]);
            m[row_y][base + 1] = alpha * fv;
            m[row_y][base + 2] = alpha * (vc - uv[1]);
        }
    }

    m
}

const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Build the 6×10 matrix **L** from the 4-dimensional null-space matrix `V` (shape 12×4).
fn build_l6x10(null4: &DMatrix<f64>) -> [[f64; 10]; 6] {
    let v_cp: Vec<[DVec3; 4]> = (0..4)
        .map(|c| {
            let col = null4.column(c);
            let mut blocks = [DVec3::ZERO; 4];
            for (k, block) in blocks.iter_mut().enumerate() {
                *block = DVec3::new(col[3 * k], col[3 * k + 1], col[3 * k + 2]);
            }
            blocks
        })
        .collect();

    let dv: Vec<Vec<DVec3>> = v_cp
        .iter()
        .map(|v| CP_PAIRS.iter().map(|&(a, b)| v[a] - v[b]).collect())
        .collect();

    let mut l = [[0.0f64; 10]; 6];
    for (j, row) in l.iter_mut().enumerate() {
        row[0] = dv[0][j].dot(dv[0][j]);
        row[1] = 2.0 * dv[0][j].dot(dv[1][j]);
        row[2] = dv[1][j].dot(dv[1][j]);
        row[3] = 2.0 * dv[0][j].dot(dv[2][j]);
        row[4] = 2.0 * dv[1][j].dot(dv[2][j]);
        row[5] = dv[2][j].dot(dv[2][j]);
        row[6] = 2.0 * dv[0][j].dot(dv[3][j]);
        row[7] = 2.0 * dv[1][j].dot(dv[3][j]);
        row[8] = 2.0 * dv[2][j].dot(dv[3][j]);
        row[9] = dv[3][j].dot(dv[3][j]);
    }

    l
}

/// Extracts a 6×k `DMatrix` by picking the specified columns from the 6×10 `L` matrix.
fn l_submatrix(l: &[[f64; 10]; 6], cols: &[usize]) -> DMatrix<f64> {
    let data: Vec<f64> = cols
        .iter()
        .flat_map(|&c| (0..6).map(move |r| l[r][c]))
        .collect();
    DMatrix::<f64>::from_column_slice(6, cols.len(), &data)
}

/// Solve for a beta vector given a column subset of the 6×10 L matrix.
/// Returns `None` if the least-squares solve fails.
fn estimate_beta<const K: usize>(
    cols: [usize; K],
    l: &[[f64; 10]; 6],
    rho: &DVector<f64>,
    tol_svd: f64,
) -> Option<[f64; 4]> {
    let l_sub = l_submatrix(l, &cols);
    let sol = l_sub.svd(true, true).solve(rho, tol_svd).ok()?;
    let x = sol.column(0);

    match K {
        4 => {
            let s = x[0].abs().sqrt();
            if s == 0.0 {
                return None;
            }
            let mut b = [s, x[1] / s, x[2] / s, x[3] / s];
            if x[0] < 0.0 {
                for v in &mut b {
                    *v = -*v;
                }
            }
            Some(b)
        }
        3 => {
            let mut beta = [0.0; 4];
            if x[0] < 0.0 {
                beta[0] = (-x[0]).sqrt();
                beta[1] = if x[2] > 0.0 { 0.0 } else { (-x[2]).sqrt() };
            } else {
                beta[0] = x[0].sqrt();
                beta[1] = if x[2] < 0.0 { 0.0 } else { x[2].sqrt() };
            }
            if x[1] < 0.0 {
                beta[0] = -beta[0];
            }
            Some(beta)
        }
        5 => {
            let mut beta = [0.0; 4];
            if x[0] < 0.0 {
                beta[0] = (-x[0]).sqrt();
                beta[1] = if x[2] > 0.0 { 0.0 } else { (-x[2]).sqrt() };
            } else {
                beta[0] = x[0].sqrt();
                beta[1] = if x[2] < 0.0 { 0.0 } else { x[2].sqrt() };
            }
            if x[1] < 0.0 {
                beta[0] = -beta[0];
            }
            if beta[0] != 0.0 {
                beta[2] = x[3] / beta[0];
            }
            Some(beta)
        }
        _ => None,
    }
}

/// Compute the six squared distances (ρ vector) between the 4 control points.
fn rho_ctrlpts(cw: &[[f64; 3]; 4]) -> [f64; 6] {
    CP_PAIRS.map(|(i, j)| {
        cw[i]
            .iter()
            .zip(cw[j].iter())
            .map(|(&a, &b)| (a - b).powi(2))
            .sum::<f64>()
    })
}
