#![allow(clippy::op_ref)]
use glam::{DMat3, DQuat, DVec3};
use nalgebra::{DMatrix, Matrix3x4, Matrix4, SMatrix, SVector, Vector3, Vector4};

/// Compute the centroid of a set of points.
pub(crate) fn compute_centroid(pts: &[[f64; 3]]) -> [f64; 3] {
    let n = pts.len() as f64;
    let sum = pts.iter().fold(DVec3::ZERO, |acc, &p| acc + DVec3::from(p));

    let centroid = sum / n;
    [centroid.x, centroid.y, centroid.z]
}

/// Convert a row-major 3x3 array into a glam matrix.
pub(crate) fn mat3_from_rows(r: &[[f64; 3]; 3]) -> DMat3 {
    DMat3::from_cols_array_2d(r).transpose()
}

/// Convert a glam matrix into a row-major 3x3 array.
pub(crate) fn mat3_to_rows(m: &DMat3) -> [[f64; 3]; 3] {
    m.transpose().to_cols_array_2d()
}

/// Rodrigues rotation vector to row-major rotation matrix (exponential map on SO(3)).
pub fn rvec_to_matrix(rvec: &[f64; 3]) -> [[f64; 3]; 3] {
    let q = DQuat::from_scaled_axis(DVec3::from_array(*rvec));
    mat3_to_rows(&DMat3::from_quat(q))
}

/// Row-major rotation matrix to Rodrigues rotation vector (logarithm map on SO(3)).
///
/// The input is assumed to be orthonormal with determinant +1.
pub fn matrix_to_rvec(r: &[[f64; 3]; 3]) -> [f64; 3] {
    let q = DQuat::from_mat3(&mat3_from_rows(r)).normalize();
    // keep the rotation angle in [0, pi]
    let q = if q.w < 0.0 { -q } else { q };
    q.to_scaled_axis().to_array()
}

/// Sum of squared pixel residuals of a pose under a full camera model.
///
/// Returns `None` if any point lands behind the camera.
pub(crate) fn sum_sq_reprojection(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    r: &[[f64; 3]; 3],
    t: &[f64; 3],
    camera: &crate::CameraModel,
) -> Option<f64> {
    let r_mat = mat3_from_rows(r);
    let t_vec = DVec3::from_array(*t);
    let mut sum_sq = 0.0;
    for (pw, uv) in points_world.iter().zip(points_image.iter()) {
        let pc = r_mat * DVec3::from_array(*pw) + t_vec;
        let [u_hat, v_hat] = camera.project_point(&pc.to_array())?;
        let du = u_hat - uv[0];
        let dv = v_hat - uv[1];
        sum_sq += du.mul_add(du, dv * dv);
    }
    Some(sum_sq)
}

const EPSILON: f64 = 1e-14;
const NUM_CONTROL_POINTS: usize = 4;
const MAX_ITERATIONS: usize = 6;
const PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];
const NUM_PAIRS: usize = PAIRS.len();

/// Solves the linear system A * x = b for a 4x4 symmetric positive-definite matrix A
/// using an unrolled Cholesky decomposition.
///
/// Returns `None` if `A` is not positive-definite.
#[inline(always)]
pub(crate) fn solve_4x4_cholesky(a: &Matrix4<f64>, b: &Vector4<f64>) -> Option<Vector4<f64>> {
    // L * L^T = A
    let l_11 = a.m11.sqrt();
    if l_11 < EPSILON {
        return None;
    }
    let l_21 = a.m21 / l_11;
    let l_31 = a.m31 / l_11;
    let l_41 = a.m41 / l_11;

    let l_22_sq = a.m22 - l_21 * l_21;
    if l_22_sq < EPSILON {
        return None;
    }
    let l_22 = l_22_sq.sqrt();
    let l_32 = (a.m32 - l_31 * l_21) / l_22;
    let l_42 = (a.m42 - l_41 * l_21) / l_22;

    let l_33_sq = a.m33 - l_31 * l_31 - l_32 * l_32;
    if l_33_sq < EPSILON {
        return None;
    }
    let l_33 = l_33_sq.sqrt();
    let l_43 = (a.m43 - l_41 * l_31 - l_42 * l_32) / l_33;

    let l_44_sq = a.m44 - l_41 * l_41 - l_42 * l_42 - l_43 * l_43;
    if l_44_sq < EPSILON {
        return None;
    }
    let l_44 = l_44_sq.sqrt();

    // forward substitution L * y = b
    let y1 = b[0] / l_11;
    let y2 = (b[1] - l_21 * y1) / l_22;
    let y3 = (b[2] - (l_31 * y1 + l_32 * y2)) / l_33;
    let y4 = (b[3] - (l_41 * y1 + l_42 * y2 + l_43 * y3)) / l_44;

    // backward substitution L^T * x = y
    let x4 = y4 / l_44;
    let x3 = (y3 - l_43 * x4) / l_33;
    let x2 = (y2 - (l_32 * x3 + l_42 * x4)) / l_22;
    let x1 = (y1 - (l_21 * x2 + l_31 * x3 + l_41 * x4)) / l_11;
    Some(Vector4::new(x1, x2, x3, x4))
}

/// Gauss-Newton refinement of the EPnP betas.
pub(crate) fn gauss_newton(beta_init: [f64; 4], null4: &DMatrix<f64>, rho: &[f64; 6]) -> [f64; 4] {
    const DAMPING: f64 = 1e-12;
    const STOP_EPS: f64 = 1e-12;

    let mut bet = Vector4::from(beta_init);
    let rho_vec = SVector::<f64, NUM_PAIRS>::from_row_slice(rho);

    for _ in 0..MAX_ITERATIONS {
        let mut vs = [Vector3::zeros(); NUM_CONTROL_POINTS];

        for (i, v) in vs.iter_mut().enumerate() {
            let m: Matrix3x4<f64> = null4.fixed_view::<3, 4>(i * 3, 0).into();
            *v = m * bet;
        }

        let mut f = SVector::<f64, NUM_PAIRS>::zeros();
        let mut j = SMatrix::<f64, NUM_PAIRS, NUM_CONTROL_POINTS>::zeros();

        for (r, &(i, jj)) in PAIRS.iter().enumerate() {
            let diff = vs[i] - vs[jj];
            f[r] = diff.norm_squared();

            let rows_i = null4.fixed_rows::<3>(i * 3);
            let rows_jj = null4.fixed_rows::<3>(jj * 3);

            for k in 0..NUM_CONTROL_POINTS {
                let d_col = rows_i.column(k) - rows_jj.column(k);
                j[(r, k)] = 2.0 * diff.dot(&d_col);
            }
        }

        f -= rho_vec;

        let mut a = Matrix4::from(j.transpose() * j);
        let b = Vector4::from(j.transpose() * f);

        for d in 0..NUM_CONTROL_POINTS {
            a[(d, d)] += DAMPING;
        }

        if let Some(delta) = solve_4x4_cholesky(&a, &b) {
            bet -= delta;
            if delta.norm() < STOP_EPS {
                break;
            }
        } else {
            break;
        }
    }

    bet.into()
}
