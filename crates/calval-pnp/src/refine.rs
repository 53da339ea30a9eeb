//! Levenberg–Marquardt pose refinement for PnP solutions.

use crate::camera::CameraModel;
use crate::ops::{mat3_from_rows, rvec_to_matrix};
use crate::types::PnPError;
use glam::DVec3;

/// Parameters controlling the LM pose refinement.
#[derive(Debug, Clone)]
pub struct LMParams {
    /// Maximum number of LM iterations.
    pub max_iters: usize,
    /// Convergence threshold on squared reprojection error decrease.
    pub eps: f64,
    /// Initial damping factor (lambda).
    pub lambda_init: f64,
    /// Multiplicative factor to increase/decrease lambda.
    pub lambda_mul: f64,
}

impl Default for LMParams {
    fn default() -> Self {
        Self {
            max_iters: 30,
            eps: 1e-14,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
        }
    }
}

/// Outcome of an LM refinement.
#[derive(Debug, Clone, Copy)]
pub struct LMSummary {
    /// Root-mean-square pixel reprojection error after refinement.
    pub rmse: f64,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Whether the error decrease fell below the convergence threshold.
    pub converged: bool,
}

/// Refine a pose (rvec, t) with Levenberg–Marquardt to minimize pixel reprojection error.
///
/// The residuals are computed by projecting through the full camera model,
/// so `points_image` holds the raw (distorted) detections.
///
/// - `points_world`: World points (N,3)
/// - `points_image`: Pixel points (N,2)
/// - `camera`: Camera model used for projection
/// - `rvec`: Initial axis-angle rotation (input/output)
/// - `t`: Initial translation (input/output)
pub fn refine_pose_lm(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    camera: &CameraModel,
    rvec: &mut [f64; 3],
    t: &mut [f64; 3],
    params: &LMParams,
) -> Result<LMSummary, PnPError> {
    if points_world.len() != points_image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: points_world.len(),
            right_name: "image points",
            right_len: points_image.len(),
        });
    }

    let n = points_world.len();
    if n < 3 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 3,
            actual: n,
        });
    }

    // x = [rx, ry, rz, tx, ty, tz]
    let mut x = [rvec[0], rvec[1], rvec[2], t[0], t[1], t[2]];

    let mut residuals = vec![0.0f64; 2 * n];
    let mut residuals_p = vec![0.0f64; 2 * n];
    let mut residuals_m = vec![0.0f64; 2 * n];

    // Writes residuals in place; `None` when a point falls behind the camera.
    let project_all_in_place = |x: &[f64; 6], out: &mut [f64]| -> Option<f64> {
        let r_mat = mat3_from_rows(&rvec_to_matrix(&[x[0], x[1], x[2]]));
        let t_vec = DVec3::new(x[3], x[4], x[5]);

        let mut sum_sq = 0.0f64;
        for (i, (pw_arr, &uv)) in points_world.iter().zip(points_image.iter()).enumerate() {
            let pc = r_mat * DVec3::from_array(*pw_arr) + t_vec;
            let [u_hat, v_hat] = camera.project_point(&pc.to_array())?;
            let du = u_hat - uv[0];
            let dv = v_hat - uv[1];
            out[2 * i] = du;
            out[2 * i + 1] = dv;
            sum_sq += du.mul_add(du, dv * dv);
        }
        Some(sum_sq)
    };

    let mut err_sq_base = project_all_in_place(&x, &mut residuals).ok_or_else(|| {
        PnPError::DegenerateConfiguration("initial pose places points behind the camera".into())
    })?;

    let mut lambda = params.lambda_init;
    let mut iters = 0usize;
    let mut converged = false;

    let mut j = vec![0.0f64; 2 * n * 6];
    let mut a = [0.0f64; 36];
    let mut b = [0.0f64; 6];

    while iters < params.max_iters {
        iters += 1;
        j.fill(0.0);
        a.fill(0.0);
        b.fill(0.0);

        const H_ROT: f64 = 1e-6; // radians
        let t_scale = x[3].abs().max(x[4].abs()).max(x[5].abs()).max(1.0);
        let h_trans = 1e-6 * t_scale;

        let mut jacobian_ok = true;
        for k_idx in 0..6 {
            // central differences
            let h = if k_idx < 3 { H_ROT } else { h_trans };
            let mut x_plus = x;
            let mut x_minus = x;
            x_plus[k_idx] += h;
            x_minus[k_idx] -= h;
            if project_all_in_place(&x_plus, &mut residuals_p).is_none()
                || project_all_in_place(&x_minus, &mut residuals_m).is_none()
            {
                jacobian_ok = false;
                break;
            }
            for i in 0..(2 * n) {
                j[i * 6 + k_idx] = (residuals_p[i] - residuals_m[i]) / (2.0 * h);
            }
        }
        if !jacobian_ok {
            log::debug!("LM stopped: finite-difference step crossed the image plane");
            break;
        }

        // (JᵀJ + λI) δ = -Jᵀr
        for r_i in 0..(2 * n) {
            let r_val = residuals[r_i];
            for c in 0..6 {
                let j_ic = j[r_i * 6 + c];
                b[c] += j_ic * r_val;
                for d in 0..6 {
                    a[c * 6 + d] += j_ic * j[r_i * 6 + d];
                }
            }
        }
        for d in 0..6 {
            a[d * 6 + d] += lambda * a[d * 6 + d].max(1e-12);
        }

        let mut rhs = b.map(|v| -v);
        let mut a_mat = a;
        match solve_6x6(&mut a_mat, &mut rhs) {
            Some(delta) => {
                let mut x_new = x;
                for i in 0..6 {
                    x_new[i] += delta[i];
                }
                match project_all_in_place(&x_new, &mut residuals_p) {
                    Some(err_sq_new) if err_sq_new < err_sq_base => {
                        x = x_new;
                        residuals.copy_from_slice(&residuals_p);
                        let decrease = err_sq_base - err_sq_new;
                        err_sq_base = err_sq_new;
                        if decrease < params.eps * err_sq_base.max(1.0) {
                            converged = true;
                            break;
                        }
                        lambda = (lambda / params.lambda_mul).max(1e-12);
                    }
                    _ => {
                        if err_sq_base <= f64::EPSILON {
                            converged = true;
                            break;
                        }
                        lambda *= params.lambda_mul;
                    }
                }
            }
            None => {
                // singular system
                lambda *= params.lambda_mul;
            }
        }
    }

    rvec.copy_from_slice(&x[0..3]);
    t.copy_from_slice(&x[3..6]);

    let rmse = (err_sq_base / n as f64).sqrt();
    log::trace!("LM refinement: rmse={rmse:.6} iterations={iters} converged={converged}");
    Ok(LMSummary {
        rmse,
        iterations: iters,
        converged,
    })
}

/// Dense 6x6 solver using Gaussian elimination with partial pivoting.
fn solve_6x6(a: &mut [f64; 36], b: &mut [f64; 6]) -> Option<[f64; 6]> {
    for i in 0..6 {
        let mut piv = i;
        let mut max_val = a[i * 6 + i].abs();
        for r in (i + 1)..6 {
            let v = a[r * 6 + i].abs();
            if v > max_val {
                max_val = v;
                piv = r;
            }
        }
        if max_val < 1e-300 {
            return None;
        }
        if piv != i {
            for c in i..6 {
                a.swap(i * 6 + c, piv * 6 + c);
            }
            b.swap(i, piv);
        }
        let diag = a[i * 6 + i];
        for c in i..6 {
            a[i * 6 + c] /= diag;
        }
        b[i] /= diag;
        for r in (i + 1)..6 {
            let factor = a[r * 6 + i];
            if factor == 0.0 {
                continue;
            }
            for c in i..6 {
                a[r * 6 + c] -= factor * a[i * 6 + c];
            }
            b[r] -= factor * b[i];
        }
    }
    // back substitution
    for i in (0..6).rev() {
        for r in 0..i {
            let factor = a[r * 6 + i];
            if factor != 0.0 {
                a[r * 6 + i] = 0.0;
                b[r] -= factor * b[i];
            }
        }
    }
    Some(*b)
}
