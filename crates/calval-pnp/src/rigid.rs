//! Rigid alignment utilities (Kabsch / Umeyama)

use glam::{DMat3, DVec3};
use nalgebra::Matrix3;
use thiserror::Error;

/// Rotation (R, row-major), translation (t), and scale (s) output of Umeyama without scaling (s = 1).
pub type UmeyamaOutput = ([[f64; 3]; 3], [f64; 3], f64);

/// Error type for rigid alignment operations.
#[derive(Debug, Error)]
pub enum UmeyamaError {
    /// Source and destination arrays must have the same length
    #[error("Source and destination arrays must have the same length")]
    MismatchedInputLengths,

    /// At least one correspondence is required
    #[error("Rigid alignment requires at least one correspondence")]
    EmptyInput,

    /// The SVD did not produce the requested factors
    #[error("SVD of the cross-covariance matrix failed")]
    SvdFailed,
}

/// Result type alias for Umeyama.
pub type UmeyamaResult = Result<UmeyamaOutput, UmeyamaError>;

/// Umeyama/Kabsch algorithm without scale.
/// Returns (R, t, s) where s == 1.0 and `dst ≈ R * src + t`.
pub fn umeyama(src: &[DVec3], dst: &[DVec3]) -> UmeyamaResult {
    if src.len() != dst.len() {
        return Err(UmeyamaError::MismatchedInputLengths);
    }
    if src.is_empty() {
        return Err(UmeyamaError::EmptyInput);
    }
    let n = src.len() as f64;

    let mu_s = src.iter().copied().sum::<DVec3>() / n;
    let mu_d = dst.iter().copied().sum::<DVec3>() / n;

    // H = sum (dst_i - mu_d) (src_i - mu_s)^T / n
    let mut h = Matrix3::<f64>::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        let sc = *s - mu_s;
        let dc = *d - mu_d;
        for r in 0..3 {
            for c in 0..3 {
                h[(r, c)] += dc[r] * sc[c];
            }
        }
    }
    h /= n;

    let r = nearest_rotation(&h)?;
    let t = mu_d - r * mu_s;

    Ok((crate::ops::mat3_to_rows(&r), t.to_array(), 1.0))
}

/// Project an arbitrary 3x3 matrix onto SO(3) (closest rotation in the Frobenius sense).
pub(crate) fn nearest_rotation(m: &Matrix3<f64>) -> Result<DMat3, UmeyamaError> {
    let svd = m.svd(true, true);
    let u = svd.u.ok_or(UmeyamaError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(UmeyamaError::SvdFailed)?;

    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        // reflection: R = U * diag(1, 1, -1) * V^T
        let mut u_fix = u;
        u_fix.column_mut(2).neg_mut();
        r = u_fix * v_t;
    }

    Ok(DMat3::from_cols_array(&[
        r[(0, 0)],
        r[(1, 0)],
        r[(2, 0)],
        r[(0, 1)],
        r[(1, 1)],
        r[(2, 1)],
        r[(0, 2)],
        r[(1, 2)],
        r[(2, 2)],
    ]))
}
