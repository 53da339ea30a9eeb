#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Calval PnP (Perspective-n-Point)
//!
//! Camera pose estimation from 2D-3D point correspondences under a
//! Brown-Conrady lens model.
//!
//! ## Key Features
//!
//! - **EPnP Algorithm**: closed-form initialisation for general point sets
//! - **Planar Homography**: initialisation for calibration boards (coplanar points)
//! - **Iterative Refinement**: Levenberg–Marquardt over the full distortion model
//!
//! ## Example: Iterative PnP on a calibration board
//!
//! ```rust
//! use calval_pnp::{solve_pnp, CameraIntrinsics, CameraModel, PnPMethod};
//!
//! // 2x2 board with 10 cm squares
//! let world_points = vec![
//!     [0.0, 0.0, 0.0],
//!     [0.1, 0.0, 0.0],
//!     [0.0, 0.1, 0.0],
//!     [0.1, 0.1, 0.0],
//! ];
//!
//! // board seen fronto-parallel one metre away
//! let image_points = vec![
//!     [320.0, 240.0],
//!     [400.0, 240.0],
//!     [320.0, 320.0],
//!     [400.0, 320.0],
//! ];
//!
//! let camera = CameraModel::pinhole(CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0));
//!
//! let result = solve_pnp(&world_points, &image_points, &camera, PnPMethod::default())?;
//!
//! println!("Rotation: {:?}", result.rotation);
//! println!("Translation: {:?}", result.translation);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Pinhole camera model with polynomial (Brown-Conrady) lens distortion.
pub mod camera;

/// Efficient Perspective-n-Point (EPnP) solver implementation.
///
/// Initialises [`solve_pnp`] for non-planar targets. Coplanar points, such as
/// a checkerboard, go through [`homography`] instead.
pub mod epnp;

/// Planar pose initialisation from a plane-induced homography.
pub mod homography;

/// Levenberg–Marquardt pose refinement.
pub mod refine;

/// Rigid alignment between point sets.
pub mod rigid;

/// Common data types and traits for PnP solvers.
///
/// Defines the interface and result types shared across different PnP algorithms.
pub mod types;

mod ops;

pub use camera::{CameraError, CameraIntrinsics, CameraModel, PolynomialDistortion};
pub use epnp::{EPnP, EPnPParams};
pub use homography::{is_coplanar, HomographyParams, PlanarHomography};
pub use ops::{matrix_to_rvec, rvec_to_matrix};
pub use refine::{refine_pose_lm, LMParams, LMSummary};
pub use rigid::{umeyama, UmeyamaError};
pub use types::{NumericTol, PnPError, PnPResult, PnPSolver, PnPSolverWithCamera};

/// Relative out-of-plane spread below which object points are treated as coplanar.
pub const COPLANARITY_TOL: f64 = 1e-9;

/// Enumeration of the Perspective-n-Point algorithms available in this crate.
#[derive(Debug, Clone)]
pub enum PnPMethod {
    /// Efficient PnP solver with a user-supplied parameter object.
    EPnP(EPnPParams),
    /// Efficient PnP solver with the crate's default parameters.
    EPnPDefault,
    /// Planar homography decomposition (coplanar object points only).
    Homography,
    /// Closed-form initialisation followed by Levenberg–Marquardt refinement.
    Iterative(LMParams),
}

impl Default for PnPMethod {
    fn default() -> Self {
        PnPMethod::Iterative(LMParams::default())
    }
}

/// Dispatch function that routes to the chosen PnP solver.
///
/// `image` holds the raw pixel observations; lens distortion from `camera`
/// is removed before the closed-form solvers run.
pub fn solve_pnp(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    camera: &CameraModel,
    method: PnPMethod,
) -> Result<PnPResult, PnPError> {
    match method {
        PnPMethod::EPnP(params) => EPnP::solve_with_camera(world, image, camera, &params),
        PnPMethod::EPnPDefault => {
            EPnP::solve_with_camera(world, image, camera, &EPnPParams::default())
        }
        PnPMethod::Homography => PlanarHomography::solve_with_camera(
            world,
            image,
            camera,
            &HomographyParams::default(),
        ),
        PnPMethod::Iterative(params) => solve_iterative(world, image, camera, &params),
    }
}

fn solve_iterative(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    camera: &CameraModel,
    params: &LMParams,
) -> Result<PnPResult, PnPError> {
    let initial = if world.len() >= 4 && is_coplanar(world, COPLANARITY_TOL) {
        log::trace!("object points are coplanar, initialising from homography");
        PlanarHomography::solve_with_camera(world, image, camera, &HomographyParams::default())?
    } else {
        EPnP::solve_with_camera(world, image, camera, &EPnPParams::default())?
    };

    let mut rvec = initial.rvec;
    let mut t = initial.translation;
    let summary = refine_pose_lm(world, image, camera, &mut rvec, &mut t, params)?;

    let pose_finite = rvec.iter().chain(t.iter()).all(|v| v.is_finite());
    if !pose_finite {
        return Err(PnPError::DegenerateConfiguration(
            "refined pose is not finite".to_string(),
        ));
    }

    Ok(PnPResult {
        rotation: rvec_to_matrix(&rvec),
        translation: t,
        rvec,
        reproj_rmse: Some(summary.rmse),
        num_iterations: Some(summary.iterations),
        converged: Some(summary.converged),
    })
}
