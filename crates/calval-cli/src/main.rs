use std::path::PathBuf;

use argh::FromArgs;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressIterator, ProgressStyle};
use rayon::prelude::*;

use calval_core::{
    aggregate_parallel, aggregate_with_progress, export_poses, format_summary, CalibrationLayout,
    CameraIntrinsics, CornerFileDetector, DetectionResult, GridSpec, PatternDetector,
};

/// Significant digits of the LaTeX camera table.
const LATEX_PRECISION: usize = 4;

#[derive(FromArgs, Debug)]
/// Validate a camera calibration against images of a known checkerboard.
struct Args {
    /// root directory holding the `calibration` folder
    #[argh(positional)]
    root_path: PathBuf,

    /// write the camera pose of every image to `<root_path>/poses`
    #[argh(switch)]
    export_poses: bool,

    /// camera parameters to validate instead of `calibration/camera_params.yaml`
    #[argh(option)]
    camera_params_file: Option<PathBuf>,

    /// number of threads to use
    #[argh(option, short = 'n', default = "1")]
    num_threads: usize,

    /// also print the camera parameters as a LaTeX table
    #[argh(switch)]
    latex: bool,
}

fn main() {
    env_logger::init();
    let args: Args = argh::from_env();

    if let Err(err) = run(&args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let parallel = args.num_threads > 1;
    if parallel {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.num_threads)
            .build_global()?;
    }

    let layout = CalibrationLayout::discover(&args.root_path, args.camera_params_file.as_deref())?;
    let intrinsics = CameraIntrinsics::from_yaml_file(&layout.camera_params_file)?;
    let grid = GridSpec::from_yaml_file(&layout.grid_params_file)?;

    println!("{intrinsics}");
    if args.latex {
        println!("{}", intrinsics.as_latex_table(LATEX_PRECISION));
    }
    println!(
        "Calibration grid: {}x{} corners, square size {}",
        grid.width(),
        grid.height(),
        grid.square_size()
    );

    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7} {msg}")?
        .progress_chars("##>-");

    // detect the grid in every image
    let detector = CornerFileDetector;
    let detect = |image: &PathBuf| detector.detect(image, &grid);
    let pb = ProgressBar::new(layout.images.len() as u64)
        .with_style(style.clone())
        .with_message("detecting");
    let detections: Vec<DetectionResult> = if parallel {
        layout
            .images
            .par_iter()
            .progress_with(pb.clone())
            .map(detect)
            .collect::<Result<_, _>>()?
    } else {
        layout
            .images
            .iter()
            .progress_with(pb.clone())
            .map(detect)
            .collect::<Result<_, _>>()?
    };
    pb.finish_and_clear();

    let num_detected = detections.iter().filter(|d| d.is_detected()).count();
    println!(
        "Found {num_detected} out of {} images with a calibration grid.",
        layout.images.len()
    );

    // solve the poses and pool the reprojection errors
    let pb = ProgressBar::new(num_detected as u64)
        .with_style(style)
        .with_message("solving");
    let (poses, summary) = if parallel {
        aggregate_parallel(&detections, &grid, &intrinsics, |_| pb.inc(1))?
    } else {
        aggregate_with_progress(&detections, &grid, &intrinsics, |_| pb.inc(1))?
    };
    pb.finish_and_clear();

    for pose in &poses {
        log::info!(
            "{}: rms {:.4} [pix], mean {:.4} [pix]",
            pose.source.display(),
            pose.rms_error(),
            pose.mean_error()
        );
    }
    print!("{}", format_summary(&summary));

    if args.export_poses {
        let dir = layout.poses_dir();
        let written = export_poses(&poses, &dir)?;
        println!("Exported {} poses to {}", written.len(), dir.display());
    }

    Ok(())
}
