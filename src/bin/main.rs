//! Tomography projections preprocessing
//!
//! Matches every projection with a flat-field, normalizes the projections and
//! writes the normalized stack to a `.npy` file.
//!
//! The raw frames are either given as 3 stacks:
//! ```shell
//! tomo-prep --projections proj.npy --flats flats.npy --darks darks.npy -o normalized.npy
//! ```
//! or as a CSV frame manifest and a directory with one `.npy` file per frame:
//! ```shell
//! tomo-prep --frames scan/frames.csv --raw-dir scan/raw --matches matches.npy --progress
//! ```

use anyhow::{bail, Context};
use indicatif::ProgressBar;
use ndarray::{Array1, Ix1, Ix3};
use std::{f32::consts::PI, path::PathBuf, time::Instant};
use structopt::StructOpt;
use tomo_prep::{npy, FrameLog, NpyDirReader, Preprocessor, Progress, RawStack};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "tomo-prep",
    about = "Flat-field matching and normalization of tomography projections"
)]
struct Opt {
    /// Projections stack file [n_projection x rows x columns]
    #[structopt(long, parse(from_os_str))]
    projections: Option<PathBuf>,
    /// Flat-fields stack file [n_flat x rows x columns]
    #[structopt(long, parse(from_os_str))]
    flats: Option<PathBuf>,
    /// Dark-fields stack file [n_dark x rows x columns]
    #[structopt(long, parse(from_os_str))]
    darks: Option<PathBuf>,
    /// Projection angles file [rd]
    #[structopt(long, parse(from_os_str))]
    theta: Option<PathBuf>,
    /// Frame manifest CSV file (imagenumber,imagename,imagetype,imageangle)
    #[structopt(long, parse(from_os_str))]
    frames: Option<PathBuf>,
    /// Directory of the manifest frames
    #[structopt(long, parse(from_os_str), default_value = ".")]
    raw_dir: PathBuf,
    /// Normalized projections output file
    #[structopt(short, long, parse(from_os_str), default_value = "normalized.npy")]
    output: PathBuf,
    /// Flat-field indices output file
    #[structopt(long, parse(from_os_str))]
    matches: Option<PathBuf>,
    /// Projection angles output file
    #[structopt(long = "theta-out", parse(from_os_str))]
    theta_out: Option<PathBuf>,
    /// Binning factor
    #[structopt(short, long, default_value = "1")]
    bin: usize,
    /// Normalized values upper limit
    #[structopt(short, long)]
    cutoff: Option<f32>,
    /// Matches flat-fields on a single thread
    #[structopt(long)]
    sequential: bool,
    /// Displays progress bars
    #[structopt(short, long)]
    progress: bool,
}

fn load_stacks(opt: &Opt) -> anyhow::Result<RawStack> {
    match (&opt.frames, &opt.projections, &opt.flats, &opt.darks) {
        (Some(frames), None, None, None) => {
            let frame_log = FrameLog::from_csv(frames)
                .with_context(|| format!("failed to read the frame manifest {frames:?}"))?;
            let reader = NpyDirReader::new(&opt.raw_dir);
            let pb = opt.progress.then(|| ProgressBar::new(frame_log.len() as u64));
            let raw = RawStack::assemble(&frame_log, &reader, pb.as_ref().map(|pb| pb as &dyn Progress))?;
            if let Some(pb) = pb {
                pb.finish();
            }
            Ok(raw)
        }
        (None, Some(projections), Some(flats), Some(darks)) => {
            let projections = npy::read_array::<u16, Ix3, _>(projections)
                .with_context(|| format!("failed to read {projections:?}"))?;
            let flats = npy::read_array::<u16, Ix3, _>(flats)
                .with_context(|| format!("failed to read {flats:?}"))?;
            let darks = npy::read_array::<u16, Ix3, _>(darks)
                .with_context(|| format!("failed to read {darks:?}"))?;
            let n = projections.len_of(ndarray::Axis(0));
            let theta = match &opt.theta {
                Some(theta) => npy::read_array::<f32, Ix1, _>(theta)
                    .with_context(|| format!("failed to read {theta:?}"))?,
                None => {
                    log::warn!("no projection angles given, assuming {n} angles evenly spaced in [0,180[degree");
                    Array1::from_shape_fn(n, |i| i as f32 * PI / n as f32)
                }
            };
            if theta.len() != n {
                bail!("{} projection angles for {n} projections", theta.len());
            }
            Ok(RawStack {
                projections,
                flats,
                darks,
                theta,
            })
        }
        _ => bail!(
            "either --frames or all of --projections, --flats and --darks must be given, but not both"
        ),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let raw = load_stacks(&opt)?;
    println!("{raw}");

    let mut preprocessor = Preprocessor::default()
        .bin(opt.bin)
        .parallel(!opt.sequential);
    if let Some(cutoff) = opt.cutoff {
        preprocessor = preprocessor.cutoff(cutoff);
    }

    let now = Instant::now();
    let pb = opt
        .progress
        .then(|| ProgressBar::new(raw.projections.len_of(ndarray::Axis(0)) as u64));
    let prepared = preprocessor.run(&raw, pb.as_ref().map(|pb| pb as &dyn Progress))?;
    if let Some(pb) = pb {
        pb.finish();
    }
    println!("{prepared}");
    println!("Preprocessing completed in {:}s", now.elapsed().as_secs());

    npy::write_array(&opt.output, &prepared.projections)?;
    if let Some(path) = &opt.matches {
        let indices = Array1::from_iter(prepared.matches.iter().map(|&j| j as u64));
        npy::write_array(path, &indices)?;
    }
    if let Some(path) = &opt.theta_out {
        npy::write_array(path, &prepared.theta)?;
    }

    Ok(())
}
