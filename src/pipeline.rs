//! Raw stack to normalized projections
//!
//! [Preprocessor] chains the optional binning, the flat-field matching and
//! the normalization of a [RawStack]:
//! ```no_run
//! # fn main() -> tomo_prep::Result<()> {
//! use tomo_prep::{FrameLog, NpyDirReader, Preprocessor, RawStack};
//!
//! let frames = FrameLog::from_csv("scan/frames.csv")?;
//! let raw = RawStack::assemble(&frames, &NpyDirReader::new("scan/raw"), None)?;
//! let prepared = Preprocessor::default().bin(2).cutoff(1.5).run(&raw, None)?;
//! println!("{}", prepared);
//! # Ok(())
//! # }
//! ```

use crate::{
    binning::bin_avg_3d,
    error::Result,
    flat_match::{match_flats, match_flats_par, FlatMatches},
    normalize::normalize,
    progress::Progress,
    reconstruct::{reconstruct_chunked, reconstruct_chunked_par, Reconstruct},
    stack::RawStack,
};
use itertools::{Itertools, MinMaxResult};
use ndarray::{Array1, Array3, ArrayView3, Axis};
use std::fmt;

/// Preprocessing options
#[derive(Debug, Clone)]
pub struct Preprocessor {
    bin_factor: usize,
    cutoff: Option<f32>,
    parallel: bool,
}
impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            bin_factor: 1,
            cutoff: None,
            parallel: true,
        }
    }
}
impl Preprocessor {
    /// Bins all frames by `factor` before matching
    pub fn bin(self, factor: usize) -> Self {
        Self {
            bin_factor: factor,
            ..self
        }
    }
    /// Clips normalized values above `cutoff`
    pub fn cutoff(self, cutoff: f32) -> Self {
        Self {
            cutoff: Some(cutoff),
            ..self
        }
    }
    /// Runs the flat-field matching on the calling thread only
    pub fn sequential(self) -> Self {
        Self {
            parallel: false,
            ..self
        }
    }
    pub fn parallel(self, parallel: bool) -> Self {
        Self { parallel, ..self }
    }

    fn prepare<A, B, C>(
        &self,
        projections: ArrayView3<A>,
        flats: ArrayView3<B>,
        darks: ArrayView3<C>,
        progress: Option<&dyn Progress>,
    ) -> Result<(FlatMatches, Array3<f32>)>
    where
        A: Copy + Into<f32> + Sync,
        B: Copy + Into<f32>,
        C: Copy + Into<f32>,
    {
        let matches = if self.parallel {
            match_flats_par(projections.view(), flats.view(), progress)?
        } else {
            match_flats(projections.view(), flats.view(), progress)?
        };
        let normalized = normalize(projections, flats, darks, &matches, self.cutoff)?;
        Ok((matches, normalized))
    }

    /// Matches and normalizes the raw stack
    ///
    /// The optional `progress` observer follows the flat-field matching.
    pub fn run(&self, raw: &RawStack, progress: Option<&dyn Progress>) -> Result<Prepared> {
        let (matches, projections) = if self.bin_factor != 1 {
            log::info!("Binning frames by {}...", self.bin_factor);
            let projections = bin_avg_3d(raw.projections.view(), self.bin_factor)?;
            let flats = bin_avg_3d(raw.flats.view(), self.bin_factor)?;
            let darks = bin_avg_3d(raw.darks.view(), self.bin_factor)?;
            self.prepare(projections.view(), flats.view(), darks.view(), progress)?
        } else {
            self.prepare(
                raw.projections.view(),
                raw.flats.view(),
                raw.darks.view(),
                progress,
            )?
        };
        Ok(Prepared {
            matches,
            projections,
            theta: raw.theta.clone(),
            n_flat: raw.flats.len_of(Axis(0)),
            parallel: self.parallel,
        })
    }
}

/// Normalized projections ready for reconstruction
#[derive(Debug, Clone)]
pub struct Prepared {
    pub matches: FlatMatches,
    pub projections: Array3<f32>,
    /// projection angles [rd]
    pub theta: Array1<f32>,
    n_flat: usize,
    parallel: bool,
}
impl Prepared {
    /// Reconstructs the normalized projections in chunks of `chunk_size` slices
    pub fn reconstruct<P, R>(
        &self,
        chunk_size: usize,
        params: &P,
        routine: &R,
        progress: Option<&dyn Progress>,
    ) -> Result<Array3<f32>>
    where
        P: Sync + ?Sized,
        R: Reconstruct<P> + Sync + ?Sized,
    {
        if self.parallel {
            reconstruct_chunked_par(
                self.projections.view(),
                self.theta.view(),
                chunk_size,
                params,
                routine,
                progress,
            )
        } else {
            reconstruct_chunked(
                self.projections.view(),
                self.theta.view(),
                chunk_size,
                params,
                routine,
                progress,
            )
        }
    }
}
impl fmt::Display for Prepared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (n, rows, cols) = self.projections.dim();
        writeln!(f, "SUMMARY:")?;
        writeln!(f, " - # of projections: {n} ({rows}x{cols})")?;
        let histogram = self.matches.histogram(self.n_flat);
        writeln!(
            f,
            " - flat-field usage: [{}]",
            histogram.iter().map(|c| c.to_string()).join(",")
        )?;
        match self.projections.iter().copied().minmax_by(f32::total_cmp) {
            MinMaxResult::MinMax(min, max) => {
                write!(f, " - normalized range: [{min:8.3}-{max:8.3}]")
            }
            MinMaxResult::OneElement(value) => write!(f, " - normalized value: {value:8.3}"),
            MinMaxResult::NoElements => write!(f, " - no normalized data"),
        }?;
        if n > 0 {
            let mean_score = self.matches.scores().iter().sum::<f32>() / n as f32;
            write!(f, "\n - mean flat-field residual: {mean_score:8.3}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Error, reconstruct::from_fn};
    use ndarray::{Array, Array2, ArrayView1};

    /// Flats alternate between two illumination patterns, each projection
    /// is one of them minus a constant absorption
    fn raw_stack() -> RawStack {
        let pattern = |k: usize, r: usize, c: usize| -> u16 {
            let base = 1000 + (r * 8 + c) as u16;
            if k % 2 == 0 {
                base
            } else {
                base + (r * r * 7) as u16
            }
        };
        let flats = Array::from_shape_fn((4, 4, 6), |(k, r, c)| pattern(k, r, c) + 20);
        let projections = Array::from_shape_fn((5, 4, 6), |(k, r, c)| pattern(k, r, c) - 280);
        let darks = Array3::from_elem((2, 4, 6), 20u16);
        RawStack {
            projections,
            flats,
            darks,
            theta: Array1::linspace(0., std::f32::consts::PI, 5),
        }
    }

    #[test]
    fn run_matches_and_normalizes() {
        let raw = raw_stack();
        let prepared = Preprocessor::default().sequential().run(&raw, None).unwrap();
        assert_eq!(prepared.matches.indices(), &[0, 1, 0, 1, 0]);
        assert_eq!(prepared.projections.dim(), (5, 4, 6));
        assert!(prepared
            .projections
            .iter()
            .all(|&x| x > 0.69 && x < 0.73));
        let parallel = Preprocessor::default().run(&raw, None).unwrap();
        assert_eq!(parallel.matches, prepared.matches);
        assert_eq!(parallel.projections, prepared.projections);
    }

    #[test]
    fn run_with_binning_and_cutoff() {
        let raw = raw_stack();
        let prepared = Preprocessor::default()
            .bin(2)
            .cutoff(0.4)
            .run(&raw, None)
            .unwrap();
        assert_eq!(prepared.projections.dim(), (5, 2, 3));
        assert!(prepared.projections.iter().all(|&x| x == 0.4));
    }

    #[test]
    fn prepared_reconstruction() {
        let raw = raw_stack();
        let prepared = Preprocessor::default().run(&raw, None).unwrap();
        let routine = from_fn(|p: ArrayView3<f32>, _: ArrayView1<f32>, len: &usize| {
            let (_, n_slice, width) = p.dim();
            Ok(Array3::from_shape_fn((n_slice, *len, width), |(k, _, c)| {
                p.index_axis(Axis(1), k).column(c).sum()
            }))
        });
        let volume = prepared.reconstruct(3, &4usize, &routine, None).unwrap();
        assert_eq!(volume.dim(), (4, 4, 6));
        let direct: Array2<f32> = prepared.projections.sum_axis(Axis(0));
        for k in 0..4 {
            for c in 0..6 {
                assert!((volume[[k, 0, c]] - direct[[k, c]]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn summary() {
        let raw = raw_stack();
        let prepared = Preprocessor::default().run(&raw, None).unwrap();
        let summary = prepared.to_string();
        assert!(summary.contains("# of projections: 5 (4x6)"));
        assert!(summary.contains("flat-field usage: [3,2]"));
    }

    #[test]
    fn unused_flats_are_counted() {
        let mut raw = raw_stack();
        raw.projections = raw.projections.slice(ndarray::s![..1, .., ..]).to_owned();
        raw.theta = raw.theta.slice(ndarray::s![..1]).to_owned();
        let prepared = Preprocessor::default().run(&raw, None).unwrap();
        assert_eq!(prepared.matches.indices(), &[0]);
        assert!(prepared.to_string().contains("flat-field usage: [1,0,0,0]"));
    }

    #[test]
    fn zero_bin_factor_is_invalid() {
        let raw = raw_stack();
        assert!(matches!(
            Preprocessor::default().bin(0).run(&raw, None),
            Err(Error::InvalidArgument(_))
        ));
    }
}
