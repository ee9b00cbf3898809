//! Projection to flat-field matching
//!
//! Each projection is paired with the flat-field frame that leaves the least
//! residual structure once subtracted from it. The residual of the pair
//! `(projection, flat)` is the standard deviation of their difference along
//! the vertical axis, evaluated for every column, and the score of the pair is
//! the smallest of these column deviations.
//!
//! The search costs one image difference per (projection, flat) pair.
//! Projections are independent of each other, so [match_flats_par] spreads
//! them over the rayon thread pool and returns exactly what [match_flats]
//! returns.

use crate::{
    error::{check_image_shape, Error, Result},
    progress::{Progress, Step},
};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};
use rayon::prelude::*;
use std::{
    ops::Deref,
    sync::atomic::{AtomicUsize, Ordering},
    time::Instant,
};

/// Best matching flat-field index for every projection
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlatMatches {
    indices: Vec<usize>,
    scores: Vec<f32>,
}
impl Deref for FlatMatches {
    type Target = [usize];

    fn deref(&self) -> &Self::Target {
        &self.indices
    }
}
impl From<Vec<usize>> for FlatMatches {
    /// Builds the matches from known flat indices, the scores are set to NaN
    fn from(indices: Vec<usize>) -> Self {
        let scores = vec![f32::NAN; indices.len()];
        Self { indices, scores }
    }
}
impl FromIterator<(usize, f32)> for FlatMatches {
    fn from_iter<I: IntoIterator<Item = (usize, f32)>>(iter: I) -> Self {
        let (indices, scores) = iter.into_iter().unzip();
        Self { indices, scores }
    }
}
impl FlatMatches {
    /// Flat indices, one per projection
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
    /// Residual score of each projection with its matched flat
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }
    /// Number of projections matched to each flat
    pub fn histogram(&self, n_flat: usize) -> Vec<usize> {
        let mut counts = vec![0; n_flat];
        self.indices
            .iter()
            .filter(|&&j| j < n_flat)
            .for_each(|&j| counts[j] += 1);
        counts
    }
}

fn to_f32<A: Copy + Into<f32>>(view: ArrayView2<A>) -> Array2<f32> {
    view.mapv(|x| x.into())
}

/// Residual score of a projection and a flat-field
///
/// `diff` is a scratch buffer with the image shape.
fn residual_score(
    projection: &ArrayView2<f32>,
    flat: &ArrayView2<f32>,
    diff: &mut Array2<f32>,
) -> f32 {
    Zip::from(&mut *diff)
        .and(projection)
        .and(flat)
        .for_each(|d, &p, &f| *d = p - f);
    diff.std_axis(Axis(0), 0f32)
        .fold(f32::INFINITY, |m, &s| m.min(s))
}

/// Index and score of the best matching flat, the first flat wins ties
fn best_flat(projection: ArrayView2<f32>, flats: &Array3<f32>) -> (usize, f32) {
    let mut diff = Array2::<f32>::zeros(projection.raw_dim());
    let mut scores = flats
        .outer_iter()
        .map(|flat| residual_score(&projection, &flat, &mut diff));
    let first = scores.next().unwrap_or(f32::INFINITY);
    scores
        .enumerate()
        .fold((0, first), |(j_min, s_min), (j, s)| {
            if s < s_min {
                (j + 1, s)
            } else {
                (j_min, s_min)
            }
        })
}

fn check_inputs(proj_shape: &[usize], flat_shape: &[usize]) -> Result<()> {
    if flat_shape[0] == 0 {
        return Err(Error::invalid(
            "no flat-field frames to match the projections against",
        ));
    }
    check_image_shape("flat-field frames", proj_shape, flat_shape)?;
    if proj_shape[1] == 0 || proj_shape[2] == 0 {
        return Err(Error::invalid(format!(
            "cannot match empty images of shape {:?}",
            &proj_shape[1..]
        )));
    }
    Ok(())
}

/// Matches each projection to its best flat-field frame
///
/// The optional `progress` observer is notified after each projection is
/// resolved.
pub fn match_flats<A, B>(
    projections: ArrayView3<A>,
    flats: ArrayView3<B>,
    progress: Option<&dyn Progress>,
) -> Result<FlatMatches>
where
    A: Copy + Into<f32>,
    B: Copy + Into<f32>,
{
    check_inputs(projections.shape(), flats.shape())?;
    let n = projections.len_of(Axis(0));
    log::info!(
        "Matching {} projections against {} flat-fields...",
        n,
        flats.len_of(Axis(0))
    );
    let now = Instant::now();
    let flats: Array3<f32> = flats.mapv(|x| x.into());
    let matches: FlatMatches = projections
        .outer_iter()
        .enumerate()
        .map(|(i, projection)| {
            let (j, score) = best_flat(to_f32(projection).view(), &flats);
            log::debug!("projection #{i} matched to flat #{j} (score: {score:.3})");
            if let Some(progress) = progress {
                progress.step(Step {
                    item: i,
                    completed: i + 1,
                    total: n,
                });
            }
            (j, score)
        })
        .collect();
    log::info!("... matched in {:}s", now.elapsed().as_secs());
    Ok(matches)
}

/// Parallel version of [match_flats]
///
/// Projections are matched on the rayon thread pool, the observer is called
/// from the worker threads in completion order.
pub fn match_flats_par<A, B>(
    projections: ArrayView3<A>,
    flats: ArrayView3<B>,
    progress: Option<&dyn Progress>,
) -> Result<FlatMatches>
where
    A: Copy + Into<f32> + Sync,
    B: Copy + Into<f32>,
{
    check_inputs(projections.shape(), flats.shape())?;
    let n = projections.len_of(Axis(0));
    log::info!(
        "Matching {} projections against {} flat-fields on {} threads...",
        n,
        flats.len_of(Axis(0)),
        rayon::current_num_threads()
    );
    let now = Instant::now();
    let flats: Array3<f32> = flats.mapv(|x| x.into());
    let completed = AtomicUsize::new(0);
    let results: Vec<(usize, f32)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let projection = to_f32(projections.index_axis(Axis(0), i));
            let (j, score) = best_flat(projection.view(), &flats);
            log::debug!("projection #{i} matched to flat #{j} (score: {score:.3})");
            if let Some(progress) = progress {
                progress.step(Step {
                    item: i,
                    completed: completed.fetch_add(1, Ordering::Relaxed) + 1,
                    total: n,
                });
            }
            (j, score)
        })
        .collect();
    log::info!("... matched in {:}s", now.elapsed().as_secs());
    Ok(results.into_iter().collect())
}
