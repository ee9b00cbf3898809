//! Chunked reconstruction
//!
//! The reconstruction algorithm is not part of this crate: it is any type
//! implementing [Reconstruct]. The projection stack is cut into chunks along
//! its 2nd (slice) axis, each chunk is reconstructed on its own and the
//! reconstructed slices are written into the output volume at the rows of
//! the chunk. Peak memory is then bounded by the chunk size instead of the
//! full stack.

use crate::{
    chunk::ChunkPlan,
    error::{Error, Result},
    progress::{Progress, Step},
};
use ndarray::{s, Array3, ArrayView1, ArrayView3, Axis};
use rayon::prelude::*;
use std::{
    ops::Range,
    sync::atomic::{AtomicUsize, Ordering},
    time::Instant,
};

/// Error returned by a reconstruction routine
pub type RoutineError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A reconstruction routine
///
/// Given a `(n_projection, n_slice, width)` projection sub-stack and the
/// projection angles in radians, returns the `n_slice` reconstructed slices.
/// `P` holds the algorithm parameters, they are handed over unchanged for
/// every chunk.
pub trait Reconstruct<P: ?Sized> {
    fn reconstruct(
        &self,
        projections: ArrayView3<f32>,
        theta: ArrayView1<f32>,
        params: &P,
    ) -> std::result::Result<Array3<f32>, RoutineError>;
}

/// A reconstruction routine from a closure, see [from_fn]
pub struct FromFn<F>(F);
impl<P, F> Reconstruct<P> for FromFn<F>
where
    P: ?Sized,
    F: Fn(ArrayView3<f32>, ArrayView1<f32>, &P) -> std::result::Result<Array3<f32>, RoutineError>,
{
    fn reconstruct(
        &self,
        projections: ArrayView3<f32>,
        theta: ArrayView1<f32>,
        params: &P,
    ) -> std::result::Result<Array3<f32>, RoutineError> {
        (self.0)(projections, theta, params)
    }
}
/// Wraps a closure into a reconstruction routine
pub fn from_fn<P, F>(f: F) -> FromFn<F>
where
    P: ?Sized,
    F: Fn(ArrayView3<f32>, ArrayView1<f32>, &P) -> std::result::Result<Array3<f32>, RoutineError>,
{
    FromFn(f)
}

fn check_inputs(projections: &ArrayView3<f32>, theta: &ArrayView1<f32>) -> Result<()> {
    let n = projections.len_of(Axis(0));
    if theta.len() != n {
        return Err(Error::shape("projection angles", &[n], &[theta.len()]));
    }
    Ok(())
}

/// Reconstructs the slices `range` of the projection stack
fn reconstruct_chunk<P, R>(
    projections: &ArrayView3<f32>,
    theta: &ArrayView1<f32>,
    range: Range<usize>,
    params: &P,
    routine: &R,
) -> Result<Array3<f32>>
where
    P: ?Sized,
    R: Reconstruct<P> + ?Sized,
{
    let (_, len, width) = projections.dim();
    let sub_stack = projections.slice(s![.., range.clone(), ..]);
    log::debug!("reconstructing slices [{}, {})", range.start, range.end);
    let slab = routine
        .reconstruct(sub_stack, theta.view(), params)
        .map_err(|source| Error::ExternalRoutineFailure {
            start: range.start,
            end: range.end,
            source,
        })?;
    let expected = [range.len(), len, width];
    if slab.shape() != expected {
        return Err(Error::shape(
            format!("reconstructed slices [{}, {})", range.start, range.end),
            &expected,
            slab.shape(),
        ));
    }
    Ok(slab)
}

/// Reconstructs the projection stack chunk by chunk
///
/// The projections are cut into chunks of `chunk_size` slices along the 2nd
/// axis, the volume has the shape `(n_slice, n_slice, width)` and its rows
/// `[a, b)` are the reconstruction of the chunk `[a, b)`. The first failure of
/// the routine aborts the reconstruction.
pub fn reconstruct_chunked<P, R>(
    projections: ArrayView3<f32>,
    theta: ArrayView1<f32>,
    chunk_size: usize,
    params: &P,
    routine: &R,
    progress: Option<&dyn Progress>,
) -> Result<Array3<f32>>
where
    P: ?Sized,
    R: Reconstruct<P> + ?Sized,
{
    let (_, len, width) = projections.dim();
    let plan = ChunkPlan::new(len, chunk_size)?;
    check_inputs(&projections, &theta)?;
    log::info!("Reconstructing {}...", plan);
    let now = Instant::now();
    let mut volume = Array3::<f32>::zeros((len, len, width));
    let n_chunk = plan.n_chunk();
    for (k, range) in plan.ranges().enumerate() {
        let slab = reconstruct_chunk(&projections, &theta, range.clone(), params, routine)?;
        volume.slice_mut(s![range, .., ..]).assign(&slab);
        let step = Step {
            item: k,
            completed: k + 1,
            total: n_chunk,
        };
        log::debug!("chunk #{k} done ({:.0}%)", 100. * step.fraction());
        if let Some(progress) = progress {
            progress.step(step);
        }
    }
    log::info!("... reconstructed in {:}s", now.elapsed().as_secs());
    Ok(volume)
}

/// Parallel version of [reconstruct_chunked]
///
/// Chunks are reconstructed on the rayon thread pool, each one writing to
/// its own rows of the volume.
pub fn reconstruct_chunked_par<P, R>(
    projections: ArrayView3<f32>,
    theta: ArrayView1<f32>,
    chunk_size: usize,
    params: &P,
    routine: &R,
    progress: Option<&dyn Progress>,
) -> Result<Array3<f32>>
where
    P: Sync + ?Sized,
    R: Reconstruct<P> + Sync + ?Sized,
{
    let (_, len, width) = projections.dim();
    let plan = ChunkPlan::new(len, chunk_size)?;
    check_inputs(&projections, &theta)?;
    log::info!(
        "Reconstructing {} on {} threads...",
        plan,
        rayon::current_num_threads()
    );
    let now = Instant::now();
    let mut volume = Array3::<f32>::zeros((len, len, width));
    let n_chunk = plan.n_chunk();
    let completed = AtomicUsize::new(0);
    let slabs: Vec<_> = volume
        .axis_chunks_iter_mut(Axis(0), plan.chunk_size())
        .zip(plan.ranges())
        .enumerate()
        .collect();
    slabs
        .into_par_iter()
        .try_for_each(|(k, (mut out, range))| -> Result<()> {
            let slab = reconstruct_chunk(&projections, &theta, range, params, routine)?;
            out.assign(&slab);
            let step = Step {
                item: k,
                completed: completed.fetch_add(1, Ordering::Relaxed) + 1,
                total: n_chunk,
            };
            log::debug!("chunk #{k} done ({:.0}%)", 100. * step.fraction());
            if let Some(progress) = progress {
                progress.step(step);
            }
            Ok(())
        })?;
    log::info!("... reconstructed in {:}s", now.elapsed().as_secs());
    Ok(volume)
}
