//! Flat and dark field normalization
//!
//! A projection is normalized with its matched flat-field and the mean
//! dark-field as `(projection - dark) / max(flat - dark, 1e-6)`, then
//! optionally clipped from above.

use crate::error::{check_image_shape, Error, Result};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, ArrayViewMut2, ArrayViewMut3, Axis, Zip};
use rayon::prelude::*;
use std::time::Instant;

/// Smallest value a normalization denominator is allowed to take
pub const DENOMINATOR_FLOOR: f32 = 1e-6;

/// Elementwise mean of the dark-field stack
pub fn mean_dark<A>(darks: ArrayView3<A>) -> Result<Array2<f32>>
where
    A: Copy + Into<f32>,
{
    let (n, rows, cols) = darks.dim();
    if n == 0 {
        return Err(Error::invalid("the dark-field stack is empty"));
    }
    let mut mean = Array2::<f32>::zeros((rows, cols));
    for dark in darks.outer_iter() {
        Zip::from(&mut mean).and(&dark).for_each(|m, &d| *m += d.into());
    }
    mean /= n as f32;
    Ok(mean)
}

/// Dark-subtracted flat-fields, floored at [DENOMINATOR_FLOOR]
fn denominators<B>(flats: ArrayView3<B>, dark: &Array2<f32>) -> Vec<Array2<f32>>
where
    B: Copy + Into<f32>,
{
    flats
        .outer_iter()
        .map(|flat| {
            Zip::from(&flat).and(dark).map_collect(|&f, &d| {
                let f: f32 = f.into();
                (f - d).max(DENOMINATOR_FLOOR)
            })
        })
        .collect()
}

fn clip(value: f32, cutoff: Option<f32>) -> f32 {
    match cutoff {
        Some(cutoff) if value > cutoff => cutoff,
        _ => value,
    }
}

fn check_inputs(
    proj_shape: &[usize],
    flat_shape: &[usize],
    dark_shape: &[usize],
    matches: &[usize],
) -> Result<()> {
    check_image_shape("flat-field frames", proj_shape, flat_shape)?;
    check_image_shape("dark-field frames", proj_shape, dark_shape)?;
    if matches.len() != proj_shape[0] {
        return Err(Error::shape(
            "flat matches",
            &proj_shape[..1],
            &[matches.len()],
        ));
    }
    if let Some((i, &j)) = matches.iter().enumerate().find(|&(_, &j)| j >= flat_shape[0]) {
        return Err(Error::invalid(format!(
            "projection #{i} is matched to flat #{j} but there are only {} flats",
            flat_shape[0]
        )));
    }
    Ok(())
}

fn normalize_projection<A>(
    mut out: ArrayViewMut2<f32>,
    projection: ArrayView2<A>,
    denom: &Array2<f32>,
    dark: &Array2<f32>,
    cutoff: Option<f32>,
) where
    A: Copy + Into<f32>,
{
    Zip::from(&mut out)
        .and(&projection)
        .and(denom)
        .and(dark)
        .for_each(|o, &p, &q, &d| {
            let p: f32 = p.into();
            *o = clip((p - d) / q, cutoff);
        });
}

/// Normalizes the projections into a new array
///
/// `matches[i]` is the index of the flat-field used for projection `i`, and
/// `cutoff` is the permitted maximum value of the normalized data.
pub fn normalize<A, B, C>(
    projections: ArrayView3<A>,
    flats: ArrayView3<B>,
    darks: ArrayView3<C>,
    matches: &[usize],
    cutoff: Option<f32>,
) -> Result<Array3<f32>>
where
    A: Copy + Into<f32> + Sync,
    B: Copy + Into<f32>,
    C: Copy + Into<f32>,
{
    let mut out = Array3::<f32>::zeros(projections.raw_dim());
    normalize_into(projections, flats, darks, matches, cutoff, out.view_mut())?;
    Ok(out)
}

/// Normalizes the projections into a caller-supplied buffer
///
/// `out` must have the shape of `projections`.
pub fn normalize_into<A, B, C>(
    projections: ArrayView3<A>,
    flats: ArrayView3<B>,
    darks: ArrayView3<C>,
    matches: &[usize],
    cutoff: Option<f32>,
    mut out: ArrayViewMut3<f32>,
) -> Result<()>
where
    A: Copy + Into<f32> + Sync,
    B: Copy + Into<f32>,
    C: Copy + Into<f32>,
{
    check_inputs(projections.shape(), flats.shape(), darks.shape(), matches)?;
    if out.shape() != projections.shape() {
        return Err(Error::shape(
            "normalization output",
            projections.shape(),
            out.shape(),
        ));
    }
    log::info!("Normalizing {} projections...", projections.len_of(Axis(0)));
    let now = Instant::now();
    let dark = mean_dark(darks)?;
    let denoms = denominators(flats, &dark);
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(projections.axis_iter(Axis(0)).into_par_iter())
        .zip(matches.par_iter())
        .for_each(|((out, projection), &j)| {
            normalize_projection(out, projection, &denoms[j], &dark, cutoff)
        });
    log::info!("... normalized in {:}s", now.elapsed().as_secs());
    Ok(())
}

/// Normalizes a floating point projection stack in place
pub fn normalize_in_place<B, C>(
    mut projections: ArrayViewMut3<f32>,
    flats: ArrayView3<B>,
    darks: ArrayView3<C>,
    matches: &[usize],
    cutoff: Option<f32>,
) -> Result<()>
where
    B: Copy + Into<f32>,
    C: Copy + Into<f32>,
{
    check_inputs(projections.shape(), flats.shape(), darks.shape(), matches)?;
    log::info!(
        "Normalizing {} projections in place...",
        projections.len_of(Axis(0))
    );
    let now = Instant::now();
    let dark = mean_dark(darks)?;
    let denoms = denominators(flats, &dark);
    projections
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(matches.par_iter())
        .for_each(|(mut projection, &j)| {
            Zip::from(&mut projection)
                .and(&denoms[j])
                .and(&dark)
                .for_each(|p, &q, &d| *p = clip((*p - d) / q, cutoff));
        });
    log::info!("... normalized in {:}s", now.elapsed().as_secs());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    fn projections() -> Array3<u16> {
        Array::from_shape_fn((3, 4, 5), |(k, r, c)| (100 * (k + 1) + r * 5 + c) as u16)
    }

    #[test]
    fn unit_flat_and_zero_dark_is_identity() {
        let p = projections();
        let flats = Array3::<f32>::ones((2, 4, 5));
        let darks = Array3::<u16>::zeros((3, 4, 5));
        let n = normalize(p.view(), flats.view(), darks.view(), &[0, 1, 0], None).unwrap();
        assert_eq!(n, p.mapv(|x| x as f32));
    }

    #[test]
    fn mean_dark_over_stack() {
        let darks = array![[[1u16, 2], [3, 4]], [[3, 4], [5, 6]]];
        assert_eq!(
            mean_dark(darks.view()).unwrap(),
            array![[2f32, 3.], [4., 5.]]
        );
    }

    #[test]
    fn matched_flat_is_used() {
        let p = Array3::<f32>::from_elem((2, 2, 2), 12.);
        let flats = array![[[2f32, 2.], [2., 2.]], [[4., 4.], [4., 4.]]];
        let darks = Array3::<f32>::from_elem((1, 2, 2), 0.);
        let n = normalize(p.view(), flats.view(), darks.view(), &[1, 0], None).unwrap();
        assert!(n.index_axis(Axis(0), 0).iter().all(|&x| x == 3.));
        assert!(n.index_axis(Axis(0), 1).iter().all(|&x| x == 6.));
    }

    #[test]
    fn dark_is_subtracted_from_both_terms() {
        let p = Array3::<f32>::from_elem((1, 2, 2), 30.);
        let flats = Array3::<f32>::from_elem((1, 2, 2), 20.);
        let darks = array![[[8f32, 8.], [8., 8.]], [[12., 12.], [12., 12.]]];
        let n = normalize(p.view(), flats.view(), darks.view(), &[0], None).unwrap();
        assert!(n.iter().all(|&x| x == 2.));
    }

    #[test]
    fn denominator_is_floored() {
        let p = projections();
        let darks = Array3::<u16>::from_elem((2, 4, 5), 50);
        // flat #0 equals the dark, flat #1 is below it
        let flats = array![[50u16], [10]]
            .into_shape_with_order((2, 1, 1))
            .unwrap()
            .broadcast((2, 4, 5))
            .unwrap()
            .to_owned();
        let n = normalize(p.view(), flats.view(), darks.view(), &[0, 1, 0], None).unwrap();
        assert!(n.iter().all(|x| x.is_finite()));
        Zip::from(&n).and(&p).for_each(|&n, &p| {
            let bound = (p as f32 - 50.) / DENOMINATOR_FLOOR;
            assert!(n <= bound * (1. + 1e-6));
            assert_eq!(n, (p as f32 - 50.) / DENOMINATOR_FLOOR);
        });
    }

    #[test]
    fn cutoff_clips_from_above_only() {
        let p = array![[[0f32, 1.], [2., 3.]]];
        let flats = Array3::<f32>::ones((1, 2, 2));
        let darks = Array3::<f32>::from_elem((1, 2, 2), 1.5);
        let n = normalize(p.view(), flats.view(), darks.view(), &[0], Some(0.5)).unwrap();
        // denominator floored: (p - 1.5) / 1e-6
        assert_eq!(n[[0, 0, 0]], -1.5 / DENOMINATOR_FLOOR);
        assert_eq!(n[[0, 0, 1]], -0.5 / DENOMINATOR_FLOOR);
        assert_eq!(n[[0, 1, 0]], 0.5);
        assert_eq!(n[[0, 1, 1]], 0.5);

        let flats = Array3::<f32>::from_elem((1, 2, 2), 2.);
        let darks = Array3::<f32>::zeros((1, 2, 2));
        let n = normalize(p.view(), flats.view(), darks.view(), &[0], Some(1.)).unwrap();
        assert_eq!(n, array![[[0f32, 0.5], [1., 1.]]]);
    }

    #[test]
    fn zero_cutoff_still_clips() {
        let p = array![[[-1f32, 1.]]];
        let flats = Array3::<f32>::ones((1, 1, 2));
        let darks = Array3::<f32>::zeros((1, 1, 2));
        let n = normalize(p.view(), flats.view(), darks.view(), &[0], Some(0.)).unwrap();
        assert_eq!(n, array![[[-1f32, 0.]]]);
    }

    #[test]
    fn into_and_in_place_agree() {
        let p = projections();
        let flats = Array::from_shape_fn((2, 4, 5), |(k, r, c)| (60 + k * 20 + r + c) as u16);
        let darks = Array::from_shape_fn((3, 4, 5), |(k, r, _)| (k + r) as u16);
        let matches = [1, 0, 1];
        let n = normalize(p.view(), flats.view(), darks.view(), &matches, Some(3.)).unwrap();

        let mut out = Array3::<f32>::from_elem(p.raw_dim(), f32::NAN);
        normalize_into(
            p.view(),
            flats.view(),
            darks.view(),
            &matches,
            Some(3.),
            out.view_mut(),
        )
        .unwrap();
        assert_eq!(n, out);

        let mut p = p.mapv(|x| x as f32);
        normalize_in_place(p.view_mut(), flats.view(), darks.view(), &matches, Some(3.)).unwrap();
        assert_eq!(n, p);
    }

    #[test]
    fn normalization_is_pure() {
        let p = projections();
        let flats = Array::from_shape_fn((2, 4, 5), |(k, r, c)| (90 + k + r * c) as u16);
        let darks = Array3::<u16>::from_elem((2, 4, 5), 3);
        let first = normalize(p.view(), flats.view(), darks.view(), &[0, 1, 1], None).unwrap();
        let second = normalize(p.view(), flats.view(), darks.view(), &[0, 1, 1], None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn flat_shape_mismatch() {
        let p = projections();
        let flats = Array3::<f32>::ones((2, 4, 6));
        let darks = Array3::<f32>::zeros((1, 4, 5));
        match normalize(p.view(), flats.view(), darks.view(), &[0, 0, 0], None) {
            Err(Error::ShapeMismatch {
                expected, found, ..
            }) => {
                assert_eq!(expected, vec![4, 5]);
                assert_eq!(found, vec![4, 6]);
            }
            other => panic!("expected a shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn dark_shape_mismatch() {
        let p = projections();
        let flats = Array3::<f32>::ones((2, 4, 5));
        let darks = Array3::<f32>::zeros((1, 5, 5));
        assert!(matches!(
            normalize(p.view(), flats.view(), darks.view(), &[0, 0, 0], None),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn inconsistent_matches() {
        let p = projections();
        let flats = Array3::<f32>::ones((2, 4, 5));
        let darks = Array3::<f32>::zeros((1, 4, 5));
        assert!(matches!(
            normalize(p.view(), flats.view(), darks.view(), &[0, 0], None),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            normalize(p.view(), flats.view(), darks.view(), &[0, 2, 0], None),
            Err(Error::InvalidArgument(_))
        ));
        let darks = Array3::<f32>::zeros((0, 4, 5));
        assert!(matches!(
            normalize(p.view(), flats.view(), darks.view(), &[0, 0, 0], None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn output_buffer_shape_mismatch() {
        let p = projections();
        let flats = Array3::<f32>::ones((1, 4, 5));
        let darks = Array3::<f32>::zeros((1, 4, 5));
        let mut out = Array3::<f32>::zeros((2, 4, 5));
        assert!(matches!(
            normalize_into(
                p.view(),
                flats.view(),
                darks.view(),
                &[0, 0, 0],
                None,
                out.view_mut()
            ),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
