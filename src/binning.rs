//! Block-average binning of images and image stacks
//!
//! Binning crops the right and/or bottom edge of the input when the binning
//! factor does not divide the image size: the remainder rows and columns are
//! thrown away, never padded.

use crate::error::{Error, Result};
use ndarray::{s, Array2, Array3, ArrayD, ArrayView2, ArrayView3, ArrayViewD, Ix2, Ix3};

fn binned_len(len: usize, factor: usize, axis: usize) -> Result<usize> {
    match len / factor {
        0 => Err(Error::invalid(format!(
            "binning axis {axis} of length {len} by {factor} leaves an empty axis"
        ))),
        n => Ok(n),
    }
}

/// Mean of the `factor x factor` block at binned position `(row, col)`
fn block_mean<A>(image: &ArrayView2<A>, factor: usize, row: usize, col: usize) -> f32
where
    A: Copy + Into<f32>,
{
    let block = image.slice(s![
        row * factor..(row + 1) * factor,
        col * factor..(col + 1) * factor
    ]);
    let sum = block.iter().fold(0f64, |s, &x| {
        let x: f32 = x.into();
        s + x as f64
    });
    (sum / (factor * factor) as f64) as f32
}

/// Bins a 2D image by an integer factor
pub fn bin_avg_2d<A>(image: ArrayView2<A>, factor: usize) -> Result<Array2<f32>>
where
    A: Copy + Into<f32>,
{
    if factor == 0 {
        return Err(Error::invalid("binning factor must be positive"));
    }
    let (rows, cols) = image.dim();
    let shape = (
        binned_len(rows, factor, 0)?,
        binned_len(cols, factor, 1)?,
    );
    Ok(Array2::from_shape_fn(shape, |(r, c)| {
        block_mean(&image, factor, r, c)
    }))
}

/// Bins the 2nd and 3rd dimension of a stack of images
///
/// The first dimension is the stack axis and is left untouched.
pub fn bin_avg_3d<A>(stack: ArrayView3<A>, factor: usize) -> Result<Array3<f32>>
where
    A: Copy + Into<f32>,
{
    if factor == 0 {
        return Err(Error::invalid("binning factor must be positive"));
    }
    let (n, rows, cols) = stack.dim();
    let shape = (
        n,
        binned_len(rows, factor, 1)?,
        binned_len(cols, factor, 2)?,
    );
    let images: Vec<_> = stack.outer_iter().collect();
    Ok(Array3::from_shape_fn(shape, |(k, r, c)| {
        block_mean(&images[k], factor, r, c)
    }))
}

/// Bins either a 2D image or a 3D stack of images
pub fn bin_avg<A>(array: ArrayViewD<A>, factor: usize) -> Result<ArrayD<f32>>
where
    A: Copy + Into<f32>,
{
    match array.ndim() {
        2 => {
            let image = array
                .into_dimensionality::<Ix2>()
                .map_err(|e| Error::invalid(e.to_string()))?;
            Ok(bin_avg_2d(image, factor)?.into_dyn())
        }
        3 => {
            let stack = array
                .into_dimensionality::<Ix3>()
                .map_err(|e| Error::invalid(e.to_string()))?;
            Ok(bin_avg_3d(stack, factor)?.into_dyn())
        }
        ndim => Err(Error::invalid(format!(
            "binning expects a 2D or 3D array, got {ndim} dimensions"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    #[test]
    fn bin_2d_block_means() {
        let image = array![
            [1f32, 3., 10., 20.],
            [5., 7., 30., 40.],
            [0., 0., 2., 2.],
            [4., 4., 2., 2.]
        ];
        let binned = bin_avg_2d(image.view(), 2).unwrap();
        assert_eq!(binned, array![[4f32, 25.], [2., 2.]]);
    }

    #[test]
    fn bin_2d_drops_remainder() {
        let image = Array::from_shape_fn((5, 7), |(r, c)| (r * 7 + c) as f32);
        let binned = bin_avg_2d(image.view(), 2).unwrap();
        assert_eq!(binned.dim(), (2, 3));
        // last row and column of the input never contribute
        let expected = (0. + 1. + 7. + 8.) / 4.;
        assert_eq!(binned[[0, 0]], expected);
        let expected = (18. + 19. + 25. + 26.) / 4.;
        assert_eq!(binned[[1, 2]], expected);
    }

    #[test]
    fn bin_3d_keeps_stack_axis() {
        let stack = Array::from_shape_fn((3, 4, 6), |(k, r, c)| (k * 100 + r * 6 + c) as u16);
        let binned = bin_avg_3d(stack.view(), 2).unwrap();
        assert_eq!(binned.dim(), (3, 2, 3));
        for k in 0..3 {
            let image = stack.index_axis(ndarray::Axis(0), k);
            let expected = bin_avg_2d(image, 2).unwrap();
            assert_eq!(binned.index_axis(ndarray::Axis(0), k), expected);
        }
    }

    #[test]
    fn factor_one_is_identity() {
        let image = Array::from_shape_fn((3, 5), |(r, c)| (r as f32 * 0.5) - c as f32);
        assert_eq!(bin_avg_2d(image.view(), 1).unwrap(), image);
        let stack = Array::from_shape_fn((2, 3, 5), |(k, r, c)| (k + r * c) as f32);
        assert_eq!(bin_avg_3d(stack.view(), 1).unwrap(), stack);
    }

    #[test]
    fn zero_factor_is_invalid() {
        let image = Array2::<f32>::zeros((4, 4));
        assert!(matches!(
            bin_avg_2d(image.view(), 0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            bin_avg(image.view().into_dyn(), 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn factor_larger_than_image_is_invalid() {
        let image = Array2::<u16>::zeros((3, 8));
        assert!(matches!(
            bin_avg_2d(image.view(), 4),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn dynamic_dispatch() {
        let stack = Array::from_shape_fn((2, 4, 4), |(k, r, c)| (k + r + c) as f32).into_dyn();
        assert_eq!(bin_avg(stack.view(), 2).unwrap().shape(), &[2, 2, 2]);
        let line = Array::from_elem(8, 1f32).into_dyn();
        assert!(matches!(
            bin_avg(line.view(), 2),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn binning_is_pure() {
        let image = Array::from_shape_fn((6, 6), |(r, c)| ((r * 13 + c * 7) % 11) as f32);
        let first = bin_avg_2d(image.view(), 3).unwrap();
        let second = bin_avg_2d(image.view(), 3).unwrap();
        assert_eq!(first, second);
    }
}
