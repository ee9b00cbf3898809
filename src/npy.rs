//! Numpy `.npy` array files

use crate::stack::StackIoError;
use ndarray::{Array, ArrayBase, Data, Dimension, IxDyn};
use npyz::WriterBuilder;
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

/// Loads a C-ordered array of a given dimension from a `.npy` file
pub fn read_array<T, D, P>(path: P) -> Result<Array<T, D>, StackIoError>
where
    T: npyz::Deserialize,
    D: Dimension,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let layout = |reason: String| StackIoError::Layout {
        path: path.to_path_buf(),
        reason,
    };
    let npy = npyz::NpyFile::new(BufReader::new(File::open(path)?))?;
    if !matches!(npy.order(), npyz::Order::C) {
        return Err(layout("Fortran-ordered arrays are not supported".into()));
    }
    let shape: Vec<usize> = npy.shape().iter().map(|&n| n as usize).collect();
    let data: Vec<T> = npy.into_vec()?;
    Array::from_shape_vec(IxDyn(&shape), data)
        .map_err(|e| layout(e.to_string()))?
        .into_dimensionality::<D>()
        .map_err(|e| layout(format!("{e}: found shape {shape:?}")))
}

/// Writes an array into a C-ordered `.npy` file
pub fn write_array<T, S, D, P>(path: P, array: &ArrayBase<S, D>) -> Result<(), StackIoError>
where
    T: npyz::AutoSerialize + Copy,
    S: Data<Elem = T>,
    D: Dimension,
    P: AsRef<Path>,
{
    let shape: Vec<u64> = array.shape().iter().map(|&n| n as u64).collect();
    let file = BufWriter::new(File::create(path.as_ref())?);
    let mut writer = npyz::WriteOptions::new()
        .default_dtype()
        .shape(&shape)
        .writer(file)
        .begin_nd()?;
    writer.extend(array.iter().copied())?;
    writer.finish()?;
    log::info!("{:?} written ({:?})", path.as_ref(), array.shape());
    Ok(())
}
