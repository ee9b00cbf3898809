//! Raw projection, flat-field and dark-field stacks
//!
//! The frames of a scan are described by a [FrameLog]: an ordered map from
//! image number to the frame name, type and angle. [RawStack::assemble] reads
//! the frames with a [FrameReader] and sorts them into the three stacks.
//!
//! A frame log can be loaded from a CSV manifest with the columns
//! `imagenumber,imagename,imagetype,imageangle`; angles are in degrees and a
//! `nan` or empty angle means the frame has no angle.

use crate::{
    error::{Error, Result},
    npy,
    progress::{Progress, Step},
};
use ndarray::{Array1, Array2, Array3};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::Read,
    ops::Deref,
    path::{Path, PathBuf},
    time::Instant,
};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

#[derive(thiserror::Error, Debug)]
pub enum StackIoError {
    #[error("Failed to open the file")]
    Io(#[from] std::io::Error),
    #[error("Failed to deserialize the CSV file")]
    Csv(#[from] csv::Error),
    #[error("Failed to read frame {name}")]
    Frame {
        name: String,
        #[source]
        source: Box<StackIoError>,
    },
    #[error("Unexpected array layout in {path:?}: {reason}")]
    Layout { path: PathBuf, reason: String },
}

/// Frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Display, EnumIter)]
pub enum ImageType {
    #[serde(rename = "img")]
    #[strum(serialize = "img")]
    Projection,
    #[serde(rename = "ref")]
    #[strum(serialize = "ref")]
    Flat,
    #[serde(rename = "dark")]
    #[strum(serialize = "dark")]
    Dark,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub image_name: String,
    pub image_type: ImageType,
    /// rotation angle [degree]
    pub angle: Option<f64>,
}
impl FrameInfo {
    pub fn new<S: Into<String>>(image_name: S, image_type: ImageType, angle: Option<f64>) -> Self {
        Self {
            image_name: image_name.into(),
            image_type,
            angle: angle.filter(|a| !a.is_nan()),
        }
    }
    /// Rotation angle [rd]
    pub fn radians(&self) -> Option<f32> {
        self.angle.map(|a| a.to_radians() as f32)
    }
}

#[derive(Deserialize, Debug)]
struct Record {
    #[serde(rename = "imagenumber")]
    image_number: u32,
    #[serde(rename = "imagename")]
    image_name: String,
    #[serde(rename = "imagetype")]
    image_type: ImageType,
    #[serde(rename = "imageangle", deserialize_with = "csv::invalid_option")]
    angle: Option<f64>,
}

/// Frames of a scan ordered by image number
#[derive(Debug, Default, Clone)]
pub struct FrameLog(BTreeMap<u32, FrameInfo>);
impl Deref for FrameLog {
    type Target = BTreeMap<u32, FrameInfo>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl FromIterator<(u32, FrameInfo)> for FrameLog {
    fn from_iter<I: IntoIterator<Item = (u32, FrameInfo)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Frames of a [FrameLog] sorted by type
#[derive(Debug, Default)]
pub struct Partition<'a> {
    pub projections: Vec<&'a FrameInfo>,
    pub flats: Vec<&'a FrameInfo>,
    pub darks: Vec<&'a FrameInfo>,
}

impl FrameLog {
    /// Loads the frame log from a CSV manifest
    pub fn from_csv<P: AsRef<Path>>(path: P) -> std::result::Result<Self, StackIoError> {
        let file = File::open(path.as_ref())?;
        log::info!("Loading {:?}...", path.as_ref());
        Self::from_reader(file)
    }
    /// Loads the frame log from CSV content
    pub fn from_reader<R: Read>(reader: R) -> std::result::Result<Self, StackIoError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut this = Self::default();
        for result in rdr.deserialize() {
            let record: Record = result?;
            this.0.insert(
                record.image_number,
                FrameInfo::new(record.image_name, record.image_type, record.angle),
            );
        }
        Ok(this)
    }
    /// Sorts the frames by type, in image number order
    ///
    /// Projections without a rotation angle are discarded.
    pub fn partition(&self) -> Partition<'_> {
        let mut partition = Partition::default();
        for frame in self.0.values() {
            match frame.image_type {
                ImageType::Projection if frame.angle.is_some() => {
                    partition.projections.push(frame)
                }
                ImageType::Projection => {
                    log::debug!("skipping projection {} without angle", frame.image_name)
                }
                ImageType::Flat => partition.flats.push(frame),
                ImageType::Dark => partition.darks.push(frame),
            }
        }
        partition
    }
    /// Number of frames of a given type
    pub fn count(&self, image_type: ImageType) -> usize {
        self.0
            .values()
            .filter(|frame| frame.image_type == image_type)
            .count()
    }
}

/// Source of raw frames
pub trait FrameReader {
    fn read(&self, image_name: &str) -> std::result::Result<Array2<u16>, StackIoError>;
}

/// Reads each frame from a `.npy` file in a directory
///
/// The extension of the image name is replaced by `npy`.
#[derive(Debug, Clone)]
pub struct NpyDirReader {
    root: PathBuf,
}
impl NpyDirReader {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
    pub fn path(&self, image_name: &str) -> PathBuf {
        self.root.join(image_name).with_extension("npy")
    }
}
impl FrameReader for NpyDirReader {
    fn read(&self, image_name: &str) -> std::result::Result<Array2<u16>, StackIoError> {
        npy::read_array(self.path(image_name)).map_err(|source| StackIoError::Frame {
            name: image_name.to_string(),
            source: Box::new(source),
        })
    }
}

/// Raw projections, flat-fields and dark-fields of a scan
#[derive(Debug, Clone)]
pub struct RawStack {
    pub projections: Array3<u16>,
    pub flats: Array3<u16>,
    pub darks: Array3<u16>,
    /// projection angles [rd]
    pub theta: Array1<f32>,
}

/// Stacks frames of the same shape along a new first axis
fn stack_frames(
    what: &str,
    frames: Vec<(&FrameInfo, Array2<u16>)>,
    shape: (usize, usize),
) -> Result<Array3<u16>> {
    let (rows, cols) = shape;
    let mut data = Vec::with_capacity(frames.len() * rows * cols);
    for (frame, image) in &frames {
        if image.dim() != shape {
            return Err(Error::shape(
                format!("{what} frame {}", frame.image_name),
                &[rows, cols],
                image.shape(),
            ));
        }
        data.extend(image.iter().copied());
    }
    Array3::from_shape_vec((frames.len(), rows, cols), data)
        .map_err(|e| Error::invalid(format!("cannot stack {what} frames: {e}")))
}

/// Reads frames in order, counting them into `completed`
fn read_frames<'a, R>(
    frames: &[&'a FrameInfo],
    reader: &R,
    progress: Option<&dyn Progress>,
    completed: &mut usize,
    total: usize,
) -> Result<Vec<(&'a FrameInfo, Array2<u16>)>>
where
    R: FrameReader + ?Sized,
{
    let mut images = Vec::with_capacity(frames.len());
    for &frame in frames {
        let image = reader.read(&frame.image_name)?;
        log::debug!("read frame {} {:?}", frame.image_name, image.dim());
        if let Some(progress) = progress {
            progress.step(Step {
                item: *completed,
                completed: *completed + 1,
                total,
            });
        }
        *completed += 1;
        images.push((frame, image));
    }
    Ok(images)
}

impl RawStack {
    /// Reads the frames of the log and sorts them into stacks
    ///
    /// The optional `progress` observer is notified after each frame is read.
    pub fn assemble<R>(
        frame_log: &FrameLog,
        reader: &R,
        progress: Option<&dyn Progress>,
    ) -> Result<Self>
    where
        R: FrameReader + ?Sized,
    {
        let partition = frame_log.partition();
        let total = partition.projections.len() + partition.flats.len() + partition.darks.len();
        log::info!(
            "Reading {} projections, {} flat-fields and {} dark-fields...",
            partition.projections.len(),
            partition.flats.len(),
            partition.darks.len()
        );
        let now = Instant::now();
        let mut completed = 0;
        let projections = read_frames(
            &partition.projections,
            reader,
            progress,
            &mut completed,
            total,
        )?;
        let flats = read_frames(&partition.flats, reader, progress, &mut completed, total)?;
        let darks = read_frames(&partition.darks, reader, progress, &mut completed, total)?;
        let shape = projections
            .iter()
            .chain(flats.iter())
            .chain(darks.iter())
            .next()
            .map_or((0, 0), |(_, image)| image.dim());
        let theta: Array1<f32> = projections
            .iter()
            .filter_map(|(frame, _)| frame.radians())
            .collect();
        let this = Self {
            projections: stack_frames("projection", projections, shape)?,
            flats: stack_frames("flat-field", flats, shape)?,
            darks: stack_frames("dark-field", darks, shape)?,
            theta,
        };
        log::info!("... read in {:}s", now.elapsed().as_secs());
        Ok(this)
    }
    /// Frame shape `(rows, columns)`
    pub fn frame_shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.projections.dim();
        (rows, cols)
    }
}
impl fmt::Display for RawStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (rows, cols) = self.frame_shape();
        writeln!(f, "RAW STACK ({rows}x{cols} frames):")?;
        for image_type in ImageType::iter() {
            let n = match image_type {
                ImageType::Projection => self.projections.len_of(ndarray::Axis(0)),
                ImageType::Flat => self.flats.len_of(ndarray::Axis(0)),
                ImageType::Dark => self.darks.len_of(ndarray::Axis(0)),
            };
            writeln!(f, " - # of {image_type:>4} frames: {n}")?;
        }
        if let (Some(first), Some(last)) = (self.theta.iter().next(), self.theta.iter().next_back()) {
            write!(
                f,
                " - angle range: [{:8.3}-{:8.3}]degree",
                first.to_degrees(),
                last.to_degrees()
            )?;
        }
        Ok(())
    }
}
