//! # tomo-prep
//!
//! Preparation of synchrotron tomography projections for reconstruction.
//!
//! A scan is made of projections, flat-fields (beam without sample) and
//! dark-fields (no beam). The preparation
//!  1. matches every projection with the flat-field that best removes the
//!     beam structure from it ([match_flats]),
//!  2. normalizes the projections with their flat-field and the mean
//!     dark-field ([normalize]),
//!  3. hands the normalized projections over to a reconstruction routine,
//!     chunk by chunk along the slice axis, and reassembles the reconstructed
//!     volume ([reconstruct_chunked]).
//!
//! The frames can be binned beforehand with [bin_avg].
//!
//! The reconstruction routine is provided by the caller as an implementation
//! of [Reconstruct], and progress is reported to an optional [Progress]
//! observer.

pub mod binning;
pub mod chunk;
pub mod error;
pub mod flat_match;
pub mod normalize;
pub mod npy;
pub mod pipeline;
pub mod progress;
pub mod reconstruct;
pub mod stack;

pub use binning::{bin_avg, bin_avg_2d, bin_avg_3d};
pub use chunk::{chunk_ranges, ChunkPlan};
pub use error::{Error, Result};
pub use flat_match::{match_flats, match_flats_par, FlatMatches};
pub use normalize::{normalize, normalize_in_place, normalize_into, DENOMINATOR_FLOOR};
pub use pipeline::{Prepared, Preprocessor};
pub use progress::{Progress, Step};
pub use reconstruct::{
    from_fn, reconstruct_chunked, reconstruct_chunked_par, Reconstruct, RoutineError,
};
pub use stack::{FrameInfo, FrameLog, FrameReader, ImageType, NpyDirReader, RawStack, StackIoError};
