use crate::stack::StackIoError;

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("shape mismatch for {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("reconstruction routine failed on slices [{start}, {end})")]
    ExternalRoutineFailure {
        start: usize,
        end: usize,
        #[source]
        source: BoxedError,
    },
    #[error("Error in the `stack` module")]
    Stack(#[from] StackIoError),
}
impl Error {
    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }
    pub(crate) fn shape<S: Into<String>>(what: S, expected: &[usize], found: &[usize]) -> Self {
        Error::ShapeMismatch {
            what: what.into(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Checks that two stacks share the same per-image (row, column) shape
pub(crate) fn check_image_shape(what: &str, expected: &[usize], found: &[usize]) -> Result<()> {
    if expected[1..] != found[1..] {
        Err(Error::shape(what, &expected[1..], &found[1..]))
    } else {
        Ok(())
    }
}
