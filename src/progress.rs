//! Progress observers
//!
//! The library never writes progress to the terminal, it reports each
//! completed unit of work (a frame read, a projection matched, a chunk
//! reconstructed) to an optional observer instead.

use indicatif::ProgressBar;

/// A completed unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// index of the item that was just completed
    pub item: usize,
    /// number of items completed so far, including this one
    pub completed: usize,
    /// total number of items
    pub total: usize,
}
impl Step {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1f64
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Receives a [Step] after each completed unit of work
///
/// Observers may be called from several worker threads at once.
pub trait Progress: Sync {
    fn step(&self, step: Step);
}
impl<F> Progress for F
where
    F: Fn(Step) + Sync,
{
    fn step(&self, step: Step) {
        self(step)
    }
}
impl Progress for ProgressBar {
    fn step(&self, step: Step) {
        if self.length() != Some(step.total as u64) {
            self.set_length(step.total as u64);
        }
        self.inc(1);
    }
}
