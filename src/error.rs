use thiserror::Error;

/// Errors produced while rendering a tree into a mesh or a set of
/// contours.
#[derive(Error, Debug)]
pub enum Error {
    /// The caller supplied a [`crate::Region`] that cannot be tessellated:
    /// a non-positive resolution or an axis with `lower > upper`.
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// The evaluator returned a value that could not be used (e.g. a
    /// zero-width interval collapsed onto a NaN, or a batch evaluation
    /// returned a result of the wrong length). Rendering is aborted and
    /// every cell constructed so far is dropped.
    #[error("evaluator failed: {0}")]
    EvaluatorFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
