//! Errors raised by model construction, data validation and training.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported image size {0}, expected one of 64, 128, 256 or 512")]
    UnsupportedImageSize(i64),

    #[error("discriminator depth {repeat_num} does not fit image size {image_size}")]
    UnsupportedDepth { image_size: i64, repeat_num: i64 },

    #[error("side signal has {got} channels, expected {expected}")]
    SideSignalLength { expected: i64, got: i64 },

    #[error("shape mismatch in {context}: {lhs:?} vs {rhs:?}")]
    ShapeMismatch { context: &'static str, lhs: Vec<i64>, rhs: Vec<i64> },

    #[error("sample {index} has no non-zero embedding rows")]
    EmptySample { index: usize },

    #[error("non-finite {name} loss ({value}) at epoch {epoch}, step {step}")]
    NonFiniteLoss { name: &'static str, value: f64, epoch: usize, step: usize },

    #[error("no gradient was computed for parameter {0}")]
    MissingGradient(String),

    #[error("checkpoint is missing parameter {0}")]
    MissingParameter(String),
}

/// Fails with [`Error::ShapeMismatch`] unless both tensors have the same size.
pub(crate) fn check_same_size(
    context: &'static str,
    lhs: &tch::Tensor,
    rhs: &tch::Tensor,
) -> Result<(), Error> {
    let (lhs, rhs) = (lhs.size(), rhs.size());
    if lhs != rhs {
        return Err(Error::ShapeMismatch { context, lhs, rhs });
    }
    Ok(())
}
