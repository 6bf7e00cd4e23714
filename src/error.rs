//! Error type shared by both conversion directions.

use crate::dtype::ElementDepth;
use pyo3::exceptions::{PyTypeError, PyValueError};
use pyo3::PyErr;
use thiserror::Error;

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("numpy does not support this OpenCV depth: {0:?}")]
    UnsupportedDepth(ElementDepth),

    #[error("OpenCV does not support this numpy format: '{0}'")]
    UnsupportedDtype(char),

    #[error("numpy format '{0}' is not in native byte order; use arr.astype(arr.dtype.newbyteorder('=')) first")]
    NonNativeByteOrder(char),

    #[error("array must have two or three dimensions, got {ndim}")]
    InvalidDimensions { ndim: usize },

    #[error("channel count must be between 1 and 512, got {channels}")]
    InvalidChannels { channels: usize },

    #[error(
        "only contiguous numpy arrays are supported; \
         use np.ascontiguousarray() to make a packed copy first"
    )]
    NonContiguousArray,

    #[error("row step of {step} bytes is smaller than a packed row of {min} bytes")]
    InvalidStep { step: usize, min: usize },

    #[error("element type {requested:?} does not match matrix depth {actual:?}")]
    DepthMismatch {
        requested: ElementDepth,
        actual: ElementDepth,
    },

    #[error("index ({row}, {col}) is outside a {rows}x{cols} matrix")]
    OutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("pixel data of {len} values does not match the {expected} values of the matrix")]
    SizeMismatch { len: usize, expected: usize },

    #[error("pixel data is not aligned for {0:?} elements")]
    MisalignedData(ElementDepth),
}

impl From<BridgeError> for PyErr {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::DepthMismatch { .. } => PyTypeError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}
