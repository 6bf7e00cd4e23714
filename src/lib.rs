//! # pyo3-cvmat
//!
//! Zero-copy views between OpenCV-style matrices and NumPy arrays for PyO3.
//!
//! A [`Mat`] is a row-major, strided pixel buffer with an element depth and
//! interleaved channels. NumPy sees the same memory as a 2-axis array
//! (`[rows, cols]`) for single-channel matrices, or a 3-axis array
//! (`[rows, cols, channels]`) otherwise.
//!
//! ## Features
//!
//! - **Zero-copy**: pixels are shared in both directions
//! - **Safe lifetimes**: exported arrays keep the pixel buffer alive through a
//!   capsule; imported views borrow the array
//! - **GIL-aware release**: the buffer reference is dropped with the GIL detached
//!
//! ## Example: Exporting a matrix
//!
//! ```ignore
//! use pyo3::prelude::*;
//! use pyo3_cvmat::{ElementDepth, Mat, MatType};
//!
//! #[pyfunction]
//! fn grab_frame() -> PyResult<Mat> {
//!     let ty = MatType::new(ElementDepth::U8, 3)?;
//!     Ok(Mat::new(480, 640, ty))
//! }
//! ```
//!
//! ## Example: Viewing a NumPy array
//!
//! ```ignore
//! use numpy::PyUntypedArray;
//! use pyo3::prelude::*;
//! use pyo3_cvmat::{pyarray_as_mat, MatLike};
//!
//! #[pyfunction]
//! fn put_frame(image: &Bound<'_, PyUntypedArray>) -> PyResult<(usize, usize)> {
//!     let view = pyarray_as_mat(image)?;
//!     Ok((view.cols(), view.rows()))
//! }
//! ```

mod dtype;
mod error;
mod export;
mod import;
mod layout;
mod mat;

// Re-export public API
pub use dtype::{
    depth_to_dtype, dtype_char_to_depth, dtype_to_depth, validate_type_table, DtypeCode,
    ElementDepth, MatType, TypeSynonym, MAX_CHANNELS, TYPE_SYNONYMS,
};
pub use error::{BridgeError, Result};
pub use export::{
    mat_to_pyarray, to_external, ExternalArray, Gil, InterpreterLock, MatCapsule,
    NoInterpreterLock, MAT_CAPSULE_NAME,
};
pub use import::{pyarray_as_mat, pyarray_to_mat, to_native, NumpyLayout};
pub use layout::{
    array_to_cv_type, array_to_size, is_contiguous, native_to_shape, native_to_strides,
    ArrayDescriptor, ArrayLayout,
};
pub use mat::{Element, Mat, MatHeader, MatLike, MatView, BUFFER_ALIGN};
