//! Export matrices to Python as NumPy arrays.
//!
//! The exported array aliases the matrix pixels. A [`MatCapsule`] holding a
//! clone of the matrix header is stored as the array's `base` object, so the
//! pixel buffer stays alive until NumPy drops the last reference to it.

use crate::dtype::{depth_to_dtype, DtypeCode};
use crate::error::{BridgeError, Result};
use crate::layout::{native_to_shape, native_to_strides, ArrayLayout};
use crate::mat::{Element, Mat, MatLike};
use numpy::npyffi::{self, npy_intp, NPY_ARRAY_WRITEABLE, PY_ARRAY_API};
use numpy::{PyArrayDescr, PyArrayDescrMethods, PyUntypedArray};
use pyo3::prelude::*;
use pyo3::types::PyCapsule;
use std::ffi::{c_int, c_void, CStr};
use tracing::{debug, trace};

/// Name of the capsule used as the `base` of exported arrays.
pub const MAT_CAPSULE_NAME: &CStr = c"pyo3_cvmat.Mat";

/// A lock that must be dropped before native resources are released.
///
/// Releasing is two-phase: detach from the lock, then free the buffer while
/// detached.
pub trait InterpreterLock {
    /// Run `f` with the lock released.
    fn detach<F>(&self, f: F)
    where
        F: FnOnce() + Send;
}

/// No lock to release; `f` runs directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInterpreterLock;

impl InterpreterLock for NoInterpreterLock {
    fn detach<F>(&self, f: F)
    where
        F: FnOnce() + Send,
    {
        f()
    }
}

/// The Python global interpreter lock.
#[derive(Clone, Copy)]
pub struct Gil<'py>(pub Python<'py>);

impl InterpreterLock for Gil<'_> {
    fn detach<F>(&self, f: F)
    where
        F: FnOnce() + Send,
    {
        self.0.detach(f)
    }
}

/// Keeps a matrix's pixel buffer alive on behalf of an external array.
///
/// Holds its own header clone, so the caller's [`Mat`] can go out of scope
/// right after export.
pub struct MatCapsule {
    mat: Mat,
}

impl MatCapsule {
    pub fn new(mat: &Mat) -> Self {
        Self { mat: mat.clone() }
    }

    /// The kept-alive matrix.
    pub fn mat(&self) -> &Mat {
        &self.mat
    }

    /// Drop the buffer reference after detaching from `lock`.
    pub fn release<L: InterpreterLock + ?Sized>(self, lock: &L) {
        let mat = self.mat;
        lock.detach(move || {
            trace!(rows = mat.rows(), cols = mat.cols(), refs = mat.ref_count(), "releasing exported mat");
            drop(mat);
        });
    }
}

/// A matrix described as an external array.
///
/// Produced by [`to_external`]; it owns a [`MatCapsule`], so the data pointer
/// stays valid for as long as this value (or the NumPy array built from it)
/// lives.
pub struct ExternalArray {
    dtype: DtypeCode,
    shape: Vec<usize>,
    strides: Vec<isize>,
    data: *mut u8,
    owner: MatCapsule,
}

// Safety: `data` points into the buffer kept alive by `owner`, which is Send.
unsafe impl Send for ExternalArray {}

impl ExternalArray {
    pub fn dtype(&self) -> DtypeCode {
        self.dtype
    }

    pub fn owner(&self) -> &MatCapsule {
        &self.owner
    }

    /// Read one element at `index` (one entry per axis).
    pub fn element<T: Element>(&self, index: &[usize]) -> Result<T> {
        let depth = crate::dtype::dtype_to_depth(self.dtype)?;
        if T::DEPTH != depth {
            return Err(BridgeError::DepthMismatch {
                requested: T::DEPTH,
                actual: depth,
            });
        }
        let in_bounds = index.len() == self.shape.len()
            && index.iter().zip(&self.shape).all(|(&i, &extent)| i < extent);
        if !in_bounds {
            return Err(BridgeError::OutOfBounds {
                row: index.first().copied().unwrap_or(0),
                col: index.get(1).copied().unwrap_or(0),
                rows: self.shape[0],
                cols: self.shape[1],
            });
        }
        let offset: isize = index
            .iter()
            .zip(&self.strides)
            .map(|(&i, &stride)| i as isize * stride)
            .sum();
        // SAFETY: index is in bounds and `owner` keeps the buffer alive.
        Ok(unsafe { std::ptr::read_unaligned(self.data.offset(offset).cast::<T>()) })
    }

    /// Give up the array, releasing the buffer reference after detaching from `lock`.
    pub fn release<L: InterpreterLock + ?Sized>(self, lock: &L) {
        self.owner.release(lock)
    }

    /// Build a NumPy array aliasing the matrix pixels.
    ///
    /// The array's `base` is a capsule owning the [`MatCapsule`]; when NumPy
    /// collects it the buffer reference is released with the GIL detached.
    pub fn into_pyarray<'py>(self, py: Python<'py>) -> PyResult<Bound<'py, PyUntypedArray>> {
        let Self {
            dtype,
            shape,
            strides,
            data,
            owner,
        } = self;

        let descr = dtype.to_descr(py);
        let mut dims: Vec<npy_intp> = shape.iter().map(|&d| d as npy_intp).collect();
        let mut strides: Vec<npy_intp> = strides.iter().map(|&s| s as npy_intp).collect();

        let capsule = PyCapsule::new_with_destructor(
            py,
            owner,
            Some(MAT_CAPSULE_NAME.to_owned()),
            |owner: MatCapsule, _ctx: *mut c_void| {
                Python::attach(|py| owner.release(&Gil(py)));
            },
        )?;

        // SAFETY: dims and strides outlive the call, `data` stays valid while
        // the capsule (installed as the array base below) is alive.
        unsafe {
            let subtype = PY_ARRAY_API.get_type_object(py, npyffi::NpyTypes::PyArray_Type);
            let ptr = PY_ARRAY_API.PyArray_NewFromDescr(
                py,
                subtype,
                descr.into_dtype_ptr(),
                dims.len() as c_int,
                dims.as_mut_ptr(),
                strides.as_mut_ptr(),
                data.cast::<c_void>(),
                NPY_ARRAY_WRITEABLE,
                std::ptr::null_mut(),
            );
            if ptr.is_null() {
                return Err(PyErr::fetch(py));
            }
            let array = Bound::from_owned_ptr(py, ptr);

            // Steals the capsule reference, also on failure.
            if PY_ARRAY_API.PyArray_SetBaseObject(py, ptr.cast::<npyffi::PyArrayObject>(), capsule.into_ptr()) < 0 {
                return Err(PyErr::fetch(py));
            }
            Ok(array.cast_into::<PyUntypedArray>()?)
        }
    }
}

// SAFETY: shape and strides come from the matrix header, and `owner` keeps
// the buffer behind `data` alive for as long as `self`.
unsafe impl ArrayLayout for ExternalArray {
    fn dtype_char(&self) -> char {
        self.dtype.as_char()
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn strides(&self) -> &[isize] {
        &self.strides
    }

    fn itemsize(&self) -> usize {
        self.dtype.itemsize()
    }

    fn data_ptr(&self) -> *mut u8 {
        self.data
    }
}

impl std::fmt::Debug for ExternalArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalArray")
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("data", &self.data)
            .finish()
    }
}

/// Describe a matrix as an external array without copying pixels.
///
/// Fails only if the matrix depth has no array counterpart.
pub fn to_external(mat: &Mat) -> Result<ExternalArray> {
    let dtype = depth_to_dtype(mat.depth())?;
    let shape = native_to_shape(mat);
    let strides = native_to_strides(mat);
    let owner = MatCapsule::new(mat);
    let data = owner.mat().data_ptr().cast_mut();
    debug!(?shape, ?strides, %dtype, "exporting mat");
    Ok(ExternalArray {
        dtype,
        shape,
        strides,
        data,
        owner,
    })
}

/// Export a matrix to Python as a zero-copy NumPy array.
pub fn mat_to_pyarray<'py>(py: Python<'py>, mat: &Mat) -> PyResult<Bound<'py, PyUntypedArray>> {
    to_external(mat)?.into_pyarray(py)
}

impl DtypeCode {
    /// The NumPy dtype object for this code.
    pub fn to_descr<'py>(self, py: Python<'py>) -> Bound<'py, PyArrayDescr> {
        match self {
            Self::UByte => numpy::dtype::<u8>(py),
            Self::Byte => numpy::dtype::<i8>(py),
            Self::UShort => numpy::dtype::<u16>(py),
            Self::Short => numpy::dtype::<i16>(py),
            Self::Int => numpy::dtype::<i32>(py),
            Self::Float => numpy::dtype::<f32>(py),
            Self::Double => numpy::dtype::<f64>(py),
        }
    }
}

impl<'py> IntoPyObject<'py> for Mat {
    type Target = PyUntypedArray;
    type Output = Bound<'py, PyUntypedArray>;
    type Error = PyErr;

    fn into_pyobject(self, py: Python<'py>) -> PyResult<Self::Output> {
        mat_to_pyarray(py, &self)
    }
}

impl<'py> IntoPyObject<'py> for &Mat {
    type Target = PyUntypedArray;
    type Output = Bound<'py, PyUntypedArray>;
    type Error = PyErr;

    fn into_pyobject(self, py: Python<'py>) -> PyResult<Self::Output> {
        mat_to_pyarray(py, self)
    }
}
