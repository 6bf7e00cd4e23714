//! View NumPy arrays as matrices.
//!
//! The resulting [`MatView`] aliases the array's buffer and borrows the array,
//! so the borrow checker keeps the view from outliving it. No reference
//! counting is involved in this direction: Python already owns the memory.

use crate::dtype::{dtype_char_to_depth, DtypeCode};
use crate::error::{BridgeError, Result};
use crate::layout::{array_to_cv_type, array_to_size, is_contiguous, ArrayLayout};
use crate::mat::{Mat, MatHeader, MatLike, MatView};
use numpy::{PyArrayDescr, PyArrayDescrMethods, PyUntypedArray, PyUntypedArrayMethods};
use pyo3::prelude::*;
use tracing::debug;

/// View a packed 2- or 3-axis array as a matrix without copying.
///
/// Arrays with no elements skip the contiguity requirement and yield a view
/// with a null data pointer.
///
/// # Errors
///
/// - [`BridgeError::NonContiguousArray`] if a non-empty array is not packed
/// - [`BridgeError::UnsupportedDtype`] if the element type has no depth
/// - [`BridgeError::InvalidDimensions`] unless the array has 2 or 3 axes
pub fn to_native<A: ArrayLayout + ?Sized>(array: &A) -> Result<MatView<'_>> {
    let is_empty = array.size() == 0;
    if !is_empty && !is_contiguous(array) {
        return Err(BridgeError::NonContiguousArray);
    }

    let depth = dtype_char_to_depth(array.dtype_char())?;
    let mat_type = array_to_cv_type(array, depth)?;
    let (width, height) = array_to_size(array)?;
    let header = MatHeader::packed(height, width, mat_type);
    let data = if is_empty {
        std::ptr::null_mut()
    } else {
        array.data_ptr()
    };
    debug!(rows = height, cols = width, channels = mat_type.channels(), dtype = %array.dtype_char(), "viewing array as mat");

    // SAFETY: the array is packed with exactly `header`'s layout, and the
    // returned view borrows the array.
    Ok(unsafe { MatView::from_raw_parts(header, data) })
}

/// [`ArrayLayout`] over a borrowed NumPy array.
pub struct NumpyLayout<'a> {
    shape: &'a [usize],
    strides: &'a [isize],
    itemsize: usize,
    dtype: char,
    data: *mut u8,
}

impl<'a> NumpyLayout<'a> {
    /// Read the layout of `array`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NonNativeByteOrder`] if the elements are byte-swapped
    /// (for example `dtype='>u2'` on a little-endian host).
    pub fn new(array: &'a Bound<'_, PyUntypedArray>) -> Result<Self> {
        let descr = array.dtype();
        let dtype = descr.char() as char;
        if descr.is_native_byteorder() == Some(false) {
            return Err(BridgeError::NonNativeByteOrder(dtype));
        }
        // SAFETY: `as_array_ptr` points to a live array object while `array` is borrowed.
        let data = unsafe { (*array.as_array_ptr()).data.cast::<u8>() };
        Ok(Self {
            shape: array.shape(),
            strides: array.strides(),
            itemsize: descr.itemsize(),
            dtype,
            data,
        })
    }
}

// SAFETY: NumPy's shape and strides describe the array's own buffer, and the
// array is borrowed for `'a`.
unsafe impl ArrayLayout for NumpyLayout<'_> {
    fn dtype_char(&self) -> char {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        self.shape
    }

    fn strides(&self) -> &[isize] {
        self.strides
    }

    fn itemsize(&self) -> usize {
        self.itemsize
    }

    fn data_ptr(&self) -> *mut u8 {
        self.data
    }
}

/// View a NumPy array as a matrix, zero-copy.
///
/// The view cannot outlive the borrowed array. Use [`pyarray_to_mat`] when
/// the pixels must be kept after that.
pub fn pyarray_as_mat<'a>(array: &'a Bound<'_, PyUntypedArray>) -> PyResult<MatView<'a>> {
    let layout = NumpyLayout::new(array)?;
    let view = to_native(&layout)?;
    // SAFETY: the layout only re-borrows `array`, which outlives `'a`.
    Ok(unsafe { MatView::from_raw_parts(*view.header(), view.data_ptr().cast_mut()) })
}

/// Copy a NumPy array into a new owning matrix.
pub fn pyarray_to_mat(array: &Bound<'_, PyUntypedArray>) -> PyResult<Mat> {
    Ok(pyarray_as_mat(array)?.to_mat())
}

impl DtypeCode {
    /// Read the type code of a NumPy dtype object.
    ///
    /// Byte-swapped dtypes are rejected.
    pub fn from_descr(descr: &Bound<'_, PyArrayDescr>) -> Result<Self> {
        let c = descr.char() as char;
        if descr.is_native_byteorder() == Some(false) {
            return Err(BridgeError::NonNativeByteOrder(c));
        }
        Self::from_char(c).ok_or(BridgeError::UnsupportedDtype(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::ElementDepth;
    use crate::export::to_external;
    use crate::layout::ArrayDescriptor;

    fn desc(data: &mut [u8], dtype: DtypeCode, shape: Vec<usize>, strides: Vec<isize>) -> ArrayDescriptor {
        let reach: isize = shape
            .iter()
            .zip(&strides)
            .map(|(&extent, &stride)| extent.saturating_sub(1) as isize * stride)
            .sum();
        assert!(shape.contains(&0) || (reach as usize) + dtype.itemsize() <= data.len());
        // SAFETY: the assert above keeps every element inside `data`, which
        // outlives each test's views.
        unsafe { ArrayDescriptor::strided(data.as_mut_ptr(), dtype, shape, strides) }
    }

    /// An int64 array, which has no matrix depth.
    struct Int64Layout {
        data: Vec<i64>,
        shape: [usize; 2],
        strides: [isize; 2],
    }

    // SAFETY: shape and strides describe `data`, which lives as long as the layout.
    unsafe impl ArrayLayout for Int64Layout {
        fn dtype_char(&self) -> char {
            'l'
        }

        fn shape(&self) -> &[usize] {
            &self.shape
        }

        fn strides(&self) -> &[isize] {
            &self.strides
        }

        fn itemsize(&self) -> usize {
            8
        }

        fn data_ptr(&self) -> *mut u8 {
            self.data.as_ptr().cast_mut().cast()
        }
    }

    // ========================================================================
    // to_native tests
    // ========================================================================

    #[test]
    fn test_to_native_single_channel() {
        let mut data = vec![1u8, 2, 3, 4, 5, 6];
        let array = desc(&mut data, DtypeCode::UByte, vec![2, 3], vec![3, 1]);
        let view = to_native(&array).unwrap();
        assert_eq!(view.rows(), 2);
        assert_eq!(view.cols(), 3);
        assert_eq!(view.channels(), 1);
        assert_eq!(view.depth(), ElementDepth::U8);
        assert_eq!(view.data_ptr(), data.as_ptr());
        assert_eq!(view.row::<u8>(1).unwrap(), &[4, 5, 6]);
    }

    #[test]
    fn test_to_native_three_channels() {
        let mut data = vec![0u8; 2 * 2 * 3 * 4];
        let array = desc(&mut data, DtypeCode::Float, vec![2, 2, 3], vec![24, 12, 4]);
        let view = to_native(&array).unwrap();
        assert_eq!(view.channels(), 3);
        assert_eq!(view.depth(), ElementDepth::F32);
        assert_eq!(view.step(), 24);
    }

    #[test]
    fn test_to_native_rejects_padded_rows() {
        let mut data = vec![0u8; 8];
        let array = desc(&mut data, DtypeCode::UByte, vec![2, 3], vec![4, 1]);
        let err = to_native(&array).unwrap_err();
        assert!(matches!(err, BridgeError::NonContiguousArray));
        assert!(err.to_string().contains("np.ascontiguousarray()"));
    }

    #[test]
    fn test_to_native_empty_array() {
        let array = desc(&mut [], DtypeCode::UByte, vec![0, 3], vec![0, 1]);
        let view = to_native(&array).unwrap();
        assert_eq!(view.rows(), 0);
        assert_eq!(view.cols(), 3);
        assert!(view.data_ptr().is_null());
        assert!(view.is_empty());
    }

    #[test]
    fn test_to_native_rejects_dimensions() {
        let mut data = vec![0u8; 4];
        let one = desc(&mut data, DtypeCode::UByte, vec![4], vec![1]);
        assert!(matches!(to_native(&one), Err(BridgeError::InvalidDimensions { ndim: 1 })));

        let four = desc(&mut data, DtypeCode::UByte, vec![1, 1, 2, 2], vec![4, 4, 2, 1]);
        assert!(matches!(to_native(&four), Err(BridgeError::InvalidDimensions { ndim: 4 })));
    }

    #[test]
    fn test_to_native_rejects_dtype() {
        let array = Int64Layout {
            data: vec![0, 0],
            shape: [2, 1],
            strides: [8, 8],
        };
        assert!(matches!(to_native(&array), Err(BridgeError::UnsupportedDtype('l'))));
    }

    // ========================================================================
    // Round trip tests
    // ========================================================================

    #[test]
    fn test_round_trip_is_zero_copy() {
        let mat = Mat::from_slice::<u8>(2, 3, 1, &[1, 2, 3, 4, 5, 6]).unwrap();
        let array = to_external(&mat).unwrap();
        assert_eq!(array.dtype().name(), "uint8");
        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array.strides(), &[3, 1]);

        let view = to_native(&array).unwrap();
        assert_eq!(view.rows(), 2);
        assert_eq!(view.cols(), 3);
        assert_eq!(view.channels(), 1);
        assert_eq!(view.depth(), ElementDepth::U8);
        assert_eq!(view.data_ptr(), mat.data_ptr());
        assert_eq!(view.row::<u8>(0).unwrap(), &[1, 2, 3]);
        assert_eq!(view.row::<u8>(1).unwrap(), &[4, 5, 6]);
    }

    #[test]
    fn test_round_trip_every_depth() {
        fn check<T: crate::mat::Element + PartialEq + std::fmt::Debug>(values: [T; 4]) {
            let mat = Mat::from_slice::<T>(2, 1, 2, &values).unwrap();
            let array = to_external(&mat).unwrap();
            let view = to_native(&array).unwrap();
            assert_eq!(view.mat_type(), mat.mat_type());
            assert_eq!(view.at::<T>(1, 0).unwrap(), &values[2..]);
        }
        check::<u8>([1, 2, 3, 4]);
        check::<i8>([-1, 2, -3, 4]);
        check::<u16>([1, 2, 3, u16::MAX]);
        check::<i16>([-1, 2, -3, i16::MIN]);
        check::<i32>([-1, 2, -3, i32::MAX]);
        check::<f32>([0.5, 1.5, 2.5, -3.5]);
        check::<f64>([0.25, 1.25, 2.25, -3.25]);
    }

    #[test]
    fn test_padded_export_cannot_come_back() {
        let ty = crate::dtype::MatType::new(ElementDepth::U8, 1).unwrap();
        let mat = Mat::with_row_step(2, 3, ty, 4).unwrap();
        let array = to_external(&mat).unwrap();
        assert!(matches!(to_native(&array), Err(BridgeError::NonContiguousArray)));
    }

    // ========================================================================
    // NumPy import tests (require Python)
    // ========================================================================

    #[test]
    fn test_pyarray_as_mat_shares_memory() {
        Python::attach(|py| {
            let array = py
                .eval(
                    c"__import__('numpy').arange(12, dtype='uint16').reshape(2, 2, 3)",
                    None,
                    None,
                )
                .expect("numpy not available");
            let array = array.cast_into::<PyUntypedArray>().unwrap();
            let address: usize = array
                .getattr("ctypes")
                .unwrap()
                .getattr("data")
                .unwrap()
                .extract()
                .unwrap();

            let view = pyarray_as_mat(&array).unwrap();
            assert_eq!(view.rows(), 2);
            assert_eq!(view.cols(), 2);
            assert_eq!(view.channels(), 3);
            assert_eq!(view.depth(), ElementDepth::U16);
            assert_eq!(view.data_ptr() as usize, address);
            assert_eq!(view.at::<u16>(1, 1).unwrap(), &[9, 10, 11]);
        });
    }

    #[test]
    fn test_pyarray_as_mat_rejects_transposed() {
        Python::attach(|py| {
            let numpy = py.import("numpy").expect("numpy not available");
            let array = numpy
                .getattr("zeros")
                .unwrap()
                .call1(((3, 4), "uint8"))
                .unwrap()
                .getattr("T")
                .unwrap();
            let array = array.cast_into::<PyUntypedArray>().unwrap();
            let err = pyarray_as_mat(&array).unwrap_err();
            assert!(err.is_instance_of::<pyo3::exceptions::PyValueError>(py));
        });
    }

    #[test]
    fn test_pyarray_as_mat_rejects_swapped_bytes() {
        Python::attach(|py| {
            let array = py
                .eval(
                    c"__import__('numpy').zeros((2, 3), dtype=__import__('numpy').dtype('u2').newbyteorder())",
                    None,
                    None,
                )
                .expect("numpy not available");
            let array = array.cast_into::<PyUntypedArray>().unwrap();
            let err = pyarray_as_mat(&array).unwrap_err();
            assert!(err.is_instance_of::<pyo3::exceptions::PyValueError>(py));
            assert!(err.to_string().contains("byte order"));
        });
    }

    #[test]
    fn test_dtype_from_descr() {
        Python::attach(|py| {
            for code in [DtypeCode::UByte, DtypeCode::Short, DtypeCode::Int, DtypeCode::Double] {
                let descr = code.to_descr(py);
                assert_eq!(DtypeCode::from_descr(&descr).unwrap(), code);
            }
            let descr = numpy::dtype::<i64>(py);
            assert!(DtypeCode::from_descr(&descr).is_err());

            let swapped = numpy::dtype::<u16>(py)
                .call_method0("newbyteorder")
                .unwrap()
                .cast_into::<PyArrayDescr>()
                .unwrap();
            assert!(matches!(
                DtypeCode::from_descr(&swapped),
                Err(BridgeError::NonNativeByteOrder('H'))
            ));
        });
    }
}
