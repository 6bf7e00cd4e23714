//! Array layouts and the shape/stride rules between arrays and matrices.
//!
//! Arrays are row-major: axis 0 is rows (height), axis 1 is columns (width)
//! and the optional axis 2 holds the interleaved channels of a pixel.

use crate::dtype::{DtypeCode, ElementDepth, MatType};
use crate::error::{BridgeError, Result};
use crate::mat::MatLike;

/// Introspection of a strided, multi-dimensional array.
///
/// Strides are in bytes.
///
/// # Safety
///
/// [`to_native`](crate::to_native) reads through `data_ptr` for as long as
/// the implementor is borrowed. Implementors must guarantee that every
/// element reachable through `shape` and `strides` lies in memory that stays
/// allocated while `&self` is alive. `data_ptr` may be null only when the
/// array has no elements.
pub unsafe trait ArrayLayout {
    /// One-character NumPy type code of the elements.
    fn dtype_char(&self) -> char;

    fn shape(&self) -> &[usize];

    fn strides(&self) -> &[isize];

    /// Size of one element in bytes.
    fn itemsize(&self) -> usize;

    /// Pointer to the first element.
    fn data_ptr(&self) -> *mut u8;

    fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Total number of elements.
    fn size(&self) -> usize {
        self.shape().iter().product()
    }
}

/// A plain description of array memory owned elsewhere.
///
/// Nothing ties the descriptor to the memory it points at, so building one
/// is `unsafe`:
///
/// ```compile_fail,E0133
/// use pyo3_cvmat::{ArrayDescriptor, DtypeCode};
///
/// let desc = ArrayDescriptor::contiguous(16usize as *mut u8, DtypeCode::UByte, vec![1, 4]);
/// ```
#[derive(Debug, Clone)]
pub struct ArrayDescriptor {
    data: *mut u8,
    dtype: char,
    shape: Vec<usize>,
    strides: Vec<isize>,
    itemsize: usize,
}

impl ArrayDescriptor {
    /// Describe a packed row-major array.
    ///
    /// # Safety
    ///
    /// `data` must point to `shape.iter().product()` packed elements of
    /// `dtype` that stay allocated for as long as the descriptor, or any view
    /// made from it, is used. It may be null only if `shape` has a zero extent.
    pub unsafe fn contiguous(data: *mut u8, dtype: DtypeCode, shape: Vec<usize>) -> Self {
        let itemsize = dtype.itemsize();
        let mut strides = vec![0isize; shape.len()];
        let mut stride = itemsize as isize;
        for (axis, &extent) in shape.iter().enumerate().rev() {
            strides[axis] = stride;
            stride *= extent as isize;
        }
        Self {
            data,
            dtype: dtype.as_char(),
            shape,
            strides,
            itemsize,
        }
    }

    /// Describe an array with explicit byte strides.
    ///
    /// # Safety
    ///
    /// Every element reachable from `data` through `shape` and `strides` must
    /// stay allocated for as long as the descriptor, or any view made from it,
    /// is used. `data` may be null only if `shape` has a zero extent.
    ///
    /// # Panics
    ///
    /// Panics if `strides.len() != shape.len()`.
    pub unsafe fn strided(data: *mut u8, dtype: DtypeCode, shape: Vec<usize>, strides: Vec<isize>) -> Self {
        assert_eq!(
            strides.len(),
            shape.len(),
            "strides length ({}) must equal shape length ({})",
            strides.len(),
            shape.len()
        );
        Self {
            data,
            dtype: dtype.as_char(),
            shape,
            strides,
            itemsize: dtype.itemsize(),
        }
    }
}

// SAFETY: both constructors put the memory guarantee on the caller.
unsafe impl ArrayLayout for ArrayDescriptor {
    fn dtype_char(&self) -> char {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn strides(&self) -> &[isize] {
        &self.strides
    }

    fn itemsize(&self) -> usize {
        self.itemsize
    }

    fn data_ptr(&self) -> *mut u8 {
        self.data
    }
}

/// Array extents for a matrix: `[rows, cols]` or `[rows, cols, channels]`.
pub fn native_to_shape<M: MatLike + ?Sized>(mat: &M) -> Vec<usize> {
    if mat.channels() == 1 {
        vec![mat.rows(), mat.cols()]
    } else {
        vec![mat.rows(), mat.cols(), mat.channels()]
    }
}

/// Array byte strides for a matrix.
///
/// Row and column strides are taken from the matrix itself so row padding is
/// preserved; channels are interleaved, one element apart.
pub fn native_to_strides<M: MatLike + ?Sized>(mat: &M) -> Vec<isize> {
    let row = mat.step() as isize;
    let col = mat.elem_size() as isize;
    if mat.channels() == 1 {
        vec![row, col]
    } else {
        vec![row, col, mat.elem_size1() as isize]
    }
}

/// The composite matrix type for an array of element depth `depth`.
pub fn array_to_cv_type<A: ArrayLayout + ?Sized>(array: &A, depth: ElementDepth) -> Result<MatType> {
    match array.ndim() {
        2 => MatType::new(depth, 1),
        3 => MatType::new(depth, array.shape()[2]),
        ndim => Err(BridgeError::InvalidDimensions { ndim }),
    }
}

/// Matrix size as `(width, height)`.
pub fn array_to_size<A: ArrayLayout + ?Sized>(array: &A) -> Result<(usize, usize)> {
    let shape = array.shape();
    if shape.len() < 2 {
        return Err(BridgeError::InvalidDimensions { ndim: shape.len() });
    }
    Ok((shape[1], shape[0]))
}

/// Whether the array is packed in row-major order.
///
/// Walks the axes from innermost to outermost; each stride must equal the
/// product of the item size and all inner extents.
///
/// Arrays with no elements usually fail this check. That is fine for
/// conversion since their memory is never accessed.
pub fn is_contiguous<A: ArrayLayout + ?Sized>(array: &A) -> bool {
    let mut expected = array.itemsize() as isize;
    for (&extent, &stride) in array.shape().iter().zip(array.strides()).rev() {
        if stride != expected {
            return false;
        }
        expected *= extent as isize;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mat::Mat;

    // Metadata only; these descriptors are never viewed as matrices.
    fn desc(shape: Vec<usize>, strides: Vec<isize>, dtype: DtypeCode) -> ArrayDescriptor {
        unsafe { ArrayDescriptor::strided(std::ptr::null_mut(), dtype, shape, strides) }
    }

    // ========================================================================
    // ArrayDescriptor tests
    // ========================================================================

    #[test]
    fn test_contiguous_descriptor_strides() {
        let d = unsafe { ArrayDescriptor::contiguous(std::ptr::null_mut(), DtypeCode::Float, vec![2, 3, 4]) };
        assert_eq!(d.strides, vec![48, 16, 4]);
        assert_eq!(d.itemsize, 4);
        assert_eq!(d.size(), 24);
        assert_eq!(d.ndim(), 3);
    }

    #[test]
    #[should_panic(expected = "strides length")]
    fn test_strided_descriptor_length_mismatch() {
        desc(vec![2, 3], vec![3], DtypeCode::UByte);
    }

    // ========================================================================
    // Shape and stride derivation tests
    // ========================================================================

    #[test]
    fn test_native_shape_single_channel() {
        let mat = Mat::new(4, 7, MatType::new(ElementDepth::U8, 1).unwrap());
        assert_eq!(native_to_shape(&mat), vec![4, 7]);
    }

    #[test]
    fn test_native_shape_multi_channel() {
        let mat = Mat::new(4, 7, MatType::new(ElementDepth::U8, 3).unwrap());
        assert_eq!(native_to_shape(&mat), vec![4, 7, 3]);
    }

    #[test]
    fn test_native_strides_packed() {
        let mat = Mat::new(2, 3, MatType::new(ElementDepth::U16, 1).unwrap());
        assert_eq!(native_to_strides(&mat), vec![6, 2]);

        let mat = Mat::new(2, 3, MatType::new(ElementDepth::F32, 3).unwrap());
        assert_eq!(native_to_strides(&mat), vec![36, 12, 4]);
    }

    #[test]
    fn test_native_strides_keep_row_padding() {
        let ty = MatType::new(ElementDepth::U8, 1).unwrap();
        let mat = Mat::with_row_step(2, 3, ty, 8).unwrap();
        assert_eq!(native_to_strides(&mat), vec![8, 1]);

        let roi = Mat::new(5, 10, ty).roi(1..3, 2..5).unwrap();
        assert_eq!(native_to_strides(&roi), vec![10, 1]);
    }

    #[test]
    fn test_cv_type_from_array() {
        let two = desc(vec![4, 5], vec![5, 1], DtypeCode::UByte);
        assert_eq!(array_to_cv_type(&two, ElementDepth::U8).unwrap().channels(), 1);

        let three = desc(vec![4, 5, 3], vec![15, 3, 1], DtypeCode::UByte);
        let ty = array_to_cv_type(&three, ElementDepth::U8).unwrap();
        assert_eq!(ty.channels(), 3);
        assert_eq!(ty.raw(), 16);
    }

    #[test]
    fn test_cv_type_rejects_ndim() {
        let one = desc(vec![4], vec![1], DtypeCode::UByte);
        assert!(matches!(
            array_to_cv_type(&one, ElementDepth::U8),
            Err(BridgeError::InvalidDimensions { ndim: 1 })
        ));
        let four = desc(vec![1, 1, 1, 1], vec![1, 1, 1, 1], DtypeCode::UByte);
        assert!(matches!(
            array_to_cv_type(&four, ElementDepth::U8),
            Err(BridgeError::InvalidDimensions { ndim: 4 })
        ));
    }

    #[test]
    fn test_cv_type_rejects_channel_extent() {
        let none = desc(vec![2, 2, 0], vec![0, 0, 1], DtypeCode::UByte);
        assert!(matches!(
            array_to_cv_type(&none, ElementDepth::U8),
            Err(BridgeError::InvalidChannels { channels: 0 })
        ));
    }

    #[test]
    fn test_size_is_width_height() {
        let d = desc(vec![480, 640, 3], vec![1920, 3, 1], DtypeCode::UByte);
        assert_eq!(array_to_size(&d).unwrap(), (640, 480));

        let one = desc(vec![4], vec![1], DtypeCode::UByte);
        assert!(array_to_size(&one).is_err());
    }

    // ========================================================================
    // Contiguity tests
    // ========================================================================

    #[test]
    fn test_contiguous_packed() {
        let d = desc(vec![2, 3], vec![3, 1], DtypeCode::UByte);
        assert!(is_contiguous(&d));

        let d = desc(vec![2, 3, 3], vec![36, 12, 4], DtypeCode::Float);
        assert!(is_contiguous(&d));
    }

    #[test]
    fn test_contiguous_padded_rows() {
        let d = desc(vec![2, 3], vec![4, 1], DtypeCode::UByte);
        assert!(!is_contiguous(&d));
    }

    #[test]
    fn test_contiguous_transposed() {
        let d = desc(vec![3, 2], vec![1, 3], DtypeCode::UByte);
        assert!(!is_contiguous(&d));
    }

    #[test]
    fn test_contiguous_inner_stride_mismatch() {
        // Every other column of a u16 array
        let d = desc(vec![2, 3], vec![12, 4], DtypeCode::UShort);
        assert!(!is_contiguous(&d));
    }

    #[test]
    fn test_contiguous_empty_array() {
        // NumPy gives empty arrays arbitrary strides
        let d = desc(vec![0, 3], vec![0, 1], DtypeCode::UByte);
        assert_eq!(d.size(), 0);
        assert!(!is_contiguous(&d));
    }
}
