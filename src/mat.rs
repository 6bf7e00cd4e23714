//! Native matrix types.
//!
//! [`Mat`] mirrors the header of an OpenCV `cv::Mat`: a row-major, strided
//! pixel buffer with an element depth and interleaved channels. Cloning a
//! `Mat` duplicates the header and bumps an atomic reference count on the
//! pixel buffer; pixel data is never copied implicitly.
//!
//! [`MatView`] is the non-owning counterpart produced when an external array
//! is viewed as a matrix. It borrows the memory for `'a`.

use crate::dtype::{ElementDepth, MatType};
use crate::error::{BridgeError, Result};
use std::alloc::{self, Layout};
use std::marker::PhantomData;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::Arc;

/// Alignment of every buffer allocated by [`Mat`].
pub const BUFFER_ALIGN: usize = 64;

/// Primitive types that can be stored in a matrix element.
pub trait Element: bytemuck::Pod {
    /// The native depth this type corresponds to.
    const DEPTH: ElementDepth;
}

impl Element for u8 {
    const DEPTH: ElementDepth = ElementDepth::U8;
}
impl Element for i8 {
    const DEPTH: ElementDepth = ElementDepth::S8;
}
impl Element for u16 {
    const DEPTH: ElementDepth = ElementDepth::U16;
}
impl Element for i16 {
    const DEPTH: ElementDepth = ElementDepth::S16;
}
impl Element for i32 {
    const DEPTH: ElementDepth = ElementDepth::S32;
}
impl Element for f32 {
    const DEPTH: ElementDepth = ElementDepth::F32;
}
impl Element for f64 {
    const DEPTH: ElementDepth = ElementDepth::F64;
}

/// `a * b` as a byte count, panicking like `Vec` when the product cannot
/// address memory.
#[track_caller]
fn checked_bytes(a: usize, b: usize) -> usize {
    match a.checked_mul(b) {
        Some(n) if n <= isize::MAX as usize => n,
        _ => panic!("capacity overflow"),
    }
}

/// Dimensions and steps of a matrix, without the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatHeader {
    pub rows: usize,
    pub cols: usize,
    pub mat_type: MatType,
    /// Bytes between the starts of two consecutive rows.
    pub step: usize,
}

impl MatHeader {
    /// Header for a packed matrix (no row padding).
    ///
    /// # Panics
    ///
    /// Panics if a row does not fit in `isize::MAX` bytes.
    #[track_caller]
    pub fn packed(rows: usize, cols: usize, mat_type: MatType) -> Self {
        Self {
            rows,
            cols,
            mat_type,
            step: checked_bytes(cols, mat_type.elem_size()),
        }
    }

    /// Bytes covered by the header, from the first element to the end of the last row.
    fn span(&self) -> usize {
        if self.rows == 0 {
            0
        } else {
            checked_bytes(self.rows - 1, self.step) + checked_bytes(self.cols, self.mat_type.elem_size())
        }
    }
}

/// Read access shared by owning and borrowed matrices.
///
/// # Safety
///
/// The accessors read through `data_ptr` using `header`'s rows, cols and
/// step. Implementors must guarantee that those bytes stay allocated while
/// `&self` is alive. `data_ptr` may be null only if the header has no pixels.
pub unsafe trait MatLike {
    fn header(&self) -> &MatHeader;

    /// Pointer to the first element. May be null for empty views.
    fn data_ptr(&self) -> *const u8;

    fn rows(&self) -> usize {
        self.header().rows
    }

    fn cols(&self) -> usize {
        self.header().cols
    }

    fn mat_type(&self) -> MatType {
        self.header().mat_type
    }

    fn depth(&self) -> ElementDepth {
        self.mat_type().depth()
    }

    fn channels(&self) -> usize {
        self.mat_type().channels()
    }

    /// Row stride in bytes.
    fn step(&self) -> usize {
        self.header().step
    }

    /// Size of one pixel in bytes; also the column stride.
    fn elem_size(&self) -> usize {
        self.mat_type().elem_size()
    }

    /// Size of one channel value in bytes.
    fn elem_size1(&self) -> usize {
        self.depth().size()
    }

    /// Number of pixels.
    fn total(&self) -> usize {
        self.rows() * self.cols()
    }

    fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// True when rows follow each other without padding.
    fn is_continuous(&self) -> bool {
        self.rows() <= 1 || self.step() == self.cols() * self.elem_size()
    }

    /// The bytes of row `row`, excluding any trailing padding.
    fn row_bytes(&self, row: usize) -> Result<&[u8]> {
        if row >= self.rows() {
            return Err(BridgeError::OutOfBounds {
                row,
                col: 0,
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        let len = self.cols() * self.elem_size();
        if len == 0 {
            return Ok(&[]);
        }
        // SAFETY: the trait contract covers every row of the header, and the
        // row index is in range.
        Ok(unsafe { std::slice::from_raw_parts(self.data_ptr().add(row * self.step()), len) })
    }

    /// Row `row` as interleaved channel values.
    fn row<T: Element>(&self, row: usize) -> Result<&[T]> {
        if T::DEPTH != self.depth() {
            return Err(BridgeError::DepthMismatch {
                requested: T::DEPTH,
                actual: self.depth(),
            });
        }
        let bytes = self.row_bytes(row)?;
        if bytes.is_empty() {
            return Ok(&[]);
        }
        bytemuck::try_cast_slice(bytes)
            .map_err(|_| BridgeError::MisalignedData(self.depth()))
    }

    /// The channel values of the pixel at (`row`, `col`).
    fn at<T: Element>(&self, row: usize, col: usize) -> Result<&[T]> {
        if col >= self.cols() {
            return Err(BridgeError::OutOfBounds {
                row,
                col,
                rows: self.rows(),
                cols: self.cols(),
            });
        }
        let channels = self.channels();
        let values = self.row::<T>(row)?;
        Ok(&values[col * channels..(col + 1) * channels])
    }

    /// Copy the pixels into a new packed, owning matrix.
    fn to_mat(&self) -> Mat {
        let header = self.header();
        let out = Mat::new(header.rows, header.cols, header.mat_type);
        let len = out.step();
        if len == 0 {
            return out;
        }
        let src = self.data_ptr();
        // SAFETY: `out` is not shared with anyone yet.
        let dst = unsafe { out.data_mut_ptr() };
        for row in 0..header.rows {
            // SAFETY: `row` is in range for both headers and the source rows
            // are covered by the trait contract.
            unsafe {
                std::ptr::copy_nonoverlapping(src.add(row * header.step), dst.add(row * len), len);
            }
        }
        out
    }
}

/// Heap block holding the pixels of one or more [`Mat`] headers.
struct PixelBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// Safety: the buffer is a plain byte allocation; synchronizing writers is up
// to whoever produces frames into it.
unsafe impl Send for PixelBuffer {}
unsafe impl Sync for PixelBuffer {}

impl PixelBuffer {
    fn zeroed(len: usize) -> Self {
        if len == 0 {
            return Self {
                ptr: NonNull::<u64>::dangling().cast(),
                len,
            };
        }
        let layout = Self::layout(len);
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Self { ptr, len }
    }

    fn layout(len: usize) -> Layout {
        Layout::from_size_align(len, BUFFER_ALIGN)
            .unwrap_or_else(|_| panic!("pixel buffer of {len} bytes overflows"))
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        if self.len != 0 {
            // SAFETY: allocated in `zeroed` with the same layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), Self::layout(self.len)) }
        }
    }
}

/// An owning, reference-counted matrix.
///
/// # Example
///
/// ```
/// use pyo3_cvmat::{ElementDepth, Mat, MatLike};
///
/// let mat = Mat::from_slice::<u8>(2, 3, 1, &[1, 2, 3, 4, 5, 6]).unwrap();
/// assert_eq!(mat.depth(), ElementDepth::U8);
/// assert_eq!(mat.row::<u8>(1).unwrap(), &[4, 5, 6]);
/// ```
#[derive(Clone)]
pub struct Mat {
    header: MatHeader,
    offset: usize,
    buffer: Arc<PixelBuffer>,
}

impl Mat {
    /// Allocate a zeroed, packed matrix.
    ///
    /// # Panics
    ///
    /// Panics with "capacity overflow" if the pixels do not fit in
    /// `isize::MAX` bytes, like [`Vec::with_capacity`].
    #[track_caller]
    pub fn new(rows: usize, cols: usize, mat_type: MatType) -> Self {
        let header = MatHeader::packed(rows, cols, mat_type);
        Self::allocate(header)
    }

    /// Allocate a zeroed matrix whose rows are `step` bytes apart.
    ///
    /// # Panics
    ///
    /// Panics with "capacity overflow" if the pixels do not fit in
    /// `isize::MAX` bytes.
    #[track_caller]
    pub fn with_row_step(rows: usize, cols: usize, mat_type: MatType, step: usize) -> Result<Self> {
        let min = checked_bytes(cols, mat_type.elem_size());
        if step < min {
            return Err(BridgeError::InvalidStep { step, min });
        }
        Ok(Self::allocate(MatHeader {
            rows,
            cols,
            mat_type,
            step,
        }))
    }

    /// Copy interleaved pixel values into a new packed matrix.
    ///
    /// # Panics
    ///
    /// Panics with "capacity overflow" if `rows * cols * channels` values do
    /// not fit in memory.
    #[track_caller]
    pub fn from_slice<T: Element>(rows: usize, cols: usize, channels: usize, data: &[T]) -> Result<Self> {
        let mat_type = MatType::new(T::DEPTH, channels)?;
        let expected = checked_bytes(checked_bytes(rows, cols), channels);
        if data.len() != expected {
            return Err(BridgeError::SizeMismatch {
                len: data.len(),
                expected,
            });
        }
        let mat = Self::new(rows, cols, mat_type);
        let bytes: &[u8] = bytemuck::cast_slice(data);
        // SAFETY: the new buffer is packed and exactly `bytes.len()` long.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mat.data_mut_ptr(), bytes.len());
        }
        Ok(mat)
    }

    #[track_caller]
    fn allocate(header: MatHeader) -> Self {
        let buffer = PixelBuffer::zeroed(checked_bytes(header.rows, header.step));
        Self {
            header,
            offset: 0,
            buffer: Arc::new(buffer),
        }
    }

    /// A sub-matrix header sharing this matrix's pixels.
    ///
    /// The row step is inherited, so the result is usually not continuous.
    pub fn roi(&self, rows: Range<usize>, cols: Range<usize>) -> Result<Self> {
        if rows.start > rows.end || rows.end > self.header.rows || cols.start > cols.end || cols.end > self.header.cols {
            return Err(BridgeError::OutOfBounds {
                row: rows.end,
                col: cols.end,
                rows: self.header.rows,
                cols: self.header.cols,
            });
        }
        let header = MatHeader {
            rows: rows.len(),
            cols: cols.len(),
            ..self.header
        };
        let offset = if header.rows == 0 || header.cols == 0 {
            self.offset
        } else {
            self.offset + rows.start * self.header.step + cols.start * self.elem_size()
        };
        Ok(Self {
            header,
            offset,
            buffer: Arc::clone(&self.buffer),
        })
    }

    /// Mutable pointer to the first element.
    ///
    /// # Safety
    ///
    /// The buffer may be shared with other headers and with external arrays;
    /// the caller must make sure no one reads the written region concurrently.
    pub unsafe fn data_mut_ptr(&self) -> *mut u8 {
        self.buffer.ptr.as_ptr().add(self.offset)
    }

    /// Number of headers (including external array owners) sharing the pixels.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.buffer)
    }

    /// True if both headers share the same pixel buffer.
    pub fn shares_buffer(&self, other: &Mat) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }
}

// SAFETY: constructors size the buffer for the header, and `roi` only
// narrows it.
unsafe impl MatLike for Mat {
    fn header(&self) -> &MatHeader {
        &self.header
    }

    fn data_ptr(&self) -> *const u8 {
        debug_assert!(self.offset + self.header.span() <= self.buffer.len);
        // SAFETY: offset stays inside the allocation (checked by `roi`).
        unsafe { self.buffer.ptr.as_ptr().add(self.offset) }
    }
}

impl std::fmt::Debug for Mat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mat")
            .field("rows", &self.header.rows)
            .field("cols", &self.header.cols)
            .field("type", &self.header.mat_type)
            .field("step", &self.header.step)
            .field("offset", &self.offset)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// A matrix header aliasing memory owned by someone else.
///
/// The view never frees the memory and must not outlive its owner, which the
/// `'a` lifetime enforces.
pub struct MatView<'a> {
    header: MatHeader,
    data: *mut u8,
    _owner: PhantomData<&'a [u8]>,
}

impl<'a> MatView<'a> {
    /// Wrap raw memory as a matrix view.
    ///
    /// # Safety
    ///
    /// `data` must point to at least `header`'s span of bytes that stay valid
    /// for `'a`. It may be null only if the header describes no pixels.
    pub unsafe fn from_raw_parts(header: MatHeader, data: *mut u8) -> Self {
        Self {
            header,
            data,
            _owner: PhantomData,
        }
    }

    /// Mutable pointer to the aliased memory.
    ///
    /// # Safety
    ///
    /// The memory belongs to another runtime, which may read or write it.
    pub unsafe fn data_mut_ptr(&self) -> *mut u8 {
        self.data
    }
}

// SAFETY: `from_raw_parts` puts the memory guarantee on the caller for `'a`.
unsafe impl MatLike for MatView<'_> {
    fn header(&self) -> &MatHeader {
        &self.header
    }

    fn data_ptr(&self) -> *const u8 {
        self.data
    }
}

impl std::fmt::Debug for MatView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatView")
            .field("rows", &self.header.rows)
            .field("cols", &self.header.cols)
            .field("type", &self.header.mat_type)
            .field("step", &self.header.step)
            .field("data", &self.data)
            .finish()
    }
}
