//! Element types on both sides of the bridge.
//!
//! The native side describes pixels by an OpenCV-style element depth plus a
//! channel count, the array side by a one-character NumPy type code. The
//! [`TYPE_SYNONYMS`] table ties the two together.

use crate::error::{BridgeError, Result};

/// Maximum number of channels a [`MatType`] can carry.
pub const MAX_CHANNELS: usize = 512;

const DEPTH_BITS: i32 = 3;
const DEPTH_MASK: i32 = (1 << DEPTH_BITS) - 1;

/// Per-channel numeric type of a native matrix.
///
/// Discriminants match OpenCV's `CV_8U` .. `CV_64F`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementDepth {
    /// 8-bit unsigned
    U8 = 0,
    /// 8-bit signed
    S8 = 1,
    /// 16-bit unsigned
    U16 = 2,
    /// 16-bit signed
    S16 = 3,
    /// 32-bit signed
    S32 = 4,
    /// 32-bit float
    F32 = 5,
    /// 64-bit float
    F64 = 6,
    /// Depth with no array counterpart (OpenCV's `CV_16F` slot).
    Unspecified = 7,
}

impl ElementDepth {
    /// Convert from the raw OpenCV depth value.
    ///
    /// Returns `None` outside of `0..=7`.
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::U8),
            1 => Some(Self::S8),
            2 => Some(Self::U16),
            3 => Some(Self::S16),
            4 => Some(Self::S32),
            5 => Some(Self::F32),
            6 => Some(Self::F64),
            7 => Some(Self::Unspecified),
            _ => None,
        }
    }

    pub fn raw(self) -> i32 {
        self as i32
    }

    /// Size of one element of this depth in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::U8 | Self::S8 => 1,
            Self::U16 | Self::S16 | Self::Unspecified => 2,
            Self::S32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Composite native type: element depth plus channel count.
///
/// Encoded like OpenCV's `CV_MAKETYPE(depth, cn)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatType {
    depth: ElementDepth,
    channels: usize,
}

impl MatType {
    /// Build a type from a depth and a channel count in `1..=512`.
    pub fn new(depth: ElementDepth, channels: usize) -> Result<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(BridgeError::InvalidChannels { channels });
        }
        Ok(Self { depth, channels })
    }

    /// Decode a raw `CV_MAKETYPE` value.
    pub fn from_raw(value: i32) -> Option<Self> {
        if value < 0 {
            return None;
        }
        let depth = ElementDepth::from_raw(value & DEPTH_MASK)?;
        let channels = ((value >> DEPTH_BITS) + 1) as usize;
        Self::new(depth, channels).ok()
    }

    pub fn raw(self) -> i32 {
        self.depth.raw() + (((self.channels - 1) as i32) << DEPTH_BITS)
    }

    pub fn depth(self) -> ElementDepth {
        self.depth
    }

    pub fn channels(self) -> usize {
        self.channels
    }

    /// Size of one pixel (all channels) in bytes.
    pub fn elem_size(self) -> usize {
        self.depth.size() * self.channels
    }
}

/// NumPy type code of an array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtypeCode {
    /// `B`, `numpy.uint8`
    UByte,
    /// `b`, `numpy.int8`
    Byte,
    /// `H`, `numpy.uint16`
    UShort,
    /// `h`, `numpy.int16`
    Short,
    /// `i`, `numpy.int32`
    Int,
    /// `f`, `numpy.float32`
    Float,
    /// `d`, `numpy.float64`
    Double,
}

impl DtypeCode {
    /// Parse a NumPy type character.
    ///
    /// Returns `None` for characters outside the supported set.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'B' => Some(Self::UByte),
            'b' => Some(Self::Byte),
            'H' => Some(Self::UShort),
            'h' => Some(Self::Short),
            'i' => Some(Self::Int),
            'f' => Some(Self::Float),
            'd' => Some(Self::Double),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::UByte => 'B',
            Self::Byte => 'b',
            Self::UShort => 'H',
            Self::Short => 'h',
            Self::Int => 'i',
            Self::Float => 'f',
            Self::Double => 'd',
        }
    }

    /// The NumPy name of the type, e.g. `"uint8"`.
    pub fn name(self) -> &'static str {
        match self {
            Self::UByte => "uint8",
            Self::Byte => "int8",
            Self::UShort => "uint16",
            Self::Short => "int16",
            Self::Int => "int32",
            Self::Float => "float32",
            Self::Double => "float64",
        }
    }

    pub fn itemsize(self) -> usize {
        match self {
            Self::UByte | Self::Byte => 1,
            Self::UShort | Self::Short => 2,
            Self::Int | Self::Float => 4,
            Self::Double => 8,
        }
    }
}

impl std::fmt::Display for DtypeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the depth/dtype association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSynonym {
    pub depth: ElementDepth,
    pub dtype: DtypeCode,
}

/// Ordered synonym table. Lookups take the first match in either direction.
pub static TYPE_SYNONYMS: [TypeSynonym; 7] = [
    TypeSynonym { depth: ElementDepth::U8, dtype: DtypeCode::UByte },
    TypeSynonym { depth: ElementDepth::S8, dtype: DtypeCode::Byte },
    TypeSynonym { depth: ElementDepth::U16, dtype: DtypeCode::UShort },
    TypeSynonym { depth: ElementDepth::S16, dtype: DtypeCode::Short },
    TypeSynonym { depth: ElementDepth::S32, dtype: DtypeCode::Int },
    TypeSynonym { depth: ElementDepth::F32, dtype: DtypeCode::Float },
    TypeSynonym { depth: ElementDepth::F64, dtype: DtypeCode::Double },
];

/// Map a native element depth to its array type code.
pub fn depth_to_dtype(depth: ElementDepth) -> Result<DtypeCode> {
    TYPE_SYNONYMS
        .iter()
        .find(|synonym| synonym.depth == depth)
        .map(|synonym| synonym.dtype)
        .ok_or(BridgeError::UnsupportedDepth(depth))
}

/// Map an array type code back to a native element depth.
pub fn dtype_to_depth(dtype: DtypeCode) -> Result<ElementDepth> {
    TYPE_SYNONYMS
        .iter()
        .find(|synonym| synonym.dtype == dtype)
        .map(|synonym| synonym.depth)
        .ok_or(BridgeError::UnsupportedDtype(dtype.as_char()))
}

/// Map a raw NumPy type character to a native element depth.
pub fn dtype_char_to_depth(c: char) -> Result<ElementDepth> {
    let dtype = DtypeCode::from_char(c).ok_or(BridgeError::UnsupportedDtype(c))?;
    dtype_to_depth(dtype)
}

/// Check that [`TYPE_SYNONYMS`] is a bijection.
///
/// First-match lookups would otherwise silently disagree between the two
/// directions. Every element size must also agree across the pair.
pub fn validate_type_table() -> bool {
    TYPE_SYNONYMS.iter().enumerate().all(|(i, a)| {
        a.depth.size() == a.dtype.itemsize()
            && TYPE_SYNONYMS[i + 1..]
                .iter()
                .all(|b| a.depth != b.depth && a.dtype != b.dtype)
    })
}
