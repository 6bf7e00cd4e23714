//! Basic usage example for pyo3-cvmat
//!
//! This example demonstrates:
//! 1. Viewing NumPy images as matrices in Rust
//! 2. Exporting matrices from Rust to NumPy
//! 3. Processing pixel data in Rust
//!
//! Run it:
//!   cargo run --example basic_usage

use numpy::PyUntypedArray;
use pyo3::prelude::*;
use pyo3_cvmat::{pyarray_as_mat, ElementDepth, Mat, MatLike, MatType};

// ============================================================================
// Example 1: View a NumPy image and inspect it
// ============================================================================

/// Print the matrix metadata of a NumPy image
#[pyfunction]
fn inspect_image(image: &Bound<'_, PyUntypedArray>) -> PyResult<()> {
    let view = pyarray_as_mat(image)?;

    println!("Image viewed successfully!");
    println!("  Size: {}x{}", view.cols(), view.rows());
    println!("  Channels: {}", view.channels());
    println!("  Depth: {:?}", view.depth());
    println!("  Type: {}", view.mat_type().raw());
    println!("  Row step: {} bytes", view.step());
    println!("  Continuous: {}", view.is_continuous());

    Ok(())
}

/// Mean intensity of an 8-bit image, over all channels
#[pyfunction]
fn mean_intensity(image: &Bound<'_, PyUntypedArray>) -> PyResult<f64> {
    let view = pyarray_as_mat(image)?;
    if view.is_empty() {
        return Ok(0.0);
    }

    let mut sum = 0u64;
    for row in 0..view.rows() {
        sum += view.row::<u8>(row)?.iter().map(|&v| v as u64).sum::<u64>();
    }
    Ok(sum as f64 / (view.total() * view.channels()) as f64)
}

// ============================================================================
// Example 2: Export matrices from Rust
// ============================================================================

/// Create a horizontal gray gradient
#[pyfunction]
fn gradient(rows: usize, cols: usize) -> PyResult<Mat> {
    let data: Vec<u8> = (0..rows)
        .flat_map(|_| (0..cols).map(move |c| (c * 255 / cols.max(1)) as u8))
        .collect();
    Ok(Mat::from_slice(rows, cols, 1, &data)?)
}

/// Create a solid BGR frame
#[pyfunction]
fn solid_frame(rows: usize, cols: usize, bgr: (u8, u8, u8)) -> PyResult<Mat> {
    let data: Vec<u8> = std::iter::repeat([bgr.0, bgr.1, bgr.2])
        .take(rows * cols)
        .flatten()
        .collect();
    Ok(Mat::from_slice(rows, cols, 3, &data)?)
}

// ============================================================================
// Example 3: Round-trip processing
// ============================================================================

/// Invert an 8-bit image into a new matrix
#[pyfunction]
fn invert(image: &Bound<'_, PyUntypedArray>) -> PyResult<Mat> {
    let view = pyarray_as_mat(image)?;
    if view.depth() != ElementDepth::U8 {
        return Err(pyo3::exceptions::PyValueError::new_err(
            "Only uint8 images are supported",
        ));
    }

    let mut data = Vec::with_capacity(view.total() * view.channels());
    for row in 0..view.rows() {
        data.extend(view.row::<u8>(row)?.iter().map(|&v| 255 - v));
    }
    Ok(Mat::from_slice(view.rows(), view.cols(), view.channels(), &data)?)
}

// ============================================================================
// Demo function
// ============================================================================

/// Run a demo showing all features
#[pyfunction]
fn demo(py: Python<'_>) -> PyResult<()> {
    println!("=== pyo3-cvmat Demo ===\n");

    // Demo 1: Inspect a NumPy image
    println!("Demo 1: Inspecting a NumPy image");
    let image = py
        .eval(c"__import__('numpy').full((4, 6, 3), 64, dtype='uint8')", None, None)?
        .cast_into::<PyUntypedArray>()?;
    inspect_image(&image)?;

    // Demo 2: Mean intensity
    println!("\nDemo 2: Mean intensity");
    println!("  Mean: {}", mean_intensity(&image)?);

    // Demo 3: Export from Rust
    println!("\nDemo 3: Exporting a gradient");
    let exported = gradient(2, 8)?.into_pyobject(py)?;
    println!("  Exported array: {}", exported.str()?);

    // Demo 4: Round trip
    println!("\nDemo 4: Invert a frame");
    let frame = solid_frame(2, 2, (10, 20, 30))?.into_pyobject(py)?;
    let inverted = invert(&frame)?.into_pyobject(py)?;
    println!("  Inverted: {}", inverted.call_method0("tolist")?);

    // Unsupported depth
    let unsupported = Mat::new(2, 2, MatType::new(ElementDepth::Unspecified, 1)?);
    if let Err(err) = unsupported.into_pyobject(py) {
        println!("\nExpected failure: {}", err);
    }

    println!("\n=== Demo Complete ===");
    Ok(())
}

// ============================================================================
// Python module
// ============================================================================

#[pymodule]
fn basic_usage(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(inspect_image, m)?)?;
    m.add_function(wrap_pyfunction!(mean_intensity, m)?)?;
    m.add_function(wrap_pyfunction!(gradient, m)?)?;
    m.add_function(wrap_pyfunction!(solid_frame, m)?)?;
    m.add_function(wrap_pyfunction!(invert, m)?)?;
    m.add_function(wrap_pyfunction!(demo, m)?)?;
    Ok(())
}

// ============================================================================
// Standalone example (for cargo run)
// ============================================================================

#[cfg(not(feature = "extension-module"))]
fn main() {
    Python::initialize();

    Python::attach(|py| {
        if let Err(e) = demo(py) {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    });
}

#[cfg(feature = "extension-module")]
fn main() {
    println!("This example is built as a Python extension module.");
    println!("Import it in Python to use:");
    println!("  import basic_usage");
    println!("  basic_usage.demo()");
}
