//! Shape utilities for ONNX tensors
//!
//! Functions for working with tensor shapes and dimensions. A negative
//! dimension means "unknown at import time".

use crate::error::{ImportError, ImportResult};

/// Calculate total number of elements from shape
///
/// Unknown dimensions count as zero. A count that does not fit in `usize`
/// is a shape error.
pub fn numel(shape: &[i64]) -> ImportResult<usize> {
    shape.iter().try_fold(1usize, |count, &d| {
        usize::try_from(d.max(0))
            .ok()
            .and_then(|d| count.checked_mul(d))
            .ok_or_else(|| {
                ImportError::ShapeMismatch(format!(
                    "Element count of shape {:?} overflows",
                    shape
                ))
            })
    })
}

/// Check if shape contains dynamic dimensions (negative values)
pub fn is_dynamic(shape: &[i64]) -> bool {
    shape.iter().any(|&d| d < 0)
}

/// Dimension `i` counted from the right, padding with 1
fn dim_from_right(shape: &[i64], i: usize) -> i64 {
    if i < shape.len() {
        shape[shape.len() - 1 - i]
    } else {
        1
    }
}

/// Check if two shapes are broadcastable
pub fn is_broadcastable(shape_a: &[i64], shape_b: &[i64]) -> bool {
    let max_len = shape_a.len().max(shape_b.len());

    (0..max_len).all(|i| {
        let dim_a = dim_from_right(shape_a, i);
        let dim_b = dim_from_right(shape_b, i);
        // Dynamic dims are considered broadcastable
        dim_a < 0 || dim_b < 0 || dim_a == dim_b || dim_a == 1 || dim_b == 1
    })
}

/// Compute broadcast output shape
pub fn broadcast_shape(shape_a: &[i64], shape_b: &[i64]) -> ImportResult<Vec<i64>> {
    if !is_broadcastable(shape_a, shape_b) {
        return Err(ImportError::ShapeMismatch(format!(
            "Shapes {:?} and {:?} are not broadcastable",
            shape_a, shape_b
        )));
    }

    let max_len = shape_a.len().max(shape_b.len());
    let mut result = vec![0i64; max_len];

    for i in 0..max_len {
        let dim_a = dim_from_right(shape_a, i);
        let dim_b = dim_from_right(shape_b, i);

        let out_dim = if dim_a == 1 {
            dim_b
        } else if dim_b == 1 || dim_b < 0 {
            dim_a
        } else {
            dim_b
        };

        result[max_len - 1 - i] = out_dim;
    }

    Ok(result)
}

/// Normalize axis to positive index
pub fn normalize_axis(axis: i64, ndim: usize) -> ImportResult<usize> {
    let ndim_i64 = ndim as i64;
    let normalized = if axis < 0 { axis + ndim_i64 } else { axis };

    if normalized < 0 || normalized >= ndim_i64 {
        return Err(ImportError::InvalidNode(format!(
            "Axis {} out of bounds for ndim {}",
            axis, ndim
        )));
    }

    Ok(normalized as usize)
}

/// Normalize multiple axes, sorted and de-duplicated
pub fn normalize_axes(axes: &[i64], ndim: usize) -> ImportResult<Vec<usize>> {
    let mut out = axes
        .iter()
        .map(|&a| normalize_axis(a, ndim))
        .collect::<ImportResult<Vec<_>>>()?;
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

/// Output extent of a sliding window along one spatial axis
///
/// Unknown inputs stay unknown.
pub fn window_output_dim(
    input: i64,
    kernel: i64,
    stride: i64,
    pad_begin: i64,
    pad_end: i64,
    dilation: i64,
    ceil_mode: bool,
) -> ImportResult<i64> {
    if input < 0 {
        return Ok(-1);
    }
    if stride <= 0 || dilation <= 0 || kernel <= 0 {
        return Err(ImportError::InvalidNode(format!(
            "Invalid window: kernel {}, stride {}, dilation {}",
            kernel, stride, dilation
        )));
    }
    let overflow = || {
        ImportError::ShapeMismatch(format!(
            "Window of kernel {} dilation {} over extent {} overflows",
            kernel, dilation, input
        ))
    };
    let effective = dilation
        .checked_mul(kernel - 1)
        .and_then(|d| d.checked_add(1))
        .ok_or_else(overflow)?;
    let span = input
        .checked_add(pad_begin)
        .and_then(|s| s.checked_add(pad_end))
        .and_then(|s| s.checked_sub(effective))
        .ok_or_else(overflow)?;
    if span < 0 {
        return Err(ImportError::ShapeMismatch(format!(
            "Window of extent {} does not fit input extent {} with padding {}+{}",
            effective, input, pad_begin, pad_end
        )));
    }
    let steps = if ceil_mode {
        span / stride + i64::from(span % stride != 0)
    } else {
        span / stride
    };
    Ok(steps + 1)
}
