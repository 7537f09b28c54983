//! Tensor conversion utilities
//!
//! Convert between ONNX TensorProto and ndarray types.

use ndarray::{Array, ArrayD, IxDyn};

use crate::error::{ImportError, ImportResult};
use crate::proto::tensor_proto::DataType;
use crate::proto::TensorProto;

use super::dtype::{dtype_size, i32_to_dtype};
use super::shape::numel;

fn array_shape(tensor: &TensorProto) -> ImportResult<Vec<usize>> {
    tensor
        .dims
        .iter()
        .map(|&d| {
            usize::try_from(d).map_err(|_| {
                ImportError::InvalidValue(format!(
                    "Tensor '{}' has negative dimension {}",
                    tensor.name, d
                ))
            })
        })
        .collect()
}

fn check_len(tensor: &TensorProto, actual: usize, expected: usize) -> ImportResult<()> {
    if actual != expected {
        return Err(ImportError::InvalidValue(format!(
            "Tensor '{}': data length {} does not match shape {:?} (expected {})",
            tensor.name, actual, tensor.dims, expected
        )));
    }
    Ok(())
}

/// Convert TensorProto to f32 ndarray
///
/// This handles both raw_data and typed data formats.
pub fn tensor_to_array_f32(tensor: &TensorProto) -> ImportResult<ArrayD<f32>> {
    let dtype = i32_to_dtype(tensor.data_type)?;
    let shape = array_shape(tensor)?;
    let expected_len = numel(&tensor.dims)?;

    let data: Vec<f32> = if !tensor.raw_data.is_empty() {
        decode_raw_to_f32(&tensor.raw_data, dtype, expected_len)?
    } else {
        match dtype {
            DataType::Float => tensor.float_data.clone(),
            DataType::Double => tensor.double_data.iter().map(|&v| v as f32).collect(),
            DataType::Int32 | DataType::Int8 | DataType::Uint8 | DataType::Bool => {
                tensor.int32_data.iter().map(|&v| v as f32).collect()
            }
            DataType::Int64 => tensor.int64_data.iter().map(|&v| v as f32).collect(),
            DataType::Uint64 => tensor.uint64_data.iter().map(|&v| v as f32).collect(),
            _ => {
                return Err(ImportError::UnsupportedDataType(tensor.data_type));
            }
        }
    };

    check_len(tensor, data.len(), expected_len)?;

    let ix = IxDyn(&shape);
    Array::from_shape_vec(ix, data).map_err(|e| ImportError::Internal(e.to_string()))
}

/// Convert TensorProto to i64 ndarray
///
/// Bool tensors decode to 0/1.
pub fn tensor_to_array_i64(tensor: &TensorProto) -> ImportResult<ArrayD<i64>> {
    let dtype = i32_to_dtype(tensor.data_type)?;
    let shape = array_shape(tensor)?;
    let expected_len = numel(&tensor.dims)?;

    let data: Vec<i64> = if !tensor.raw_data.is_empty() {
        decode_raw_to_i64(&tensor.raw_data, dtype, expected_len)?
    } else {
        match dtype {
            DataType::Int64 => tensor.int64_data.clone(),
            DataType::Int32 | DataType::Int8 | DataType::Uint8 | DataType::Bool => {
                tensor.int32_data.iter().map(|&v| v as i64).collect()
            }
            DataType::Uint64 => tensor.uint64_data.iter().map(|&v| v as i64).collect(),
            _ => {
                return Err(ImportError::UnsupportedDataType(tensor.data_type));
            }
        }
    };

    check_len(tensor, data.len(), expected_len)?;

    let ix = IxDyn(&shape);
    Array::from_shape_vec(ix, data).map_err(|e| ImportError::Internal(e.to_string()))
}

/// Create TensorProto from f32 array
pub fn array_to_tensor_f32(array: &ArrayD<f32>, name: &str) -> TensorProto {
    let dims: Vec<i64> = array.shape().iter().map(|&d| d as i64).collect();

    TensorProto {
        dims,
        data_type: DataType::Float as i32,
        float_data: array.iter().copied().collect(),
        name: name.to_string(),
        ..Default::default()
    }
}

/// Create scalar TensorProto from f32
pub fn scalar_to_tensor_f32(value: f32, name: &str) -> TensorProto {
    TensorProto {
        dims: vec![],
        data_type: DataType::Float as i32,
        float_data: vec![value],
        name: name.to_string(),
        ..Default::default()
    }
}

/// Create 1D TensorProto from i64 slice
pub fn vec_to_tensor_i64(data: &[i64], name: &str) -> TensorProto {
    TensorProto {
        dims: vec![data.len() as i64],
        data_type: DataType::Int64 as i32,
        int64_data: data.to_vec(),
        name: name.to_string(),
        ..Default::default()
    }
}

// ============================================================================
// Internal helpers
// ============================================================================

fn check_raw_len(raw: &[u8], dtype: DataType, expected: usize) -> ImportResult<()> {
    let elem_size = dtype_size(dtype)?;
    if expected.checked_mul(elem_size) != Some(raw.len()) {
        return Err(ImportError::InvalidValue(format!(
            "Raw data size {} does not match expected {} * {}",
            raw.len(),
            expected,
            elem_size
        )));
    }
    Ok(())
}

fn decode_raw_to_f32(raw: &[u8], dtype: DataType, expected: usize) -> ImportResult<Vec<f32>> {
    check_raw_len(raw, dtype, expected)?;

    match dtype {
        DataType::Float => Ok(raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()),
        DataType::Double => Ok(raw
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
            .collect()),
        DataType::Int32 => Ok(raw
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32)
            .collect()),
        DataType::Int64 => Ok(raw
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
            .collect()),
        DataType::Uint8 | DataType::Bool => Ok(raw.iter().map(|&b| b as f32).collect()),
        DataType::Int8 => Ok(raw.iter().map(|&b| b as i8 as f32).collect()),
        _ => Err(ImportError::UnsupportedDataType(dtype as i32)),
    }
}

fn decode_raw_to_i64(raw: &[u8], dtype: DataType, expected: usize) -> ImportResult<Vec<i64>> {
    check_raw_len(raw, dtype, expected)?;

    match dtype {
        DataType::Int64 => Ok(raw
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect()),
        DataType::Int32 => Ok(raw
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64)
            .collect()),
        DataType::Uint64 => Ok(raw
            .chunks_exact(8)
            .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as i64)
            .collect()),
        DataType::Uint8 | DataType::Bool => Ok(raw.iter().map(|&b| b as i64).collect()),
        DataType::Int8 => Ok(raw.iter().map(|&b| b as i8 as i64).collect()),
        _ => Err(ImportError::UnsupportedDataType(dtype as i32)),
    }
}
