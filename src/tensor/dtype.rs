//! ONNX data type mappings
//!
//! Maps between ONNX TensorProto data types and what the network accepts.

use crate::error::{ImportError, ImportResult};
use crate::proto::tensor_proto::DataType;

/// Size in bytes for each ONNX data type
pub fn dtype_size(dtype: DataType) -> ImportResult<usize> {
    match dtype {
        DataType::Float => Ok(4),
        DataType::Uint8 => Ok(1),
        DataType::Int8 => Ok(1),
        DataType::Uint16 => Ok(2),
        DataType::Int16 => Ok(2),
        DataType::Int32 => Ok(4),
        DataType::Int64 => Ok(8),
        DataType::Bool => Ok(1),
        DataType::Float16 => Ok(2),
        DataType::Double => Ok(8),
        DataType::Uint32 => Ok(4),
        DataType::Uint64 => Ok(8),
        DataType::Bfloat16 => Ok(2),
        _ => Err(ImportError::UnsupportedDataType(dtype as i32)),
    }
}

/// Convert i32 to DataType enum
pub fn i32_to_dtype(value: i32) -> ImportResult<DataType> {
    DataType::try_from(value).map_err(|_| ImportError::UnsupportedDataType(value))
}

/// Check whether the network can hold tensors of this type
///
/// `Uint8` is only accepted when `allow_uint8` is set (see
/// [`ParserFlag::Uint8AsymmetricQuantization`](crate::importer::ParserFlag)).
pub fn is_network_type(dtype: DataType, allow_uint8: bool) -> bool {
    match dtype {
        DataType::Float
        | DataType::Float16
        | DataType::Bfloat16
        | DataType::Int8
        | DataType::Int32
        | DataType::Int64
        | DataType::Bool => true,
        DataType::Uint8 => allow_uint8,
        _ => false,
    }
}
