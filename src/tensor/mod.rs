//! Tensor utilities for ONNX models
//!
//! This module provides utilities for working with ONNX tensors:
//! - Data type mappings (`dtype`)
//! - Shape utilities (`shape`)
//! - Conversion between TensorProto and ndarray (`convert`)

pub mod convert;
pub mod dtype;
pub mod shape;

// Re-export commonly used items
pub use convert::{
    array_to_tensor_f32, scalar_to_tensor_f32, tensor_to_array_f32, tensor_to_array_i64,
    vec_to_tensor_i64,
};
pub use dtype::{dtype_size, i32_to_dtype, is_network_type};
pub use shape::{
    broadcast_shape, is_broadcastable, is_dynamic, normalize_axes, normalize_axis, numel,
    window_output_dim,
};
