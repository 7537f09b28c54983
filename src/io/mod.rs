//! ONNX I/O module
//!
//! Reading models from disk or memory and checking their opset imports.
//!
//! # Example
//!
//! ```ignore
//! use onnx_importer::io::{get_model_info, load_model};
//!
//! let model = load_model("model.onnx")?;
//! let info = get_model_info("model.onnx")?;
//! println!("{} nodes", info.node_count);
//! ```

pub mod reader;
pub mod validation;

// Re-exports
pub use reader::{get_model_info, load_model, load_model_from_bytes, read_model_bytes, ModelInfo};
pub use validation::{check_opsets, is_opset_supported, MAX_OPSET_VERSION, MIN_OPSET_VERSION};
