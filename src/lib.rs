//! # ONNX Importer
//!
//! Builds an inference-engine network definition from an ONNX model.
//!
//! The importer decodes a `ModelProto`, checks or imports its graph node by
//! node through a registry of operator importers, and reports every failure
//! as a node-attributed diagnostic.
//!
//! ## Features
//!
//! - **Support queries**: partition a model into importable and unsupported
//!   node runs without touching the network
//! - **Node importers**: activations, convolution and pooling, matrix
//!   multiplication, shape ops, reductions, normalization, `If`
//! - **Local functions**: model-scoped functions expanded in place
//! - **Plugins**: operators implemented by external libraries
//!
//! ## Example
//!
//! ```ignore
//! use onnx_importer::prelude::*;
//!
//! let mut network = Network::new();
//! let mut importer = ModelImporter::new(&mut network);
//! let ok = importer.parse_from_file("model.onnx", 2);
//! println!("{} diagnostics", importer.num_errors());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// ============================================================================
// Module declarations
// ============================================================================

pub mod context;
pub mod error;
pub mod importer;
pub mod importers;
pub mod io;
pub mod network;
pub mod parser;
pub mod proto;
pub mod tensor;
pub mod weights;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Prelude module - import commonly used types with `use onnx_importer::prelude::*`
pub mod prelude {
    pub use crate::context::{ImportContext, TensorOrWeights};
    pub use crate::error::{Diagnostic, ErrorCode, ImportError, ImportResult, Severity};
    pub use crate::importer::{ImportOptions, ModelImporter, ParseState, ParserFlag, ParserFlags};
    pub use crate::importers::{NodeImporter, NodeOutputs, OperatorRegistry, PluginCatalog};
    pub use crate::io::{get_model_info, load_model, ModelInfo};
    pub use crate::network::{LayerKind, Network, NetworkDefinition, TensorId, TensorInfo};
    pub use crate::parser::{SubGraph, SubGraphCollection};
    pub use crate::proto::onnx::*;
    pub use crate::weights::Weights;
}

// ============================================================================
// Crate-level re-exports
// ============================================================================

pub use error::{Diagnostic, ErrorCode, ImportError, ImportResult};
pub use importer::ModelImporter;

// ============================================================================
// Version information
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use io::{MAX_OPSET_VERSION, MIN_OPSET_VERSION};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_opset_range() {
        assert_eq!(MIN_OPSET_VERSION, 7);
        assert_eq!(MAX_OPSET_VERSION, 21);
    }
}
