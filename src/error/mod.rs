//! Error types for onnx-importer
//!
//! [`ImportError`] is what importers and helpers return; the parser turns it
//! into a node-attributed [`Diagnostic`] at the node boundary.

mod diagnostic;

pub use diagnostic::{Diagnostic, Severity};

use std::fmt;

use thiserror::Error;

/// Category of an import failure, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Success
    Success,
    /// Bug in the importer or an engine-side failure
    InternalError,
    /// The model bytes could not be decoded
    ModelDeserializeFailed,
    /// A value (weight, attribute payload) is malformed
    InvalidValue,
    /// The graph is structurally invalid
    InvalidGraph,
    /// A node is malformed
    InvalidNode,
    /// The graph uses a construct the importer cannot express
    UnsupportedGraph,
    /// No importer is registered for the operator
    UnsupportedNode,
    /// An attribute value is not supported
    UnsupportedNodeAttr,
    /// An input kind (tensor vs. constant) is not supported
    UnsupportedNodeInput,
    /// A data type is not supported
    UnsupportedNodeDatatype,
    /// A dynamic value is required to be static
    UnsupportedNodeDynamic,
    /// Shapes are incompatible or cannot be inferred
    UnsupportedNodeShape,
}

impl ErrorCode {
    /// Stable string name of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Success => "SUCCESS",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ModelDeserializeFailed => "MODEL_DESERIALIZE_FAILED",
            ErrorCode::InvalidValue => "INVALID_VALUE",
            ErrorCode::InvalidGraph => "INVALID_GRAPH",
            ErrorCode::InvalidNode => "INVALID_NODE",
            ErrorCode::UnsupportedGraph => "UNSUPPORTED_GRAPH",
            ErrorCode::UnsupportedNode => "UNSUPPORTED_NODE",
            ErrorCode::UnsupportedNodeAttr => "UNSUPPORTED_NODE_ATTR",
            ErrorCode::UnsupportedNodeInput => "UNSUPPORTED_NODE_INPUT",
            ErrorCode::UnsupportedNodeDatatype => "UNSUPPORTED_NODE_DATATYPE",
            ErrorCode::UnsupportedNodeDynamic => "UNSUPPORTED_NODE_DYNAMIC",
            ErrorCode::UnsupportedNodeShape => "UNSUPPORTED_NODE_SHAPE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for model import operations
#[derive(Error, Debug)]
pub enum ImportError {
    /// No importer registered for the operator
    #[error("No importer registered for op: {0}")]
    UnsupportedNode(String),

    /// Attribute present but with an unsupported value
    #[error("Unsupported attribute '{name}': {reason}")]
    UnsupportedAttribute {
        /// Attribute name
        name: String,
        /// Why it is rejected
        reason: String,
    },

    /// Input kind not supported (e.g. tensor where a constant is required)
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// Tensor data type not supported
    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(i32),

    /// Value must be known at import time
    #[error("Dynamic value not supported: {0}")]
    UnsupportedDynamic(String),

    /// Shapes incompatible or not inferable
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Malformed node
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    /// Structurally invalid graph
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// Malformed value
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Graph construct not supported
    #[error("Unsupported graph: {0}")]
    UnsupportedGraph(String),

    /// Model bytes could not be decoded
    #[error("Failed to deserialize model: {0}")]
    ModelDeserialize(String),

    /// Failure inside a subgraph or local function body
    #[error("{context}: {message}")]
    Nested {
        /// Where the nested failure happened
        context: String,
        /// Code of the innermost failure
        code: ErrorCode,
        /// Message of the innermost failure
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protobuf decode error
    #[error("Protobuf decode error: {0}")]
    ProtoDecode(#[from] prost::DecodeError),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ImportError {
    /// Error category reported in diagnostics
    pub fn code(&self) -> ErrorCode {
        match self {
            ImportError::UnsupportedNode(_) => ErrorCode::UnsupportedNode,
            ImportError::UnsupportedAttribute { .. } => ErrorCode::UnsupportedNodeAttr,
            ImportError::UnsupportedInput(_) => ErrorCode::UnsupportedNodeInput,
            ImportError::UnsupportedDataType(_) => ErrorCode::UnsupportedNodeDatatype,
            ImportError::UnsupportedDynamic(_) => ErrorCode::UnsupportedNodeDynamic,
            ImportError::ShapeMismatch(_) => ErrorCode::UnsupportedNodeShape,
            ImportError::InvalidNode(_) => ErrorCode::InvalidNode,
            ImportError::InvalidGraph(_) => ErrorCode::InvalidGraph,
            ImportError::InvalidValue(_) => ErrorCode::InvalidValue,
            ImportError::UnsupportedGraph(_) => ErrorCode::UnsupportedGraph,
            ImportError::ModelDeserialize(_) | ImportError::ProtoDecode(_) => {
                ErrorCode::ModelDeserializeFailed
            }
            ImportError::Nested { code, .. } => *code,
            ImportError::Io(_) | ImportError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Shorthand for an unsupported attribute value
    pub fn attribute(name: &str, reason: impl Into<String>) -> Self {
        ImportError::UnsupportedAttribute {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for import operations
pub type ImportResult<T> = Result<T, ImportError>;
