//! ONNX model reader
//!
//! Load ONNX models from files or bytes.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use prost::Message;

use crate::error::{ImportError, ImportResult};
use crate::proto::ModelProto;

/// Read the raw bytes of a model file
pub fn read_model_bytes<P: AsRef<Path>>(path: P) -> ImportResult<Vec<u8>> {
    let path = path.as_ref();

    let file = File::open(path).map_err(|e| {
        ImportError::ModelDeserialize(format!("Failed to open file '{}': {}", path.display(), e))
    })?;

    let mut reader = BufReader::new(file);
    let mut buffer = Vec::new();

    reader.read_to_end(&mut buffer).map_err(|e| {
        ImportError::ModelDeserialize(format!("Failed to read file '{}': {}", path.display(), e))
    })?;

    Ok(buffer)
}

/// Load an ONNX model from a file path
///
/// # Example
///
/// ```ignore
/// use onnx_importer::io::load_model;
///
/// let model = load_model("model.onnx")?;
/// println!("Model IR version: {}", model.ir_version);
/// ```
pub fn load_model<P: AsRef<Path>>(path: P) -> ImportResult<ModelProto> {
    load_model_from_bytes(&read_model_bytes(path)?)
}

/// Load an ONNX model from bytes
pub fn load_model_from_bytes(bytes: &[u8]) -> ImportResult<ModelProto> {
    ModelProto::decode(bytes)
        .map_err(|e| ImportError::ModelDeserialize(format!("Failed to decode ONNX model: {}", e)))
}

/// Model metadata extracted from ONNX file
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// IR version
    pub ir_version: i64,
    /// Producer name
    pub producer_name: String,
    /// Producer version
    pub producer_version: String,
    /// Opset imports
    pub opsets: Vec<(String, i64)>,
    /// Graph name
    pub graph_name: String,
    /// Number of nodes
    pub node_count: usize,
    /// Number of initializers
    pub initializer_count: usize,
    /// Number of model-local functions
    pub function_count: usize,
    /// Input names (initializers excluded)
    pub inputs: Vec<String>,
    /// Output names
    pub outputs: Vec<String>,
}

impl ModelInfo {
    /// Extract metadata from a model
    pub fn from_model(model: &ModelProto) -> Self {
        let graph = model.graph.as_ref();

        Self {
            ir_version: model.ir_version,
            producer_name: model.producer_name.clone(),
            producer_version: model.producer_version.clone(),
            opsets: model
                .opset_import
                .iter()
                .map(|op| (op.domain.clone(), op.version))
                .collect(),
            graph_name: graph.map(|g| g.name.clone()).unwrap_or_default(),
            node_count: graph.map(|g| g.node.len()).unwrap_or(0),
            initializer_count: graph.map(|g| g.initializer.len()).unwrap_or(0),
            function_count: model.functions.len(),
            inputs: graph
                .map(|g| {
                    g.input
                        .iter()
                        .filter(|i| !g.initializer.iter().any(|t| t.name == i.name))
                        .map(|i| i.name.clone())
                        .collect()
                })
                .unwrap_or_default(),
            outputs: graph
                .map(|g| g.output.iter().map(|o| o.name.clone()).collect())
                .unwrap_or_default(),
        }
    }
}

/// Get model information without importing it
pub fn get_model_info<P: AsRef<Path>>(path: P) -> ImportResult<ModelInfo> {
    let model = load_model(path)?;
    Ok(ModelInfo::from_model(&model))
}
