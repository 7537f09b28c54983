//! Target network definition
//!
//! The importer writes into anything implementing [`NetworkDefinition`]. The
//! crate ships [`Network`], an in-memory implementation that simply records
//! tensors and layers in creation order.
//!
//! # Example
//!
//! ```ignore
//! use onnx_importer::network::{Network, NetworkDefinition, TensorInfo};
//!
//! let mut network = Network::new();
//! let x = network.add_input("x", TensorInfo::float(&[1, 3, 224, 224]))?;
//! network.mark_output(x)?;
//! ```

pub mod layer;

pub use layer::{
    ActivationOp, ElementWiseOp, LayerKind, NormalizationOp, PoolingOp, ReduceOp, ScaleMode,
    UnaryOp,
};

use crate::error::{ImportError, ImportResult};
use crate::proto::tensor_proto::DataType;

/// Handle to a tensor of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(usize);

impl TensorId {
    /// Position in creation order
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Handle to a layer of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(usize);

impl LayerId {
    /// Position in creation order
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Element type and dimensions of a tensor (`-1` = unknown extent)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    /// Element type
    pub dtype: DataType,
    /// Dimensions
    pub dims: Vec<i64>,
}

impl TensorInfo {
    /// Create from type and dimensions
    pub fn new(dtype: DataType, dims: &[i64]) -> Self {
        Self {
            dtype,
            dims: dims.to_vec(),
        }
    }

    /// Float tensor
    pub fn float(dims: &[i64]) -> Self {
        Self::new(DataType::Float, dims)
    }

    /// Rank
    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

/// A tensor recorded by a network
#[derive(Debug, Clone)]
pub struct NetworkTensor {
    /// Tensor name
    pub name: String,
    /// Type and shape
    pub info: TensorInfo,
    /// Layer producing it (`None` for network inputs)
    pub producer: Option<LayerId>,
}

/// A layer recorded by a network
#[derive(Debug, Clone)]
pub struct Layer {
    /// Layer name
    pub name: String,
    /// What it computes
    pub kind: LayerKind,
    /// Consumed tensors
    pub inputs: Vec<TensorId>,
    /// Produced tensors
    pub outputs: Vec<TensorId>,
}

/// The in-memory graph an inference engine builds from
///
/// Implementations own their tensors and layers; the importer only holds
/// handles.
pub trait NetworkDefinition {
    /// Declare a network input
    fn add_input(&mut self, name: &str, info: TensorInfo) -> ImportResult<TensorId>;

    /// Append a layer; returns its id. Output tensors are created with the
    /// given infos and default names.
    fn add_layer(
        &mut self,
        kind: LayerKind,
        inputs: &[TensorId],
        outputs: &[TensorInfo],
    ) -> ImportResult<LayerId>;

    /// Mark a tensor as a network output
    fn mark_output(&mut self, tensor: TensorId) -> ImportResult<()>;

    /// Rename a layer
    fn set_layer_name(&mut self, layer: LayerId, name: &str) -> ImportResult<()>;

    /// Rename a tensor
    fn set_tensor_name(&mut self, tensor: TensorId, name: &str) -> ImportResult<()>;

    /// Look up a tensor
    fn tensor(&self, id: TensorId) -> Option<&NetworkTensor>;

    /// Look up a layer
    fn layer(&self, id: LayerId) -> Option<&Layer>;

    /// Number of layers
    fn num_layers(&self) -> usize;

    /// Network inputs in declaration order
    fn inputs(&self) -> &[TensorId];

    /// Network outputs in marking order
    fn outputs(&self) -> &[TensorId];

    /// The `index`-th output of a layer
    fn layer_output(&self, layer: LayerId, index: usize) -> Option<TensorId> {
        self.layer(layer).and_then(|l| l.outputs.get(index).copied())
    }
}

/// In-memory [`NetworkDefinition`]
#[derive(Debug, Default)]
pub struct Network {
    tensors: Vec<NetworkTensor>,
    layers: Vec<Layer>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
}

impl Network {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Layers in creation order
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Tensors in creation order
    pub fn tensors(&self) -> &[NetworkTensor] {
        &self.tensors
    }

    /// Find a tensor by name
    pub fn find_tensor(&self, name: &str) -> Option<TensorId> {
        self.tensors
            .iter()
            .position(|t| t.name == name)
            .map(TensorId)
    }

    /// Find a layer by name
    pub fn find_layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Whether nothing has been added yet
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty() && self.layers.is_empty()
    }

    fn check_tensor(&self, id: TensorId) -> ImportResult<()> {
        if id.0 < self.tensors.len() {
            Ok(())
        } else {
            Err(ImportError::Internal(format!(
                "Tensor id {} does not belong to this network",
                id.0
            )))
        }
    }
}

impl NetworkDefinition for Network {
    fn add_input(&mut self, name: &str, info: TensorInfo) -> ImportResult<TensorId> {
        if self
            .inputs
            .iter()
            .any(|&id| self.tensors[id.0].name == name)
        {
            return Err(ImportError::InvalidGraph(format!(
                "Network input '{}' declared twice",
                name
            )));
        }
        let id = TensorId(self.tensors.len());
        self.tensors.push(NetworkTensor {
            name: name.to_string(),
            info,
            producer: None,
        });
        self.inputs.push(id);
        Ok(id)
    }

    fn add_layer(
        &mut self,
        kind: LayerKind,
        inputs: &[TensorId],
        outputs: &[TensorInfo],
    ) -> ImportResult<LayerId> {
        for &input in inputs {
            self.check_tensor(input)?;
        }

        let layer_id = LayerId(self.layers.len());
        let name = format!("(Unnamed Layer* {}) [{}]", layer_id.0, kind);
        let output_ids = outputs
            .iter()
            .enumerate()
            .map(|(i, info)| {
                let id = TensorId(self.tensors.len());
                self.tensors.push(NetworkTensor {
                    name: format!("{}_output_{}", name, i),
                    info: info.clone(),
                    producer: Some(layer_id),
                });
                id
            })
            .collect();

        self.layers.push(Layer {
            name,
            kind,
            inputs: inputs.to_vec(),
            outputs: output_ids,
        });
        Ok(layer_id)
    }

    fn mark_output(&mut self, tensor: TensorId) -> ImportResult<()> {
        self.check_tensor(tensor)?;
        if !self.outputs.contains(&tensor) {
            self.outputs.push(tensor);
        }
        Ok(())
    }

    fn set_layer_name(&mut self, layer: LayerId, name: &str) -> ImportResult<()> {
        let entry = self.layers.get_mut(layer.0).ok_or_else(|| {
            ImportError::Internal(format!("Layer id {} does not belong to this network", layer.0))
        })?;
        entry.name = name.to_string();
        Ok(())
    }

    fn set_tensor_name(&mut self, tensor: TensorId, name: &str) -> ImportResult<()> {
        self.check_tensor(tensor)?;
        self.tensors[tensor.0].name = name.to_string();
        Ok(())
    }

    fn tensor(&self, id: TensorId) -> Option<&NetworkTensor> {
        self.tensors.get(id.0)
    }

    fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id.0)
    }

    fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_layer_creates_outputs() {
        let mut network = Network::new();
        let x = network.add_input("x", TensorInfo::float(&[1, 4])).unwrap();
        let layer = network
            .add_layer(
                LayerKind::Activation {
                    op: ActivationOp::Relu,
                    alpha: 0.0,
                    beta: 0.0,
                },
                &[x],
                &[TensorInfo::float(&[1, 4])],
            )
            .unwrap();

        let out = network.layer_output(layer, 0).unwrap();
        assert_eq!(network.tensor(out).unwrap().producer, Some(layer));
        assert_eq!(network.num_layers(), 1);
        assert!(network.layer_output(layer, 1).is_none());
    }

    #[test]
    fn test_foreign_tensor_is_rejected() {
        let mut network = Network::new();
        let other = TensorId(42);
        assert!(network.add_layer(LayerKind::Identity, &[other], &[]).is_err());
        assert!(network.mark_output(other).is_err());
    }

    #[test]
    fn test_duplicate_input() {
        let mut network = Network::new();
        network.add_input("x", TensorInfo::float(&[1])).unwrap();
        assert!(network.add_input("x", TensorInfo::float(&[1])).is_err());
    }

    #[test]
    fn test_rename_and_find() {
        let mut network = Network::new();
        let x = network.add_input("x", TensorInfo::float(&[2])).unwrap();
        let layer = network
            .add_layer(LayerKind::Identity, &[x], &[TensorInfo::float(&[2])])
            .unwrap();
        network.set_layer_name(layer, "id_0").unwrap();
        let y = network.layer_output(layer, 0).unwrap();
        network.set_tensor_name(y, "y").unwrap();

        assert_eq!(network.find_tensor("y"), Some(y));
        assert!(network.find_layer("id_0").is_some());
        network.mark_output(y).unwrap();
        network.mark_output(y).unwrap();
        assert_eq!(network.outputs(), &[y]);
    }
}
