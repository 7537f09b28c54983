//! Constant tensor data referenced by the network
//!
//! Top-level initializers are never copied: a [`Weights`] handle keeps the
//! deserialized model alive through an `Arc` and points at the initializer by
//! index. Values synthesized during import (folded constants, `Constant`
//! node payloads, subgraph initializers, resolved external data) are owned.

pub mod external;

use std::fmt;
use std::sync::Arc;

use ndarray::ArrayD;

use crate::error::ImportResult;
use crate::proto::tensor_proto::DataType;
use crate::proto::{ModelProto, TensorProto};
use crate::tensor::{tensor_to_array_f32, tensor_to_array_i64};

#[derive(Clone)]
enum WeightSource {
    /// Only built by [`Weights::from_initializer`], which checks that the
    /// graph and the initializer exist. The model is immutable behind the
    /// `Arc`, so the index stays valid.
    Initializer { model: Arc<ModelProto>, index: usize },
    Owned(Arc<TensorProto>),
}

/// Typed constant tensor data
#[derive(Clone)]
pub struct Weights {
    source: WeightSource,
}

impl Weights {
    /// View the `index`-th initializer of the model's top-level graph
    ///
    /// Returns `None` when the model has no such initializer.
    pub fn from_initializer(model: Arc<ModelProto>, index: usize) -> Option<Self> {
        let exists = model
            .graph
            .as_ref()
            .map(|g| index < g.initializer.len())
            .unwrap_or(false);
        exists.then(|| Self {
            source: WeightSource::Initializer { model, index },
        })
    }

    /// Take ownership of a tensor
    pub fn from_tensor(tensor: TensorProto) -> Self {
        Self {
            source: WeightSource::Owned(Arc::new(tensor)),
        }
    }

    /// The underlying tensor
    pub fn tensor(&self) -> &TensorProto {
        match &self.source {
            WeightSource::Initializer { model, index } => match &model.graph {
                Some(graph) => &graph.initializer[*index],
                None => unreachable!("initializer view over a model without a graph"),
            },
            WeightSource::Owned(tensor) => tensor.as_ref(),
        }
    }

    /// Whether the data is a view into a retained model
    pub fn is_shared(&self) -> bool {
        matches!(self.source, WeightSource::Initializer { .. })
    }

    /// The model this view keeps alive, if any
    pub fn source_model(&self) -> Option<&Arc<ModelProto>> {
        match &self.source {
            WeightSource::Initializer { model, .. } => Some(model),
            WeightSource::Owned(_) => None,
        }
    }

    /// Tensor name (may be empty for synthesized constants)
    pub fn name(&self) -> &str {
        &self.tensor().name
    }

    /// Dimensions
    pub fn dims(&self) -> &[i64] {
        &self.tensor().dims
    }

    /// Element type
    pub fn dtype(&self) -> DataType {
        self.tensor().data_type_enum()
    }

    /// Number of elements
    pub fn count(&self) -> ImportResult<usize> {
        self.tensor().num_elements()
    }

    /// Whether the payload still lives in an external file
    pub fn is_external(&self) -> bool {
        self.tensor().is_external()
    }

    /// Decode as f32
    pub fn to_array_f32(&self) -> ImportResult<ArrayD<f32>> {
        tensor_to_array_f32(self.tensor())
    }

    /// Decode as i64
    pub fn to_array_i64(&self) -> ImportResult<ArrayD<i64>> {
        tensor_to_array_i64(self.tensor())
    }

    /// Decode as a flat i64 vector
    pub fn to_vec_i64(&self) -> ImportResult<Vec<i64>> {
        Ok(self.to_array_i64()?.iter().copied().collect())
    }
}

impl fmt::Debug for Weights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Weights")
            .field("name", &self.name())
            .field("dtype", &self.dtype())
            .field("dims", &self.dims())
            .field("shared", &self.is_shared())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::GraphProto;

    fn model_with_initializer() -> Arc<ModelProto> {
        Arc::new(ModelProto {
            graph: Some(GraphProto {
                initializer: vec![TensorProto {
                    name: "W".to_string(),
                    dims: vec![2],
                    data_type: DataType::Float as i32,
                    float_data: vec![1.0, 2.0],
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn test_initializer_view_keeps_model_alive() {
        let model = model_with_initializer();
        let weights = Weights::from_initializer(model.clone(), 0).unwrap();
        assert_eq!(Arc::strong_count(&model), 2);
        drop(model);

        assert!(weights.is_shared());
        assert_eq!(weights.source_model().map(Arc::strong_count), Some(1));
        assert_eq!(weights.name(), "W");
        assert_eq!(weights.to_array_f32().unwrap()[1], 2.0);
    }

    #[test]
    fn test_initializer_view_is_not_a_copy() {
        let model = model_with_initializer();
        let weights = Weights::from_initializer(model.clone(), 0).unwrap();
        let original = &model.graph.as_ref().unwrap().initializer[0];
        assert!(std::ptr::eq(weights.tensor(), original));
    }

    #[test]
    fn test_missing_initializer() {
        assert!(Weights::from_initializer(model_with_initializer(), 3).is_none());
        assert!(Weights::from_initializer(Arc::new(ModelProto::default()), 0).is_none());
    }

    #[test]
    fn test_owned_weights() {
        let weights = Weights::from_tensor(crate::tensor::vec_to_tensor_i64(&[4, 5], "shape"));
        assert!(!weights.is_shared());
        assert!(weights.source_model().is_none());
        assert_eq!(weights.dtype(), DataType::Int64);
        assert_eq!(weights.to_vec_i64().unwrap(), vec![4, 5]);
    }
}
