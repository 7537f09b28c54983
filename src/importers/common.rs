//! Common utilities for importers
//!
//! Shared helpers for reading attributes, resolving inputs and emitting
//! single-output layers.

use smallvec::smallvec;

use crate::context::{ImportContext, TensorOrWeights};
use crate::error::{ImportError, ImportResult};
use crate::network::{LayerKind, TensorId, TensorInfo};
use crate::proto::{NodeProto, TensorProto};
use crate::weights::Weights;

use super::NodeOutputs;

/// Get attribute value as i64
pub fn get_attr_i(node: &NodeProto, name: &str) -> Option<i64> {
    node.get_attribute(name).map(|a| a.i)
}

/// Get attribute value as f32
pub fn get_attr_f(node: &NodeProto, name: &str) -> Option<f32> {
    node.get_attribute(name).map(|a| a.f)
}

/// Get attribute value as i64 list, or `default` when absent
pub fn get_attr_ints_or(node: &NodeProto, name: &str, default: &[i64]) -> Vec<i64> {
    node.get_attribute_ints(name)
        .map(|v| v.to_vec())
        .unwrap_or_else(|| default.to_vec())
}

/// Get a required attribute value as i64
pub fn require_attr_i(node: &NodeProto, name: &str) -> ImportResult<i64> {
    get_attr_i(node, name).ok_or_else(|| missing_attr(node, name))
}

/// Get a required attribute value as i64 list
pub fn require_attr_ints<'a>(node: &'a NodeProto, name: &str) -> ImportResult<&'a [i64]> {
    node.get_attribute_ints(name)
        .ok_or_else(|| missing_attr(node, name))
}

/// Error for a required attribute that is absent
pub fn missing_attr(node: &NodeProto, name: &str) -> ImportError {
    ImportError::InvalidNode(format!(
        "{} '{}' is missing required attribute '{}'",
        node.op_type,
        node.display_name(),
        name
    ))
}

/// Reject `auto_pad` values other than `NOTSET`
pub fn check_auto_pad(node: &NodeProto) -> ImportResult<()> {
    match node.get_attribute_string("auto_pad").as_deref() {
        None | Some("NOTSET") | Some("") => Ok(()),
        Some(other) => Err(ImportError::attribute(
            "auto_pad",
            format!("'{}' is not supported, use explicit pads", other),
        )),
    }
}

/// The `index`-th input, which must be present
pub fn input<'a>(
    node: &NodeProto,
    inputs: &'a [Option<TensorOrWeights>],
    index: usize,
) -> ImportResult<&'a TensorOrWeights> {
    inputs.get(index).and_then(Option::as_ref).ok_or_else(|| {
        ImportError::InvalidNode(format!(
            "{} '{}' is missing required input {}",
            node.op_type,
            node.display_name(),
            index
        ))
    })
}

/// The `index`-th input if present
pub fn optional_input(
    inputs: &[Option<TensorOrWeights>],
    index: usize,
) -> Option<&TensorOrWeights> {
    inputs.get(index).and_then(Option::as_ref)
}

/// The `index`-th input as a network tensor
pub fn input_tensor(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
    index: usize,
) -> ImportResult<TensorId> {
    let value = input(node, inputs, index)?;
    ctx.to_tensor(value)
}

/// The `index`-th input, which must be a constant
pub fn input_weights<'a>(
    node: &NodeProto,
    inputs: &'a [Option<TensorOrWeights>],
    index: usize,
) -> ImportResult<&'a Weights> {
    input(node, inputs, index)?.as_weights().ok_or_else(|| {
        ImportError::UnsupportedInput(format!(
            "{} '{}' requires input {} to be a constant",
            node.op_type,
            node.display_name(),
            index
        ))
    })
}

/// Optional constant i64 list input, falling back to an attribute on older
/// opsets
pub fn ints_from_input_or_attr(
    ctx: &ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
    index: usize,
    attr: &str,
    input_since: i64,
) -> ImportResult<Option<Vec<i64>>> {
    if ctx.opset_version(&node.domain) < input_since {
        return Ok(node.get_attribute_ints(attr).map(|v| v.to_vec()));
    }
    match optional_input(inputs, index) {
        None => Ok(None),
        Some(TensorOrWeights::Weights(w)) => Ok(Some(w.to_vec_i64()?)),
        Some(TensorOrWeights::Tensor(_)) => Err(ImportError::UnsupportedDynamic(format!(
            "{} '{}': input {} must be a constant",
            node.op_type,
            node.display_name(),
            index
        ))),
    }
}

/// Add a single-output layer and return its output
pub fn single_output(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    kind: LayerKind,
    inputs: &[TensorId],
    output: TensorInfo,
) -> ImportResult<NodeOutputs> {
    let id = add_single(ctx, node, kind, inputs, output)?;
    Ok(smallvec![TensorOrWeights::Tensor(id)])
}

/// Add a single-output layer and return its output tensor id
pub fn add_single(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    kind: LayerKind,
    inputs: &[TensorId],
    output: TensorInfo,
) -> ImportResult<TensorId> {
    let layer = ctx.add_layer(node, kind, inputs, &[output])?;
    ctx.layer_output(layer)
}

/// A copy of `weights` with new dimensions
pub fn reshape_weights(weights: &Weights, dims: &[i64]) -> Weights {
    Weights::from_tensor(TensorProto {
        dims: dims.to_vec(),
        ..weights.tensor().clone()
    })
}

/// Reject nodes that request more outputs than the importer produces
pub fn check_outputs(node: &NodeProto, max: usize) -> ImportResult<()> {
    if node.output.iter().skip(max).any(|o| !o.is_empty()) {
        return Err(ImportError::UnsupportedNode(format!(
            "{} '{}' with more than {} output(s)",
            node.op_type,
            node.display_name(),
            max
        )));
    }
    Ok(())
}
