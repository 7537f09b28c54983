//! Test fixtures shared by the importer families

use std::sync::Arc;

use crate::context::{ImportContext, TensorOrWeights};
use crate::importers::OperatorRegistry;
use crate::network::{Network, NetworkDefinition, TensorInfo};
use crate::proto::extensions::make_opset;
use crate::proto::{ModelProto, NodeProto, TensorProto};
use crate::weights::Weights;

/// Context over `network` with the given network inputs registered
pub fn context<'n>(
    network: &'n mut Network,
    opset: i64,
    tensors: &[(&str, TensorInfo)],
) -> ImportContext<'n> {
    let ids: Vec<_> = tensors
        .iter()
        .map(|(name, info)| network.add_input(name, info.clone()).unwrap())
        .collect();
    let mut ctx = ImportContext::new(network, Arc::new(OperatorRegistry::builtin()));
    ctx.load_model_metadata(&ModelProto {
        opset_import: vec![make_opset(opset)],
        ..Default::default()
    });
    for ((name, _), id) in tensors.iter().zip(ids) {
        ctx.register_tensor(name, id.into(), false).unwrap();
    }
    ctx
}

/// Register a constant under its tensor name
pub fn constant(ctx: &mut ImportContext<'_>, tensor: TensorProto) {
    let name = tensor.name.clone();
    ctx.register_tensor(&name, Weights::from_tensor(tensor).into(), false)
        .unwrap();
}

/// Resolve a node's inputs the way the node parser does
pub fn inputs(ctx: &ImportContext<'_>, node: &NodeProto) -> Vec<Option<TensorOrWeights>> {
    node.input.iter().map(|n| ctx.tensor(n).cloned()).collect()
}

/// Type and shape of the first output
pub fn output_info(
    ctx: &ImportContext<'_>,
    outputs: &crate::importers::NodeOutputs,
) -> TensorInfo {
    ctx.info(&outputs[0]).unwrap()
}
