//! Control flow: `If`

use smallvec::smallvec;

use crate::context::{ImportContext, TensorOrWeights};
use crate::error::{ImportError, ImportResult};
use crate::network::{LayerKind, TensorInfo};
use crate::parser::import_subgraph;
use crate::proto::tensor_proto::DataType;
use crate::proto::{GraphProto, NodeProto};

use super::common::{add_single, input, input_tensor};
use super::{Arity, BuiltinImporter, NodeOutputs};

pub(crate) fn importers() -> Vec<(&'static str, BuiltinImporter)> {
    vec![(
        "If",
        BuiltinImporter::with_check(Arity::exactly(1), import_if, check_if),
    )]
}

fn branches(node: &NodeProto) -> ImportResult<(&GraphProto, &GraphProto)> {
    let branch = |name: &str| {
        node.get_attribute_graph(name).ok_or_else(|| {
            ImportError::InvalidNode(format!(
                "If '{}' is missing its {} graph",
                node.display_name(),
                name
            ))
        })
    };
    let then_branch = branch("then_branch")?;
    let else_branch = branch("else_branch")?;
    if then_branch.output.len() != else_branch.output.len() {
        return Err(ImportError::InvalidNode(format!(
            "If '{}': branches produce {} and {} outputs",
            node.display_name(),
            then_branch.output.len(),
            else_branch.output.len()
        )));
    }
    if then_branch.output.len() != node.output.len() {
        return Err(ImportError::InvalidNode(format!(
            "If '{}': branches produce {} outputs, node declares {}",
            node.display_name(),
            then_branch.output.len(),
            node.output.len()
        )));
    }
    Ok((then_branch, else_branch))
}

fn check_if(_ctx: &ImportContext<'_>, node: &NodeProto) -> ImportResult<()> {
    branches(node).map(|_| ())
}

/// Merge branch output infos; differing extents become unknown
fn merge_info(node: &NodeProto, a: &TensorInfo, b: &TensorInfo) -> ImportResult<TensorInfo> {
    if a.dtype != b.dtype || a.rank() != b.rank() {
        return Err(ImportError::ShapeMismatch(format!(
            "If '{}': branch outputs {:?}{:?} and {:?}{:?} are incompatible",
            node.display_name(),
            a.dtype,
            a.dims,
            b.dtype,
            b.dims
        )));
    }
    let dims = a
        .dims
        .iter()
        .zip(&b.dims)
        .map(|(&x, &y)| if x == y { x } else { -1 })
        .collect();
    Ok(TensorInfo {
        dtype: a.dtype,
        dims,
    })
}

fn import_if(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let (then_branch, else_branch) = branches(node)?;
    let condition = input(node, inputs, 0)?;

    // A constant condition selects one branch at import time
    if let TensorOrWeights::Weights(w) = condition {
        let count = w.count()?;
        if count != 1 {
            return Err(ImportError::InvalidValue(format!(
                "If '{}': condition has {} elements",
                node.display_name(),
                count
            )));
        }
        let taken = w.to_vec_i64()?.first().copied().unwrap_or(0) != 0;
        let branch = if taken { then_branch } else { else_branch };
        let deserializing = ctx.is_deserializing();
        return import_subgraph(ctx, branch, deserializing);
    }

    let cond_info = ctx.info(condition)?;
    if cond_info.dtype != DataType::Bool || cond_info.rank() > 1 {
        return Err(ImportError::UnsupportedInput(format!(
            "If '{}': condition must be a boolean scalar, got {:?}{:?}",
            node.display_name(),
            cond_info.dtype,
            cond_info.dims
        )));
    }

    let deserializing = ctx.is_deserializing();
    let then_outputs = import_subgraph(ctx, then_branch, deserializing)?;
    let else_outputs = import_subgraph(ctx, else_branch, deserializing)?;
    let cond = input_tensor(ctx, node, inputs, 0)?;

    let mut outputs: NodeOutputs = smallvec![];
    for (then_value, else_value) in then_outputs.iter().zip(else_outputs.iter()) {
        let info = merge_info(node, &ctx.info(then_value)?, &ctx.info(else_value)?)?;
        let then_tensor = ctx.to_tensor(then_value)?;
        let else_tensor = ctx.to_tensor(else_value)?;
        let y = add_single(
            ctx,
            node,
            LayerKind::Conditional,
            &[cond, then_tensor, else_tensor],
            info,
        )?;
        outputs.push(TensorOrWeights::Tensor(y));
    }
    Ok(outputs)
}
