//! Reductions

use crate::context::{ImportContext, TensorOrWeights};
use crate::error::{ImportError, ImportResult};
use crate::network::{LayerKind, ReduceOp, TensorInfo};
use crate::proto::NodeProto;
use crate::tensor::normalize_axes;

use super::common::{input, input_tensor, ints_from_input_or_attr, single_output};
use super::{Arity, BuiltinImporter, NodeOutputs};

pub(crate) fn importers() -> Vec<(&'static str, BuiltinImporter)> {
    let reduce = BuiltinImporter::with_check(Arity::range(1, 2), import_reduce, check_reduce);
    ["ReduceMean", "ReduceSum", "ReduceMax", "ReduceMin", "ReduceProd"]
        .into_iter()
        .map(|op| (op, reduce))
        .collect()
}

fn reduce_op(op_type: &str) -> Option<ReduceOp> {
    Some(match op_type {
        "ReduceMean" => ReduceOp::Avg,
        "ReduceSum" => ReduceOp::Sum,
        "ReduceMax" => ReduceOp::Max,
        "ReduceMin" => ReduceOp::Min,
        "ReduceProd" => ReduceOp::Prod,
        _ => return None,
    })
}

/// Opset from which `axes` moved from an attribute to an input
fn axes_input_since(op_type: &str) -> i64 {
    if op_type == "ReduceSum" {
        13
    } else {
        18
    }
}

fn check_reduce(_ctx: &ImportContext<'_>, node: &NodeProto) -> ImportResult<()> {
    if node.get_attribute_int("noop_with_empty_axes", 0) != 0 {
        return Err(ImportError::attribute(
            "noop_with_empty_axes",
            "only the default (reduce all) is supported",
        ));
    }
    Ok(())
}

/// Output dimensions of a reduction
pub fn reduced_dims(dims: &[i64], axes: &[usize], keep_dims: bool) -> Vec<i64> {
    dims.iter()
        .enumerate()
        .filter_map(|(i, &d)| {
            if !axes.contains(&i) {
                Some(d)
            } else if keep_dims {
                Some(1)
            } else {
                None
            }
        })
        .collect()
}

fn import_reduce(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    check_reduce(ctx, node)?;
    let op = reduce_op(&node.op_type).ok_or_else(|| {
        ImportError::Internal(format!("No layer mapping for op type '{}'", node.op_type))
    })?;
    let info = ctx.info(input(node, inputs, 0)?)?;
    let since = axes_input_since(&node.op_type);
    let axes = match ints_from_input_or_attr(ctx, node, inputs, 1, "axes", since)? {
        Some(axes) if !axes.is_empty() => normalize_axes(&axes, info.rank())?,
        _ => (0..info.rank()).collect(),
    };
    let keep_dims = node.get_attribute_int("keepdims", 1) != 0;
    let dims = reduced_dims(&info.dims, &axes, keep_dims);

    let x = input_tensor(ctx, node, inputs, 0)?;
    single_output(
        ctx,
        node,
        LayerKind::Reduce {
            op,
            axes,
            keep_dims,
        },
        &[x],
        TensorInfo {
            dtype: info.dtype,
            dims,
        },
    )
}
