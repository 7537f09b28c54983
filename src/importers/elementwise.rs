//! Broadcasting binary operators

use crate::context::{ImportContext, TensorOrWeights};
use crate::error::{ImportError, ImportResult};
use crate::network::{ElementWiseOp, LayerKind, TensorId, TensorInfo};
use crate::proto::tensor_proto::DataType;
use crate::proto::NodeProto;
use crate::tensor::broadcast_shape;

use super::common::{add_single, input, input_tensor};
use super::{Arity, BuiltinImporter, NodeOutputs};

pub(crate) fn importers() -> Vec<(&'static str, BuiltinImporter)> {
    let binary = BuiltinImporter::new(Arity::exactly(2), import_elementwise);
    let variadic = BuiltinImporter::new(Arity::at_least(1), import_elementwise);
    vec![
        ("Add", binary),
        ("Sub", binary),
        ("Mul", binary),
        ("Div", binary),
        ("Pow", binary),
        ("Equal", binary),
        ("Greater", binary),
        ("Less", binary),
        ("And", binary),
        ("Or", binary),
        ("Max", variadic),
        ("Min", variadic),
        ("Sum", variadic),
    ]
}

fn elementwise_op(op_type: &str) -> Option<ElementWiseOp> {
    Some(match op_type {
        "Add" | "Sum" => ElementWiseOp::Sum,
        "Sub" => ElementWiseOp::Sub,
        "Mul" => ElementWiseOp::Prod,
        "Div" => ElementWiseOp::Div,
        "Pow" => ElementWiseOp::Pow,
        "Max" => ElementWiseOp::Max,
        "Min" => ElementWiseOp::Min,
        "Equal" => ElementWiseOp::Equal,
        "Greater" => ElementWiseOp::Greater,
        "Less" => ElementWiseOp::Less,
        "And" => ElementWiseOp::And,
        "Or" => ElementWiseOp::Or,
        _ => return None,
    })
}

/// Output type and shape of `a op b`
pub fn binary_output_info(
    op: ElementWiseOp,
    a: &TensorInfo,
    b: &TensorInfo,
) -> ImportResult<TensorInfo> {
    if op != ElementWiseOp::Pow && a.dtype != b.dtype {
        return Err(ImportError::InvalidNode(format!(
            "Operand types differ: {:?} vs {:?}",
            a.dtype, b.dtype
        )));
    }
    let dims = broadcast_shape(&a.dims, &b.dims)?;
    let dtype = if op.is_comparison() {
        DataType::Bool
    } else {
        a.dtype
    };
    Ok(TensorInfo { dtype, dims })
}

/// Add one element-wise layer
pub fn add_binary(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    op: ElementWiseOp,
    a: TensorId,
    b: TensorId,
) -> ImportResult<TensorId> {
    let a_info = ctx.info(&a.into())?;
    let b_info = ctx.info(&b.into())?;
    let info = binary_output_info(op, &a_info, &b_info)?;
    add_single(ctx, node, LayerKind::ElementWise { op }, &[a, b], info)
}

fn import_elementwise(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let op = elementwise_op(&node.op_type).ok_or_else(|| {
        ImportError::Internal(format!("No layer mapping for op type '{}'", node.op_type))
    })?;

    // Single-operand Max/Min/Sum pass through
    if inputs.len() == 1 {
        let value = input(node, inputs, 0)?.clone();
        return Ok(smallvec::smallvec![value]);
    }

    let mut acc = input_tensor(ctx, node, inputs, 0)?;
    for index in 1..inputs.len() {
        let rhs = input_tensor(ctx, node, inputs, index)?;
        acc = add_binary(ctx, node, op, acc, rhs)?;
    }
    Ok(smallvec::smallvec![TensorOrWeights::Tensor(acc)])
}
