//! Activations, unary math and softmax

use crate::context::{ImportContext, TensorOrWeights};
use crate::error::{ImportError, ImportResult};
use crate::network::{ActivationOp, LayerKind, TensorInfo, UnaryOp};
use crate::proto::tensor_proto::DataType;
use crate::proto::NodeProto;
use crate::tensor::normalize_axis;

use super::common::{get_attr_f, input, input_tensor, optional_input, single_output};
use super::{Arity, BuiltinImporter, NodeOutputs};

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_GAMMA: f32 = 1.050_701;

pub(crate) fn importers() -> Vec<(&'static str, BuiltinImporter)> {
    let activation = BuiltinImporter::new(Arity::exactly(1), import_activation);
    let unary = BuiltinImporter::new(Arity::exactly(1), import_unary);
    let mut table: Vec<(&'static str, BuiltinImporter)> = [
        "Relu",
        "Sigmoid",
        "Tanh",
        "LeakyRelu",
        "Elu",
        "Selu",
        "HardSigmoid",
        "Softplus",
    ]
    .into_iter()
    .map(|op| (op, activation))
    .collect();

    table.push((
        "Clip",
        BuiltinImporter::new(Arity::range(1, 3), import_activation),
    ));
    table.extend(
        [
            "Abs",
            "Neg",
            "Sqrt",
            "Exp",
            "Log",
            "Reciprocal",
            "Floor",
            "Ceil",
            "Erf",
            "Not",
            "Sin",
            "Cos",
        ]
        .into_iter()
        .map(|op| (op, unary)),
    );
    table.push((
        "Softmax",
        BuiltinImporter::new(Arity::exactly(1), import_softmax),
    ));
    table
}

fn activation_op(op_type: &str) -> Option<ActivationOp> {
    Some(match op_type {
        "Relu" => ActivationOp::Relu,
        "Sigmoid" => ActivationOp::Sigmoid,
        "Tanh" => ActivationOp::Tanh,
        "LeakyRelu" => ActivationOp::LeakyRelu,
        "Elu" => ActivationOp::Elu,
        "Selu" => ActivationOp::Selu,
        "HardSigmoid" => ActivationOp::HardSigmoid,
        "Softplus" => ActivationOp::Softplus,
        "Clip" => ActivationOp::Clip,
        _ => return None,
    })
}

fn unary_op(op_type: &str) -> Option<UnaryOp> {
    Some(match op_type {
        "Abs" => UnaryOp::Abs,
        "Neg" => UnaryOp::Neg,
        "Sqrt" => UnaryOp::Sqrt,
        "Exp" => UnaryOp::Exp,
        "Log" => UnaryOp::Log,
        "Reciprocal" => UnaryOp::Reciprocal,
        "Floor" => UnaryOp::Floor,
        "Ceil" => UnaryOp::Ceil,
        "Erf" => UnaryOp::Erf,
        "Not" => UnaryOp::Not,
        "Sin" => UnaryOp::Sin,
        "Cos" => UnaryOp::Cos,
        _ => return None,
    })
}

fn unknown_op(node: &NodeProto) -> ImportError {
    ImportError::Internal(format!("No layer mapping for op type '{}'", node.op_type))
}

/// Clip bound: attribute before opset 11, constant input afterwards
fn clip_bound(
    ctx: &ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
    index: usize,
    attr: &str,
    default: f32,
) -> ImportResult<f32> {
    if ctx.opset_version(&node.domain) < 11 {
        return Ok(get_attr_f(node, attr).unwrap_or(default));
    }
    match optional_input(inputs, index) {
        None => Ok(default),
        Some(TensorOrWeights::Weights(w)) => w
            .to_array_f32()?
            .iter()
            .next()
            .copied()
            .ok_or_else(|| ImportError::InvalidValue(format!("Clip {} is empty", attr))),
        Some(TensorOrWeights::Tensor(_)) => Err(ImportError::UnsupportedDynamic(format!(
            "Clip '{}': {} must be a constant",
            node.display_name(),
            attr
        ))),
    }
}

fn import_activation(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let op = activation_op(&node.op_type).ok_or_else(|| unknown_op(node))?;
    let (alpha, beta) = match op {
        ActivationOp::LeakyRelu => (get_attr_f(node, "alpha").unwrap_or(0.01), 0.0),
        ActivationOp::Elu => (get_attr_f(node, "alpha").unwrap_or(1.0), 0.0),
        ActivationOp::Selu => (
            get_attr_f(node, "alpha").unwrap_or(SELU_ALPHA),
            get_attr_f(node, "gamma").unwrap_or(SELU_GAMMA),
        ),
        ActivationOp::HardSigmoid => (
            get_attr_f(node, "alpha").unwrap_or(0.2),
            get_attr_f(node, "beta").unwrap_or(0.5),
        ),
        ActivationOp::Clip => (
            clip_bound(ctx, node, inputs, 1, "min", f32::MIN)?,
            clip_bound(ctx, node, inputs, 2, "max", f32::MAX)?,
        ),
        _ => (0.0, 0.0),
    };

    let info = ctx.info(input(node, inputs, 0)?)?;
    let x = input_tensor(ctx, node, inputs, 0)?;
    single_output(
        ctx,
        node,
        LayerKind::Activation { op, alpha, beta },
        &[x],
        info,
    )
}

fn import_unary(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let op = unary_op(&node.op_type).ok_or_else(|| unknown_op(node))?;
    let info = ctx.info(input(node, inputs, 0)?)?;
    if op == UnaryOp::Not && info.dtype != DataType::Bool {
        return Err(ImportError::UnsupportedDataType(info.dtype as i32));
    }
    let x = input_tensor(ctx, node, inputs, 0)?;
    single_output(ctx, node, LayerKind::Unary { op }, &[x], info)
}

fn import_softmax(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let info = ctx.info(input(node, inputs, 0)?)?;
    let default_axis = if ctx.opset_version(&node.domain) < 13 {
        1
    } else {
        -1
    };
    let axis = normalize_axis(node.get_attribute_int("axis", default_axis), info.rank())?;
    let x = input_tensor(ctx, node, inputs, 0)?;
    single_output(ctx, node, LayerKind::Softmax { axis }, &[x], info)
}
