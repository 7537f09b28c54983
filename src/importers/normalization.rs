//! Batch, instance and layer normalization

use ndarray::ArrayD;
use smallvec::smallvec;

use crate::context::{ImportContext, TensorOrWeights};
use crate::error::{ImportError, ImportResult};
use crate::importer::ParserFlag;
use crate::network::{
    ElementWiseOp, LayerKind, NormalizationOp, ReduceOp, ScaleMode, TensorId, TensorInfo, UnaryOp,
};
use crate::proto::NodeProto;
use crate::tensor::{array_to_tensor_f32, normalize_axis, scalar_to_tensor_f32};
use crate::weights::Weights;

use super::common::{
    add_single, check_outputs, get_attr_f, input, input_tensor, input_weights, optional_input,
    reshape_weights, single_output,
};
use super::elementwise::add_binary;
use super::reduce::reduced_dims;
use super::{Arity, BuiltinImporter, NodeOutputs};

const DEFAULT_EPSILON: f32 = 1e-5;

pub(crate) fn importers() -> Vec<(&'static str, BuiltinImporter)> {
    vec![
        (
            "BatchNormalization",
            BuiltinImporter::with_check(Arity::exactly(5), import_batch_norm, check_batch_norm),
        ),
        (
            "InstanceNormalization",
            BuiltinImporter::new(Arity::exactly(3), import_instance_norm),
        ),
        (
            "LayerNormalization",
            BuiltinImporter::with_check(Arity::range(2, 3), import_layer_norm, check_layer_norm),
        ),
    ]
}

fn channel_rank(node: &NodeProto, info: &TensorInfo) -> ImportResult<usize> {
    if info.rank() < 2 {
        return Err(ImportError::ShapeMismatch(format!(
            "{} '{}' expects an input of rank >= 2, got {:?}",
            node.op_type,
            node.display_name(),
            info.dims
        )));
    }
    Ok(info.rank())
}

// ============================================================================
// BatchNormalization
// ============================================================================

fn check_batch_norm(_ctx: &ImportContext<'_>, node: &NodeProto) -> ImportResult<()> {
    if node.get_attribute_int("training_mode", 0) != 0 {
        return Err(ImportError::attribute(
            "training_mode",
            "only inference mode is supported",
        ));
    }
    check_outputs(node, 1)
}

/// Fold `(x - mean) / sqrt(var + eps) * scale + bias` into `x * s + t`
pub fn fold_batch_norm(
    scale: &ArrayD<f32>,
    bias: &ArrayD<f32>,
    mean: &ArrayD<f32>,
    var: &ArrayD<f32>,
    epsilon: f32,
) -> ImportResult<(ArrayD<f32>, ArrayD<f32>)> {
    let shape = scale.shape();
    if bias.shape() != shape || mean.shape() != shape || var.shape() != shape {
        return Err(ImportError::ShapeMismatch(format!(
            "BatchNormalization parameters differ in shape: {:?} {:?} {:?} {:?}",
            scale.shape(),
            bias.shape(),
            mean.shape(),
            var.shape()
        )));
    }
    let s = scale / &var.mapv(|v| (v + epsilon).sqrt());
    let t = bias - &(mean * &s);
    Ok((s, t))
}

fn import_batch_norm(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    check_batch_norm(ctx, node)?;
    let info = ctx.info(input(node, inputs, 0)?)?;
    channel_rank(node, &info)?;
    let epsilon = get_attr_f(node, "epsilon").unwrap_or(DEFAULT_EPSILON);

    let params = (1..5)
        .map(|i| input_weights(node, inputs, i)?.to_array_f32())
        .collect::<ImportResult<Vec<_>>>()?;
    let (s, t) = fold_batch_norm(&params[0], &params[1], &params[2], &params[3], epsilon)?;
    let channels = s.len() as i64;
    if info.dims[1] >= 0 && info.dims[1] != channels {
        return Err(ImportError::ShapeMismatch(format!(
            "BatchNormalization '{}': {} parameters for {} channels",
            node.display_name(),
            channels,
            info.dims[1]
        )));
    }

    let x = input_tensor(ctx, node, inputs, 0)?;
    let prefix = node.display_name().to_string();
    let scale = ctx.to_tensor(
        &Weights::from_tensor(array_to_tensor_f32(&s, &format!("{}_scale", prefix))).into(),
    )?;
    let shift = ctx.to_tensor(
        &Weights::from_tensor(array_to_tensor_f32(&t, &format!("{}_shift", prefix))).into(),
    )?;
    single_output(
        ctx,
        node,
        LayerKind::Scale {
            mode: ScaleMode::Channel,
        },
        &[x, scale, shift],
        info,
    )
}

// ============================================================================
// InstanceNormalization
// ============================================================================

fn import_instance_norm(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let info = ctx.info(input(node, inputs, 0)?)?;
    let rank = channel_rank(node, &info)?;
    if rank < 3 {
        return Err(ImportError::ShapeMismatch(format!(
            "InstanceNormalization '{}' needs spatial axes, got {:?}",
            node.display_name(),
            info.dims
        )));
    }
    let epsilon = get_attr_f(node, "epsilon").unwrap_or(DEFAULT_EPSILON);
    let axes: Vec<usize> = (2..rank).collect();

    if ctx.flags().contains(ParserFlag::NativeInstanceNorm) {
        let x = input_tensor(ctx, node, inputs, 0)?;
        let scale = input_tensor(ctx, node, inputs, 1)?;
        let bias = input_tensor(ctx, node, inputs, 2)?;
        return single_output(
            ctx,
            node,
            LayerKind::Normalization {
                op: NormalizationOp::Instance,
                axes,
                epsilon,
            },
            &[x, scale, bias],
            info,
        );
    }

    let x = input_tensor(ctx, node, inputs, 0)?;
    let stats_info = TensorInfo {
        dtype: info.dtype,
        dims: reduced_dims(&info.dims, &axes, true),
    };
    let mean = reduce_avg(ctx, node, x, &axes, stats_info.clone())?;
    let centered = add_binary(ctx, node, ElementWiseOp::Sub, x, mean)?;
    let squared = add_binary(ctx, node, ElementWiseOp::Prod, centered, centered)?;
    let var = reduce_avg(ctx, node, squared, &axes, stats_info.clone())?;
    let eps = ctx.to_tensor(&Weights::from_tensor(scalar_to_tensor_f32(epsilon, "")).into())?;
    let var_eps = add_binary(ctx, node, ElementWiseOp::Sum, var, eps)?;
    let std = add_single(
        ctx,
        node,
        LayerKind::Unary { op: UnaryOp::Sqrt },
        &[var_eps],
        stats_info,
    )?;
    let normalized = add_binary(ctx, node, ElementWiseOp::Div, centered, std)?;

    let channel_dims: Vec<i64> = (0..rank)
        .map(|i| if i == 1 { info.dims[1] } else { 1 })
        .collect();
    let scale = per_channel(ctx, node, input(node, inputs, 1)?, &channel_dims)?;
    let bias = per_channel(ctx, node, input(node, inputs, 2)?, &channel_dims)?;
    let scaled = add_binary(ctx, node, ElementWiseOp::Prod, normalized, scale)?;
    let y = add_binary(ctx, node, ElementWiseOp::Sum, scaled, bias)?;
    Ok(smallvec![TensorOrWeights::Tensor(y)])
}

fn reduce_avg(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    x: TensorId,
    axes: &[usize],
    output: TensorInfo,
) -> ImportResult<TensorId> {
    add_single(
        ctx,
        node,
        LayerKind::Reduce {
            op: ReduceOp::Avg,
            axes: axes.to_vec(),
            keep_dims: true,
        },
        &[x],
        output,
    )
}

/// Reshape a `[C]` parameter to `[1, C, 1, ...]`
fn per_channel(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    value: &TensorOrWeights,
    dims: &[i64],
) -> ImportResult<TensorId> {
    if let TensorOrWeights::Weights(w) = value {
        return ctx.to_tensor(&reshape_weights(w, dims).into());
    }
    let dtype = ctx.info(value)?.dtype;
    let x = ctx.to_tensor(value)?;
    add_single(
        ctx,
        node,
        LayerKind::Shuffle {
            reshape: Some(dims.to_vec()),
            permutation: None,
        },
        &[x],
        TensorInfo::new(dtype, dims),
    )
}

// ============================================================================
// LayerNormalization
// ============================================================================

fn check_layer_norm(_ctx: &ImportContext<'_>, node: &NodeProto) -> ImportResult<()> {
    check_outputs(node, 1)
}

fn import_layer_norm(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    check_layer_norm(ctx, node)?;
    let info = ctx.info(input(node, inputs, 0)?)?;
    let axis = normalize_axis(node.get_attribute_int("axis", -1), info.rank())?;
    let epsilon = get_attr_f(node, "epsilon").unwrap_or(DEFAULT_EPSILON);

    let mut layer_inputs = vec![
        input_tensor(ctx, node, inputs, 0)?,
        input_tensor(ctx, node, inputs, 1)?,
    ];
    if let Some(bias) = optional_input(inputs, 2) {
        layer_inputs.push(ctx.to_tensor(bias)?);
    }
    single_output(
        ctx,
        node,
        LayerKind::Normalization {
            op: NormalizationOp::Layer,
            axes: (axis..info.rank()).collect(),
            epsilon,
        },
        &layer_inputs,
        info,
    )
}
