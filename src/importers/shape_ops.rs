//! Pass-through, constants, casts and reshape-family operators

use smallvec::smallvec;

use crate::context::{ImportContext, TensorOrWeights};
use crate::error::{ImportError, ImportResult};
use crate::network::{LayerKind, TensorInfo};
use crate::proto::tensor_proto::DataType;
use crate::proto::{attribute_proto::AttributeType, NodeProto, TensorProto};
use crate::tensor::{
    i32_to_dtype, is_dynamic, is_network_type, normalize_axes, normalize_axis, numel,
    vec_to_tensor_i64,
};
use crate::weights::Weights;

use super::common::{
    check_outputs, input, input_tensor, ints_from_input_or_attr, missing_attr, require_attr_i,
    reshape_weights, single_output,
};
use super::{Arity, BuiltinImporter, NodeOutputs};

pub(crate) fn importers() -> Vec<(&'static str, BuiltinImporter)> {
    vec![
        (
            "Identity",
            BuiltinImporter::new(Arity::exactly(1), import_identity),
        ),
        (
            "Dropout",
            BuiltinImporter::with_check(Arity::range(1, 3), import_identity, check_dropout),
        ),
        (
            "Cast",
            BuiltinImporter::with_check(Arity::exactly(1), import_cast, check_cast),
        ),
        (
            "Constant",
            BuiltinImporter::with_check(Arity::exactly(0), import_constant, check_constant),
        ),
        (
            "Reshape",
            BuiltinImporter::new(Arity::range(1, 2), import_reshape),
        ),
        (
            "Flatten",
            BuiltinImporter::new(Arity::exactly(1), import_flatten),
        ),
        (
            "Transpose",
            BuiltinImporter::new(Arity::exactly(1), import_transpose),
        ),
        (
            "Squeeze",
            BuiltinImporter::new(Arity::range(1, 2), import_squeeze),
        ),
        (
            "Unsqueeze",
            BuiltinImporter::new(Arity::range(1, 2), import_unsqueeze),
        ),
        (
            "Concat",
            BuiltinImporter::with_check(Arity::at_least(1), import_concat, check_concat),
        ),
    ]
}

// ============================================================================
// Identity / Dropout / Cast
// ============================================================================

fn check_dropout(_ctx: &ImportContext<'_>, node: &NodeProto) -> ImportResult<()> {
    check_outputs(node, 1)
}

/// Identity and inference-mode Dropout: constants pass through unchanged
fn import_identity(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    check_outputs(node, 1)?;
    let value = input(node, inputs, 0)?;
    if value.is_weights() {
        return Ok(smallvec![value.clone()]);
    }
    let info = ctx.info(value)?;
    let x = ctx.to_tensor(value)?;
    single_output(ctx, node, LayerKind::Identity, &[x], info)
}

fn cast_target(node: &NodeProto) -> ImportResult<DataType> {
    let to = require_attr_i(node, "to")?;
    let dtype = i32_to_dtype(to as i32)?;
    if !is_network_type(dtype, false) {
        return Err(ImportError::UnsupportedDataType(to as i32));
    }
    Ok(dtype)
}

fn check_cast(_ctx: &ImportContext<'_>, node: &NodeProto) -> ImportResult<()> {
    cast_target(node).map(|_| ())
}

fn import_cast(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let to = cast_target(node)?;
    let info = ctx.info(input(node, inputs, 0)?)?;
    let x = input_tensor(ctx, node, inputs, 0)?;
    single_output(
        ctx,
        node,
        LayerKind::Cast { to },
        &[x],
        TensorInfo {
            dtype: to,
            dims: info.dims,
        },
    )
}

// ============================================================================
// Constant
// ============================================================================

fn constant_tensor(node: &NodeProto) -> ImportResult<TensorProto> {
    let attr = node.attribute.first().ok_or_else(|| {
        ImportError::InvalidNode(format!(
            "Constant '{}' has no value attribute",
            node.display_name()
        ))
    })?;
    let name = node.output.first().cloned().unwrap_or_default();

    let tensor = match attr.name.as_str() {
        "value" => attr
            .t
            .clone()
            .ok_or_else(|| ImportError::attribute("value", "missing tensor payload"))?,
        "value_float" => TensorProto {
            data_type: DataType::Float as i32,
            float_data: vec![attr.f],
            ..Default::default()
        },
        "value_floats" => TensorProto {
            dims: vec![attr.floats.len() as i64],
            data_type: DataType::Float as i32,
            float_data: attr.floats.clone(),
            ..Default::default()
        },
        "value_int" => TensorProto {
            data_type: DataType::Int64 as i32,
            int64_data: vec![attr.i],
            ..Default::default()
        },
        "value_ints" => vec_to_tensor_i64(&attr.ints, ""),
        other => {
            return Err(ImportError::attribute(
                other,
                "constant payload kind is not supported",
            ))
        }
    };
    if attr.name == "value" && attr.r#type != AttributeType::Tensor as i32 && attr.r#type != 0 {
        return Err(ImportError::attribute("value", "expected a tensor"));
    }
    Ok(TensorProto { name, ..tensor })
}

fn check_constant(_ctx: &ImportContext<'_>, node: &NodeProto) -> ImportResult<()> {
    constant_tensor(node).map(|_| ())
}

fn import_constant(
    _ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    _inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let tensor = constant_tensor(node)?;
    Ok(smallvec![TensorOrWeights::Weights(Weights::from_tensor(
        tensor
    ))])
}

// ============================================================================
// Reshape family
// ============================================================================

fn dim_from_count(count: usize) -> ImportResult<i64> {
    i64::try_from(count).map_err(|_| {
        ImportError::ShapeMismatch(format!("Dimension {} does not fit in i64", count))
    })
}

/// Resolve `0` (copy) and `-1` (infer) entries of a Reshape target
pub fn resolve_reshape(input: &[i64], target: &[i64], allow_zero: bool) -> ImportResult<Vec<i64>> {
    let mut dims: Vec<i64> = target
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            if d == 0 && !allow_zero {
                input.get(i).copied().ok_or_else(|| {
                    ImportError::ShapeMismatch(format!(
                        "Reshape target {:?} copies axis {} of {:?}",
                        target, i, input
                    ))
                })
            } else {
                Ok(d)
            }
        })
        .collect::<ImportResult<_>>()?;

    let inferred: Vec<usize> = target
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == -1)
        .map(|(i, _)| i)
        .collect();
    if inferred.len() > 1 {
        return Err(ImportError::InvalidNode(format!(
            "Reshape target {:?} infers more than one axis",
            target
        )));
    }
    if let Some(&axis) = inferred.first() {
        let known: Vec<i64> = dims
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != axis)
            .map(|(_, &d)| d)
            .collect();
        if !is_dynamic(input) && !is_dynamic(&known) {
            let total = numel(input)?;
            let rest = numel(&known)?;
            if rest == 0 || total % rest != 0 {
                return Err(ImportError::ShapeMismatch(format!(
                    "Cannot reshape {:?} to {:?}",
                    input, target
                )));
            }
            dims[axis] = dim_from_count(total / rest)?;
        }
    } else if !is_dynamic(input) && !is_dynamic(&dims) && numel(input)? != numel(&dims)? {
        return Err(ImportError::ShapeMismatch(format!(
            "Cannot reshape {:?} to {:?}",
            input, target
        )));
    }
    Ok(dims)
}

/// Emit a reshape, folding constants
fn reshape_to(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    value: &TensorOrWeights,
    dims: Vec<i64>,
) -> ImportResult<NodeOutputs> {
    if let TensorOrWeights::Weights(w) = value {
        if !is_dynamic(&dims) {
            return Ok(smallvec![reshape_weights(w, &dims).into()]);
        }
    }
    let dtype = ctx.info(value)?.dtype;
    let x = ctx.to_tensor(value)?;
    single_output(
        ctx,
        node,
        LayerKind::Shuffle {
            reshape: Some(dims.clone()),
            permutation: None,
        },
        &[x],
        TensorInfo { dtype, dims },
    )
}

fn import_reshape(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let value = input(node, inputs, 0)?;
    let target = if ctx.opset_version(&node.domain) < 5 {
        node.get_attribute_ints("shape")
            .map(|s| s.to_vec())
            .ok_or_else(|| missing_attr(node, "shape"))?
    } else {
        match input(node, inputs, 1)? {
            TensorOrWeights::Weights(w) => w.to_vec_i64()?,
            TensorOrWeights::Tensor(_) => {
                return Err(ImportError::UnsupportedDynamic(format!(
                    "Reshape '{}' with a computed shape",
                    node.display_name()
                )))
            }
        }
    };
    let allow_zero = node.get_attribute_int("allowzero", 0) != 0;
    let info = ctx.info(value)?;
    let dims = resolve_reshape(&info.dims, &target, allow_zero)?;
    reshape_to(ctx, node, value, dims)
}

fn import_flatten(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let value = input(node, inputs, 0)?;
    let info = ctx.info(value)?;
    let axis = node.get_attribute_int("axis", 1);
    let axis = if axis == info.rank() as i64 {
        info.rank()
    } else {
        normalize_axis(axis, info.rank())?
    };
    let fold = |dims: &[i64]| {
        if is_dynamic(dims) {
            Ok(-1)
        } else {
            numel(dims).and_then(dim_from_count)
        }
    };
    let dims = vec![fold(&info.dims[..axis])?, fold(&info.dims[axis..])?];
    reshape_to(ctx, node, value, dims)
}

fn import_transpose(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let info = ctx.info(input(node, inputs, 0)?)?;
    let rank = info.rank();
    let perm: Vec<usize> = match node.get_attribute_ints("perm") {
        Some(perm) => perm
            .iter()
            .map(|&p| normalize_axis(p, rank))
            .collect::<ImportResult<_>>()?,
        None => (0..rank).rev().collect(),
    };
    let mut seen = vec![false; rank];
    for &p in &perm {
        if std::mem::replace(&mut seen[p], true) {
            return Err(ImportError::InvalidNode(format!(
                "Transpose '{}': perm {:?} is not a permutation",
                node.display_name(),
                perm
            )));
        }
    }
    if perm.len() != rank {
        return Err(ImportError::InvalidNode(format!(
            "Transpose '{}': perm has {} axes, input has {}",
            node.display_name(),
            perm.len(),
            rank
        )));
    }

    let dims = perm.iter().map(|&p| info.dims[p]).collect();
    let x = input_tensor(ctx, node, inputs, 0)?;
    single_output(
        ctx,
        node,
        LayerKind::Shuffle {
            reshape: None,
            permutation: Some(perm),
        },
        &[x],
        TensorInfo {
            dtype: info.dtype,
            dims,
        },
    )
}

fn import_squeeze(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let value = input(node, inputs, 0)?;
    let info = ctx.info(value)?;
    let axes = match ints_from_input_or_attr(ctx, node, inputs, 1, "axes", 13)? {
        Some(axes) => normalize_axes(&axes, info.rank())?,
        None => {
            if is_dynamic(&info.dims) {
                return Err(ImportError::UnsupportedDynamic(format!(
                    "Squeeze '{}' without axes on dynamic shape {:?}",
                    node.display_name(),
                    info.dims
                )));
            }
            (0..info.rank()).filter(|&i| info.dims[i] == 1).collect()
        }
    };
    if let Some(&bad) = axes.iter().find(|&&a| info.dims[a] > 1) {
        return Err(ImportError::InvalidNode(format!(
            "Squeeze '{}': axis {} has extent {}",
            node.display_name(),
            bad,
            info.dims[bad]
        )));
    }
    let dims = (0..info.rank())
        .filter(|i| !axes.contains(i))
        .map(|i| info.dims[i])
        .collect();
    reshape_to(ctx, node, value, dims)
}

fn import_unsqueeze(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let value = input(node, inputs, 0)?;
    let info = ctx.info(value)?;
    let axes = ints_from_input_or_attr(ctx, node, inputs, 1, "axes", 13)?
        .ok_or_else(|| missing_attr(node, "axes"))?;
    let out_rank = info.rank() + axes.len();
    let axes = normalize_axes(&axes, out_rank)?;

    let mut rest = info.dims.iter();
    let dims = (0..out_rank)
        .map(|i| {
            if axes.contains(&i) {
                1
            } else {
                rest.next().copied().unwrap_or(1)
            }
        })
        .collect();
    reshape_to(ctx, node, value, dims)
}

// ============================================================================
// Concat
// ============================================================================

fn check_concat(_ctx: &ImportContext<'_>, node: &NodeProto) -> ImportResult<()> {
    require_attr_i(node, "axis").map(|_| ())
}

fn import_concat(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let infos = (0..inputs.len())
        .map(|i| ctx.info(input(node, inputs, i)?))
        .collect::<ImportResult<Vec<_>>>()?;
    let first = &infos[0];
    let axis = normalize_axis(require_attr_i(node, "axis")?, first.rank())?;

    let mut dims = first.dims.clone();
    for info in &infos[1..] {
        if info.rank() != first.rank() || info.dtype != first.dtype {
            return Err(ImportError::ShapeMismatch(format!(
                "Concat '{}': {:?} cannot be joined with {:?}",
                node.display_name(),
                info.dims,
                first.dims
            )));
        }
        dims[axis] = if dims[axis] < 0 || info.dims[axis] < 0 {
            -1
        } else {
            dims[axis].checked_add(info.dims[axis]).ok_or_else(|| {
                ImportError::ShapeMismatch(format!(
                    "Concat '{}': joined extent overflows",
                    node.display_name()
                ))
            })?
        };
    }

    let dtype = first.dtype;
    let tensors = (0..inputs.len())
        .map(|i| input_tensor(ctx, node, inputs, i))
        .collect::<ImportResult<Vec<_>>>()?;
    single_output(
        ctx,
        node,
        LayerKind::Concatenation { axis },
        &tensors,
        TensorInfo { dtype, dims },
    )
}
