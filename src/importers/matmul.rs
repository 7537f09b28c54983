//! MatMul and Gemm

use ndarray::ArrayD;

use crate::context::{ImportContext, TensorOrWeights};
use crate::error::{ImportError, ImportResult};
use crate::network::{ElementWiseOp, LayerKind, TensorInfo};
use crate::proto::tensor_proto::DataType;
use crate::proto::NodeProto;
use crate::tensor::{array_to_tensor_f32, broadcast_shape, scalar_to_tensor_f32};
use crate::weights::Weights;

use super::common::{add_single, get_attr_f, get_attr_i, input, input_tensor, optional_input};
use super::elementwise::add_binary;
use super::{Arity, BuiltinImporter, NodeOutputs};

pub(crate) fn importers() -> Vec<(&'static str, BuiltinImporter)> {
    vec![
        (
            "MatMul",
            BuiltinImporter::new(Arity::exactly(2), import_matmul),
        ),
        ("Gemm", BuiltinImporter::new(Arity::range(2, 3), import_gemm)),
    ]
}

/// Output dimensions of a (possibly batched) matrix product
pub fn matmul_output_dims(
    a: &[i64],
    b: &[i64],
    transpose_a: bool,
    transpose_b: bool,
) -> ImportResult<Vec<i64>> {
    if a.is_empty() || b.is_empty() {
        return Err(ImportError::ShapeMismatch(
            "MatMul operands must have rank >= 1".to_string(),
        ));
    }
    // Vectors are promoted to matrices and the extra axis dropped afterwards
    let a_vec = a.len() == 1;
    let b_vec = b.len() == 1;
    let a2 = if a_vec { vec![1, a[0]] } else { a.to_vec() };
    let b2 = if b_vec { vec![b[0], 1] } else { b.to_vec() };

    let (m, ka) = matrix_dims(&a2, transpose_a);
    let (kb, n) = matrix_dims(&b2, transpose_b);
    if ka >= 0 && kb >= 0 && ka != kb {
        return Err(ImportError::ShapeMismatch(format!(
            "MatMul inner dimensions differ: {:?} x {:?}",
            a, b
        )));
    }

    let mut dims = broadcast_shape(&a2[..a2.len() - 2], &b2[..b2.len() - 2])?;
    if !a_vec {
        dims.push(m);
    }
    if !b_vec {
        dims.push(n);
    }
    Ok(dims)
}

fn matrix_dims(dims: &[i64], transpose: bool) -> (i64, i64) {
    let rows = dims[dims.len() - 2];
    let cols = dims[dims.len() - 1];
    if transpose {
        (cols, rows)
    } else {
        (rows, cols)
    }
}

fn import_matmul(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let a_info = ctx.info(input(node, inputs, 0)?)?;
    let b_info = ctx.info(input(node, inputs, 1)?)?;
    let dims = matmul_output_dims(&a_info.dims, &b_info.dims, false, false)?;

    let a = input_tensor(ctx, node, inputs, 0)?;
    let b = input_tensor(ctx, node, inputs, 1)?;
    let y = add_single(
        ctx,
        node,
        LayerKind::MatrixMultiply {
            transpose_a: false,
            transpose_b: false,
        },
        &[a, b],
        TensorInfo {
            dtype: a_info.dtype,
            dims,
        },
    )?;
    Ok(smallvec::smallvec![TensorOrWeights::Tensor(y)])
}

/// `alpha * op(A) * op(B) + beta * C`
fn import_gemm(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let transpose_a = get_attr_i(node, "transA").unwrap_or(0) != 0;
    let transpose_b = get_attr_i(node, "transB").unwrap_or(0) != 0;
    let alpha = get_attr_f(node, "alpha").unwrap_or(1.0);
    let beta = get_attr_f(node, "beta").unwrap_or(1.0);

    let a_info = ctx.info(input(node, inputs, 0)?)?;
    let b_info = ctx.info(input(node, inputs, 1)?)?;
    if a_info.rank() != 2 || b_info.rank() != 2 {
        return Err(ImportError::ShapeMismatch(format!(
            "Gemm '{}' expects matrices, got {:?} and {:?}",
            node.display_name(),
            a_info.dims,
            b_info.dims
        )));
    }
    let dims = matmul_output_dims(&a_info.dims, &b_info.dims, transpose_a, transpose_b)?;

    let a = input_tensor(ctx, node, inputs, 0)?;
    let b = input_tensor(ctx, node, inputs, 1)?;
    let mut y = add_single(
        ctx,
        node,
        LayerKind::MatrixMultiply {
            transpose_a,
            transpose_b,
        },
        &[a, b],
        TensorInfo {
            dtype: a_info.dtype,
            dims,
        },
    )?;

    if alpha != 1.0 {
        let scale = ctx.to_tensor(&Weights::from_tensor(scalar_to_tensor_f32(alpha, "")).into())?;
        y = add_binary(ctx, node, ElementWiseOp::Prod, y, scale)?;
    }

    if let Some(c) = optional_input(inputs, 2) {
        if beta != 0.0 {
            let c = scaled_bias(ctx, node, c, beta)?;
            y = add_binary(ctx, node, ElementWiseOp::Sum, y, c)?;
        }
    }

    Ok(smallvec::smallvec![TensorOrWeights::Tensor(y)])
}

/// `beta * C`, folded when C is a float constant
fn scaled_bias(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    c: &TensorOrWeights,
    beta: f32,
) -> ImportResult<crate::network::TensorId> {
    if beta == 1.0 {
        return ctx.to_tensor(c);
    }
    match c {
        TensorOrWeights::Weights(w) if w.dtype() == DataType::Float => {
            let folded: ArrayD<f32> = w.to_array_f32()? * beta;
            let weights = Weights::from_tensor(array_to_tensor_f32(&folded, w.name()));
            ctx.to_tensor(&weights.into())
        }
        _ => {
            let c = ctx.to_tensor(c)?;
            let scale =
                ctx.to_tensor(&Weights::from_tensor(scalar_to_tensor_f32(beta, "")).into())?;
            add_binary(ctx, node, ElementWiseOp::Prod, c, scale)
        }
    }
}
