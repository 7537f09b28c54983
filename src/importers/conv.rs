//! Convolution and pooling

use crate::context::{ImportContext, TensorOrWeights};
use crate::error::{ImportError, ImportResult};
use crate::network::{LayerKind, PoolingOp, TensorInfo};
use crate::proto::NodeProto;
use crate::tensor::{is_dynamic, window_output_dim};

use super::common::{
    check_auto_pad, check_outputs, get_attr_ints_or, input, input_tensor, optional_input,
    require_attr_ints, single_output,
};
use super::{Arity, BuiltinImporter, NodeOutputs};

pub(crate) fn importers() -> Vec<(&'static str, BuiltinImporter)> {
    let pool = BuiltinImporter::with_check(Arity::exactly(1), import_pool, check_pool);
    let global = BuiltinImporter::new(Arity::exactly(1), import_global_pool);
    vec![
        (
            "Conv",
            BuiltinImporter::with_check(Arity::range(2, 3), import_conv, check_conv),
        ),
        ("MaxPool", pool),
        ("AveragePool", pool),
        ("GlobalAveragePool", global),
        ("GlobalMaxPool", global),
    ]
}

/// Spatial window parameters shared by convolution and pooling
struct Window {
    kernel: Vec<i64>,
    strides: Vec<i64>,
    pads: Vec<i64>,
    dilations: Vec<i64>,
}

impl Window {
    fn from_node(node: &NodeProto, kernel: Vec<i64>) -> ImportResult<Self> {
        let n = kernel.len();
        let window = Window {
            strides: get_attr_ints_or(node, "strides", &vec![1; n]),
            pads: get_attr_ints_or(node, "pads", &vec![0; 2 * n]),
            dilations: get_attr_ints_or(node, "dilations", &vec![1; n]),
            kernel,
        };
        if window.strides.len() != n || window.pads.len() != 2 * n || window.dilations.len() != n
        {
            return Err(ImportError::InvalidNode(format!(
                "{} '{}': strides/pads/dilations do not match {} spatial axes",
                node.op_type,
                node.display_name(),
                n
            )));
        }
        Ok(window)
    }

    fn output_dims(&self, input: &[i64], ceil_mode: bool) -> ImportResult<Vec<i64>> {
        let n = self.kernel.len();
        let spatial = &input[input.len() - n..];
        spatial
            .iter()
            .enumerate()
            .map(|(i, &dim)| {
                window_output_dim(
                    dim,
                    self.kernel[i],
                    self.strides[i],
                    self.pads[i],
                    self.pads[i + n],
                    self.dilations[i],
                    ceil_mode,
                )
            })
            .collect()
    }
}

fn spatial_rank(node: &NodeProto, info: &TensorInfo) -> ImportResult<usize> {
    if info.rank() < 3 {
        return Err(ImportError::InvalidNode(format!(
            "{} '{}' expects an input of rank >= 3, got {:?}",
            node.op_type,
            node.display_name(),
            info.dims
        )));
    }
    Ok(info.rank() - 2)
}

fn check_conv(_ctx: &ImportContext<'_>, node: &NodeProto) -> ImportResult<()> {
    check_auto_pad(node)
}

fn import_conv(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    check_auto_pad(node)?;
    let x_info = ctx.info(input(node, inputs, 0)?)?;
    let w_info = ctx.info(input(node, inputs, 1)?)?;
    let n = spatial_rank(node, &x_info)?;
    if w_info.rank() != n + 2 {
        return Err(ImportError::ShapeMismatch(format!(
            "Conv '{}': kernel {:?} does not match input {:?}",
            node.display_name(),
            w_info.dims,
            x_info.dims
        )));
    }

    let kernel = get_attr_ints_or(node, "kernel_shape", &w_info.dims[2..]);
    if kernel.len() != n {
        return Err(ImportError::InvalidNode(format!(
            "Conv '{}': kernel_shape has {} axes, input has {}",
            node.display_name(),
            kernel.len(),
            n
        )));
    }
    let group = node.get_attribute_int("group", 1);
    let channels = x_info.dims[1];
    if group <= 0
        || (channels >= 0
            && w_info.dims[1] >= 0
            && w_info.dims[1].checked_mul(group) != Some(channels))
    {
        return Err(ImportError::ShapeMismatch(format!(
            "Conv '{}': {} input channels cannot form {} groups of {}",
            node.display_name(),
            channels,
            group,
            w_info.dims[1]
        )));
    }

    let window = Window::from_node(node, kernel)?;
    let mut dims = vec![x_info.dims[0], w_info.dims[0]];
    dims.extend(window.output_dims(&x_info.dims, false)?);

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
        LayerKind::Convolution {
            kernel_shape: window.kernel,
            strides: window.strides,
            pads: window.pads,
            dilations: window.dilations,
            group,
        },
        &layer_inputs,
        TensorInfo {
            dtype: x_info.dtype,
            dims,
        },
    )
}

fn check_pool(_ctx: &ImportContext<'_>, node: &NodeProto) -> ImportResult<()> {
    check_auto_pad(node)?;
    require_attr_ints(node, "kernel_shape")?;
    check_outputs(node, 1)?;
    if node.op_type == "MaxPool" && node.get_attribute_int("storage_order", 0) != 0 {
        return Err(ImportError::attribute(
            "storage_order",
            "column-major indices are not supported",
        ));
    }
    Ok(())
}

fn import_pool(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    check_pool(ctx, node)?;
    let info = ctx.info(input(node, inputs, 0)?)?;
    let n = spatial_rank(node, &info)?;
    let kernel = require_attr_ints(node, "kernel_shape")?.to_vec();
    if kernel.len() != n {
        return Err(ImportError::InvalidNode(format!(
            "{} '{}': kernel_shape has {} axes, input has {}",
            node.op_type,
            node.display_name(),
            kernel.len(),
            n
        )));
    }

    let op = if node.op_type == "MaxPool" {
        PoolingOp::Max
    } else {
        PoolingOp::Average
    };
    let window = Window::from_node(node, kernel)?;
    if op == PoolingOp::Average && window.dilations.iter().any(|&d| d != 1) {
        return Err(ImportError::attribute(
            "dilations",
            "dilated average pooling is not supported",
        ));
    }
    let ceil_mode = node.get_attribute_int("ceil_mode", 0) != 0;
    let mut dims = info.dims[..2].to_vec();
    dims.extend(window.output_dims(&info.dims, ceil_mode)?);

    let x = input_tensor(ctx, node, inputs, 0)?;
    single_output(
        ctx,
        node,
        LayerKind::Pooling {
            op,
            window: window.kernel,
            strides: window.strides,
            pads: window.pads,
            count_include_pad: node.get_attribute_int("count_include_pad", 0) != 0,
        },
        &[x],
        TensorInfo {
            dtype: info.dtype,
            dims,
        },
    )
}

fn import_global_pool(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    inputs: &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs> {
    let info = ctx.info(input(node, inputs, 0)?)?;
    let n = spatial_rank(node, &info)?;
    let window = info.dims[2..].to_vec();
    if is_dynamic(&window) {
        return Err(ImportError::UnsupportedDynamic(format!(
            "{} '{}' needs static spatial dimensions, got {:?}",
            node.op_type,
            node.display_name(),
            info.dims
        )));
    }

    let op = if node.op_type == "GlobalMaxPool" {
        PoolingOp::Max
    } else {
        PoolingOp::Average
    };
    let mut dims = info.dims[..2].to_vec();
    dims.extend(std::iter::repeat(1).take(n));

    let x = input_tensor(ctx, node, inputs, 0)?;
    single_output(
        ctx,
        node,
        LayerKind::Pooling {
            op,
            window,
            strides: vec![1; n],
            pads: vec![0; 2 * n],
            count_include_pad: false,
        },
        &[x],
        TensorInfo {
            dtype: info.dtype,
            dims,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importers::testing::{constant, context, inputs, output_info};
    use crate::network::{Network, NetworkDefinition};
    use crate::proto::extensions::make_node;
    use crate::proto::AttributeProto;
    use crate::tensor::array_to_tensor_f32;
    use ndarray::ArrayD;

    #[test]
    fn test_conv_output_shape() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[("x", TensorInfo::float(&[1, 3, 32, 32]))]);
        constant(
            &mut ctx,
            array_to_tensor_f32(&ArrayD::zeros(vec![16, 3, 3, 3]), "w"),
        );
        let mut node = make_node("Conv", &["x", "w"], &["y"], "conv");
        node.attribute.push(AttributeProto::new_ints("pads", vec![1, 1, 1, 1]));
        node.attribute.push(AttributeProto::new_ints("strides", vec![2, 2]));

        let ins = inputs(&ctx, &node);
        let out = import_conv(&mut ctx, &node, &ins).unwrap();
        assert_eq!(output_info(&ctx, &out).dims, vec![1, 16, 16, 16]);
        // kernel constant + convolution
        assert_eq!(network.num_layers(), 2);
    }

    #[test]
    fn test_conv_group_mismatch() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[("x", TensorInfo::float(&[1, 4, 8, 8]))]);
        constant(
            &mut ctx,
            array_to_tensor_f32(&ArrayD::zeros(vec![8, 3, 3, 3]), "w"),
        );
        let node = make_node("Conv", &["x", "w"], &["y"], "conv");
        let ins = inputs(&ctx, &node);
        assert!(matches!(
            import_conv(&mut ctx, &node, &ins),
            Err(ImportError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_max_pool_ceil_mode() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[("x", TensorInfo::float(&[1, 1, 5, 5]))]);
        let mut node = make_node("MaxPool", &["x"], &["y"], "pool");
        node.attribute
            .push(AttributeProto::new_ints("kernel_shape", vec![2, 2]));
        node.attribute.push(AttributeProto::new_ints("strides", vec![2, 2]));
        node.attribute.push(AttributeProto::new_int("ceil_mode", 1));

        let ins = inputs(&ctx, &node);
        let out = import_pool(&mut ctx, &node, &ins).unwrap();
        assert_eq!(output_info(&ctx, &out).dims, vec![1, 1, 3, 3]);
    }

    #[test]
    fn test_pool_requires_kernel_shape() {
        let mut network = Network::new();
        let ctx = context(&mut network, 13, &[]);
        let node = make_node("AveragePool", &["x"], &["y"], "pool");
        assert!(matches!(
            check_pool(&ctx, &node),
            Err(ImportError::InvalidNode(_))
        ));
    }

    #[test]
    fn test_global_pool() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[("x", TensorInfo::float(&[2, 8, 7, 7]))]);
        let node = make_node("GlobalAveragePool", &["x"], &["y"], "gap");
        let ins = inputs(&ctx, &node);
        let out = import_global_pool(&mut ctx, &node, &ins).unwrap();
        assert_eq!(output_info(&ctx, &out).dims, vec![2, 8, 1, 1]);

        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[("x", TensorInfo::float(&[2, 8, -1, 7]))]);
        let ins = inputs(&ctx, &node);
        assert!(matches!(
            import_global_pool(&mut ctx, &node, &ins),
            Err(ImportError::UnsupportedDynamic(_))
        ));
    }
}
