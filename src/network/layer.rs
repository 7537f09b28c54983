//! Layer catalog of the target network

use std::fmt;

use crate::proto::tensor_proto::DataType;
use crate::proto::AttributeProto;
use crate::weights::Weights;

/// Pointwise activation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationOp {
    /// max(x, 0)
    Relu,
    /// 1 / (1 + e^-x)
    Sigmoid,
    /// tanh(x)
    Tanh,
    /// x if x >= 0 else alpha * x
    LeakyRelu,
    /// x if x >= 0 else alpha * (e^x - 1)
    Elu,
    /// beta * (x if x >= 0 else alpha * (e^x - 1))
    Selu,
    /// max(0, min(1, alpha * x + beta))
    HardSigmoid,
    /// ln(1 + e^x)
    Softplus,
    /// min(max(x, alpha), beta)
    Clip,
}

/// Single-input math functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum UnaryOp {
    Abs,
    Neg,
    Sqrt,
    Exp,
    Log,
    Reciprocal,
    Floor,
    Ceil,
    Erf,
    Not,
    Sin,
    Cos,
}

/// Broadcasting binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ElementWiseOp {
    Sum,
    Sub,
    Prod,
    Div,
    Pow,
    Max,
    Min,
    Equal,
    Greater,
    Less,
    And,
    Or,
}

impl ElementWiseOp {
    /// Whether the result is a boolean tensor
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            ElementWiseOp::Equal
                | ElementWiseOp::Greater
                | ElementWiseOp::Less
                | ElementWiseOp::And
                | ElementWiseOp::Or
        )
    }
}

/// Pooling functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum PoolingOp {
    Max,
    Average,
}

/// Reduction functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ReduceOp {
    Sum,
    Avg,
    Max,
    Min,
    Prod,
}

/// Native normalization variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormalizationOp {
    /// Per-sample, per-channel statistics over spatial axes
    Instance,
    /// Statistics over the trailing axes
    Layer,
}

/// Broadcast mode of a scale layer's coefficients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleMode {
    /// One coefficient for the whole tensor
    Uniform,
    /// One coefficient per channel (axis 1)
    Channel,
}

/// What a layer computes
///
/// Weighted layers take their constants as inputs (constant layers), so every
/// layer's data dependencies are visible in its input list.
#[derive(Debug, Clone)]
pub enum LayerKind {
    /// Pass-through
    Identity,
    /// Element type conversion
    Cast {
        /// Target type
        to: DataType,
    },
    /// Constant tensor
    Constant {
        /// Payload
        weights: Weights,
    },
    /// Pointwise activation; inputs: `x`
    Activation {
        /// Function
        op: ActivationOp,
        /// First parameter (meaning depends on `op`)
        alpha: f32,
        /// Second parameter (meaning depends on `op`)
        beta: f32,
    },
    /// Unary math; inputs: `x`
    Unary {
        /// Function
        op: UnaryOp,
    },
    /// Broadcasting binary op; inputs: `a`, `b`
    ElementWise {
        /// Function
        op: ElementWiseOp,
    },
    /// `x * scale + shift`; inputs: `x`, `scale`, `shift`
    Scale {
        /// Coefficient broadcast
        mode: ScaleMode,
    },
    /// N-d convolution; inputs: `x`, `kernel`, optional `bias`
    Convolution {
        /// Spatial kernel extent
        kernel_shape: Vec<i64>,
        /// Strides per spatial axis
        strides: Vec<i64>,
        /// Begin pads followed by end pads
        pads: Vec<i64>,
        /// Dilations per spatial axis
        dilations: Vec<i64>,
        /// Channel groups
        group: i64,
    },
    /// N-d pooling; inputs: `x`
    Pooling {
        /// Function
        op: PoolingOp,
        /// Window extent
        window: Vec<i64>,
        /// Strides per spatial axis
        strides: Vec<i64>,
        /// Begin pads followed by end pads
        pads: Vec<i64>,
        /// Count padded elements in averages
        count_include_pad: bool,
    },
    /// Batched matrix product; inputs: `a`, `b`
    MatrixMultiply {
        /// Transpose the last two axes of `a`
        transpose_a: bool,
        /// Transpose the last two axes of `b`
        transpose_b: bool,
    },
    /// Reshape and/or transpose; inputs: `x`
    Shuffle {
        /// Target dimensions (after permutation)
        reshape: Option<Vec<i64>>,
        /// Axis permutation applied first
        permutation: Option<Vec<usize>>,
    },
    /// Concatenation; inputs: any number of tensors
    Concatenation {
        /// Concatenation axis
        axis: usize,
    },
    /// Softmax; inputs: `x`
    Softmax {
        /// Normalized axis
        axis: usize,
    },
    /// Reduction; inputs: `x`
    Reduce {
        /// Function
        op: ReduceOp,
        /// Reduced axes
        axes: Vec<usize>,
        /// Keep reduced axes with extent 1
        keep_dims: bool,
    },
    /// Normalization; inputs: `x`, `scale`, `bias`
    Normalization {
        /// Variant
        op: NormalizationOp,
        /// Axes the statistics are computed over
        axes: Vec<usize>,
        /// Variance epsilon
        epsilon: f32,
    },
    /// `condition ? then : else`; inputs: `condition`, `then`, `else`
    Conditional,
    /// Operator implemented by an externally loaded plugin
    Plugin {
        /// ONNX op type
        op_type: String,
        /// Library providing the implementation, if any
        library: Option<String>,
        /// Node attributes forwarded to the plugin
        attributes: Vec<AttributeProto>,
    },
}

impl LayerKind {
    /// Short type name used for default layer names
    pub fn type_name(&self) -> &'static str {
        match self {
            LayerKind::Identity => "Identity",
            LayerKind::Cast { .. } => "Cast",
            LayerKind::Constant { .. } => "Constant",
            LayerKind::Activation { .. } => "Activation",
            LayerKind::Unary { .. } => "Unary",
            LayerKind::ElementWise { .. } => "ElementWise",
            LayerKind::Scale { .. } => "Scale",
            LayerKind::Convolution { .. } => "Convolution",
            LayerKind::Pooling { .. } => "Pooling",
            LayerKind::MatrixMultiply { .. } => "MatrixMultiply",
            LayerKind::Shuffle { .. } => "Shuffle",
            LayerKind::Concatenation { .. } => "Concatenation",
            LayerKind::Softmax { .. } => "Softmax",
            LayerKind::Reduce { .. } => "Reduce",
            LayerKind::Normalization { .. } => "Normalization",
            LayerKind::Conditional => "Conditional",
            LayerKind::Plugin { .. } => "Plugin",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}
