//! Extension methods for ONNX protobuf types
//!
//! Provides convenient helper methods for working with ONNX protobuf types.

use super::onnx::*;
use crate::error::ImportResult;
use crate::tensor::numel;

/// Default ONNX operator domain aliases.
pub const DEFAULT_DOMAINS: [&str; 2] = ["", "ai.onnx"];

// ============================================================================
// ModelProto extensions
// ============================================================================

impl ModelProto {
    /// Get the opset version for the default domain
    pub fn get_opset_version(&self) -> Option<i64> {
        self.opset_import
            .iter()
            .find(|op| DEFAULT_DOMAINS.contains(&op.domain.as_str()))
            .map(|op| op.version)
    }
}

// ============================================================================
// NodeProto extensions
// ============================================================================

impl NodeProto {
    /// Get attribute by name
    pub fn get_attribute(&self, name: &str) -> Option<&AttributeProto> {
        self.attribute.iter().find(|attr| attr.name == name)
    }

    /// Check whether an attribute is present
    pub fn has_attribute(&self, name: &str) -> bool {
        self.get_attribute(name).is_some()
    }

    /// Get integer attribute value with default
    pub fn get_attribute_int(&self, name: &str, default: i64) -> i64 {
        self.get_attribute(name).map(|a| a.i).unwrap_or(default)
    }

    /// Get string attribute value, lossily decoded as UTF-8
    pub fn get_attribute_string(&self, name: &str) -> Option<String> {
        self.get_attribute(name)
            .map(|a| String::from_utf8_lossy(&a.s).into_owned())
    }

    /// Get repeated int attribute
    pub fn get_attribute_ints(&self, name: &str) -> Option<&[i64]> {
        self.get_attribute(name).map(|a| a.ints.as_slice())
    }

    /// Get graph attribute
    pub fn get_attribute_graph(&self, name: &str) -> Option<&GraphProto> {
        self.get_attribute(name).and_then(|a| a.g.as_ref())
    }

    /// Name used when reporting this node: its name, or its op type if unnamed
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.op_type
        } else {
            &self.name
        }
    }
}

// ============================================================================
// ValueInfoProto extensions
// ============================================================================

impl ValueInfoProto {
    /// Get the shape dimensions if available
    ///
    /// Symbolic and unknown dimensions are reported as `-1`.
    pub fn get_shape(&self) -> Option<Vec<i64>> {
        self.tensor_type().and_then(|tensor| {
            tensor.shape.as_ref().map(|s| {
                s.dim
                    .iter()
                    .map(|d| match &d.value {
                        Some(tensor_shape_proto::dimension::Value::DimValue(v)) => *v,
                        Some(tensor_shape_proto::dimension::Value::DimParam(_)) => -1,
                        None => -1,
                    })
                    .collect()
            })
        })
    }

    /// Get the element type if this is a tensor type
    pub fn get_elem_type(&self) -> Option<i32> {
        self.tensor_type().map(|tensor| tensor.elem_type)
    }

    fn tensor_type(&self) -> Option<&type_proto::Tensor> {
        self.r#type.as_ref().and_then(|t| match t.value.as_ref() {
            Some(type_proto::Value::TensorType(tensor)) => Some(tensor),
            None => None,
        })
    }
}

// ============================================================================
// TensorProto extensions
// ============================================================================

impl TensorProto {
    /// Get the total number of elements
    pub fn num_elements(&self) -> ImportResult<usize> {
        numel(&self.dims)
    }

    /// Get data type enum value
    pub fn data_type_enum(&self) -> tensor_proto::DataType {
        tensor_proto::DataType::try_from(self.data_type)
            .unwrap_or(tensor_proto::DataType::Undefined)
    }

    /// Check whether the payload lives in an external file
    pub fn is_external(&self) -> bool {
        self.data_location == tensor_proto::DataLocation::External as i32
    }

    /// Look up an `external_data` entry by key
    pub fn external_entry(&self, key: &str) -> Option<&str> {
        self.external_data
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }
}

// ============================================================================
// AttributeProto extensions
// ============================================================================

impl AttributeProto {
    /// Create a new integer attribute
    pub fn new_int(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            i: value,
            r#type: attribute_proto::AttributeType::Int as i32,
            ..Default::default()
        }
    }

    /// Create a new float attribute
    pub fn new_float(name: &str, value: f32) -> Self {
        Self {
            name: name.to_string(),
            f: value,
            r#type: attribute_proto::AttributeType::Float as i32,
            ..Default::default()
        }
    }

    /// Create a new ints attribute
    pub fn new_ints(name: &str, values: Vec<i64>) -> Self {
        Self {
            name: name.to_string(),
            ints: values,
            r#type: attribute_proto::AttributeType::Ints as i32,
            ..Default::default()
        }
    }

    /// Create a new string attribute
    pub fn new_string(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            s: value.as_bytes().to_vec(),
            r#type: attribute_proto::AttributeType::String as i32,
            ..Default::default()
        }
    }

    /// Create a new tensor attribute
    pub fn new_tensor(name: &str, value: TensorProto) -> Self {
        Self {
            name: name.to_string(),
            t: Some(value),
            r#type: attribute_proto::AttributeType::Tensor as i32,
            ..Default::default()
        }
    }

    /// Create a new graph attribute
    pub fn new_graph(name: &str, value: GraphProto) -> Self {
        Self {
            name: name.to_string(),
            g: Some(value),
            r#type: attribute_proto::AttributeType::Graph as i32,
            ..Default::default()
        }
    }

    /// Create an attribute that refers to an attribute of the calling node
    pub fn new_ref(name: &str, ref_attr_name: &str) -> Self {
        Self {
            name: name.to_string(),
            ref_attr_name: ref_attr_name.to_string(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Create a new ValueInfoProto for a tensor
pub fn make_tensor_value_info(name: &str, elem_type: i32, shape: &[i64]) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type,
                shape: Some(TensorShapeProto {
                    dim: shape
                        .iter()
                        .map(|&d| tensor_shape_proto::Dimension {
                            value: Some(if d < 0 {
                                tensor_shape_proto::dimension::Value::DimParam("N".to_string())
                            } else {
                                tensor_shape_proto::dimension::Value::DimValue(d)
                            }),
                            denotation: String::new(),
                        })
                        .collect(),
                }),
            })),
            denotation: String::new(),
        }),
        doc_string: String::new(),
    }
}

/// Create a new NodeProto
pub fn make_node(op_type: &str, inputs: &[&str], outputs: &[&str], name: &str) -> NodeProto {
    NodeProto {
        op_type: op_type.to_string(),
        input: inputs.iter().map(|s| s.to_string()).collect(),
        output: outputs.iter().map(|s| s.to_string()).collect(),
        name: name.to_string(),
        ..Default::default()
    }
}

/// Create a default-domain opset import
pub fn make_opset(version: i64) -> OperatorSetIdProto {
    OperatorSetIdProto {
        domain: String::new(),
        version,
    }
}
