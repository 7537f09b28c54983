//! ONNX Protocol Buffer types
//!
//! The message types are declared with `prost` derives in the [`onnx`]
//! submodule. Additional extension methods are provided in [`extensions`].

/// ONNX protobuf types
#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod onnx;

// Re-export commonly used types at module level
pub use onnx::{
    AttributeProto, FunctionProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    StringStringEntryProto, TensorProto, TensorShapeProto, TypeProto, ValueInfoProto,
};

// Re-export submodules for nested types
pub use onnx::attribute_proto;
pub use onnx::tensor_proto;
pub use onnx::tensor_shape_proto;
pub use onnx::type_proto;

/// Extension methods for ONNX protobuf types
pub mod extensions;

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_model_proto_default() {
        let model = ModelProto::default();
        assert_eq!(model.ir_version, 0);
        assert!(model.graph.is_none());
    }

    #[test]
    fn test_node_proto_default() {
        let node = NodeProto::default();
        assert!(node.input.is_empty());
        assert!(node.output.is_empty());
    }

    #[test]
    fn test_nested_subgraph_survives_encoding() {
        let branch = GraphProto {
            name: "then".to_string(),
            node: vec![extensions::make_node("Relu", &["x"], &["y"], "inner")],
            ..Default::default()
        };
        let node = NodeProto {
            op_type: "If".to_string(),
            attribute: vec![AttributeProto::new_graph("then_branch", branch)],
            ..Default::default()
        };

        let decoded = NodeProto::decode(node.encode_to_vec().as_slice()).unwrap();
        let graph = decoded.get_attribute_graph("then_branch").unwrap();
        assert_eq!(graph.node[0].name, "inner");
    }
}
