//! End-to-end import tests

use std::sync::{Arc, Mutex};

use prost::Message;
use smallvec::smallvec;

use onnx_importer::prelude::*;
use onnx_importer::proto::extensions::{make_node, make_opset, make_tensor_value_info};
use onnx_importer::proto::tensor_proto::DataType;

/// Records the name of every node it imports
struct Recording {
    log: Arc<Mutex<Vec<String>>>,
}

impl NodeImporter for Recording {
    fn import(
        &self,
        ctx: &mut ImportContext<'_>,
        node: &NodeProto,
        inputs: &[Option<TensorOrWeights>],
    ) -> ImportResult<NodeOutputs> {
        self.log.lock().unwrap().push(node.name.clone());
        let value = inputs[0].as_ref().unwrap();
        let info = ctx.info(value)?;
        let x = ctx.to_tensor(value)?;
        let layer = ctx.add_layer(node, LayerKind::Identity, &[x], &[info])?;
        Ok(smallvec![TensorOrWeights::Tensor(ctx.layer_output(layer)?)])
    }
}

fn recording_registry() -> (OperatorRegistry, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = OperatorRegistry::empty().register(
        "Step",
        Box::new(Recording {
            log: Arc::clone(&log),
        }),
    );
    (registry, log)
}

/// A chain `x -> t0 -> t1 -> ...` of the given operators; the last output is `y`
fn chain_graph(ops: &[&str]) -> GraphProto {
    let nodes = ops
        .iter()
        .enumerate()
        .map(|(i, op)| {
            let input = if i == 0 { "x".to_string() } else { format!("t{}", i - 1) };
            let output = if i + 1 == ops.len() { "y".to_string() } else { format!("t{}", i) };
            make_node(op, &[&input], &[&output], &format!("n{}", i))
        })
        .collect();
    GraphProto {
        name: "chain".to_string(),
        node: nodes,
        input: vec![make_tensor_value_info("x", DataType::Float as i32, &[1, 3, 4, 4])],
        output: vec![make_tensor_value_info("y", DataType::Float as i32, &[1, 3, 4, 4])],
        ..Default::default()
    }
}

fn encode(graph: GraphProto) -> Vec<u8> {
    model(graph, vec![]).encode_to_vec()
}

fn model(graph: GraphProto, functions: Vec<FunctionProto>) -> ModelProto {
    ModelProto {
        ir_version: 8,
        producer_name: "tests".to_string(),
        opset_import: vec![make_opset(13)],
        graph: Some(graph),
        functions,
        ..Default::default()
    }
}

fn float_tensor(name: &str, dims: &[i64], value: f32) -> TensorProto {
    let count = dims.iter().product::<i64>().max(1) as usize;
    TensorProto {
        name: name.to_string(),
        dims: dims.to_vec(),
        data_type: DataType::Float as i32,
        float_data: vec![value; count],
        ..Default::default()
    }
}

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn well_formed_nodes_import_in_order() {
    let (registry, log) = recording_registry();
    let mut network = Network::new();
    let mut importer = ModelImporter::with_registry(&mut network, registry);

    assert!(importer.parse(&encode(chain_graph(&["Step"; 5])), None));
    assert_eq!(importer.num_errors(), 0);
    assert_eq!(*log.lock().unwrap(), vec!["n0", "n1", "n2", "n3", "n4"]);
    assert_eq!(importer.state(), ParseState::Done { success: true });
    drop(importer);

    assert_eq!(network.num_layers(), 5);
    assert_eq!(network.outputs().len(), 1);
}

#[test]
fn unregistered_operator_stops_at_its_node() {
    let (registry, log) = recording_registry();
    let mut network = Network::new();
    let mut importer = ModelImporter::with_registry(&mut network, registry);

    let graph = chain_graph(&["Step", "Step", "Missing", "Step"]);
    assert!(!importer.parse(&encode(graph), None));
    assert_eq!(importer.num_errors(), 1);

    let diagnostic = importer.error(0);
    assert_eq!(diagnostic.code(), ErrorCode::UnsupportedNode);
    assert_eq!(diagnostic.node(), Some(2));
    assert_eq!(diagnostic.node_operator(), "Missing");
    assert_eq!(importer.current_node(), Some(2));
    assert_eq!(*log.lock().unwrap(), vec!["n0", "n1"]);
}

#[test]
fn undefined_input_is_invalid_graph() {
    let mut network = Network::new();
    let mut importer = ModelImporter::new(&mut network);
    let mut graph = chain_graph(&["Relu", "Relu"]);
    graph.node[1].input[0] = "nowhere".to_string();

    assert!(!importer.parse(&encode(graph), None));
    assert_eq!(importer.error(0).code(), ErrorCode::InvalidGraph);
    assert_eq!(importer.error(0).node(), Some(1));
}

#[test]
fn huge_dimensions_are_a_diagnostic() {
    let graph = GraphProto {
        name: "huge".to_string(),
        node: vec![make_node("Reshape", &["x", "shape"], &["y"], "flat")],
        initializer: vec![TensorProto {
            name: "shape".to_string(),
            dims: vec![1],
            data_type: DataType::Int64 as i32,
            int64_data: vec![-1],
            ..Default::default()
        }],
        input: vec![make_tensor_value_info(
            "x",
            DataType::Float as i32,
            &[1 << 33, 1 << 33],
        )],
        output: vec![make_tensor_value_info("y", DataType::Float as i32, &[-1])],
        ..Default::default()
    };

    let mut network = Network::new();
    let mut importer = ModelImporter::new(&mut network);
    assert!(!importer.parse(&encode(graph), None));
    assert_eq!(importer.num_errors(), 1);
    assert_eq!(importer.error(0).code(), ErrorCode::UnsupportedNodeShape);
    assert_eq!(importer.error(0).node(), Some(0));
}

#[test]
fn clear_errors_then_fail_reports_fresh_diagnostics() {
    let (registry, _log) = recording_registry();
    let mut network = Network::new();
    let mut importer = ModelImporter::with_registry(&mut network, registry);

    assert!(!importer.parse(&encode(chain_graph(&["Step", "Step", "Missing"])), None));
    assert_eq!(importer.num_errors(), 1);

    importer.clear_errors();
    assert_eq!(importer.state(), ParseState::Idle);

    assert!(!importer.parse(&[0xff, 0x00], None));
    assert_eq!(importer.num_errors(), 1);
    assert_eq!(importer.error(0).code(), ErrorCode::ModelDeserializeFailed);
    assert_eq!(importer.error(0).node(), None);
}

#[test]
fn diagnostics_accumulate_across_parses() {
    let mut network = Network::new();
    let mut importer = ModelImporter::new(&mut network);
    assert!(!importer.parse(&[0xff], None));
    assert!(!importer.parse(&[0xff], None));
    assert_eq!(importer.num_errors(), 2);
}

#[test]
#[should_panic]
fn error_index_out_of_range_panics() {
    let mut network = Network::new();
    let importer = ModelImporter::new(&mut network);
    importer.error(0);
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn supports_operator_is_idempotent() {
    let mut network = Network::new();
    let importer = ModelImporter::new(&mut network);
    for op in ["Relu", "Frobnicate", "If"] {
        let first = importer.supports_operator(op);
        assert_eq!(first, importer.supports_operator(op));
    }
    assert!(importer.supports_operator("Relu"));
    assert!(!importer.supports_operator("Frobnicate"));
}

#[test]
fn supports_model_partitions_without_touching_network() {
    let mut network = Network::new();
    let mut importer = ModelImporter::new(&mut network);
    let mut partitions = SubGraphCollection::new();

    let graph = chain_graph(&["Relu", "Relu", "Frobnicate", "Relu"]);
    assert!(!importer.supports_model(&encode(graph), &mut partitions, None));
    assert_eq!(
        partitions,
        vec![
            SubGraph {
                nodes: vec![0, 1],
                supported: true
            },
            SubGraph {
                nodes: vec![2],
                supported: false
            },
            SubGraph {
                nodes: vec![3],
                supported: true
            },
        ]
    );
    assert_eq!(importer.num_errors(), 1);
    assert_eq!(importer.error(0).node(), Some(2));
    drop(importer);

    assert!(network.is_empty());
}

#[test]
fn layer_output_tensor_without_name() {
    let mut network = Network::new();
    let mut importer = ModelImporter::new(&mut network);
    assert!(importer.parse(&encode(chain_graph(&["Relu"])), None));
    assert!(importer.layer_output_tensor(None, 0).is_none());
    assert!(importer.layer_output_tensor(Some("n0"), 0).is_some());
    assert!(importer.layer_output_tensor(Some("n0"), 1).is_none());
}

// ============================================================================
// Flags
// ============================================================================

#[test]
fn flags_round_trip() {
    let mut network = Network::new();
    let mut importer = ModelImporter::new(&mut network);
    assert_eq!(
        importer.flags().bits(),
        ParserFlag::NativeInstanceNorm.mask()
    );

    for flag in ParserFlag::ALL {
        importer.set_flag(flag);
        assert!(importer.get_flag(flag));
        importer.clear_flag(flag);
        assert!(!importer.get_flag(flag));
    }

    for bits in [0, 1, 2, 3, 0x80] {
        importer.set_flags(ParserFlags::from_bits(bits));
        assert_eq!(importer.flags().bits(), bits);
    }
}

fn instance_norm_graph() -> GraphProto {
    GraphProto {
        name: "norm".to_string(),
        node: vec![make_node(
            "InstanceNormalization",
            &["x", "scale", "bias"],
            &["y"],
            "norm",
        )],
        initializer: vec![
            float_tensor("scale", &[3], 1.0),
            float_tensor("bias", &[3], 0.0),
        ],
        input: vec![make_tensor_value_info("x", DataType::Float as i32, &[1, 3, 4, 4])],
        output: vec![make_tensor_value_info("y", DataType::Float as i32, &[1, 3, 4, 4])],
        ..Default::default()
    }
}

fn normalization_layers(network: &Network) -> usize {
    network
        .layers()
        .iter()
        .filter(|l| matches!(l.kind, LayerKind::Normalization { .. }))
        .count()
}

#[test]
fn native_instance_norm_flag() {
    let bytes = encode(instance_norm_graph());

    let mut native = Network::new();
    let mut importer = ModelImporter::new(&mut native);
    assert!(importer.parse(&bytes, None));
    drop(importer);
    assert_eq!(normalization_layers(&native), 1);

    let mut decomposed = Network::new();
    let mut importer = ModelImporter::new(&mut decomposed);
    importer.clear_flag(ParserFlag::NativeInstanceNorm);
    assert!(importer.parse(&bytes, None));
    drop(importer);
    assert_eq!(normalization_layers(&decomposed), 0);
    assert!(decomposed.num_layers() > native.num_layers());
}

// ============================================================================
// Control flow, local functions, plugins
// ============================================================================

fn branch(op: &str, output: &str) -> GraphProto {
    GraphProto {
        name: format!("{}_branch", op),
        node: vec![make_node(op, &["x"], &[output], &format!("{}_in_branch", op))],
        output: vec![make_tensor_value_info(output, DataType::Float as i32, &[1, 3, 4, 4])],
        ..Default::default()
    }
}

#[test]
fn constant_condition_imports_one_branch() {
    let mut node = make_node("If", &["cond"], &["y"], "if");
    node.attribute
        .push(AttributeProto::new_graph("then_branch", branch("Relu", "t")));
    node.attribute
        .push(AttributeProto::new_graph("else_branch", branch("Tanh", "e")));
    let graph = GraphProto {
        name: "conditional".to_string(),
        node: vec![node],
        initializer: vec![TensorProto {
            name: "cond".to_string(),
            data_type: DataType::Bool as i32,
            int32_data: vec![1],
            ..Default::default()
        }],
        input: vec![make_tensor_value_info("x", DataType::Float as i32, &[1, 3, 4, 4])],
        output: vec![make_tensor_value_info("y", DataType::Float as i32, &[1, 3, 4, 4])],
        ..Default::default()
    };

    let mut network = Network::new();
    let mut importer = ModelImporter::new(&mut network);
    assert!(importer.parse(&encode(graph), None));
    drop(importer);

    let kinds: Vec<_> = network.layers().iter().map(|l| l.kind.type_name()).collect();
    assert_eq!(kinds, vec!["Activation"]);
    assert_eq!(network.layers()[0].name, "Relu_in_branch");
}

#[test]
fn subgraph_nesting_beyond_limit_is_unsupported() {
    fn nest(depth: usize) -> NodeProto {
        let body = if depth == 0 {
            make_node("Relu", &["x"], &["y"], "leaf")
        } else {
            nest(depth - 1)
        };
        let graph = GraphProto {
            name: format!("level{}", depth),
            node: vec![body],
            output: vec![make_tensor_value_info("y", DataType::Float as i32, &[1, 3, 4, 4])],
            ..Default::default()
        };
        let mut node = make_node("If", &["cond"], &["y"], &format!("if{}", depth));
        node.attribute
            .push(AttributeProto::new_graph("then_branch", graph.clone()));
        node.attribute
            .push(AttributeProto::new_graph("else_branch", graph));
        node
    }

    let graph = GraphProto {
        name: "deep".to_string(),
        node: vec![nest(3)],
        input: vec![
            make_tensor_value_info("x", DataType::Float as i32, &[1, 3, 4, 4]),
            make_tensor_value_info("cond", DataType::Bool as i32, &[]),
        ],
        output: vec![make_tensor_value_info("y", DataType::Float as i32, &[1, 3, 4, 4])],
        ..Default::default()
    };
    let bytes = encode(graph);

    let mut network = Network::new();
    let mut importer = ModelImporter::new(&mut network).with_options(ImportOptions {
        max_subgraph_depth: 2,
        ..Default::default()
    });
    assert!(!importer.parse(&bytes, None));
    let last = importer.errors().last().unwrap();
    assert_eq!(last.code(), ErrorCode::UnsupportedGraph);
    assert_eq!(last.node(), Some(0));
    assert!(importer.num_errors() > 1);

    let mut network = Network::new();
    let mut importer = ModelImporter::new(&mut network);
    assert!(importer.parse(&bytes, None));
}

#[test]
fn local_function_expands_with_prefixed_names() {
    let function = FunctionProto {
        name: "Block".to_string(),
        input: vec!["in".to_string()],
        output: vec!["out".to_string()],
        node: vec![
            make_node("Relu", &["in"], &["mid"], "act"),
            make_node("Sigmoid", &["mid"], &["out"], "gate"),
        ],
        ..Default::default()
    };
    let graph = GraphProto {
        name: "calls".to_string(),
        node: vec![
            make_node("Block", &["x"], &["h"], "first"),
            make_node("Block", &["h"], &["y"], "second"),
        ],
        input: vec![make_tensor_value_info("x", DataType::Float as i32, &[1, 3, 4, 4])],
        output: vec![make_tensor_value_info("y", DataType::Float as i32, &[1, 3, 4, 4])],
        ..Default::default()
    };

    let mut network = Network::new();
    let mut importer = ModelImporter::new(&mut network);
    assert!(!importer.supports_operator("Block"));
    assert!(importer.parse(&model(graph, vec![function]).encode_to_vec(), None));
    drop(importer);

    let names: Vec<_> = network.layers().iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["first/act", "first/gate", "second/act", "second/gate"]);
    assert!(network.find_tensor("first/mid").is_some());
    assert!(network.find_tensor("y").is_some());
}

#[test]
fn local_function_failure_names_the_function() {
    let function = FunctionProto {
        name: "Broken".to_string(),
        input: vec!["in".to_string()],
        output: vec!["out".to_string()],
        node: vec![
            make_node("Relu", &["in"], &["mid"], "ok"),
            make_node("Frobnicate", &["mid"], &["out"], "bad"),
        ],
        ..Default::default()
    };
    let graph = GraphProto {
        node: vec![make_node("Broken", &["x"], &["y"], "call")],
        input: vec![make_tensor_value_info("x", DataType::Float as i32, &[1, 3, 4, 4])],
        output: vec![make_tensor_value_info("y", DataType::Float as i32, &[1, 3, 4, 4])],
        ..Default::default()
    };
    let bytes = model(graph, vec![function]).encode_to_vec();

    let mut network = Network::new();
    let mut importer = ModelImporter::new(&mut network);
    assert!(!importer.parse(&bytes, None));

    let errors = importer.errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].node(), Some(1));
    assert_eq!(errors[0].node_operator(), "Frobnicate");
    assert_eq!(errors[0].local_function_stack().to_vec(), vec!["Broken".to_string()]);
    assert_eq!(errors[1].node(), Some(0));
    assert_eq!(errors[1].code(), ErrorCode::UnsupportedNode);
    assert!(errors[1].local_function_stack().is_empty());

    // The static check reports the body node too
    importer.clear_errors();
    let mut partitions = SubGraphCollection::new();
    assert!(!importer.supports_model(&bytes, &mut partitions, None));
    assert_eq!(importer.error(0).local_function_stack().to_vec(), vec!["Broken".to_string()]);
}

#[test]
fn plugin_library_recorded_once() {
    let mut catalog = PluginCatalog::new();
    catalog.add("FancyNorm", Some("libfancy.so"));

    let graph = chain_graph(&["FancyNorm", "Relu", "FancyNorm", "FancyNorm"]);
    let mut network = Network::new();
    let mut importer = ModelImporter::with_plugins(&mut network, &catalog);
    assert!(importer.supports_operator("FancyNorm"));
    assert!(importer.parse(&encode(graph), None));
    assert_eq!(importer.used_plugin_libraries(), vec!["libfancy.so"]);
    drop(importer);

    let plugins = network
        .layers()
        .iter()
        .filter(|l| matches!(l.kind, LayerKind::Plugin { .. }))
        .count();
    assert_eq!(plugins, 3);
}

#[test]
fn plugin_libraries_cover_the_latest_parse() {
    let mut catalog = PluginCatalog::new();
    catalog.add("FancyA", Some("liba.so"));
    catalog.add("FancyB", Some("libb.so"));

    let first = chain_graph(&["FancyA", "Relu"]);
    let mut second = chain_graph(&["FancyB", "Relu"]);
    second.input[0].name = "x2".to_string();
    second.node[0].input[0] = "x2".to_string();

    let mut network = Network::new();
    let mut importer = ModelImporter::with_plugins(&mut network, &catalog);
    assert!(importer.parse(&encode(first), None));
    assert_eq!(importer.used_plugin_libraries(), vec!["liba.so"]);

    assert!(importer.parse(&encode(second), None));
    assert_eq!(importer.used_plugin_libraries(), vec!["libb.so"]);

    // a parse that fails before any node still forgets the previous libraries
    assert!(!importer.parse(&[0xff], None));
    assert!(importer.used_plugin_libraries().is_empty());
}
