//! Node and graph parsing
//!
//! [`parse_node`] drives a single node through its importer and registers
//! what it produces. [`parse_graph`] walks a graph in order and stops at the
//! first failure. Nested graphs (`If` branches) go through
//! [`import_subgraph`]. A node whose operator is a model-local function is
//! expanded in place.
//!
//! Nothing is rolled back on failure: layers added by a failing node stay in
//! the network.

mod check;
mod function;

pub use check::parse_node_static_check;

use std::sync::Arc;

use log::debug;

use crate::context::{ImportContext, TensorOrWeights};
use crate::error::{Diagnostic, ImportError, ImportResult};
use crate::importers::NodeOutputs;
use crate::proto::{GraphProto, NodeProto};
use crate::weights::Weights;

/// A contiguous run of top-level nodes sharing one support verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubGraph {
    /// Node indices, ascending
    pub nodes: Vec<usize>,
    /// Whether every node in the run can be imported
    pub supported: bool,
}

/// Partition of a graph's nodes, in node order
pub type SubGraphCollection = Vec<SubGraph>;

/// Group per-node support verdicts
///
/// Supported nodes form maximal contiguous runs; every unsupported node is an
/// entry of its own.
pub fn partition(supported: &[bool]) -> SubGraphCollection {
    let mut collection: SubGraphCollection = Vec::new();
    for (index, &ok) in supported.iter().enumerate() {
        match collection.last_mut() {
            Some(last) if ok && last.supported => last.nodes.push(index),
            _ => collection.push(SubGraph {
                nodes: vec![index],
                supported: ok,
            }),
        }
    }
    collection
}

/// Import one node
///
/// The returned diagnostic carries `node_index`, the node's name and operator,
/// and the local functions currently being expanded. With `deserializing` set
/// an output name that is already registered is replaced instead of rejected.
pub fn parse_node(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    node_index: usize,
    deserializing: bool,
) -> Result<(), Diagnostic> {
    debug!(
        "Parsing node {}: {} [{}]",
        node_index,
        node.display_name(),
        node.op_type
    );

    ctx.set_deserializing(deserializing);
    import_node(ctx, node, deserializing).map_err(|err| {
        Diagnostic::from_error(&err, "parse_node")
            .with_node(node_index, node)
            .with_local_functions(ctx.function_stack())
    })
}

fn import_node(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    deserializing: bool,
) -> ImportResult<()> {
    let registry = Arc::clone(ctx.registry());

    let outputs = match registry.lookup(&node.op_type) {
        Some(importer) => {
            let inputs = resolve_inputs(ctx, node)?;
            importer.import(ctx, node, &inputs)?
        }
        None => match ctx.local_function(&node.op_type) {
            Some(func) => {
                resolve_inputs(ctx, node)?;
                function::expand(ctx, node, &func, deserializing)?
            }
            None => return Err(ImportError::UnsupportedNode(node.op_type.clone())),
        },
    };

    register_outputs(ctx, node, outputs, deserializing)
}

/// Resolve input names; an empty name is an omitted optional input
fn resolve_inputs(
    ctx: &ImportContext<'_>,
    node: &NodeProto,
) -> ImportResult<Vec<Option<TensorOrWeights>>> {
    node.input
        .iter()
        .map(|name| {
            if name.is_empty() {
                return Ok(None);
            }
            ctx.tensor(name).cloned().map(Some).ok_or_else(|| {
                ImportError::InvalidGraph(format!(
                    "Node '{}' ({}): input '{}' is not defined",
                    node.display_name(),
                    node.op_type,
                    name
                ))
            })
        })
        .collect()
}

fn register_outputs(
    ctx: &mut ImportContext<'_>,
    node: &NodeProto,
    outputs: NodeOutputs,
    deserializing: bool,
) -> ImportResult<()> {
    let mut produced = outputs.into_iter();

    for name in &node.output {
        let value = produced.next();
        if name.is_empty() {
            continue;
        }
        let value = value.ok_or_else(|| {
            ImportError::InvalidNode(format!(
                "Node '{}' ({}): no value produced for output '{}'",
                node.display_name(),
                node.op_type,
                name
            ))
        })?;

        let tensor = value.as_tensor();
        ctx.register_tensor(name, value, deserializing)?;

        // Network inputs keep their own names
        if let Some(id) = tensor {
            let produced_by_layer = ctx
                .network()
                .tensor(id)
                .map_or(false, |t| t.producer.is_some());
            if produced_by_layer {
                let resolved = ctx.resolve_name(name);
                ctx.network_mut().set_tensor_name(id, &resolved)?;
            }
        }
    }

    Ok(())
}

/// Import every node of `graph` in order
///
/// `current_node` tracks the index of the node being imported. On failure the
/// nested diagnostics stashed by subgraphs and local functions are moved into
/// `errors`, followed by the failing node's own diagnostic, which is also
/// returned. `errors` is untouched on success.
pub fn parse_graph(
    ctx: &mut ImportContext<'_>,
    graph: &GraphProto,
    errors: &mut Vec<Diagnostic>,
    deserializing: bool,
    mut current_node: Option<&mut usize>,
) -> Result<(), Diagnostic> {
    for (index, node) in graph.node.iter().enumerate() {
        if let Some(current) = current_node.as_deref_mut() {
            *current = index;
        }
        if let Err(diagnostic) = parse_node(ctx, node, index, deserializing) {
            errors.extend(ctx.take_nested_diagnostics());
            errors.push(diagnostic.clone());
            return Err(diagnostic);
        }
    }
    Ok(())
}

/// Import a nested graph and return the values of its outputs
///
/// Names registered inside the graph, including its initializers, are not
/// visible once it returns.
pub fn import_subgraph(
    ctx: &mut ImportContext<'_>,
    graph: &GraphProto,
    deserializing: bool,
) -> ImportResult<NodeOutputs> {
    ctx.enter_subgraph()?;
    debug!(
        "Entering subgraph '{}' at depth {}",
        graph.name,
        ctx.subgraph_depth()
    );
    let result = import_subgraph_body(ctx, graph, deserializing);
    ctx.exit_subgraph();
    result
}

fn import_subgraph_body(
    ctx: &mut ImportContext<'_>,
    graph: &GraphProto,
    deserializing: bool,
) -> ImportResult<NodeOutputs> {
    for initializer in &graph.initializer {
        ctx.register_tensor(
            &initializer.name,
            Weights::from_tensor(initializer.clone()).into(),
            deserializing,
        )?;
    }

    let mut errors = Vec::new();
    if let Err(diagnostic) = parse_graph(ctx, graph, &mut errors, deserializing, None) {
        ctx.stash_nested_diagnostics(errors);
        return Err(nested(format!("subgraph '{}'", graph.name), &diagnostic));
    }

    graph
        .output
        .iter()
        .map(|output| {
            ctx.tensor(&output.name).cloned().ok_or_else(|| {
                ImportError::InvalidGraph(format!(
                    "Subgraph '{}' does not produce its output '{}'",
                    graph.name, output.name
                ))
            })
        })
        .collect()
}

/// Wrap the failure of a nested graph for the enclosing node
fn nested(context: String, inner: &Diagnostic) -> ImportError {
    ImportError::Nested {
        context,
        code: inner.code(),
        message: inner.message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::importers::testing::context;
    use crate::network::{LayerKind, Network, NetworkDefinition, TensorInfo};
    use crate::proto::extensions::{make_node, make_tensor_value_info};
    use crate::proto::tensor_proto::DataType;
    use crate::proto::{AttributeProto, TensorProto};

    fn chain(ops: &[&str]) -> GraphProto {
        let nodes = ops
            .iter()
            .enumerate()
            .map(|(i, op)| {
                let input = if i == 0 { "x".to_string() } else { format!("t{}", i - 1) };
                make_node(op, &[&input], &[&format!("t{}", i)], &format!("n{}", i))
            })
            .collect();
        GraphProto {
            name: "chain".to_string(),
            node: nodes,
            ..Default::default()
        }
    }

    #[test]
    fn test_partition() {
        let parts = partition(&[true, true, false, true]);
        assert_eq!(
            parts,
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
    }

    #[test]
    fn test_partition_adjacent_unsupported() {
        let parts = partition(&[false, false]);
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| !p.supported && p.nodes.len() == 1));
        assert!(partition(&[]).is_empty());
    }

    #[test]
    fn test_parse_graph_in_order() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[("x", TensorInfo::float(&[1, 4]))]);
        let graph = chain(&["Relu", "Sigmoid", "Tanh"]);
        let mut errors = Vec::new();
        let mut current = 0;

        parse_graph(&mut ctx, &graph, &mut errors, false, Some(&mut current)).unwrap();
        assert!(errors.is_empty());
        assert_eq!(current, 2);
        assert!(ctx.has_tensor("t2"));

        let names: Vec<_> = network.layers().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["n0", "n1", "n2"]);
        assert!(network.find_tensor("t1").is_some());
    }

    #[test]
    fn test_unknown_operator_stops_walk() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[("x", TensorInfo::float(&[4]))]);
        let graph = chain(&["Relu", "Frobnicate", "Tanh"]);
        let mut errors = Vec::new();
        let mut current = 0;

        let diag = parse_graph(&mut ctx, &graph, &mut errors, false, Some(&mut current))
            .unwrap_err();
        assert_eq!(diag.code(), ErrorCode::UnsupportedNode);
        assert_eq!(diag.node(), Some(1));
        assert_eq!(diag.node_operator(), "Frobnicate");
        assert_eq!(errors, vec![diag]);
        assert_eq!(current, 1);
        assert_eq!(network.num_layers(), 1);
    }

    #[test]
    fn test_undefined_input() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[]);
        let node = make_node("Relu", &["missing"], &["y"], "relu");
        let diag = parse_node(&mut ctx, &node, 0, false).unwrap_err();
        assert_eq!(diag.code(), ErrorCode::InvalidGraph);
        assert!(diag.message().contains("missing"));
    }

    #[test]
    fn test_duplicate_output_unless_deserializing() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[("x", TensorInfo::float(&[4]))]);
        let first = make_node("Relu", &["x"], &["y"], "a");
        let second = make_node("Sigmoid", &["x"], &["y"], "b");

        parse_node(&mut ctx, &first, 0, false).unwrap();
        let diag = parse_node(&mut ctx, &second, 1, false).unwrap_err();
        assert_eq!(diag.code(), ErrorCode::InvalidGraph);

        parse_node(&mut ctx, &second, 2, true).unwrap();
        let y = ctx.tensor("y").and_then(TensorOrWeights::as_tensor).unwrap();
        let producer = ctx.network().tensor(y).and_then(|t| t.producer).unwrap();
        assert_eq!(ctx.network().layer(producer).unwrap().name, "b_2");
    }

    #[test]
    fn test_network_input_keeps_name() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[("x", TensorInfo::float(&[4]))]);
        let x = ctx.tensor("x").and_then(TensorOrWeights::as_tensor).unwrap();

        // A branch that passes an outer value straight through
        let branch = GraphProto {
            name: "passthrough".to_string(),
            output: vec![make_tensor_value_info("x", DataType::Float as i32, &[4])],
            ..Default::default()
        };
        let outputs = import_subgraph(&mut ctx, &branch, false).unwrap();
        let node = make_node("If", &["cond"], &["y"], "if");
        register_outputs(&mut ctx, &node, outputs, false).unwrap();

        assert!(ctx.has_tensor("y"));
        assert_eq!(network.find_tensor("x"), Some(x));
    }

    #[test]
    fn test_subgraph_scope_and_initializers() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[("x", TensorInfo::float(&[4]))]);
        let bias = TensorProto {
            name: "bias".to_string(),
            dims: vec![4],
            data_type: DataType::Float as i32,
            float_data: vec![1.0; 4],
            ..Default::default()
        };
        let graph = GraphProto {
            name: "body".to_string(),
            node: vec![make_node("Add", &["x", "bias"], &["sum"], "add")],
            initializer: vec![bias],
            output: vec![make_tensor_value_info("sum", DataType::Float as i32, &[4])],
            ..Default::default()
        };

        let outputs = import_subgraph(&mut ctx, &graph, false).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(ctx.info(&outputs[0]).unwrap().dims, vec![4]);
        assert!(!ctx.has_tensor("bias"));
        assert!(!ctx.has_tensor("sum"));
        assert_eq!(ctx.subgraph_depth(), 0);
    }

    #[test]
    fn test_subgraph_failure_is_nested() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[("x", TensorInfo::float(&[4]))]);
        let graph = GraphProto {
            name: "broken".to_string(),
            node: vec![make_node("Frobnicate", &["x"], &["y"], "inner")],
            ..Default::default()
        };

        let err = import_subgraph(&mut ctx, &graph, false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedNode);
        assert!(err.to_string().starts_with("subgraph 'broken'"));

        let stashed = ctx.take_nested_diagnostics();
        assert_eq!(stashed.len(), 1);
        assert_eq!(stashed[0].node_name(), "inner");
        assert_eq!(ctx.subgraph_depth(), 0);
    }

    fn nested_if(depth: usize) -> NodeProto {
        let body = if depth == 0 {
            make_node("Relu", &["x"], &["y"], "leaf")
        } else {
            nested_if(depth - 1)
        };
        let branch = GraphProto {
            name: format!("level{}", depth),
            node: vec![body],
            output: vec![make_tensor_value_info("y", DataType::Float as i32, &[4])],
            ..Default::default()
        };
        let mut node = make_node("If", &["cond"], &["y"], &format!("if{}", depth));
        node.attribute
            .push(AttributeProto::new_graph("then_branch", branch.clone()));
        node.attribute
            .push(AttributeProto::new_graph("else_branch", branch));
        node
    }

    #[test]
    fn test_subgraph_depth_limit() {
        let mut network = Network::new();
        let specs = [
            ("x", TensorInfo::float(&[4])),
            ("cond", TensorInfo::new(DataType::Bool, &[])),
        ];
        let mut ctx = context(&mut network, 13, &specs);
        ctx.set_max_subgraph_depth(2);

        let mut errors = Vec::new();
        let ok = GraphProto {
            node: vec![nested_if(1)],
            ..Default::default()
        };
        parse_graph(&mut ctx, &ok, &mut errors, false, None).unwrap();

        let too_deep = GraphProto {
            node: vec![nested_if(2)],
            ..Default::default()
        };
        let diag = parse_graph(&mut ctx, &too_deep, &mut errors, true, None).unwrap_err();
        assert_eq!(diag.code(), ErrorCode::UnsupportedGraph);
        // innermost failures come first
        assert!(errors.len() >= 2);
        assert_eq!(errors.last(), Some(&diag));
        assert_eq!(ctx.subgraph_depth(), 0);
    }

    #[test]
    fn test_missing_output_value() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[("x", TensorInfo::float(&[4]))]);
        let node = make_node("Relu", &["x"], &["y", "extra"], "relu");
        let diag = parse_node(&mut ctx, &node, 0, false).unwrap_err();
        assert_eq!(diag.code(), ErrorCode::InvalidNode);
        // no rollback
        assert!(matches!(
            network.layers()[0].kind,
            LayerKind::Activation { .. }
        ));
    }
}
