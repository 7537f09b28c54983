//! Static support check
//!
//! Works against a shared context, so nothing is added to the network.

use crate::context::ImportContext;
use crate::error::{Diagnostic, ImportError};
use crate::proto::{GraphProto, NodeProto};

use super::function::bind_body;

const FUNC: &str = "parse_node_static_check";

/// Check whether `node` could be imported, pushing any problems to `errors`
///
/// Model-local functions are checked node by node with the function on the
/// diagnostics' local-function stack. Graph attributes (`If` branches) are
/// checked recursively.
pub fn parse_node_static_check(
    ctx: &ImportContext<'_>,
    node: &NodeProto,
    errors: &mut Vec<Diagnostic>,
    node_index: usize,
) {
    let mut functions = ctx.function_stack().to_vec();
    check_node(ctx, node, node_index, errors, &mut functions, ctx.subgraph_depth());
}

fn check_node(
    ctx: &ImportContext<'_>,
    node: &NodeProto,
    node_index: usize,
    errors: &mut Vec<Diagnostic>,
    functions: &mut Vec<String>,
    depth: usize,
) {
    let report = |err: ImportError, functions: &[String]| {
        Diagnostic::from_error(&err, FUNC)
            .with_node(node_index, node)
            .with_local_functions(functions)
    };

    if let Some(importer) = ctx.registry().lookup(&node.op_type) {
        if let Err(err) = importer.check(ctx, node) {
            errors.push(report(err, functions.as_slice()));
        }
        for graph in node
            .attribute
            .iter()
            .flat_map(|attr| attr.g.iter().chain(attr.graphs.iter()))
        {
            if depth >= ctx.max_subgraph_depth() {
                errors.push(report(
                    ImportError::UnsupportedGraph(format!(
                        "Subgraph nesting exceeds {}",
                        ctx.max_subgraph_depth()
                    )),
                    functions.as_slice(),
                ));
                return;
            }
            check_graph(ctx, graph, errors, functions, depth + 1);
        }
        return;
    }

    let Some(function) = ctx.local_function(&node.op_type) else {
        errors.push(report(
            ImportError::UnsupportedNode(node.op_type.clone()),
            functions.as_slice(),
        ));
        return;
    };

    if functions.contains(&function.name) {
        errors.push(report(
            ImportError::UnsupportedGraph(format!(
                "Local function '{}' calls itself",
                function.name
            )),
            functions.as_slice(),
        ));
        return;
    }
    if functions.len() >= ctx.max_subgraph_depth() {
        errors.push(report(
            ImportError::UnsupportedGraph(format!(
                "Local function nesting exceeds {}",
                ctx.max_subgraph_depth()
            )),
            functions.as_slice(),
        ));
        return;
    }

    functions.push(function.name.clone());
    for (index, body_node) in bind_body(node, &function).iter().enumerate() {
        check_node(ctx, body_node, index, errors, functions, depth);
    }
    functions.pop();
}

fn check_graph(
    ctx: &ImportContext<'_>,
    graph: &GraphProto,
    errors: &mut Vec<Diagnostic>,
    functions: &mut Vec<String>,
    depth: usize,
) {
    for (index, node) in graph.node.iter().enumerate() {
        check_node(ctx, node, index, errors, functions, depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::importers::testing::context;
    use crate::network::{Network, NetworkDefinition};
    use crate::proto::extensions::{make_node, make_opset, make_tensor_value_info};
    use crate::proto::tensor_proto::DataType;
    use crate::proto::{AttributeProto, FunctionProto, ModelProto};

    fn branch(op: &str) -> GraphProto {
        GraphProto {
            name: format!("{}_branch", op),
            node: vec![make_node(op, &["x"], &["y"], "inner")],
            output: vec![make_tensor_value_info("y", DataType::Float as i32, &[4])],
            ..Default::default()
        }
    }

    #[test]
    fn test_supported_node_adds_nothing() {
        let mut network = Network::new();
        let ctx = context(&mut network, 13, &[]);
        let mut errors = Vec::new();
        parse_node_static_check(&ctx, &make_node("Relu", &["x"], &["y"], "r"), &mut errors, 0);
        assert!(errors.is_empty());
        assert_eq!(ctx.network().num_layers(), 0);
    }

    #[test]
    fn test_unknown_operator() {
        let mut network = Network::new();
        let ctx = context(&mut network, 13, &[]);
        let mut errors = Vec::new();
        parse_node_static_check(&ctx, &make_node("Frob", &["x"], &["y"], "f"), &mut errors, 7);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), ErrorCode::UnsupportedNode);
        assert_eq!(errors[0].node(), Some(7));
        assert_eq!(errors[0].func(), FUNC);
    }

    #[test]
    fn test_importer_check_runs() {
        let mut network = Network::new();
        let ctx = context(&mut network, 13, &[]);
        let mut errors = Vec::new();
        // Concat without its axis
        let node = make_node("Concat", &["a", "b"], &["c"], "cat");
        parse_node_static_check(&ctx, &node, &mut errors, 0);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].node_name(), "cat");
    }

    #[test]
    fn test_if_branches_checked() {
        let mut network = Network::new();
        let ctx = context(&mut network, 13, &[]);
        let mut node = make_node("If", &["c"], &["y"], "if");
        node.attribute
            .push(AttributeProto::new_graph("then_branch", branch("Relu")));
        node.attribute
            .push(AttributeProto::new_graph("else_branch", branch("Frob")));

        let mut errors = Vec::new();
        parse_node_static_check(&ctx, &node, &mut errors, 3);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].node_operator(), "Frob");
        assert_eq!(errors[0].node(), Some(0));
    }

    #[test]
    fn test_local_function_body_checked() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[]);
        let function = FunctionProto {
            name: "Block".to_string(),
            input: vec!["a".to_string()],
            output: vec!["out".to_string()],
            node: vec![
                make_node("Relu", &["a"], &["t"], "ok"),
                make_node("Frob", &["t"], &["out"], "bad"),
            ],
            ..Default::default()
        };
        ctx.load_model_metadata(&ModelProto {
            opset_import: vec![make_opset(13)],
            functions: vec![function],
            ..Default::default()
        });

        let mut errors = Vec::new();
        parse_node_static_check(&ctx, &make_node("Block", &["x"], &["y"], "b"), &mut errors, 0);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].node(), Some(1));
        assert_eq!(errors[0].local_function_stack().to_vec(), vec!["Block".to_string()]);
    }

    #[test]
    fn test_nesting_bound() {
        let mut network = Network::new();
        let mut ctx = context(&mut network, 13, &[]);
        ctx.set_max_subgraph_depth(1);

        let inner = {
            let mut node = make_node("If", &["c"], &["y"], "inner_if");
            node.attribute
                .push(AttributeProto::new_graph("then_branch", branch("Relu")));
            node.attribute
                .push(AttributeProto::new_graph("else_branch", branch("Relu")));
            node
        };
        let wrap = GraphProto {
            node: vec![inner],
            output: vec![make_tensor_value_info("y", DataType::Float as i32, &[4])],
            ..Default::default()
        };
        let mut outer = make_node("If", &["c"], &["y"], "outer_if");
        outer
            .attribute
            .push(AttributeProto::new_graph("then_branch", wrap.clone()));
        outer
            .attribute
            .push(AttributeProto::new_graph("else_branch", wrap));

        let mut errors = Vec::new();
        parse_node_static_check(&ctx, &outer, &mut errors, 0);
        assert!(!errors.is_empty());
        assert!(errors
            .iter()
            .all(|e| e.code() == ErrorCode::UnsupportedGraph));
    }
}
