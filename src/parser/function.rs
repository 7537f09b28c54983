//! Model-local function expansion
//!
//! A call is expanded in place: the body nodes are parsed in a name scope
//! where the function's formal inputs resolve to the caller's values and
//! every other name is prefixed with the call-site name.

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::context::ImportContext;
use crate::error::{ImportError, ImportResult};
use crate::importers::NodeOutputs;
use crate::proto::{AttributeProto, FunctionProto, GraphProto, NodeProto};

use super::{nested, parse_graph};

/// Name identifying a call site; unnamed calls use their first output
fn call_site_name(call: &NodeProto) -> &str {
    if !call.name.is_empty() {
        return &call.name;
    }
    call.output
        .iter()
        .find(|o| !o.is_empty())
        .map_or(call.op_type.as_str(), String::as_str)
}

/// Resolve an attribute reference against the call site
///
/// A reference takes the call-site attribute of the referenced name, else the
/// function's default. It is dropped when neither exists.
pub(super) fn bind_attribute(
    attr: &AttributeProto,
    call: &NodeProto,
    function: &FunctionProto,
) -> Option<AttributeProto> {
    if attr.ref_attr_name.is_empty() {
        return Some(attr.clone());
    }
    let source = call.get_attribute(&attr.ref_attr_name).or_else(|| {
        function
            .attribute_proto
            .iter()
            .find(|a| a.name == attr.ref_attr_name)
    })?;
    Some(AttributeProto {
        name: attr.name.clone(),
        ..source.clone()
    })
}

/// Body nodes with attribute references bound for `call`
///
/// Formal inputs the call omits become omitted inputs of the body nodes.
pub(super) fn bind_body(call: &NodeProto, function: &FunctionProto) -> Vec<NodeProto> {
    let omitted: FxHashSet<&str> = function
        .input
        .iter()
        .enumerate()
        .filter(|(i, _)| call.input.get(*i).map_or(true, |n| n.is_empty()))
        .map(|(_, formal)| formal.as_str())
        .collect();

    function
        .node
        .iter()
        .map(|node| NodeProto {
            input: node
                .input
                .iter()
                .map(|name| {
                    if omitted.contains(name.as_str()) {
                        String::new()
                    } else {
                        name.clone()
                    }
                })
                .collect(),
            attribute: node
                .attribute
                .iter()
                .filter_map(|attr| bind_attribute(attr, call, function))
                .collect(),
            ..node.clone()
        })
        .collect()
}

/// Expand a call to `function` and return the values of its formal outputs
pub(super) fn expand(
    ctx: &mut ImportContext<'_>,
    call: &NodeProto,
    function: &FunctionProto,
    deserializing: bool,
) -> ImportResult<NodeOutputs> {
    let renames: FxHashMap<String, String> = function
        .input
        .iter()
        .zip(&call.input)
        .filter(|(_, actual)| !actual.is_empty())
        .map(|(formal, actual)| (formal.clone(), ctx.resolve_name(actual)))
        .collect();
    let prefix = format!("{}/", ctx.resolve_name(call_site_name(call)));
    let body = GraphProto {
        name: function.name.clone(),
        node: bind_body(call, function),
        ..Default::default()
    };

    ctx.push_scope(&function.name, renames, prefix)?;
    debug!(
        "Expanding local function '{}' for '{}' ({} nodes)",
        function.name,
        call.display_name(),
        body.node.len()
    );
    let result = expand_body(ctx, function, &body, deserializing);
    ctx.pop_scope();
    result
}

fn expand_body(
    ctx: &mut ImportContext<'_>,
    function: &FunctionProto,
    body: &GraphProto,
    deserializing: bool,
) -> ImportResult<NodeOutputs> {
    let mut errors = Vec::new();
    if let Err(diagnostic) = parse_graph(ctx, body, &mut errors, deserializing, None) {
        ctx.stash_nested_diagnostics(errors);
        return Err(nested(
            format!("local function '{}'", function.name),
            &diagnostic,
        ));
    }

    function
        .output
        .iter()
        .map(|formal| {
            ctx.tensor(formal).cloned().ok_or_else(|| {
                ImportError::InvalidNode(format!(
                    "Local function '{}' does not produce its output '{}'",
                    function.name, formal
                ))
            })
        })
        .collect()
}
