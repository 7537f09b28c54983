//! Plugin operators
//!
//! A [`PluginCatalog`] lists operators implemented outside the built-in
//! catalog, each optionally tied to the native library providing it. Loading
//! those libraries is up to the inference engine; the importer only emits
//! plugin layers and records which libraries the network needs.

use indexmap::IndexMap;

use crate::context::{ImportContext, TensorOrWeights};
use crate::error::{ImportError, ImportResult};
use crate::network::LayerKind;
use crate::proto::NodeProto;

use super::{NodeImporter, NodeOutputs};

/// Operator name → providing library, in registration order
#[derive(Debug, Clone, Default)]
pub struct PluginCatalog {
    entries: IndexMap<String, Option<String>>,
}

impl PluginCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin operator, replacing any previous entry of that name
    pub fn add(&mut self, op_type: &str, library: Option<&str>) -> &mut Self {
        self.entries
            .insert(op_type.to_string(), library.map(str::to_string));
        self
    }

    /// Library providing `op_type`
    pub fn library(&self, op_type: &str) -> Option<&str> {
        self.entries.get(op_type).and_then(|l| l.as_deref())
    }

    /// Whether `op_type` is listed
    pub fn contains(&self, op_type: &str) -> bool {
        self.entries.contains_key(op_type)
    }

    /// Entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(op, lib)| (op.as_str(), lib.as_deref()))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Emits a plugin layer for any node
///
/// Outputs take the type and shape of the first input.
#[derive(Debug, Clone)]
pub struct PluginImporter {
    library: Option<String>,
}

impl PluginImporter {
    /// Importer for operators from `library`
    pub fn new(library: Option<String>) -> Self {
        Self { library }
    }
}

impl NodeImporter for PluginImporter {
    fn import(
        &self,
        ctx: &mut ImportContext<'_>,
        node: &NodeProto,
        inputs: &[Option<TensorOrWeights>],
    ) -> ImportResult<NodeOutputs> {
        let first = inputs.iter().flatten().next().ok_or_else(|| {
            ImportError::InvalidNode(format!(
                "Plugin operator {} '{}' has no inputs",
                node.op_type,
                node.display_name()
            ))
        })?;
        let info = ctx.info(first)?;

        let layer_inputs = inputs
            .iter()
            .flatten()
            .map(|value| ctx.to_tensor(value))
            .collect::<ImportResult<Vec<_>>>()?;
        let output_infos = vec![info; node.output.len().max(1)];
        let layer = ctx.add_layer(
            node,
            LayerKind::Plugin {
                op_type: node.op_type.clone(),
                library: self.library.clone(),
                attributes: node.attribute.clone(),
            },
            &layer_inputs,
            &output_infos,
        )?;
        if let Some(library) = &self.library {
            ctx.record_plugin_library(library);
        }

        (0..output_infos.len())
            .map(|i| {
                ctx.network()
                    .layer_output(layer, i)
                    .map(TensorOrWeights::Tensor)
                    .ok_or_else(|| ImportError::Internal(format!("Plugin output {} missing", i)))
            })
            .collect()
    }

    fn check(&self, _ctx: &ImportContext<'_>, node: &NodeProto) -> ImportResult<()> {
        if node.input.iter().all(|i| i.is_empty()) {
            return Err(ImportError::InvalidNode(format!(
                "Plugin operator {} '{}' has no inputs",
                node.op_type,
                node.display_name()
            )));
        }
        Ok(())
    }
}
