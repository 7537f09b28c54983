//! Import context
//!
//! `ImportContext` is the mutable state threaded through every node import:
//! the target network, the name → value registry, layer naming, opsets,
//! model-local functions, name scopes and the list of plugin libraries used.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexSet;
use rustc_hash::FxHashMap;

use crate::error::{Diagnostic, ImportError, ImportResult};
use crate::importer::ParserFlags;
use crate::importers::OperatorRegistry;
use crate::network::{LayerId, LayerKind, NetworkDefinition, TensorId, TensorInfo};
use crate::proto::extensions::DEFAULT_DOMAINS;
use crate::proto::{FunctionProto, ModelProto, NodeProto};
use crate::weights::Weights;

/// Default opset version of a domain the model does not declare
pub const DEFAULT_OPSET_VERSION: i64 = 1;

/// Default bound on nested subgraph depth
pub const DEFAULT_MAX_SUBGRAPH_DEPTH: usize = 32;

/// A resolved node value
#[derive(Debug, Clone)]
pub enum TensorOrWeights {
    /// A tensor of the network
    Tensor(TensorId),
    /// A constant
    Weights(Weights),
}

impl TensorOrWeights {
    /// The tensor id, if this is a tensor
    pub fn as_tensor(&self) -> Option<TensorId> {
        match self {
            TensorOrWeights::Tensor(id) => Some(*id),
            TensorOrWeights::Weights(_) => None,
        }
    }

    /// The constant, if this is one
    pub fn as_weights(&self) -> Option<&Weights> {
        match self {
            TensorOrWeights::Tensor(_) => None,
            TensorOrWeights::Weights(w) => Some(w),
        }
    }

    /// Whether this is a constant
    pub fn is_weights(&self) -> bool {
        matches!(self, TensorOrWeights::Weights(_))
    }
}

impl From<TensorId> for TensorOrWeights {
    fn from(id: TensorId) -> Self {
        TensorOrWeights::Tensor(id)
    }
}

impl From<Weights> for TensorOrWeights {
    fn from(weights: Weights) -> Self {
        TensorOrWeights::Weights(weights)
    }
}

/// A local-function call scope
#[derive(Debug, Default)]
struct NameScope {
    /// Formal name → caller name
    renames: FxHashMap<String, String>,
    /// Prepended to every other name
    prefix: String,
}

/// Registrations made inside a subgraph, undone on exit
type SubgraphFrame = Vec<(String, Option<TensorOrWeights>)>;

/// State shared by every node import of a parse
pub struct ImportContext<'n> {
    network: &'n mut dyn NetworkDefinition,
    registry: Arc<OperatorRegistry>,
    flags: ParserFlags,

    tensors: FxHashMap<String, TensorOrWeights>,
    layers: FxHashMap<String, LayerId>,
    layer_name_counts: FxHashMap<String, usize>,
    constant_layers: FxHashMap<String, TensorId>,

    opsets: FxHashMap<String, i64>,
    local_functions: FxHashMap<String, Arc<FunctionProto>>,
    scopes: Vec<NameScope>,
    function_stack: Vec<String>,
    subgraph_frames: Vec<SubgraphFrame>,
    max_subgraph_depth: usize,
    deserializing: bool,

    plugin_libraries: IndexSet<String>,
    nested_diagnostics: Vec<Diagnostic>,

    model_dir: Option<PathBuf>,
    resolve_external_data: bool,
}

impl<'n> ImportContext<'n> {
    /// Create a context writing into `network`
    pub fn new(network: &'n mut dyn NetworkDefinition, registry: Arc<OperatorRegistry>) -> Self {
        Self {
            network,
            registry,
            flags: ParserFlags::default(),
            tensors: FxHashMap::default(),
            layers: FxHashMap::default(),
            layer_name_counts: FxHashMap::default(),
            constant_layers: FxHashMap::default(),
            opsets: FxHashMap::default(),
            local_functions: FxHashMap::default(),
            scopes: Vec::new(),
            function_stack: Vec::new(),
            subgraph_frames: Vec::new(),
            max_subgraph_depth: DEFAULT_MAX_SUBGRAPH_DEPTH,
            deserializing: false,
            plugin_libraries: IndexSet::new(),
            nested_diagnostics: Vec::new(),
            model_dir: None,
            resolve_external_data: true,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The target network
    pub fn network(&self) -> &dyn NetworkDefinition {
        &*self.network
    }

    /// The target network, mutably
    pub fn network_mut(&mut self) -> &mut dyn NetworkDefinition {
        &mut *self.network
    }

    /// The operator registry
    pub fn registry(&self) -> &Arc<OperatorRegistry> {
        &self.registry
    }

    /// Active parser flags
    pub fn flags(&self) -> ParserFlags {
        self.flags
    }

    /// Replace the active parser flags
    pub fn set_flags(&mut self, flags: ParserFlags) {
        self.flags = flags;
    }

    /// Directory external data is resolved against
    pub fn model_dir(&self) -> Option<&Path> {
        self.model_dir.as_deref()
    }

    /// Whether external-data initializers are read from disk
    pub fn resolves_external_data(&self) -> bool {
        self.resolve_external_data
    }

    /// Set how external data is handled for the next model
    pub fn set_external_data(&mut self, model_dir: Option<PathBuf>, resolve: bool) {
        self.model_dir = model_dir;
        self.resolve_external_data = resolve;
    }

    /// Set the subgraph nesting bound
    pub fn set_max_subgraph_depth(&mut self, depth: usize) {
        self.max_subgraph_depth = depth;
    }

    /// Subgraph nesting bound
    pub fn max_subgraph_depth(&self) -> usize {
        self.max_subgraph_depth
    }

    // ========================================================================
    // Model metadata
    // ========================================================================

    /// Load opsets and local functions of `model`
    ///
    /// Touches no tensor, layer or network state.
    pub fn load_model_metadata(&mut self, model: &ModelProto) {
        self.opsets.clear();
        for opset in &model.opset_import {
            let domain = if DEFAULT_DOMAINS.contains(&opset.domain.as_str()) {
                ""
            } else {
                opset.domain.as_str()
            };
            self.opsets.insert(domain.to_string(), opset.version);
        }

        self.local_functions = model
            .functions
            .iter()
            .map(|f| (f.name.clone(), Arc::new(f.clone())))
            .collect();
    }

    /// Forget the values and plugin libraries of a previous parse
    ///
    /// Layers and layer names are kept, so layer names stay unique across
    /// parses into the same network.
    pub fn reset_values(&mut self) {
        self.tensors.clear();
        self.constant_layers.clear();
        self.scopes.clear();
        self.function_stack.clear();
        self.subgraph_frames.clear();
        self.nested_diagnostics.clear();
        self.plugin_libraries.clear();
        self.deserializing = false;
    }

    /// Whether the node being imported may replace registered names
    ///
    /// Set for each node by the parser; nested graphs inherit it.
    pub fn is_deserializing(&self) -> bool {
        self.deserializing
    }

    /// Set the replacement mode of the current walk
    pub fn set_deserializing(&mut self, deserializing: bool) {
        self.deserializing = deserializing;
    }

    /// Opset version the model imports for `domain`
    pub fn opset_version(&self, domain: &str) -> i64 {
        let key = if is_default_domain(domain) { "" } else { domain };
        self.opsets
            .get(key)
            .copied()
            .unwrap_or(DEFAULT_OPSET_VERSION)
    }

    /// Declared opsets, default domain as `""`
    pub fn opsets(&self) -> impl Iterator<Item = (&str, i64)> {
        self.opsets.iter().map(|(d, v)| (d.as_str(), *v))
    }

    /// A model-local function named `name`
    pub fn local_function(&self, name: &str) -> Option<Arc<FunctionProto>> {
        self.local_functions.get(name).cloned()
    }

    // ========================================================================
    // Name resolution
    // ========================================================================

    /// Map a graph-level name to its name in the current scope
    pub fn resolve_name(&self, name: &str) -> String {
        match self.scopes.last() {
            None => name.to_string(),
            Some(scope) => match scope.renames.get(name) {
                Some(renamed) => renamed.clone(),
                None => format!("{}{}", scope.prefix, name),
            },
        }
    }

    /// Enter a local-function body
    ///
    /// `renames` maps the function's formal names to already resolved caller
    /// names; every other name is prefixed with `prefix`.
    pub fn push_scope(
        &mut self,
        function: &str,
        renames: FxHashMap<String, String>,
        prefix: String,
    ) -> ImportResult<()> {
        if self.function_stack.iter().any(|f| f == function) {
            return Err(ImportError::UnsupportedGraph(format!(
                "Local function '{}' calls itself",
                function
            )));
        }
        if self.scopes.len() >= self.max_subgraph_depth {
            return Err(ImportError::UnsupportedGraph(format!(
                "Local function nesting exceeds {}",
                self.max_subgraph_depth
            )));
        }
        self.scopes.push(NameScope { renames, prefix });
        self.function_stack.push(function.to_string());
        Ok(())
    }

    /// Leave the innermost local-function body
    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        self.function_stack.pop();
    }

    /// Local functions currently being expanded, outermost first
    pub fn function_stack(&self) -> &[String] {
        &self.function_stack
    }

    // ========================================================================
    // Value registry
    // ========================================================================

    /// Look up a value by graph-level name
    pub fn tensor(&self, name: &str) -> Option<&TensorOrWeights> {
        self.tensors.get(&self.resolve_name(name))
    }

    /// Whether `name` is registered
    pub fn has_tensor(&self, name: &str) -> bool {
        self.tensor(name).is_some()
    }

    /// Register a value under a graph-level name
    ///
    /// A name already registered at the same subgraph level is an error unless
    /// `allow_overwrite` is set. Names registered inside a subgraph shadow
    /// outer names until the subgraph is left.
    pub fn register_tensor(
        &mut self,
        name: &str,
        value: TensorOrWeights,
        allow_overwrite: bool,
    ) -> ImportResult<()> {
        let resolved = self.resolve_name(name);

        if let Some(frame) = self.subgraph_frames.last_mut() {
            let in_frame = frame.iter().any(|(n, _)| *n == resolved);
            if in_frame && !allow_overwrite {
                return Err(ImportError::InvalidGraph(format!(
                    "Tensor '{}' is produced more than once",
                    resolved
                )));
            }
            let previous = self.tensors.insert(resolved.clone(), value);
            if !in_frame {
                frame.push((resolved, previous));
            }
            return Ok(());
        }

        if self.tensors.contains_key(&resolved) && !allow_overwrite {
            return Err(ImportError::InvalidGraph(format!(
                "Tensor '{}' is produced more than once",
                resolved
            )));
        }
        self.tensors.insert(resolved, value);
        Ok(())
    }

    /// Enter a nested graph
    pub fn enter_subgraph(&mut self) -> ImportResult<()> {
        if self.subgraph_frames.len() >= self.max_subgraph_depth {
            return Err(ImportError::UnsupportedGraph(format!(
                "Subgraph nesting exceeds {}",
                self.max_subgraph_depth
            )));
        }
        self.subgraph_frames.push(Vec::new());
        Ok(())
    }

    /// Leave the innermost nested graph, dropping its registrations
    pub fn exit_subgraph(&mut self) {
        let Some(frame) = self.subgraph_frames.pop() else {
            return;
        };
        for (name, previous) in frame.into_iter().rev() {
            match previous {
                Some(value) => {
                    self.tensors.insert(name, value);
                }
                None => {
                    self.tensors.remove(&name);
                }
            }
        }
    }

    /// Current subgraph nesting depth
    pub fn subgraph_depth(&self) -> usize {
        self.subgraph_frames.len()
    }

    // ========================================================================
    // Layers
    // ========================================================================

    /// Add a layer on behalf of `node` and give it a unique name
    pub fn add_layer(
        &mut self,
        node: &NodeProto,
        kind: LayerKind,
        inputs: &[TensorId],
        outputs: &[TensorInfo],
    ) -> ImportResult<LayerId> {
        let base = if node.name.is_empty() {
            format!("{}_{}", node.op_type, self.network.num_layers())
        } else {
            self.resolve_name(&node.name)
        };
        let id = self.network.add_layer(kind, inputs, outputs)?;
        let name = self.unique_layer_name(base);
        self.network.set_layer_name(id, &name)?;
        self.layers.insert(name, id);
        Ok(id)
    }

    fn unique_layer_name(&mut self, base: String) -> String {
        let count = self.layer_name_counts.entry(base.clone()).or_insert(0);
        *count += 1;
        if *count == 1 && !self.layers.contains_key(&base) {
            return base;
        }
        loop {
            let candidate = format!("{}_{}", base, count);
            *count += 1;
            if !self.layers.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Layer registered under `name`
    pub fn layer(&self, name: &str) -> Option<LayerId> {
        self.layers.get(name).copied()
    }

    /// The `index`-th output tensor of the layer named `name`
    pub fn find_layer_output_tensor(&self, name: &str, index: usize) -> Option<TensorId> {
        let layer = self.layers.get(name)?;
        self.network.layer_output(*layer, index)
    }

    /// First output of a freshly added layer
    pub fn layer_output(&self, layer: LayerId) -> ImportResult<TensorId> {
        self.network.layer_output(layer, 0).ok_or_else(|| {
            ImportError::Internal(format!("Layer {} has no output", layer.index()))
        })
    }

    /// Type and shape of a value
    pub fn info(&self, value: &TensorOrWeights) -> ImportResult<TensorInfo> {
        match value {
            TensorOrWeights::Tensor(id) => self
                .network
                .tensor(*id)
                .map(|t| t.info.clone())
                .ok_or_else(|| {
                    ImportError::Internal(format!("Unknown tensor id {}", id.index()))
                }),
            TensorOrWeights::Weights(w) => Ok(TensorInfo::new(w.dtype(), w.dims())),
        }
    }

    /// Materialize a value as a network tensor
    ///
    /// Constants become constant layers. Named model initializers are
    /// materialized once and reused.
    pub fn to_tensor(&mut self, value: &TensorOrWeights) -> ImportResult<TensorId> {
        let weights = match value {
            TensorOrWeights::Tensor(id) => return Ok(*id),
            TensorOrWeights::Weights(w) => w,
        };

        let cache_key = (weights.is_shared() && !weights.name().is_empty())
            .then(|| weights.name().to_string());
        if let Some(id) = cache_key.as_ref().and_then(|k| self.constant_layers.get(k)) {
            return Ok(*id);
        }

        let info = TensorInfo::new(weights.dtype(), weights.dims());
        let layer = self.network.add_layer(
            LayerKind::Constant {
                weights: weights.clone(),
            },
            &[],
            &[info],
        )?;
        let base = if weights.name().is_empty() {
            format!("Constant_{}", self.network.num_layers() - 1)
        } else {
            weights.name().to_string()
        };
        let name = self.unique_layer_name(base);
        self.network.set_layer_name(layer, &name)?;
        self.layers.insert(name, layer);

        let id = self.layer_output(layer)?;
        if let Some(key) = cache_key {
            self.constant_layers.insert(key, id);
        }
        Ok(id)
    }

    // ========================================================================
    // Plugins and nested diagnostics
    // ========================================================================

    /// Record that a plugin from `library` was used
    pub fn record_plugin_library(&mut self, library: &str) {
        self.plugin_libraries.insert(library.to_string());
    }

    /// Plugin libraries used so far, in first-use order
    pub fn plugin_libraries(&self) -> impl Iterator<Item = &str> {
        self.plugin_libraries.iter().map(String::as_str)
    }

    /// Keep diagnostics of a failed nested graph for the enclosing parse
    pub fn stash_nested_diagnostics(&mut self, diagnostics: Vec<Diagnostic>) {
        self.nested_diagnostics.extend(diagnostics);
    }

    /// Take the stashed nested diagnostics
    pub fn take_nested_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.nested_diagnostics)
    }
}

/// Whether `domain` names the default ONNX operator set
pub fn is_default_domain(domain: &str) -> bool {
    DEFAULT_DOMAINS.contains(&domain)
}
