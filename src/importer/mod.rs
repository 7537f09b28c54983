//! Model importer
//!
//! [`ModelImporter`] is the entry point: it decodes a model, registers its
//! initializers and inputs, walks the graph and marks the graph outputs on the
//! caller's network. Failures are kept as [`Diagnostic`]s until
//! [`ModelImporter::clear_errors`].
//!
//! # Example
//!
//! ```ignore
//! use onnx_importer::prelude::*;
//!
//! let mut network = Network::new();
//! let mut importer = ModelImporter::new(&mut network);
//! if !importer.parse_from_file("model.onnx", 2) {
//!     for diagnostic in importer.errors() {
//!         eprintln!("{}", diagnostic);
//!     }
//! }
//! ```

mod flags;

pub use flags::{ParserFlag, ParserFlags};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn, LevelFilter};

use crate::context::{ImportContext, DEFAULT_MAX_SUBGRAPH_DEPTH};
use crate::error::{Diagnostic, ImportError, ImportResult};
use crate::importers::{OperatorRegistry, PluginCatalog};
use crate::io::{check_opsets, load_model_from_bytes, read_model_bytes};
use crate::network::{NetworkDefinition, TensorId, TensorInfo};
use crate::parser::{parse_graph, parse_node_static_check, partition, SubGraphCollection};
use crate::proto::{GraphProto, ModelProto};
use crate::tensor::{i32_to_dtype, is_network_type};
use crate::weights::external::load_external;
use crate::weights::Weights;

/// Importer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Maximum nesting of subgraphs and local functions
    pub max_subgraph_depth: usize,
    /// Most verbose diagnostic level the importer reports through `log`
    pub verbosity: LevelFilter,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            max_subgraph_depth: DEFAULT_MAX_SUBGRAPH_DEPTH,
            verbosity: LevelFilter::Warn,
        }
    }
}

/// Map a numeric verbosity to a log level
///
/// `0` internal errors only, `1` errors, `2` warnings, `3` info, `4` verbose.
pub fn verbosity_filter(verbosity: i32) -> LevelFilter {
    match verbosity {
        i32::MIN..=0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Where the importer is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// No parse since construction or the last `clear_errors`
    Idle,
    /// A parse is running
    Parsing,
    /// The last parse finished
    Done {
        /// Whether it succeeded
        success: bool,
    },
}

/// Imports ONNX models into a [`NetworkDefinition`]
pub struct ModelImporter<'n> {
    ctx: ImportContext<'n>,
    errors: Vec<Diagnostic>,
    models: Vec<Arc<ModelProto>>,
    state: ParseState,
    current_node: Option<usize>,
    options: ImportOptions,
}

impl<'n> ModelImporter<'n> {
    /// Importer with the built-in operator catalog
    pub fn new(network: &'n mut dyn NetworkDefinition) -> Self {
        Self::with_registry(network, OperatorRegistry::builtin())
    }

    /// Importer with a custom operator registry
    pub fn with_registry(network: &'n mut dyn NetworkDefinition, registry: OperatorRegistry) -> Self {
        Self {
            ctx: ImportContext::new(network, Arc::new(registry)),
            errors: Vec::new(),
            models: Vec::new(),
            state: ParseState::Idle,
            current_node: None,
            options: ImportOptions::default(),
        }
    }

    /// Importer with the built-in catalog plus plugin operators
    pub fn with_plugins(network: &'n mut dyn NetworkDefinition, catalog: &PluginCatalog) -> Self {
        Self::with_registry(network, OperatorRegistry::builtin().with_plugins(catalog))
    }

    /// Replace the importer options
    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.ctx.set_max_subgraph_depth(options.max_subgraph_depth);
        self.options = options;
        self
    }

    // ========================================================================
    // Support queries
    // ========================================================================

    /// Check which nodes of a model could be imported
    ///
    /// `collection` is replaced by the partition of the top-level nodes into
    /// maximal supported runs and single unsupported nodes. The network is not
    /// touched. Returns true iff every node is supported.
    pub fn supports_model(
        &mut self,
        bytes: &[u8],
        collection: &mut SubGraphCollection,
        model_path: Option<&Path>,
    ) -> bool {
        collection.clear();

        let model = match load_model_from_bytes(bytes) {
            Ok(model) => model,
            Err(err) => {
                self.errors
                    .push(Diagnostic::from_error(&err, "supports_model"));
                return false;
            }
        };
        let Some(graph) = model.graph.as_ref() else {
            self.errors.push(Diagnostic::from_error(
                &ImportError::InvalidGraph("Model does not contain a graph".to_string()),
                "supports_model",
            ));
            return false;
        };
        if let Some(path) = model_path {
            debug!("Checking support for {}", path.display());
        }

        self.ctx.load_model_metadata(&model);

        let mut supported = Vec::with_capacity(graph.node.len());
        for (index, node) in graph.node.iter().enumerate() {
            let before = self.errors.len();
            parse_node_static_check(&self.ctx, node, &mut self.errors, index);
            supported.push(self.errors.len() == before);
        }

        *collection = partition(&supported);
        info!(
            "{} of {} nodes supported in {} partitions",
            supported.iter().filter(|s| **s).count(),
            supported.len(),
            collection.len()
        );
        supported.iter().all(|s| *s)
    }

    /// Whether an importer is registered for `op_type`
    ///
    /// Model-local functions are not considered.
    pub fn supports_operator(&self, op_type: &str) -> bool {
        self.ctx.registry().contains(op_type)
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    /// Import a serialized model
    ///
    /// External data is resolved relative to the directory of `model_path`,
    /// or the working directory without one.
    pub fn parse(&mut self, bytes: &[u8], model_path: Option<&Path>) -> bool {
        self.run(bytes, model_path, true, self.options.verbosity)
    }

    /// Import a serialized model without reading external data
    ///
    /// External initializers stay unresolved descriptors in the network.
    pub fn parse_with_weight_descriptors(&mut self, bytes: &[u8]) -> bool {
        self.run(bytes, None, false, self.options.verbosity)
    }

    /// Read and import a model file
    ///
    /// `verbosity` follows [`verbosity_filter`] and replaces the configured
    /// level for this call.
    pub fn parse_from_file<P: AsRef<Path>>(&mut self, path: P, verbosity: i32) -> bool {
        let path = path.as_ref();
        let level = verbosity_filter(verbosity);

        match read_model_bytes(path) {
            Ok(bytes) => self.run(&bytes, Some(path), true, level),
            Err(err) => {
                self.ctx.reset_values();
                let first = self.errors.len();
                self.errors
                    .push(Diagnostic::from_error(&err, "parse_from_file"));
                self.state = ParseState::Done { success: false };
                self.report(first, level);
                false
            }
        }
    }

    fn run(
        &mut self,
        bytes: &[u8],
        model_path: Option<&Path>,
        resolve_external: bool,
        level: LevelFilter,
    ) -> bool {
        self.state = ParseState::Parsing;
        self.current_node = None;
        self.ctx.reset_values();
        let first = self.errors.len();

        let model_dir = model_path.map(|p| {
            p.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(PathBuf::new)
        });
        self.ctx.set_external_data(model_dir, resolve_external);

        let success = self.import_model(bytes).is_ok();
        self.state = ParseState::Done { success };
        self.report(first, level);
        success
    }

    /// Log diagnostics added since `first`
    fn report(&self, first: usize, level: LevelFilter) {
        for diagnostic in &self.errors[first..] {
            if diagnostic.is_error() {
                if level >= LevelFilter::Error {
                    error!("{}", diagnostic);
                }
            } else if level >= LevelFilter::Warn {
                warn!("{}", diagnostic);
            }
        }
    }

    fn fail(&mut self, err: ImportError, func: &'static str) -> Diagnostic {
        let diagnostic = Diagnostic::from_error(&err, func);
        self.errors.push(diagnostic.clone());
        diagnostic
    }

    fn import_model(&mut self, bytes: &[u8]) -> Result<(), Diagnostic> {
        let model = load_model_from_bytes(bytes).map_err(|e| self.fail(e, "parse"))?;
        let model = Arc::new(model);
        self.models.push(Arc::clone(&model));

        let Some(graph) = model.graph.as_ref() else {
            return Err(self.fail(
                ImportError::InvalidGraph("Model does not contain a graph".to_string()),
                "parse",
            ));
        };

        self.ctx.load_model_metadata(&model);
        self.errors.extend(check_opsets(&model));
        info!(
            "Importing graph '{}' from {} {} (IR {}, opset {}): {} nodes, {} initializers",
            graph.name,
            model.producer_name,
            model.producer_version,
            model.ir_version,
            self.ctx.opset_version(""),
            graph.node.len(),
            graph.initializer.len()
        );

        self.import_initializers(&model, graph)
            .map_err(|e| self.fail(e, "import_initializers"))?;
        self.import_inputs(graph)
            .map_err(|e| self.fail(e, "import_inputs"))?;

        let mut current = 0;
        let result = parse_graph(
            &mut self.ctx,
            graph,
            &mut self.errors,
            false,
            Some(&mut current),
        );
        if !graph.node.is_empty() {
            self.current_node = Some(current);
        }
        result?;

        self.mark_outputs(graph)
            .map_err(|e| self.fail(e, "mark_outputs"))?;
        info!(
            "Imported graph '{}': {} layers",
            graph.name,
            self.ctx.network().num_layers()
        );
        Ok(())
    }

    fn import_initializers(&mut self, model: &Arc<ModelProto>, graph: &GraphProto) -> ImportResult<()> {
        for (index, initializer) in graph.initializer.iter().enumerate() {
            let weights = if initializer.is_external() && self.ctx.resolves_external_data() {
                let base = self.ctx.model_dir().map(Path::to_path_buf).unwrap_or_default();
                debug!(
                    "Loading external data for '{}' from {}",
                    initializer.name,
                    base.display()
                );
                Weights::from_tensor(load_external(initializer, &base)?)
            } else {
                Weights::from_initializer(Arc::clone(model), index).ok_or_else(|| {
                    ImportError::Internal(format!("Initializer {} is missing", index))
                })?
            };
            self.ctx
                .register_tensor(&initializer.name, weights.into(), false)?;
        }
        Ok(())
    }

    fn import_inputs(&mut self, graph: &GraphProto) -> ImportResult<()> {
        let allow_uint8 = self
            .ctx
            .flags()
            .contains(ParserFlag::Uint8AsymmetricQuantization);

        for input in &graph.input {
            // Inputs backed by an initializer are constants
            if self.ctx.has_tensor(&input.name) {
                continue;
            }
            let elem_type = input.get_elem_type().ok_or_else(|| {
                ImportError::InvalidGraph(format!("Graph input '{}' is not a tensor", input.name))
            })?;
            let dtype = i32_to_dtype(elem_type)?;
            if !is_network_type(dtype, allow_uint8) {
                return Err(ImportError::UnsupportedDataType(elem_type));
            }
            let dims = input.get_shape().ok_or_else(|| {
                ImportError::InvalidGraph(format!("Graph input '{}' has no shape", input.name))
            })?;

            let id = self
                .ctx
                .network_mut()
                .add_input(&input.name, TensorInfo::new(dtype, &dims))?;
            self.ctx.register_tensor(&input.name, id.into(), false)?;
        }
        Ok(())
    }

    fn mark_outputs(&mut self, graph: &GraphProto) -> ImportResult<()> {
        for output in &graph.output {
            let value = self.ctx.tensor(&output.name).cloned().ok_or_else(|| {
                ImportError::InvalidGraph(format!(
                    "Graph output '{}' is not produced by any node",
                    output.name
                ))
            })?;
            let id = self.ctx.to_tensor(&value)?;
            let produced_by_layer = self
                .ctx
                .network()
                .tensor(id)
                .map_or(false, |t| t.producer.is_some());
            if produced_by_layer {
                self.ctx.network_mut().set_tensor_name(id, &output.name)?;
            }
            self.ctx.network_mut().mark_output(id)?;
        }
        Ok(())
    }

    // ========================================================================
    // Flags
    // ========================================================================

    /// Set one flag; affects later parses only
    pub fn set_flag(&mut self, flag: ParserFlag) {
        let mut flags = self.ctx.flags();
        flags.insert(flag);
        self.ctx.set_flags(flags);
    }

    /// Clear one flag
    pub fn clear_flag(&mut self, flag: ParserFlag) {
        let mut flags = self.ctx.flags();
        flags.remove(flag);
        self.ctx.set_flags(flags);
    }

    /// Whether `flag` is set
    pub fn get_flag(&self, flag: ParserFlag) -> bool {
        self.ctx.flags().contains(flag)
    }

    /// Replace all flags
    pub fn set_flags(&mut self, flags: ParserFlags) {
        self.ctx.set_flags(flags);
    }

    /// Current flags
    pub fn flags(&self) -> ParserFlags {
        self.ctx.flags()
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Number of recorded diagnostics
    pub fn num_errors(&self) -> usize {
        self.errors.len()
    }

    /// The `index`-th diagnostic
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.num_errors()`.
    pub fn error(&self, index: usize) -> &Diagnostic {
        &self.errors[index]
    }

    /// All recorded diagnostics, oldest first
    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    /// Drop every diagnostic and return to [`ParseState::Idle`]
    ///
    /// The network is left as it is.
    pub fn clear_errors(&mut self) {
        self.errors.clear();
        self.ctx.take_nested_diagnostics();
        self.state = ParseState::Idle;
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// The `index`-th output of the layer named `name`
    pub fn layer_output_tensor(&self, name: Option<&str>, index: usize) -> Option<TensorId> {
        self.ctx.find_layer_output_tensor(name?, index)
    }

    /// Plugin libraries the layers of the most recent parse need, in first-use order
    pub fn used_plugin_libraries(&self) -> Vec<&str> {
        self.ctx.plugin_libraries().collect()
    }

    /// The network being built
    pub fn network(&self) -> &dyn NetworkDefinition {
        self.ctx.network()
    }

    /// Index of the last node the graph walk reached
    pub fn current_node(&self) -> Option<usize> {
        self.current_node
    }

    /// Lifecycle state
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Active options
    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Models parsed so far; they back the network's weights
    pub fn models(&self) -> &[Arc<ModelProto>] {
        &self.models
    }
}
