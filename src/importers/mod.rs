//! Operator importers
//!
//! Each ONNX operator type maps to a [`NodeImporter`] in an
//! [`OperatorRegistry`]. The registry is built once, before any parse, and is
//! read-only afterwards.

pub mod activation;
pub mod common;
pub mod control_flow;
pub mod conv;
pub mod elementwise;
pub mod matmul;
pub mod normalization;
pub mod plugin;
pub mod reduce;
pub mod shape_ops;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::context::TensorOrWeights;
pub use plugin::{PluginCatalog, PluginImporter};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::context::ImportContext;
use crate::error::{ImportError, ImportResult};
use crate::proto::NodeProto;

/// Values produced by one node, in output order
pub type NodeOutputs = SmallVec<[TensorOrWeights; 2]>;

/// Translates one ONNX node into network layers
pub trait NodeImporter: Send + Sync {
    /// Import `node`. `inputs[i]` is `None` for an omitted optional input.
    fn import(
        &self,
        ctx: &mut ImportContext<'_>,
        node: &NodeProto,
        inputs: &[Option<TensorOrWeights>],
    ) -> ImportResult<NodeOutputs>;

    /// Validate `node` without touching the network
    fn check(&self, _ctx: &ImportContext<'_>, _node: &NodeProto) -> ImportResult<()> {
        Ok(())
    }
}

/// Accepted number of declared inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    /// Minimum
    pub min: usize,
    /// Maximum (inclusive)
    pub max: usize,
}

impl Arity {
    /// Exactly `n` inputs
    pub const fn exactly(n: usize) -> Self {
        Arity { min: n, max: n }
    }

    /// Between `min` and `max` inputs
    pub const fn range(min: usize, max: usize) -> Self {
        Arity { min, max }
    }

    /// At least `min` inputs
    pub const fn at_least(min: usize) -> Self {
        Arity {
            min,
            max: usize::MAX,
        }
    }

    /// Validate a node's input count
    pub fn check(&self, node: &NodeProto) -> ImportResult<()> {
        let count = node.input.len();
        if count < self.min || count > self.max {
            let expected = if self.min == self.max {
                self.min.to_string()
            } else if self.max == usize::MAX {
                format!("at least {}", self.min)
            } else {
                format!("{} to {}", self.min, self.max)
            };
            return Err(ImportError::InvalidNode(format!(
                "{} '{}' expects {} inputs, got {}",
                node.op_type,
                node.display_name(),
                expected,
                count
            )));
        }
        Ok(())
    }
}

/// Signature of a built-in import function
pub type ImportFn = fn(
    &mut ImportContext<'_>,
    &NodeProto,
    &[Option<TensorOrWeights>],
) -> ImportResult<NodeOutputs>;

/// Signature of a built-in static check
pub type CheckFn = fn(&ImportContext<'_>, &NodeProto) -> ImportResult<()>;

/// Importer backed by plain functions
#[derive(Clone, Copy)]
pub struct BuiltinImporter {
    /// Accepted input count
    pub arity: Arity,
    /// Import function
    pub import: ImportFn,
    /// Extra static check run after the arity check
    pub check: Option<CheckFn>,
}

impl BuiltinImporter {
    /// Importer without an extra check
    pub const fn new(arity: Arity, import: ImportFn) -> Self {
        Self {
            arity,
            import,
            check: None,
        }
    }

    /// Importer with an extra check
    pub const fn with_check(arity: Arity, import: ImportFn, check: CheckFn) -> Self {
        Self {
            arity,
            import,
            check: Some(check),
        }
    }
}

impl NodeImporter for BuiltinImporter {
    fn import(
        &self,
        ctx: &mut ImportContext<'_>,
        node: &NodeProto,
        inputs: &[Option<TensorOrWeights>],
    ) -> ImportResult<NodeOutputs> {
        self.arity.check(node)?;
        (self.import)(ctx, node, inputs)
    }

    fn check(&self, ctx: &ImportContext<'_>, node: &NodeProto) -> ImportResult<()> {
        self.arity.check(node)?;
        match self.check {
            Some(check) => check(ctx, node),
            None => Ok(()),
        }
    }
}

/// Name-keyed operator importer table
#[derive(Default)]
pub struct OperatorRegistry {
    importers: FxHashMap<String, Box<dyn NodeImporter>>,
}

impl OperatorRegistry {
    /// Registry with no operators
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in operator
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for (op_type, importer) in activation::importers()
            .into_iter()
            .chain(elementwise::importers())
            .chain(conv::importers())
            .chain(matmul::importers())
            .chain(shape_ops::importers())
            .chain(reduce::importers())
            .chain(normalization::importers())
            .chain(control_flow::importers())
        {
            registry.insert(op_type, Box::new(importer));
        }
        registry
    }

    /// Add or replace the importer for `op_type`
    pub fn register(mut self, op_type: &str, importer: Box<dyn NodeImporter>) -> Self {
        self.insert(op_type, importer);
        self
    }

    /// Register every plugin operator of `catalog`, replacing built-ins of the
    /// same name
    pub fn with_plugins(mut self, catalog: &PluginCatalog) -> Self {
        for (op_type, library) in catalog.iter() {
            self.insert(
                op_type,
                Box::new(PluginImporter::new(library.map(str::to_string))),
            );
        }
        self
    }

    fn insert(&mut self, op_type: &str, importer: Box<dyn NodeImporter>) {
        self.importers.insert(op_type.to_string(), importer);
    }

    /// Importer for `op_type`
    pub fn lookup(&self, op_type: &str) -> Option<&dyn NodeImporter> {
        self.importers.get(op_type).map(|b| b.as_ref())
    }

    /// Whether `op_type` has an importer
    pub fn contains(&self, op_type: &str) -> bool {
        self.importers.contains_key(op_type)
    }

    /// Number of registered operators
    pub fn len(&self) -> usize {
        self.importers.len()
    }

    /// Whether no operator is registered
    pub fn is_empty(&self) -> bool {
        self.importers.is_empty()
    }

    /// Registered operator names, sorted
    pub fn op_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.importers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("op_types", &self.op_types())
            .finish()
    }
}
