use std::fmt;

use crate::proto::NodeProto;

use super::{ErrorCode, ImportError};

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// Recorded, but does not fail the parse
    Warning,
    /// Fails the parse or marks a node unsupported
    Error,
}

/// A structured, node-attributed import failure record.
///
/// Diagnostics are immutable once built; the builder-style `with_*` methods
/// consume and return a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    code: ErrorCode,
    severity: Severity,
    message: String,
    func: &'static str,
    node: Option<usize>,
    node_name: String,
    node_operator: String,
    local_function_stack: Vec<String>,
}

impl Diagnostic {
    /// Create an error diagnostic without node attribution
    pub fn new(code: ErrorCode, message: impl Into<String>, func: &'static str) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            func,
            node: None,
            node_name: String::new(),
            node_operator: String::new(),
            local_function_stack: Vec::new(),
        }
    }

    /// Create an error diagnostic from an [`ImportError`]
    pub fn from_error(err: &ImportError, func: &'static str) -> Self {
        Self::new(err.code(), err.to_string(), func)
    }

    /// Create a warning diagnostic
    pub fn warning(code: ErrorCode, message: impl Into<String>, func: &'static str) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::new(code, message, func)
        }
    }

    /// Attribute the diagnostic to a node of the graph being parsed
    pub fn with_node(mut self, index: usize, node: &NodeProto) -> Self {
        self.node = Some(index);
        self.node_name = node.name.clone();
        self.node_operator = node.op_type.clone();
        self
    }

    /// Record the chain of local functions the node was expanded from
    pub fn with_local_functions(mut self, stack: &[String]) -> Self {
        self.local_function_stack = stack.to_vec();
        self
    }

    /// Error category
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Severity
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Human-readable description
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Parser stage that produced the diagnostic
    pub fn func(&self) -> &'static str {
        self.func
    }

    /// Index of the failing node within its graph, if node-attributed
    pub fn node(&self) -> Option<usize> {
        self.node
    }

    /// Name of the failing node (may be empty)
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Op type of the failing node
    pub fn node_operator(&self) -> &str {
        &self.node_operator
    }

    /// Local functions enclosing the failing node, outermost first
    pub fn local_function_stack(&self) -> &[String] {
        &self.local_function_stack
    }

    /// Whether this diagnostic fails a parse
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(index) => write!(
                f,
                "[{}] {}: node {} ({} [{}]): {}",
                self.code, self.func, index, self.node_name, self.node_operator, self.message
            )?,
            None => write!(f, "[{}] {}: {}", self.code, self.func, self.message)?,
        }
        if !self.local_function_stack.is_empty() {
            write!(f, " (in local function {})", self.local_function_stack.join(" -> "))?;
        }
        Ok(())
    }
}
