//! Opset validation
//!
//! Check a model's operator-set imports against the range the built-in
//! importers are written for.

use crate::context::DEFAULT_OPSET_VERSION;
use crate::error::{Diagnostic, ErrorCode};
use crate::proto::ModelProto;

/// Minimum supported default-domain opset version
pub const MIN_OPSET_VERSION: i64 = 7;
/// Maximum supported default-domain opset version
pub const MAX_OPSET_VERSION: i64 = 21;

/// Check if opset version is supported
pub fn is_opset_supported(version: i64) -> bool {
    (MIN_OPSET_VERSION..=MAX_OPSET_VERSION).contains(&version)
}

/// Warnings about the model's opset imports
///
/// A missing default-domain import means version 1. Nothing here fails the
/// import; out-of-range versions are only reported.
pub fn check_opsets(model: &ModelProto) -> Vec<Diagnostic> {
    let mut warnings = Vec::new();

    let version = match model.get_opset_version() {
        Some(v) => v,
        None => {
            warnings.push(Diagnostic::warning(
                ErrorCode::InvalidGraph,
                format!(
                    "Model does not import the default domain, assuming opset {}",
                    DEFAULT_OPSET_VERSION
                ),
                "check_opsets",
            ));
            DEFAULT_OPSET_VERSION
        }
    };

    if !is_opset_supported(version) {
        warnings.push(Diagnostic::warning(
            ErrorCode::UnsupportedGraph,
            format!(
                "Opset version {} is outside the supported range [{}, {}], import may fail",
                version, MIN_OPSET_VERSION, MAX_OPSET_VERSION
            ),
            "check_opsets",
        ));
    }

    warnings
}
