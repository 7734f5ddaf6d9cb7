//! Pull named values out of a parsed response body.

use crate::model::{ExtractParam, VariableScope};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Evaluate a JSONPath expression and return its first match.
///
/// `Ok(None)` means the expression was valid but matched nothing.
pub fn select_first(body: &Value, path: &str) -> Result<Option<Value>, String> {
    jsonpath_lib::select(body, path)
        .map(|matches| matches.first().map(|value| (*value).clone()))
        .map_err(|err| err.to_string())
}

/// Apply every extract param to `body`.
///
/// A param with no name or path, or whose path cannot be evaluated, is
/// logged and skipped; it never prevents the remaining params from
/// running. The caller decides how the result is merged into its scope.
pub fn extract(params: &[ExtractParam], body: &Value) -> VariableScope {
    let mut extracted = HashMap::new();

    for param in params {
        if param.name.is_empty() || param.path.is_empty() {
            warn!(
                "Invalid extract parameter (name: '{}', path: '{}')",
                param.name, param.path
            );
            continue;
        }

        match select_first(body, &param.path) {
            Ok(Some(value)) => {
                info!("Extracted parameter {} = {}", param.name, value);
                extracted.insert(param.name.clone(), value);
            }
            Ok(None) => {
                debug!(
                    "JSONPath {} matched nothing for parameter {}",
                    param.path, param.name
                );
            }
            Err(err) => {
                warn!(
                    "Error extracting parameter {} using JSONPath {}: {}",
                    param.name, param.path, err
                );
            }
        }
    }

    extracted
}
