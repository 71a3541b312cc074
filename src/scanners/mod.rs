//! Built-in scanner plugins.
//!
//! Each wraps an external tool and ships an adapter from the tool's JSON to
//! canonical [`Finding`](crate::finding::Finding)s.
//!
//! | Scanner | External tool | Looks at |
//! |---------|---------------|----------|
//! | `bandit` | [bandit] | Python sources |
//! | `semgrep` | [semgrep] | every file |
//! | `gitleaks` | [gitleaks] | every file |
//! | `checkov` | [checkov] | Terraform, CloudFormation, Kubernetes, Dockerfiles |
//! | `grype` | [grype] | dependency manifests and lockfiles |
//!
//! [bandit]: https://bandit.readthedocs.io/
//! [semgrep]: https://semgrep.dev/
//! [gitleaks]: https://github.com/gitleaks/gitleaks
//! [checkov]: https://www.checkov.io/
//! [grype]: https://github.com/anchore/grype

pub mod bandit;
pub mod checkov;
pub mod grype;
pub mod secrets;
pub mod semgrep;

use crate::error::AggregationError;
use crate::plugins::manager::PluginManager;
use crate::plugins::PluginInstance;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Registers every built-in scanner, in default execution order.
pub fn register(manager: &mut PluginManager) {
    manager.register(bandit::descriptor(), |ctx| {
        Ok(PluginInstance::Scanner(Arc::new(bandit::BanditScanner::new(ctx))))
    });
    manager.register(semgrep::descriptor(), |ctx| {
        Ok(PluginInstance::Scanner(Arc::new(semgrep::SemgrepScanner::new(ctx))))
    });
    manager.register(secrets::descriptor(), |ctx| {
        Ok(PluginInstance::Scanner(Arc::new(secrets::SecretsScanner::new(ctx))))
    });
    manager.register(checkov::descriptor(), |ctx| {
        Ok(PluginInstance::Scanner(Arc::new(checkov::CheckovScanner::new(ctx))))
    });
    manager.register(grype::descriptor(), |ctx| {
        Ok(PluginInstance::Scanner(Arc::new(grype::GrypeScanner::new(ctx))))
    });
}

/// The array under `key`, or an aggregation error naming the scanner.
///
/// A missing key counts as an empty result set.
pub(crate) fn array_at<'a>(
    scanner: &str,
    native: &'a Value,
    key: &str,
) -> Result<&'a [Value], AggregationError> {
    match native.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(other) => Err(AggregationError::new(
            scanner,
            format!("`{key}` is not an array: {other}"),
        )),
    }
}

/// First string found under any of `keys`.
pub(crate) fn str_field<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| item.pointer(k).and_then(Value::as_str))
}

/// First unsigned integer found under any of `keys`, as a line number.
pub(crate) fn line_field(item: &Value, keys: &[&str]) -> Option<u32> {
    keys.iter()
        .find_map(|k| item.pointer(k).and_then(Value::as_u64))
        .and_then(|n| u32::try_from(n).ok())
}

/// Case-insensitive extension check.
pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| extensions.contains(&e.as_str()))
}
