//! Built-in converter plugins.
//!
//! Converters run before scanning and write derived files under
//! `<work_dir>/converted/<converter>/`, which is then scanned as the
//! `converted` target. Each run starts from an empty output root.

pub mod archive;
pub mod jupyter;

use crate::context::ExecutionContext;
use crate::plugins::manager::PluginManager;
use crate::plugins::PluginInstance;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

pub fn register(manager: &mut PluginManager) {
    manager.register(archive::descriptor(), |ctx| {
        Ok(PluginInstance::Converter(Arc::new(archive::ArchiveConverter::new(ctx))))
    });
    manager.register(jupyter::descriptor(), |ctx| {
        Ok(PluginInstance::Converter(Arc::new(jupyter::JupyterConverter::new(ctx))))
    });
}

/// Empties and recreates the output root of converter `name`.
pub(crate) fn fresh_output_root(ctx: &ExecutionContext, name: &str) -> io::Result<PathBuf> {
    let root = ctx.converted_dir().join(name);
    match std::fs::remove_dir_all(&root) {
        Ok(()) => tracing::debug!(dir = %root.display(), "cleared previous conversion output"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::fs::create_dir_all(&root)?;
    Ok(root)
}
