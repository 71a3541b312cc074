//! Extracts the code cells of Jupyter notebooks into plain Python files so
//! source scanners can see them.
//!
//! `notebooks/eda.ipynb` becomes `<work_dir>/converted/jupyter/notebooks/eda.ipynb.py`.
//! Markdown and raw cells are dropped. IPython magics (`%`, `!`) are
//! commented out so the result stays valid Python.

use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use crate::plugins::{ConverterPlugin, Plugin, PluginDescriptor, PluginKind};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const NAME: &str = "jupyter";

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(NAME, PluginKind::Converter, "Jupyter notebook code cell extraction").native()
}

pub struct JupyterConverter {
    ctx: Arc<ExecutionContext>,
}

impl JupyterConverter {
    pub fn new(ctx: &Arc<ExecutionContext>) -> Self {
        JupyterConverter {
            ctx: Arc::clone(ctx),
        }
    }
}

impl Plugin for JupyterConverter {
    fn descriptor(&self) -> PluginDescriptor {
        descriptor()
    }
}

impl ConverterPlugin for JupyterConverter {
    fn convert(&self, target: &Path) -> Result<Vec<PathBuf>, ExecutionError> {
        let out_root = super::fresh_output_root(&self.ctx, NAME)?;
        let notebooks = self.ctx.target_files(target, |p| {
            p.extension().is_some_and(|e| e.eq_ignore_ascii_case("ipynb"))
        });

        let mut written = Vec::new();
        for notebook in notebooks {
            let relative = notebook.strip_prefix(target).unwrap_or(&notebook);
            let content = std::fs::read_to_string(&notebook)?;
            let doc: Value = match serde_json::from_str(&content) {
                Ok(doc) => doc,
                Err(e) => {
                    // one broken notebook should not hide the others
                    tracing::warn!(notebook = %notebook.display(), error = %e, "skipping unparsable notebook");
                    continue;
                }
            };

            let mut dest = out_root.join(relative).into_os_string();
            dest.push(".py");
            let dest = PathBuf::from(dest);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&dest, extract_code(&doc))?;
            tracing::debug!(from = %notebook.display(), to = %dest.display(), "converted notebook");
            written.push(dest);
        }
        written.sort();
        Ok(written)
    }
}

/// Concatenates the code cells of a notebook document, one block per cell.
pub fn extract_code(doc: &Value) -> String {
    let cells = doc
        .get("cells")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut out = String::new();
    for (i, cell) in cells.iter().enumerate() {
        if cell.get("cell_type").and_then(Value::as_str) != Some("code") {
            continue;
        }
        // nbformat stores source as a string or as a list of lines
        let source = match cell.get("source") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(lines)) => lines.iter().filter_map(Value::as_str).collect(),
            _ => continue,
        };
        out.push_str(&format!("# cell {}\n", i + 1));
        for line in source.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with('%') || trimmed.starts_with('!') {
                out.push_str("# ");
            }
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_only_code_cells_and_comments_magics() {
        let doc = json!({"cells": [
            {"cell_type": "markdown", "source": ["# Title"]},
            {"cell_type": "code", "source": ["%matplotlib inline\n", "import os\n", "os.system(cmd)"]},
            {"cell_type": "code", "source": "eval(x)"}
        ]});
        let code = extract_code(&doc);
        assert!(!code.contains("Title"));
        assert!(code.contains("# %matplotlib inline"));
        assert!(code.contains("os.system(cmd)\n"));
        assert!(code.contains("# cell 3\neval(x)"));
    }

    #[test]
    fn converts_notebooks_into_work_dir() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("nb")).unwrap();
        std::fs::write(
            src.path().join("nb/a.ipynb"),
            r#"{"cells": [{"cell_type": "code", "source": ["print(1)"]}]}"#,
        )
        .unwrap();
        std::fs::write(src.path().join("broken.ipynb"), "{not json").unwrap();
        std::fs::write(src.path().join("plain.py"), "x = 1").unwrap();

        let ctx = Arc::new(ExecutionContext::builder(src.path()).build().unwrap());
        let written = JupyterConverter::new(&ctx).convert(&ctx.source_dir).unwrap();
        assert_eq!(written, vec![ctx.converted_dir().join("jupyter/nb/a.ipynb.py")]);
        assert!(std::fs::read_to_string(&written[0]).unwrap().contains("print(1)"));
    }

    #[test]
    fn reconversion_drops_output_of_deleted_notebooks() {
        let src = tempfile::tempdir().unwrap();
        let cell = r#"{"cells": [{"cell_type": "code", "source": ["print(1)"]}]}"#;
        std::fs::write(src.path().join("keep.ipynb"), cell).unwrap();
        std::fs::write(src.path().join("gone.ipynb"), cell).unwrap();
        let ctx = Arc::new(ExecutionContext::builder(src.path()).build().unwrap());
        let converter = JupyterConverter::new(&ctx);
        assert_eq!(converter.convert(&ctx.source_dir).unwrap().len(), 2);

        std::fs::remove_file(src.path().join("gone.ipynb")).unwrap();
        let written = converter.convert(&ctx.source_dir).unwrap();
        assert_eq!(written, vec![ctx.converted_dir().join("jupyter/keep.ipynb.py")]);
        assert!(!ctx.converted_dir().join("jupyter/gone.ipynb.py").exists());
    }
}
