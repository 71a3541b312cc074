//! Error taxonomy.
//!
//! Each failure class has its own type so callers can decide how far it is
//! allowed to travel. Only [`FatalConfigurationError`] ever escapes the
//! orchestrator; [`ScannerError`] is the only failure the execution engine
//! returns instead of recording on a result container.

use std::path::PathBuf;
use thiserror::Error;

/// Bad input or configuration. Fatal only to the operation that raised it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("validation failed: {message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        ValidationError {
            message: message.into(),
        }
    }
}

/// An external tool a plugin needs is not installed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{plugin}: required tool `{tool}` not found on PATH")]
pub struct DependencyError {
    pub plugin: String,
    pub tool: String,
}

/// Failure raised while a plugin's operation runs.
///
/// Recorded on the plugin's result container; the run continues.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The tool binary could not be started.
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran but reported an error exit status.
    #[error("{tool} exited with status {code}: {stderr}")]
    ToolFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    /// The operation did not finish within its time budget.
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// Native output could not be decoded.
    #[error("failed to parse {tool} output")]
    Parse {
        tool: String,
        #[source]
        source: serde_json::Error,
    },

    /// A reporter could not serialize its export.
    #[error("failed to render {format} report")]
    Render {
        format: String,
        #[source]
        source: serde_json::Error,
    },

    /// The plugin panicked.
    #[error("{operation} panicked: {message}")]
    Panicked { operation: String, message: String },

    /// An archive could not be opened or walked.
    #[error("cannot read archive {}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ExecutionError {
    /// Display text of this error followed by each of its sources.
    pub fn cause_chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            chain.push(err.to_string());
            current = err.source();
        }
        chain
    }
}

/// One malformed entry in a scanner's native output.
///
/// The entry is dropped with a warning; the scanner status is unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{scanner}: dropped malformed result entry: {reason}")]
pub struct AggregationError {
    pub scanner: String,
    pub reason: String,
}

impl AggregationError {
    pub fn new(scanner: &str, reason: impl Into<String>) -> Self {
        AggregationError {
            scanner: scanner.to_string(),
            reason: reason.into(),
        }
    }
}

/// The run context cannot be built. Aborts the run before any phase.
#[derive(Error, Debug)]
pub enum FatalConfigurationError {
    #[error("source directory does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("source path is not a directory: {0}")]
    SourceNotDirectory(PathBuf),

    #[error("source directory is not readable: {path}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration")]
    InvalidConfig(#[from] ValidationError),

    #[error("cannot load existing results")]
    ExistingResults(#[from] ModelError),
}

/// A registered plugin factory could not bind to the run context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to initialize plugin {plugin}: {message}")]
pub struct PluginInitializationError {
    pub plugin: String,
    pub message: String,
}

/// Unrecoverable pre-execution problem for a single scanner invocation.
///
/// This is the only error the engine hands back to the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScannerError {
    #[error("{scanner} is already running against {}", target.display())]
    AlreadyRunning { scanner: String, target: PathBuf },

    #[error("{scanner} cannot prepare {}: {message}", target.display())]
    Misconfigured {
        scanner: String,
        target: PathBuf,
        message: String,
    },
}

/// Saving or loading the aggregated results artifact failed.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("aggregated results not found at {0}")]
    NotFound(PathBuf),

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid aggregated results in {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
