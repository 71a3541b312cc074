//! Immutable per-run parameters shared by every component.

use crate::config::Config;
use crate::error::{FatalConfigurationError, ValidationError};
use crate::finding::TargetType;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Directory, relative to the source, used when no output dir is given.
pub const DEFAULT_OUTPUT_DIR: &str = ".ash/ash_output";

/// Read-only run context. Built once by [`ContextBuilder::build`].
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    pub config: Config,
    pub offline: bool,
    pub ignore_suppressions: bool,
    ignored: GlobSet,
}

/// What a scanner must leave out when it walks a target on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanExclusions {
    /// Run artifact directories below the target, relative to it.
    pub dirs: Vec<String>,
    /// Configured `ignore_paths` globs, relative to the source.
    pub globs: Vec<String>,
}

impl ScanExclusions {
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.globs.is_empty()
    }

    /// Every exclusion as a glob over target-relative paths.
    pub fn patterns(&self) -> Vec<String> {
        self.dirs
            .iter()
            .flat_map(|d| [d.clone(), format!("{d}/**")])
            .chain(self.globs.iter().cloned())
            .collect()
    }

    /// Every exclusion as an unanchored regular expression over paths.
    pub fn regexes(&self) -> Vec<String> {
        let dirs = self
            .dirs
            .iter()
            .map(|d| format!("(^|/){}(/|$)", regex::escape(d)));
        let globs = self.globs.iter().filter_map(|g| {
            Glob::new(g)
                .ok()
                .map(|g| g.regex().trim_start_matches("(?-u)").trim_start_matches('^').to_string())
        });
        dirs.chain(globs).collect()
    }
}

impl ExecutionContext {
    pub fn builder(source_dir: impl Into<PathBuf>) -> ContextBuilder {
        ContextBuilder {
            source_dir: source_dir.into(),
            output_dir: None,
            work_dir: None,
            config: Config::default(),
            offline: None,
            ignore_suppressions: false,
        }
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.output_dir.join("reports")
    }

    pub fn converted_dir(&self) -> PathBuf {
        self.work_dir.join("converted")
    }

    /// Scratch directory owned by one scanner for one target type.
    pub fn scanner_dir(&self, scanner: &str, target_type: TargetType) -> PathBuf {
        self.output_dir
            .join("scanners")
            .join(scanner)
            .join(target_type.to_string())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.config.execution.timeout_secs)
    }

    /// `true` for paths inside the run's own output or work directories.
    pub fn is_run_artifact(&self, path: &Path) -> bool {
        path.starts_with(&self.output_dir) || path.starts_with(&self.work_dir)
    }

    /// `true` for source paths matched by `ignore_paths`. Run artifacts are
    /// never matched; their sources were filtered on the way in.
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.is_run_artifact(path) {
            return false;
        }
        path.strip_prefix(&self.source_dir)
            .is_ok_and(|rel| !rel.as_os_str().is_empty() && self.ignored.is_match(rel))
    }

    /// Whether `path` is off limits while scanning `target`.
    ///
    /// Run artifacts are only in scope when `target` is itself one.
    pub fn is_excluded(&self, target: &Path, path: &Path) -> bool {
        (!self.is_run_artifact(target) && self.is_run_artifact(path)) || self.is_ignored(path)
    }

    /// Exclusions to hand to an external tool walking `target`.
    pub fn scan_exclusions(&self, target: &Path) -> ScanExclusions {
        let mut dirs = Vec::new();
        if !self.is_run_artifact(target) {
            for dir in [&self.output_dir, &self.work_dir] {
                if let Ok(rel) = dir.strip_prefix(target) {
                    let rel = rel.to_string_lossy().replace('\\', "/");
                    if !rel.is_empty() && !dirs.iter().any(|d: &String| rel.starts_with(d.as_str())) {
                        dirs.push(rel);
                    }
                }
            }
        }
        let globs = if target.starts_with(&self.source_dir) && !self.is_run_artifact(target) {
            self.config
                .ignore_paths
                .iter()
                .flat_map(|i| i.patterns())
                .collect()
        } else {
            Vec::new()
        };
        ScanExclusions { dirs, globs }
    }

    /// Regular files under `target` accepted by `filter`, skipping VCS
    /// metadata, ignored paths and, unless `target` is itself one, the
    /// run's own artifacts.
    pub fn target_files(&self, target: &Path, filter: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
        WalkDir::new(target)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git" && !self.is_excluded(target, e.path()))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| filter(p))
            .collect()
    }
}

/// Collects run parameters and validates them into an [`ExecutionContext`].
pub struct ContextBuilder {
    source_dir: PathBuf,
    output_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    config: Config,
    offline: Option<bool>,
    ignore_suppressions: bool,
}

impl ContextBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Overrides `config.offline`.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = Some(offline);
        self
    }

    pub fn ignore_suppressions(mut self, ignore: bool) -> Self {
        self.ignore_suppressions = ignore;
        self
    }

    /// Validates the source directory and creates the output tree.
    ///
    /// # Errors
    ///
    /// Any [`FatalConfigurationError`]: the run cannot start.
    pub fn build(self) -> Result<ExecutionContext, FatalConfigurationError> {
        if !self.source_dir.exists() {
            return Err(FatalConfigurationError::SourceMissing(self.source_dir));
        }
        if !self.source_dir.is_dir() {
            return Err(FatalConfigurationError::SourceNotDirectory(self.source_dir));
        }
        std::fs::read_dir(&self.source_dir).map_err(|source| {
            FatalConfigurationError::SourceUnreadable {
                path: self.source_dir.clone(),
                source,
            }
        })?;
        let source_dir = self.source_dir.canonicalize().map_err(|source| {
            FatalConfigurationError::SourceUnreadable {
                path: self.source_dir.clone(),
                source,
            }
        })?;

        self.config.validate()?;

        let output_dir = self
            .output_dir
            .unwrap_or_else(|| source_dir.join(DEFAULT_OUTPUT_DIR));
        let output_dir = create_dir(&output_dir)?;
        let work_dir = match self.work_dir {
            Some(dir) => create_dir(&dir)?,
            None => create_dir(&output_dir.join("work"))?,
        };

        let ignored = ignore_set(&self.config)?;
        let offline = self.offline.unwrap_or(self.config.offline);
        Ok(ExecutionContext {
            source_dir,
            output_dir,
            work_dir,
            config: self.config,
            offline,
            ignore_suppressions: self.ignore_suppressions,
            ignored,
        })
    }
}

fn ignore_set(config: &Config) -> Result<GlobSet, ValidationError> {
    let mut builder = GlobSetBuilder::new();
    for ignore in &config.ignore_paths {
        for pattern in ignore.patterns() {
            let glob = Glob::new(&pattern).map_err(|e| {
                ValidationError::new(format!("ignore path `{}`: {e}", ignore.path))
            })?;
            builder.add(glob);
        }
    }
    builder
        .build()
        .map_err(|e| ValidationError::new(format!("ignore paths: {e}")))
}

fn create_dir(dir: &Path) -> Result<PathBuf, FatalConfigurationError> {
    std::fs::create_dir_all(dir)
        .and_then(|_| dir.canonicalize())
        .map_err(|source| FatalConfigurationError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })
}
