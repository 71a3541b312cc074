//! Unpacks archives found in the source tree so scanners see their contents.
//!
//! `dist/bundle.zip` is extracted under
//! `<work_dir>/converted/archive/dist/bundle.zip/`. Supported formats are
//! `.zip`, `.tar`, `.tar.gz` and `.tgz`. Only members with a scannable
//! extension are written; members that would land outside the extraction
//! directory, and oversized members, are skipped with a warning.

use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use crate::plugins::{ConverterPlugin, Plugin, PluginDescriptor, PluginKind};
use crate::scanners::has_extension;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

const NAME: &str = "archive";

/// Members larger than this are not extracted.
pub const MAX_MEMBER_BYTES: u64 = 64 * 1024 * 1024;

const SCANNABLE_EXTENSIONS: &[&str] = &[
    "py", "pyi", "ipynb", "js", "jsx", "mjs", "cjs", "ts", "tsx", "java", "kt", "kts", "go", "rb",
    "php", "cs", "c", "cc", "cpp", "h", "hpp", "rs", "swift", "scala", "sh", "bash", "ps1", "tf",
    "tfvars", "hcl", "yaml", "yml", "json", "toml", "xml", "ini", "cfg", "conf", "env",
    "properties", "gradle", "lock", "sql", "txt", "template",
];

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(NAME, PluginKind::Converter, "Archive (zip, tar, tar.gz) extraction").native()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    /// Format implied by the file name, if it is an archive at all.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }
}

/// Whether a member is worth handing to the scanners.
pub fn is_scannable(member: &Path) -> bool {
    has_extension(member, SCANNABLE_EXTENSIONS)
        || member
            .file_name()
            .is_some_and(|n| n.to_string_lossy().to_lowercase().starts_with("dockerfile"))
}

pub struct ArchiveConverter {
    ctx: Arc<ExecutionContext>,
}

impl ArchiveConverter {
    pub fn new(ctx: &Arc<ExecutionContext>) -> Self {
        ArchiveConverter {
            ctx: Arc::clone(ctx),
        }
    }
}

impl Plugin for ArchiveConverter {
    fn descriptor(&self) -> PluginDescriptor {
        descriptor()
    }
}

impl ConverterPlugin for ArchiveConverter {
    fn convert(&self, target: &Path) -> Result<Vec<PathBuf>, ExecutionError> {
        let out_root = super::fresh_output_root(&self.ctx, NAME)?;
        let archives = self
            .ctx
            .target_files(target, |p| ArchiveKind::detect(p).is_some());

        let mut written = Vec::new();
        for archive in archives {
            let relative = archive.strip_prefix(target).unwrap_or(&archive);
            match extract(&archive, &out_root.join(relative)) {
                Ok(mut files) => {
                    tracing::debug!(archive = %archive.display(), members = files.len(), "extracted archive");
                    written.append(&mut files);
                }
                Err(e) => {
                    tracing::warn!(archive = %archive.display(), error = %e, "skipping unreadable archive");
                }
            }
        }
        written.sort();
        Ok(written)
    }
}

/// Extracts the scannable members of `archive` below `dest`.
pub fn extract(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>, ExecutionError> {
    let archive_err = |source: io::Error| ExecutionError::Archive {
        path: archive.to_path_buf(),
        source,
    };
    let file = File::open(archive).map_err(archive_err)?;
    match ArchiveKind::detect(archive) {
        Some(ArchiveKind::Zip) => extract_zip(file, dest).map_err(archive_err),
        Some(ArchiveKind::Tar) => extract_tar(file, dest).map_err(archive_err),
        Some(ArchiveKind::TarGz) => extract_tar(GzDecoder::new(file), dest).map_err(archive_err),
        None => Ok(Vec::new()),
    }
}

fn extract_zip(file: File, dest: &Path) -> io::Result<Vec<PathBuf>> {
    let mut zip = zip::ZipArchive::new(file)?;
    let mut written = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name() else {
            tracing::warn!(member = entry.name(), "skipping archive member with unsafe path");
            continue;
        };
        let size = entry.size();
        if let Some(path) = write_member(&mut entry, size, &name, dest)? {
            written.push(path);
        }
    }
    Ok(written)
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> io::Result<Vec<PathBuf>> {
    let mut tar = tar::Archive::new(reader);
    let mut written = Vec::new();
    for entry in tar.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw = entry.path()?.into_owned();
        let Some(name) = enclosed(&raw) else {
            tracing::warn!(member = %raw.display(), "skipping archive member with unsafe path");
            continue;
        };
        let size = entry.size();
        if let Some(path) = write_member(&mut entry, size, &name, dest)? {
            written.push(path);
        }
    }
    Ok(written)
}

/// `path` as a plain relative path, or `None` if it is absolute or climbs.
fn enclosed(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

fn write_member(
    reader: &mut impl Read,
    size: u64,
    name: &Path,
    dest: &Path,
) -> io::Result<Option<PathBuf>> {
    if !is_scannable(name) {
        return Ok(None);
    }
    if size > MAX_MEMBER_BYTES {
        tracing::warn!(member = %name.display(), size, "skipping oversized archive member");
        return Ok(None);
    }
    let out = dest.join(name);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(&out)?;
    io::copy(&mut reader.take(MAX_MEMBER_BYTES), &mut file)?;
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(path: &Path, members: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, body) in members {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn tar_gz_with(path: &Path, members: &[(&str, &str)]) {
        let encoder = flate2::write::GzEncoder::new(
            File::create(path).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        for (name, body) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn detects_formats_by_name() {
        assert_eq!(ArchiveKind::detect(Path::new("a/B.ZIP")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::detect(Path::new("r.tar.gz")), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::detect(Path::new("r.tgz")), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::detect(Path::new("r.tar")), Some(ArchiveKind::Tar));
        assert_eq!(ArchiveKind::detect(Path::new("notes.gz")), None);
    }

    #[test]
    fn only_scannable_and_enclosed_members_are_kept() {
        assert!(is_scannable(Path::new("src/app.py")));
        assert!(is_scannable(Path::new("Dockerfile.prod")));
        assert!(!is_scannable(Path::new("logo.png")));
        assert_eq!(enclosed(Path::new("./a/b.py")), Some(PathBuf::from("a/b.py")));
        assert_eq!(enclosed(Path::new("../evil.py")), None);
        assert_eq!(enclosed(Path::new("/etc/evil.py")), None);
    }

    #[test]
    fn converts_zip_and_tar_gz_into_work_dir() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("dist")).unwrap();
        zip_with(
            &src.path().join("dist/bundle.zip"),
            &[("app/main.py", "eval(x)\n"), ("logo.png", "\u{89}PNG")],
        );
        tar_gz_with(
            &src.path().join("infra.tgz"),
            &[("main.tf", "resource \"aws_s3_bucket\" \"b\" {}\n"), ("README", "docs")],
        );
        std::fs::write(src.path().join("broken.zip"), "not a zip").unwrap();

        let ctx = Arc::new(ExecutionContext::builder(src.path()).build().unwrap());
        let written = ArchiveConverter::new(&ctx).convert(&ctx.source_dir).unwrap();

        let root = ctx.converted_dir().join(NAME);
        assert_eq!(
            written,
            vec![
                root.join("dist/bundle.zip/app/main.py"),
                root.join("infra.tgz/main.tf"),
            ]
        );
        assert_eq!(std::fs::read_to_string(&written[0]).unwrap(), "eval(x)\n");
        assert!(!root.join("dist/bundle.zip/logo.png").exists());
    }
}
