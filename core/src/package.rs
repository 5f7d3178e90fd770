//! Function packaging: optional dependency vendoring into a staging copy,
//! then a deflated zip of the result.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::{DeployConfig, PackagingConfig};
use crate::errors::PackageError;

/// The zip on disk. Removed when dropped unless [`Archive::keep`] was called,
/// so every exit path of a run cleans it up.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    entries: usize,
    keep: bool,
}

impl Archive {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: 0,
            keep: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Leave the file in place after the run.
    pub fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed archive {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove archive {}: {}", self.path.display(), e),
        }
    }
}

struct Excludes<'a> {
    dirs: &'a [String],
    extensions: &'a [String],
    /// Canonical path of the archive being written, which may sit inside
    /// the source tree.
    archive: Option<PathBuf>,
}

impl<'a> Excludes<'a> {
    fn new(config: &'a PackagingConfig, archive_path: &Path) -> Self {
        Self {
            dirs: &config.exclude_dirs,
            extensions: &config.exclude_extensions,
            archive: canonical_target(archive_path),
        }
    }

    fn skips_dir(&self, name: &OsStr) -> bool {
        self.dirs.iter().any(|d| OsStr::new(d) == name)
    }

    fn skips_file(&self, path: &Path) -> bool {
        if path
            .extension()
            .is_some_and(|ext| self.extensions.iter().any(|e| OsStr::new(e) == ext))
        {
            return true;
        }
        self.archive
            .as_deref()
            .is_some_and(|archive| fs::canonicalize(path).is_ok_and(|p| p == archive))
    }
}

/// Canonical form of a file that may not exist yet. `None` when its parent
/// directory does not exist either, in which case it cannot be under any
/// existing tree.
fn canonical_target(path: &Path) -> Option<PathBuf> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path.file_name()?;
    fs::canonicalize(parent).ok().map(|dir| dir.join(name))
}

/// Builds the archive at `config.archive_path` from `config.source_dir`.
///
/// When the source directory holds the dependency manifest, the tree is
/// copied into a temporary staging directory and the installer runs there;
/// the source directory itself is never written to.
pub fn package(config: &DeployConfig) -> Result<Archive, PackageError> {
    let source = &config.source_dir;
    if !source.is_dir() {
        return Err(PackageError::SourceMissing {
            path: source.display().to_string(),
        });
    }

    let excludes = Excludes::new(&config.packaging, &config.archive_path);
    let manifest = config.manifest_path();

    // Held until the archive is written.
    let staging = if manifest.is_file() {
        let staging = tempfile::Builder::new()
            .prefix("lambda-deploy-")
            .tempdir()
            .map_err(|e| staging_error(source, e))?;
        copy_tree(source, staging.path(), &excludes).map_err(|e| staging_error(source, e))?;
        install_dependencies(&config.packaging, staging.path())?;
        Some(staging)
    } else {
        debug!(
            "No {} in {}, skipping dependency install",
            config.packaging.manifest,
            source.display()
        );
        None
    };

    let root = staging.as_ref().map(|s| s.path()).unwrap_or(source.as_path());
    let files = collect_files(root, &excludes).map_err(|e| staging_error(root, e))?;

    let archive = write_archive(root, &files, &config.archive_path)?;
    info!(
        "Packaged {} files from {} into {} ({} bytes)",
        archive.entries(),
        source.display(),
        archive.path().display(),
        archive.size()
    );
    Ok(archive)
}

fn staging_error(path: &Path, error: io::Error) -> PackageError {
    PackageError::Staging {
        path: path.display().to_string(),
        reason: error.to_string(),
    }
}

fn install_dependencies(packaging: &PackagingConfig, staging: &Path) -> Result<(), PackageError> {
    let installer = &packaging.installer;
    let manifest = staging.join(&packaging.manifest);
    let args = installer.render_args(&manifest, staging);

    info!("Installing dependencies: {} {}", installer.program, args.join(" "));
    let output = Command::new(&installer.program)
        .args(&args)
        .current_dir(staging)
        .output()
        .map_err(|e| PackageError::InstallFailed {
            program: installer.program.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PackageError::InstallFailed {
            program: installer.program.clone(),
            reason: format!("{}: {}", output.status, stderr.trim()),
        });
    }
    Ok(())
}

fn copy_tree(from: &Path, to: &Path, excludes: &Excludes<'_>) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let path = entry.path();
        let target = to.join(entry.file_name());
        if fs::metadata(&path)?.is_dir() {
            if !excludes.skips_dir(&entry.file_name()) {
                copy_tree(&path, &target, excludes)?;
            }
        } else if !excludes.skips_file(&path) {
            fs::copy(&path, &target)?;
        }
    }
    Ok(())
}

/// All files under `root` that survive the exclusions, sorted.
fn collect_files(root: &Path, excludes: &Excludes<'_>) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if fs::metadata(&path)?.is_dir() {
                if !excludes.skips_dir(&entry.file_name()) {
                    pending.push(path);
                }
            } else if !excludes.skips_file(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn entry_name(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .unwrap_or(file)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}

fn write_archive(root: &Path, files: &[PathBuf], path: &Path) -> Result<Archive, PackageError> {
    let archive_error = |reason: String| PackageError::Archive {
        path: path.display().to_string(),
        reason,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| archive_error(e.to_string()))?;
    }

    let file = fs::File::create(path).map_err(|e| archive_error(e.to_string()))?;
    // From here on a failure drops the guard and removes the partial zip.
    let mut archive = Archive::new(path.to_path_buf());
    let mut zip = ZipWriter::new(file);

    for source in files {
        let metadata = fs::metadata(source).map_err(|e| archive_error(e.to_string()))?;
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(file_mode(&metadata));

        zip.start_file(entry_name(root, source), options)
            .map_err(|e| archive_error(e.to_string()))?;
        let mut input = fs::File::open(source).map_err(|e| archive_error(e.to_string()))?;
        io::copy(&mut input, &mut zip).map_err(|e| archive_error(e.to_string()))?;
        archive.entries += 1;
    }

    zip.finish().map_err(|e| archive_error(e.to_string()))?;
    Ok(archive)
}
