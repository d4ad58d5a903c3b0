//! Archive extraction (zip, tar, tar.gz, tar.bz2, tar.xz).

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

use crate::{BuildpackError, Result};

/// Supported archive types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

impl ArchiveType {
    /// Detect archive type from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let path_str = path.to_string_lossy().to_lowercase();

        if path_str.ends_with(".zip") || path_str.ends_with(".jar") || path_str.ends_with(".war") {
            Some(ArchiveType::Zip)
        } else if path_str.ends_with(".tar.gz") || path_str.ends_with(".tgz") {
            Some(ArchiveType::TarGz)
        } else if path_str.ends_with(".tar.bz2") || path_str.ends_with(".tbz2") {
            Some(ArchiveType::TarBz2)
        } else if path_str.ends_with(".tar.xz") || path_str.ends_with(".txz") {
            Some(ArchiveType::TarXz)
        } else if path_str.ends_with(".tar") {
            Some(ArchiveType::Tar)
        } else {
            None
        }
    }
}

/// Materializes a fetched artifact in a destination directory
pub trait Extractor: Send + Sync {
    /// Unpack `archive` into `dest_dir`, or copy it there verbatim when it is
    /// not an archive. Returns `dest_dir`.
    fn extract(&self, archive: &Path, dest_dir: &Path, strip: bool) -> Result<PathBuf>;

    /// Copy `file` into `dest_dir` without unpacking. Returns `dest_dir`.
    fn copy_into(&self, file: &Path, dest_dir: &Path) -> Result<PathBuf> {
        copy_into(file, dest_dir)
    }
}

/// Archive extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveExtractor;

impl Extractor for ArchiveExtractor {
    fn extract(&self, archive: &Path, dest_dir: &Path, strip: bool) -> Result<PathBuf> {
        match ArchiveType::from_path(archive) {
            Some(archive_type) => {
                log::debug!("Extracting {} into {} (strip: {})", archive.display(), dest_dir.display(), strip);
                ArchiveExtractor::extract_with_type(archive, dest_dir, archive_type, strip)?;
                Ok(dest_dir.to_path_buf())
            }
            None => {
                log::debug!("{} is not an archive, copying", archive.display());
                copy_into(archive, dest_dir)
            }
        }
    }
}

/// Copy a file into a directory, keeping its name
pub fn copy_into(file: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let name = file
        .file_name()
        .ok_or_else(|| BuildpackError::extraction(file, "path has no file name"))?;

    create_destination(dest_dir)?;
    fs::copy(file, dest_dir.join(name)).map_err(|e| BuildpackError::extraction(file, e))?;

    Ok(dest_dir.to_path_buf())
}

fn create_destination(dest_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest_dir).map_err(|e| {
        BuildpackError::extraction(dest_dir, format!("cannot create destination: {}", e))
    })?;
    dest_dir.canonicalize().map_err(|e| {
        BuildpackError::extraction(dest_dir, format!("Failed to canonicalize destination: {}", e))
    })
}

/// Compute where an archive entry lands relative to the destination.
///
/// Returns `Ok(None)` for entries that vanish (the root itself, or a bare
/// top-level directory when stripping). A top-level file survives stripping
/// and lands directly in the destination.
fn entry_target(name: &Path, strip: bool, is_dir: bool) -> std::result::Result<Option<PathBuf>, String> {
    let mut components = Vec::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => components.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(format!("Path traversal detected in archive: {}", name.display()));
            }
        }
    }

    if components.is_empty() {
        return Ok(None);
    }

    let kept = if strip && components.len() > 1 {
        &components[1..]
    } else if strip && is_dir {
        return Ok(None);
    } else {
        &components[..]
    };

    Ok(Some(kept.iter().collect()))
}

/// Resolve an output path and make sure it stays within the destination.
/// Parent directories are created along the way.
fn checked_output(dest_dir: &Path, dest_canonical: &Path, relative: &Path, is_dir: bool) -> std::io::Result<Option<PathBuf>> {
    let outpath = dest_dir.join(relative);

    if is_dir {
        fs::create_dir_all(&outpath)?;
    } else if let Some(parent) = outpath.parent() {
        fs::create_dir_all(parent)?;
    }

    let outpath_canonical = outpath.canonicalize().unwrap_or_else(|_| {
        // For new files, canonicalize the parent and append filename
        if let Some(parent) = outpath.parent() {
            if let Ok(parent_canonical) = parent.canonicalize() {
                if let Some(filename) = outpath.file_name() {
                    return parent_canonical.join(filename);
                }
            }
        }
        outpath.clone()
    });

    if !outpath_canonical.starts_with(dest_canonical) {
        return Ok(None);
    }

    Ok(Some(outpath))
}

impl ArchiveExtractor {
    /// Extract an archive with explicit type
    pub fn extract_with_type(
        archive_path: &Path,
        dest_dir: &Path,
        archive_type: ArchiveType,
        strip: bool,
    ) -> Result<()> {
        let dest_canonical = create_destination(dest_dir)?;

        let file = File::open(archive_path).map_err(|e| BuildpackError::extraction(archive_path, e))?;
        let reader = BufReader::new(file);

        let result = match archive_type {
            ArchiveType::Zip => Self::extract_zip(reader, dest_dir, &dest_canonical, strip),
            ArchiveType::Tar => Self::extract_tar(reader, dest_dir, &dest_canonical, strip),
            ArchiveType::TarGz => {
                Self::extract_tar(GzDecoder::new(reader), dest_dir, &dest_canonical, strip)
            }
            ArchiveType::TarBz2 => {
                use bzip2::read::BzDecoder;
                Self::extract_tar(BzDecoder::new(reader), dest_dir, &dest_canonical, strip)
            }
            ArchiveType::TarXz => {
                use xz2::read::XzDecoder;
                Self::extract_tar(XzDecoder::new(reader), dest_dir, &dest_canonical, strip)
            }
        };

        result.map_err(|reason| BuildpackError::extraction(archive_path, reason))
    }

    /// Extract a zip archive
    fn extract_zip(
        reader: BufReader<File>,
        dest_dir: &Path,
        dest_canonical: &Path,
        strip: bool,
    ) -> std::result::Result<(), String> {
        let mut archive = zip::ZipArchive::new(reader)
            .map_err(|e| format!("Failed to open zip: {}", e))?;

        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| format!("Failed to read zip entry: {}", e))?;

            let name = PathBuf::from(file.name());
            let is_dir = file.is_dir();

            let Some(relative) = entry_target(&name, strip, is_dir)? else {
                continue;
            };

            let outpath = checked_output(dest_dir, dest_canonical, &relative, is_dir)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("Path traversal detected: {} escapes destination directory", name.display()))?;

            if is_dir {
                continue;
            }

            let mut outfile = File::create(&outpath).map_err(|e| e.to_string())?;
            std::io::copy(&mut file, &mut outfile).map_err(|e| format!("Failed to extract {}: {}", name.display(), e))?;

            // Set permissions on Unix
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = file.unix_mode() {
                    fs::set_permissions(&outpath, fs::Permissions::from_mode(mode))
                        .map_err(|e| e.to_string())?;
                }
            }
        }

        Ok(())
    }

    /// Extract from a tar reader (common implementation for every tar flavour)
    fn extract_tar<R: Read>(
        reader: R,
        dest_dir: &Path,
        dest_canonical: &Path,
        strip: bool,
    ) -> std::result::Result<(), String> {
        let mut archive = tar::Archive::new(reader);

        let entries = archive
            .entries()
            .map_err(|e| format!("Failed to read tar: {}", e))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| format!("Failed to read tar entry: {}", e))?;

            let name = entry
                .path()
                .map_err(|e| format!("Invalid path in tar: {}", e))?
                .into_owned();
            let is_dir = entry.header().entry_type().is_dir();

            let Some(relative) = entry_target(&name, strip, is_dir)? else {
                continue;
            };

            let outpath = checked_output(dest_dir, dest_canonical, &relative, is_dir)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("Path traversal detected: {} escapes destination directory", name.display()))?;

            if is_dir {
                continue;
            }

            if entry.header().entry_type() == tar::EntryType::Link {
                Self::hard_link(&entry, &name, &outpath, dest_dir, dest_canonical, strip)?;
                continue;
            }

            entry
                .unpack(&outpath)
                .map_err(|e| format!("Failed to extract {}: {}", name.display(), e))?;
        }

        Ok(())
    }

    /// Hard link targets are archive paths, so they get the same stripping
    /// and containment checks as entry names.
    fn hard_link<R: Read>(
        entry: &tar::Entry<'_, R>,
        name: &Path,
        outpath: &Path,
        dest_dir: &Path,
        dest_canonical: &Path,
        strip: bool,
    ) -> std::result::Result<(), String> {
        let link_name = entry
            .link_name()
            .map_err(|e| format!("Invalid link target in tar: {}", e))?
            .ok_or_else(|| format!("Hard link {} has no target", name.display()))?
            .into_owned();

        let relative = entry_target(&link_name, strip, false)?
            .ok_or_else(|| format!("Hard link {} points at {}", name.display(), link_name.display()))?;
        let source = checked_output(dest_dir, dest_canonical, &relative, false)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Path traversal detected: {} links outside destination directory", name.display()))?;

        if outpath.symlink_metadata().is_ok() {
            fs::remove_file(outpath).map_err(|e| e.to_string())?;
        }
        fs::hard_link(&source, outpath).map_err(|e| {
            format!("Failed to link {} to {}: {}", name.display(), link_name.display(), e)
        })
    }
}
