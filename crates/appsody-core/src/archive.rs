//! Gzipped tar handling for template and stack source archives.

use crate::error::{AppsodyError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Every entry.
    Full,
    /// Only `.appsody-config.yaml` files; no directories.
    ConfigOnly,
}

fn open(archive: &Path) -> Result<Archive<GzDecoder<File>>> {
    let file = File::open(archive)?;
    Ok(Archive::new(GzDecoder::new(file)))
}

/// Relative path of an entry with `.` components removed; rejects `..` and
/// absolute paths.
fn safe_relative(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Normal(c) => out.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AppsodyError::PathTraversal(path.display().to_string()));
            }
        }
    }
    Ok(out)
}

/// Regular files in `archive` that already exist as files under `target`.
pub fn conflicts(archive: &Path, target: &Path) -> Result<Vec<String>> {
    let mut archive = open(archive)?;
    let mut found = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let rel = safe_relative(&entry.path()?)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        if target.join(&rel).is_file() {
            found.push(crate::paths::to_slash(&rel));
        }
    }
    Ok(found)
}

/// Fail with `ConflictsExist` when extraction would overwrite a file.
pub fn precheck(archive: &Path, target: &Path) -> Result<()> {
    let found = conflicts(archive, target)?;
    if found.is_empty() {
        return Ok(());
    }
    for f in &found {
        tracing::error!("Conflict: {f} already exists");
    }
    Err(AppsodyError::ConflictsExist(found))
}

/// Extract `archive` into `target`. Entries escaping `target` are rejected
/// before anything is written.
pub fn untar(archive: &Path, target: &Path, mode: ExtractMode) -> Result<()> {
    {
        let mut check = open(archive)?;
        for entry in check.entries()? {
            let entry = entry?;
            safe_relative(&entry.path()?)?;
        }
    }

    crate::io::ensure_dir(target)?;
    let mut archive = open(archive)?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let rel = safe_relative(&entry.path()?)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let kind = entry.header().entry_type();
        match mode {
            ExtractMode::ConfigOnly => {
                let is_config = rel
                    .to_string_lossy()
                    .ends_with(crate::paths::PROJECT_CONFIG_FILE);
                if kind != EntryType::Regular || !is_config {
                    continue;
                }
            }
            ExtractMode::Full => {
                if kind == EntryType::Directory {
                    let dir = target.join(&rel);
                    crate::io::ensure_dir(&dir)?;
                    set_dir_mode(&dir)?;
                    continue;
                }
            }
        }
        tracing::debug!("Extracting {}", rel.display());
        entry.unpack_in(target)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_mode(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_mode(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Write `src_dir`'s contents as a gzipped tar rooted at `./`, followed by
/// the in-memory `extra` files. A file in `src_dir` with the same relative
/// name as an extra entry is left out of the archive.
pub fn create_targz(src_dir: &Path, archive: &Path, extra: &[(&str, &[u8])]) -> Result<()> {
    if let Some(parent) = archive.parent() {
        crate::io::ensure_dir(parent)?;
    }
    let file = File::create(archive)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir(".", src_dir)?;
    for entry in walkdir::WalkDir::new(src_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        if extra.iter().any(|(name, _)| rel == Path::new(name)) {
            continue;
        }
        builder.append_path_with_name(entry.path(), Path::new(".").join(rel))?;
    }
    for (name, data) in extra {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        );
        header.set_cksum();
        builder.append_data(&mut header, Path::new(".").join(name), *data)?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::path::Path;

    /// Build a .tar.gz from (path, contents) pairs, paths taken verbatim.
    pub fn write_targz(path: &Path, files: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            {
                let bytes = name.as_bytes();
                let raw = header.as_old_mut();
                raw.name[..bytes.len()].copy_from_slice(bytes);
            }
            header.set_cksum();
            builder.append(&header, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }
}
