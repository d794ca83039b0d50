//! Template installation into a project directory.

use crate::archive::{self, ExtractMode};
use crate::error::{AppsodyError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const WHITELIST_FILES: &[&str] = &[
    "git",
    "project",
    "DS_Store",
    "classpath",
    "factorypath",
    "gitattributes",
    "gitignore",
    "cw-settings",
    "cw-extension",
];
const WHITELIST_DIRS: &[&str] = &["github", "vscode", "settings", "metadata"];

static WHITELIST_RE: OnceLock<Regex> = OnceLock::new();

fn whitelist_re() -> &'static Regex {
    WHITELIST_RE.get_or_init(|| {
        let pattern = format!(
            r"(^(\.[/\\])?\.({})$)|(^(\.[/\\])?\.({})([/\\].*)?$)",
            WHITELIST_FILES.join("|"),
            WHITELIST_DIRS.join("|"),
        );
        Regex::new(&pattern).unwrap()
    })
}

/// Editor and VCS artifacts tolerated in a directory being initialised.
pub fn in_whitelist(name: &str) -> bool {
    whitelist_re().is_match(name)
}

/// Top-level entries of `dir` that block a template laydown.
pub fn blocking_entries(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut blocking = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if !in_whitelist(&name) {
            blocking.push(name);
        }
    }
    blocking.sort();
    Ok(blocking)
}

/// Fail with `NonEmptyDirectory` unless every entry is whitelisted.
pub fn check_laydown_safe(dir: &Path) -> Result<()> {
    let blocking = blocking_entries(dir)?;
    if blocking.is_empty() {
        return Ok(());
    }
    tracing::debug!("Entries blocking the template: {blocking:?}");
    Err(AppsodyError::NonEmptyDirectory)
}

/// How a downloaded template is laid down.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    pub overwrite: bool,
    pub no_template: bool,
    pub dry_run: bool,
}

/// Download the template archive at `url` next to the project, extract it
/// and remove the archive on every path.
pub fn install(url: &str, stack_id: &str, project_dir: &Path, opts: InstallOptions) -> Result<()> {
    let archive_path = project_dir.join(format!("{stack_id}.tar.gz"));
    crate::download::download_to(url, &archive_path, opts.dry_run)?;
    if opts.dry_run {
        tracing::info!("Dry Run - Skipping untar of file: {}", archive_path.display());
        return Ok(());
    }
    let result = extract(&archive_path, project_dir, opts);
    if let Err(e) = std::fs::remove_file(&archive_path) {
        tracing::warn!("Could not remove {}: {e}", archive_path.display());
    }
    result
}

fn extract(archive_path: &Path, project_dir: &Path, opts: InstallOptions) -> Result<()> {
    if !opts.overwrite && !opts.no_template {
        archive::precheck(archive_path, project_dir)?;
    }
    let mode = if opts.no_template {
        ExtractMode::ConfigOnly
    } else {
        ExtractMode::Full
    };
    archive::untar(archive_path, project_dir, mode)
}

pub fn init_script_name() -> &'static str {
    if cfg!(windows) {
        ".appsody-init.bat"
    } else {
        ".appsody-init.sh"
    }
}

/// Scratch directory the init script runs in.
pub fn init_workdir(project_dir: &Path) -> PathBuf {
    project_dir.join(crate::paths::INIT_WORKDIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::write_targz;
    use tempfile::TempDir;

    #[test]
    fn whitelist_matches_editor_artifacts() {
        for ok in [
            ".git",
            ".gitignore",
            ".DS_Store",
            ".vscode",
            ".vscode/settings.json",
            "./.github/workflows",
            ".cw-settings",
        ] {
            assert!(in_whitelist(ok), "{ok}");
        }
        for bad in ["app.js", ".gitmodules", ".VSCODE", "git", "x.git", ".idea"] {
            assert!(!in_whitelist(bad), "{bad}");
        }
    }

    #[test]
    fn laydown_check() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".gitignore"), "").unwrap();
        check_laydown_safe(dir.path()).unwrap();

        std::fs::write(dir.path().join("app.js"), "").unwrap();
        let err = check_laydown_safe(dir.path()).unwrap_err();
        assert!(err
            .to_string()
            .contains("non-empty directory found with files which may conflict"));
    }

    #[test]
    fn install_from_file_url_cleans_up_archive() {
        let dir = TempDir::new().unwrap();
        let tgz = dir.path().join("simple.tar.gz");
        write_targz(&tgz, &[("app.js", "js"), ("package.json", "{}")]);
        let project = dir.path().join("project");
        std::fs::create_dir(&project).unwrap();

        let url = crate::download::to_file_url(&tgz);
        install(&url, "nodejs", &project, InstallOptions::default()).unwrap();
        assert!(project.join("app.js").exists());
        assert!(!project.join("nodejs.tar.gz").exists());

        let err = install(&url, "nodejs", &project, InstallOptions::default()).unwrap_err();
        assert!(matches!(err, AppsodyError::ConflictsExist(_)));
        assert!(!project.join("nodejs.tar.gz").exists());

        let overwrite = InstallOptions {
            overwrite: true,
            ..InstallOptions::default()
        };
        install(&url, "nodejs", &project, overwrite).unwrap();
    }
}
