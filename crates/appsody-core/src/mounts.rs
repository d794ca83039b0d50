//! Host mounts declared by a stack through `APPSODY_MOUNTS` and `APPSODY_DEPS`.

use crate::container::ImageConfig;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Sources and overrides used to resolve mount declarations.
#[derive(Debug, Clone)]
pub struct MountRoots {
    pub home: PathBuf,
    pub home_overridden: bool,
    pub project: PathBuf,
    pub project_overridden: bool,
}

impl MountRoots {
    /// Roots for `project_dir`, honouring `APPSODY_MOUNT_HOME` and
    /// `APPSODY_MOUNT_PROJECT`.
    pub fn from_env(project_dir: &Path) -> Result<Self> {
        let mut roots = Self {
            home: crate::paths::user_home()?,
            home_overridden: false,
            project: project_dir.to_path_buf(),
            project_overridden: false,
        };
        if let Some(dir) = non_empty_env("APPSODY_MOUNT_HOME") {
            tracing::debug!(
                "Overriding home mount dir from '{}' to APPSODY_MOUNT_HOME value '{dir}'",
                roots.home.display()
            );
            roots.home = PathBuf::from(dir);
            roots.home_overridden = true;
        }
        if let Some(dir) = non_empty_env("APPSODY_MOUNT_PROJECT") {
            tracing::debug!(
                "Overriding project mount dir from '{}' to APPSODY_MOUNT_PROJECT value '{dir}'",
                roots.project.display()
            );
            roots.project = PathBuf::from(dir);
            roots.project_overridden = true;
        }
        Ok(roots)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Resolve `src:dst;src:dst` into `host:container` mounts. Local sources that
/// do not exist are skipped unless their root was overridden.
pub fn resolve(declared: &str, roots: &MountRoots) -> Vec<String> {
    let mut mounts = Vec::new();
    for mount in declared.split(';').filter(|m| !m.is_empty()) {
        let (mapped, overridden) = match mount.strip_prefix('~') {
            Some(rest) => (
                format!("{}{rest}", crate::paths::to_slash(&roots.home)),
                roots.home_overridden,
            ),
            // `/` names the project root, not the host root.
            None => (
                crate::paths::to_slash(&roots.project.join(mount.trim_start_matches('/'))),
                roots.project_overridden,
            ),
        };
        if !overridden && !local_source_exists(&mapped) {
            tracing::warn!("Could not mount {mapped} because the local file was not found.");
            continue;
        }
        mounts.push(mapped);
    }
    tracing::debug!("Mapped mounts: {mounts:?}");
    mounts
}

fn local_source_exists(mount: &str) -> bool {
    let parts: Vec<&str> = mount.split(':').collect();
    let local = if cfg!(windows) && parts.len() > 2 {
        format!("{}:{}", parts[0], parts[1])
    } else {
        parts[0].to_string()
    };
    tracing::debug!("Checking for existence of local file or directory to mount: {local}");
    Path::new(&local).exists()
}

/// Mounts for the stack image's declared `APPSODY_MOUNTS`.
pub fn stack_mounts(image: &ImageConfig, project_dir: &Path) -> Result<Vec<String>> {
    let declared = image.env("APPSODY_MOUNTS").unwrap_or_default();
    if declared.is_empty() {
        tracing::warn!("The stack image does not contain APPSODY_MOUNTS");
        return Ok(Vec::new());
    }
    Ok(resolve(declared, &MountRoots::from_env(project_dir)?))
}

/// Named volume keeping dependency state between runs, when the stack declares one.
pub fn deps_volume(image: &ImageConfig, volume_name: &str) -> Option<String> {
    image
        .env("APPSODY_DEPS")
        .filter(|d| !d.is_empty())
        .map(|deps| format!("{volume_name}:{deps}"))
}

pub fn default_deps_volume_name(project_name: &str) -> String {
    format!("{project_name}-deps")
}
