//! The controller binary mounted into every dev container.
//!
//! By default the binary shipped next to the CLI executable is copied to
//! `<home>/appsody-controller` whenever its SHA-256 differs, and that copy is
//! mounted. `APPSODY_MOUNT_CONTROLLER` replaces the host path verbatim.
//! `APPSODY_CONTROLLER_IMAGE` / `APPSODY_CONTROLLER_VERSION` switch to a
//! volume populated from a controller image.

use crate::context::Context;
use crate::error::{AppsodyError, Result};
use crate::exec::{self, LogTarget, StreamOptions};
use crate::paths::{self, CONTAINER_CONTROLLER_PATH, CONTROLLER_BINARY};
use std::path::{Path, PathBuf};

const CONTROLLER_IMAGE: &str = "appsody/init-controller";
const CONTROLLER_VOLUME_TARGET: &str = "/appsody";

/// Where the controller comes from for this invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerSource {
    /// Host path given by `APPSODY_MOUNT_CONTROLLER`.
    Override(String),
    /// Controller image populating a named volume.
    Image { image: String, volume: String },
    /// Binary next to the CLI, cached in the home directory.
    Bundled,
}

impl ControllerSource {
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());
        if let Some(path) = var("APPSODY_MOUNT_CONTROLLER") {
            return Self::Override(path);
        }
        let (image, version) = match (var("APPSODY_CONTROLLER_IMAGE"), var("APPSODY_CONTROLLER_VERSION")) {
            (Some(image), _) => {
                tracing::warn!(
                    "The Appsody CLI detected the APPSODY_CONTROLLER_IMAGE env var. The controller image that will be used is: {image}"
                );
                let version = image
                    .rsplit_once(':')
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_else(|| "latest".to_string());
                (image, version)
            }
            (None, Some(version)) => {
                tracing::warn!(
                    "You have overridden the Appsody controller version and set it to: {version}"
                );
                (format!("{CONTROLLER_IMAGE}:{version}"), version)
            }
            (None, None) => return Self::Bundled,
        };
        Self::Image {
            image,
            volume: format!("{CONTROLLER_BINARY}-{version}"),
        }
    }
}

/// Image whose init container installs the controller when the dev loop
/// runs as a cluster Deployment.
pub fn cluster_image() -> String {
    match ControllerSource::from_env() {
        ControllerSource::Image { image, .. } => image,
        _ => format!("{CONTROLLER_IMAGE}:latest"),
    }
}

/// The `-v` value that places the controller at `/appsody/appsody-controller`.
pub fn mount(ctx: &Context) -> Result<String> {
    match ControllerSource::from_env() {
        ControllerSource::Override(path) => {
            tracing::debug!("Overriding appsody-controller mount with APPSODY_MOUNT_CONTROLLER: {path}");
            Ok(format!("{path}:{CONTAINER_CONTROLLER_PATH}"))
        }
        ControllerSource::Image { image, volume } => {
            populate_volume(ctx, &image, &volume)?;
            Ok(format!("{volume}:{CONTROLLER_VOLUME_TARGET}"))
        }
        ControllerSource::Bundled => bundled_mount(&ctx.home, bundled_binary().as_deref(), ctx.dry_run),
    }
}

fn bundled_mount(home: &Path, bundled: Option<&Path>, dry_run: bool) -> Result<String> {
    let cached = paths::controller_path(home);
    match bundled {
        Some(bundled) => {
            refresh(bundled, &cached, dry_run)?;
        }
        None if cached.exists() || dry_run => {
            tracing::warn!("Could not find {CONTROLLER_BINARY} next to the appsody executable; using {}", cached.display());
        }
        None => return Err(AppsodyError::NotInstalled(CONTROLLER_BINARY.to_string())),
    }
    Ok(format!("{}:{CONTAINER_CONTROLLER_PATH}", paths::to_slash(&cached)))
}

fn bundled_binary() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let exe = exe.canonicalize().unwrap_or(exe);
    let sibling = exe.parent()?.join(CONTROLLER_BINARY);
    sibling.is_file().then_some(sibling)
}

/// Copy `bundled` over `cached` when missing or when the checksums differ.
pub fn refresh(bundled: &Path, cached: &Path, dry_run: bool) -> Result<bool> {
    if cached.exists() {
        let want = crate::io::sha256_file(bundled)?;
        let have = crate::io::sha256_file(cached)?;
        if want == have {
            tracing::debug!("{} is up to date", cached.display());
            return Ok(false);
        }
        tracing::debug!("Controller checksum mismatch ({have} != {want}); refreshing");
    }
    if dry_run {
        tracing::info!("Dry Run - Skipping copy of {} to {}", bundled.display(), cached.display());
        return Ok(false);
    }
    if let Some(parent) = cached.parent() {
        crate::io::ensure_dir(parent)?;
    }
    std::fs::copy(bundled, cached)?;
    set_executable(cached)?;
    Ok(true)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn populate_volume(ctx: &Context, image: &str, volume: &str) -> Result<()> {
    let latest = image.ends_with(":latest") || !image.contains(':');
    if latest {
        tracing::warn!("The Appsody CLI will use the latest version of the controller image. This may result in a mismatch or malfunction.");
    } else {
        let args = vec![
            "volume".to_string(),
            "ls".into(),
            "-q".into(),
            "-f".into(),
            format!("name={volume}"),
        ];
        let existing = exec::capture_stdout("docker", &args, "docker volume ls")?;
        if existing.lines().any(|l| l.trim() == volume) {
            tracing::debug!("Controller volume {volume} already populated");
            return Ok(());
        }
    }
    tracing::debug!("Launching {image} to populate the controller volume {volume}");
    let args = vec![
        "run".to_string(),
        "--rm".into(),
        "-v".into(),
        format!("{volume}:{CONTROLLER_VOLUME_TARGET}"),
        image.to_string(),
    ];
    let res = exec::stream("docker", &args, &StreamOptions::new(LogTarget::Docker, ctx.dry_run))?;
    if !res.success() {
        tracing::warn!("Error populating the controller volume {volume}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn refresh_copies_only_on_change() {
        let dir = TempDir::new().unwrap();
        let bundled = dir.path().join("bin/appsody-controller");
        let cached = dir.path().join("home/appsody-controller");
        std::fs::create_dir_all(bundled.parent().unwrap()).unwrap();
        std::fs::write(&bundled, b"v1").unwrap();

        assert!(refresh(&bundled, &cached, false).unwrap());
        assert!(!refresh(&bundled, &cached, false).unwrap());

        std::fs::write(&bundled, b"v2").unwrap();
        assert!(refresh(&bundled, &cached, false).unwrap());
        assert_eq!(std::fs::read(&cached).unwrap(), b"v2");
    }

    #[test]
    fn dry_run_does_not_copy() {
        let dir = TempDir::new().unwrap();
        let bundled = dir.path().join("appsody-controller");
        std::fs::write(&bundled, b"v1").unwrap();
        let cached = dir.path().join("home/appsody-controller");
        assert!(!refresh(&bundled, &cached, true).unwrap());
        assert!(!cached.exists());
    }

    #[test]
    fn bundled_controller_is_cached_and_mounted() {
        let dir = TempDir::new().unwrap();
        let bundled = dir.path().join("bin").join(CONTROLLER_BINARY);
        std::fs::create_dir_all(bundled.parent().unwrap()).unwrap();
        std::fs::write(&bundled, b"controller").unwrap();
        let home = dir.path().join("home");

        let mount = bundled_mount(&home, Some(bundled.as_path()), false).unwrap();
        let cached = paths::controller_path(&home);
        assert_eq!(std::fs::read(&cached).unwrap(), b"controller");
        assert_eq!(
            mount,
            format!("{}:{CONTAINER_CONTROLLER_PATH}", paths::to_slash(&cached))
        );
    }

    #[test]
    fn missing_controller_is_an_error_unless_cached() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("home");
        assert!(matches!(
            bundled_mount(&home, None, false),
            Err(AppsodyError::NotInstalled(_))
        ));
        assert!(bundled_mount(&home, None, true).is_ok());

        let cached = paths::controller_path(&home);
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, b"old").unwrap();
        let mount = bundled_mount(&home, None, false).unwrap();
        assert!(mount.ends_with(CONTAINER_CONTROLLER_PATH));
    }
}
