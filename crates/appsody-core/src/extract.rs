//! Extracting the combined stack + project tree out of the stack image.

use crate::container::{self, Engine, RunSpec};
use crate::context::Context;
use crate::error::{AppsodyError, Result};
use crate::exec::{self, StreamOptions};
use crate::mounts;
use crate::paths;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Final destination; must not exist, its parent must.
    pub target_dir: Option<PathBuf>,
    /// Utility container name; defaults to `<project>-extract`.
    pub container_name: Option<String>,
}

pub fn default_container_name(project_name: &str) -> String {
    format!("{project_name}-extract")
}

fn check_target(target: &Path) -> Result<PathBuf> {
    let target = if target.is_absolute() {
        target.to_path_buf()
    } else {
        std::env::current_dir()?.join(target)
    };
    tracing::debug!("Checking if target-dir exists: {}", target.display());
    if target.exists() {
        return Err(AppsodyError::UserInput(format!(
            "Cannot extract to an existing target-dir: {}",
            target.display()
        )));
    }
    let parent = target.parent().unwrap_or(Path::new("/"));
    if !parent.exists() {
        return Err(AppsodyError::UserInput(format!("{} does not exist", parent.display())));
    }
    Ok(target)
}

/// Extract the project as the stack image sees it. Returns the directory
/// holding the result: the scratch dir under `<home>/extract`, or the target.
pub fn extract(ctx: &Context, opts: &ExtractOptions) -> Result<PathBuf> {
    let project_name = ctx.project_name()?;
    let project = ctx.project_config()?;
    let container_name = opts
        .container_name
        .clone()
        .unwrap_or_else(|| default_container_name(&project_name));
    tracing::info!("Extracting project from development environment");

    let target = opts.target_dir.as_deref().map(check_target).transpose()?;

    let scratch = paths::extract_dir(&ctx.home, &project_name);
    if ctx.dry_run {
        tracing::info!("Dry Run - Skip preparing extract dir: {}", scratch.display());
    } else {
        crate::io::ensure_dir(&paths::extract_root(&ctx.home))?;
        if scratch.exists() {
            tracing::debug!("Deleting extract dir: {}", scratch.display());
            crate::io::remove_dir_if_exists(&scratch)?;
        }
        if ctx.engine == Engine::Buildah {
            crate::io::ensure_dir(&scratch)?;
        }
    }

    let image = project.stack_image()?;
    container::pull(ctx, &image)?;
    let image_cfg = container::inspect(ctx, &image)?;
    let container_project_dir = image_cfg.project_dir();
    tracing::debug!("Container project dir: {container_project_dir}");
    let volumes = mounts::stack_mounts(&image_cfg, &ctx.project_dir)?;

    let copied = copy_out(ctx, &container_name, &image, &container_project_dir, &volumes, &scratch);
    if let Err(e) = container::remove(ctx, &container_name, false) {
        tracing::error!("containerRemove error {e}");
    }
    copied?;

    if ctx.engine == Engine::Buildah && !ctx.dry_run {
        copy_mounts_locally(&volumes, &container_project_dir, &scratch)?;
    }

    match target {
        None => {
            if !ctx.dry_run {
                tracing::info!("Project extracted to {}", scratch.display());
            }
            Ok(scratch)
        }
        Some(target) => {
            if ctx.dry_run {
                tracing::info!("Dry Run - Skip moving {} to {}", scratch.display(), target.display());
            } else {
                crate::io::move_dir(&scratch, &target)?;
                tracing::info!("Project extracted to {}", target.display());
            }
            Ok(target)
        }
    }
}

fn copy_out(
    ctx: &Context,
    name: &str,
    image: &str,
    project_dir: &str,
    volumes: &[String],
    scratch: &Path,
) -> Result<()> {
    let scratch_str = paths::to_slash(scratch);
    match ctx.engine {
        Engine::Buildah => {
            container::create(ctx, name, image, volumes)?;
            let script = format!("x=`buildah mount {name}`; cp -rf $x/{project_dir}/* {scratch_str}");
            let res = exec::stream(
                "/bin/sh",
                &["-c".to_string(), script],
                &StreamOptions::new(exec::LogTarget::Buildah, ctx.dry_run),
            )?;
            if !res.success() {
                return Err(AppsodyError::ContainerEngine {
                    op: "buildah mount / copy".into(),
                    message: res.stderr.trim().to_string(),
                });
            }
            Ok(())
        }
        Engine::Docker if ctx.is_windows() => {
            // docker cp on Windows does not follow symlinks; resolve them inside the container first.
            let tmp = format!("/tmp{project_dir}");
            let spec = RunSpec {
                name: name.to_string(),
                keep: true,
                volumes: volumes.to_vec(),
                image: image.to_string(),
                ..RunSpec::default()
            };
            if ctx.dry_run {
                tracing::info!("Dry Run - Skipping copy of {project_dir} to {tmp}");
            } else {
                container::run_bash_with(ctx, spec, &format!("cp -rfL {project_dir} {tmp}"))?;
            }
            container::cp(ctx, &format!("{name}:{tmp}"), &scratch_str)
        }
        Engine::Docker => {
            container::create(ctx, name, image, volumes)?;
            container::cp(ctx, &format!("{name}:{project_dir}"), &scratch_str)
        }
    }
}

/// Bind mounts are not always visible through `buildah mount`; copy the
/// host side of every mount into place.
fn copy_mounts_locally(volumes: &[String], container_project_dir: &str, scratch: &Path) -> Result<()> {
    let scratch_str = paths::to_slash(scratch);
    for mount in volumes {
        let Some((src, dest)) = mount.split_once(':') else {
            continue;
        };
        let dest = PathBuf::from(dest.replace(container_project_dir, &scratch_str));
        let src = Path::new(src);
        tracing::debug!("Copying {} to {}", src.display(), dest.display());
        if src.is_dir() {
            crate::io::copy_dir(src, &dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                crate::io::ensure_dir(parent)?;
            }
            std::fs::copy(src, &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn target_must_not_exist_and_parent_must() {
        let dir = TempDir::new().unwrap();
        let err = check_target(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Cannot extract to an existing target-dir"));

        let err = check_target(&dir.path().join("missing/child")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));

        let ok = check_target(&dir.path().join("out")).unwrap();
        assert_eq!(ok, dir.path().join("out"));
    }

    #[test]
    fn buildah_mounts_copied_into_scratch() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("app.js"), "x").unwrap();
        let scratch = dir.path().join("scratch");
        let volumes = vec![format!("{}:/project/user-app", paths::to_slash(&src))];
        copy_mounts_locally(&volumes, "/project", &scratch).unwrap();
        assert!(scratch.join("user-app/app.js").exists());
    }
}
