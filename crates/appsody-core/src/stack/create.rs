//! `appsody stack create`: scaffold a new stack from the source archive of an
//! existing one.

use crate::archive::{self, ExtractMode};
use crate::context::Context;
use crate::download;
use crate::error::{AppsodyError, Result};
use crate::index::RepoIndex;
use crate::names;
use crate::paths;
use crate::reference;
use crate::repo::RepositoryFile;
use std::path::PathBuf;

pub const DEFAULT_COPY: &str = "incubator/starter";

/// Create `<project_dir>/<name>` from the stack named by `copy`
/// (`[repo/]stack`). Returns the new stack directory.
pub fn create(ctx: &Context, name: &str, copy: &str) -> Result<PathBuf> {
    names::validate_project_name(name)?;
    let target = ctx.project_dir.join(name);
    if target.exists() {
        return Err(AppsodyError::UserInput(format!(
            "A stack named {name} already exists in your directory. Specify a unique stack name"
        )));
    }

    let reference = reference::parse_reference(copy)?;
    let repos = RepositoryFile::load_repaired(ctx)?;
    let repo = reference::select_repo(&repos, &reference)?;
    let index = RepoIndex::fetch(&repo.name, &repo.url)?;
    let source = index
        .find_stack(&reference.stack)
        .ok_or_else(|| AppsodyError::StackNotFound {
            stack: reference.stack.clone(),
            repo: repo.name.clone(),
        })?;
    if source.src.is_empty() {
        return Err(AppsodyError::UserInput(format!(
            "Stack {} in repository {} does not publish a source archive to copy",
            reference.stack, repo.name
        )));
    }

    let archive_path = paths::extract_root(&ctx.home).join(format!("{}.tar.gz", reference.stack));
    download::download_to(&source.src, &archive_path, ctx.dry_run)?;
    if ctx.dry_run {
        tracing::info!("Dry Run - Skipping extract of {} to {}", archive_path.display(), target.display());
        tracing::info!("Dry run complete");
        return Ok(target);
    }

    let extracted = archive::untar(&archive_path, &target, ExtractMode::Full);
    if let Err(e) = std::fs::remove_file(&archive_path) {
        tracing::warn!("Could not remove {}: {e}", archive_path.display());
    }
    if let Err(e) = extracted {
        crate::io::remove_dir_if_exists(&target)?;
        return Err(e);
    }
    tracing::info!("Stack created: {name}");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::write_targz;
    use crate::context::test_support::context;
    use tempfile::TempDir;

    fn seed(ctx: &Context, dir: &TempDir, with_src: bool) {
        let archive = dir.path().join("starter.tar.gz");
        write_targz(
            &archive,
            &[("stack.yaml", "name: Starter\n"), ("templates/simple/hello.sh", "echo hi\n")],
        );
        let src = if with_src {
            format!("  src: {}\n", download::to_file_url(&archive))
        } else {
            String::new()
        };
        let index = dir.path().join("index.yaml");
        std::fs::write(
            &index,
            format!(
                "apiVersion: v2\nstacks:\n- id: starter\n  version: 0.1.0\n  templates:\n  - id: simple\n    url: file:///unused.tar.gz\n{src}"
            ),
        )
        .unwrap();
        let mut repos = RepositoryFile::default();
        repos.add("incubator", &download::to_file_url(&index)).unwrap();
        repos.save_to_home(ctx).unwrap();
    }

    #[test]
    fn creates_from_source_archive() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        seed(&ctx, &dir, true);

        let created = create(&ctx, "my-stack", DEFAULT_COPY).unwrap();
        assert_eq!(created, ctx.project_dir.join("my-stack"));
        assert_eq!(
            std::fs::read_to_string(created.join("templates/simple/hello.sh")).unwrap(),
            "echo hi\n"
        );
        assert!(!paths::extract_root(&ctx.home).join("starter.tar.gz").exists());

        let err = create(&ctx, "my-stack", DEFAULT_COPY).unwrap_err();
        assert!(err.to_string().contains("A stack named my-stack already exists"));
    }

    #[test]
    fn rejects_bad_names_and_missing_sources() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        seed(&ctx, &dir, false);

        assert!(matches!(
            create(&ctx, "My_Stack", DEFAULT_COPY).unwrap_err(),
            AppsodyError::InvalidName { .. }
        ));
        assert!(matches!(
            create(&ctx, "new-stack", "incubator/unknown").unwrap_err(),
            AppsodyError::StackNotFound { .. }
        ));
        let err = create(&ctx, "new-stack", "starter").unwrap_err();
        assert!(err.to_string().contains("does not publish a source archive"));
    }

    #[test]
    fn dry_run_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        seed(&ctx, &dir, true);
        let ctx = ctx.with_dry_run(true);
        let target = create(&ctx, "my-stack", DEFAULT_COPY).unwrap();
        assert!(!target.exists());
    }
}
