//! `appsody stack add-to-repo` and `remove-from-repo`: edit the index of a
//! repository that will be published elsewhere.

use super::manifest::{self, StackYaml};
use crate::context::Context;
use crate::download;
use crate::error::{AppsodyError, Result};
use crate::index::{IndexTemplate, RepoIndex, SUPPORTED_API_VERSION};
use crate::names;
use crate::paths;
use crate::repo::RepositoryFile;
use std::path::{Path, PathBuf};

pub const DEFAULT_RELEASE_URL: &str = "https://github.com/appsody/stacks/releases/download/";

#[derive(Debug, Clone)]
pub struct AddOptions {
    pub repo: String,
    /// Prefix of every template archive URL written to the index.
    pub release_url: String,
    /// Prefer an existing `<repo>-index.yaml` over downloading the remote index.
    pub use_local_cache: bool,
}

impl AddOptions {
    pub fn new(repo: &str) -> Self {
        Self {
            repo: repo.to_string(),
            release_url: DEFAULT_RELEASE_URL.to_string(),
            use_local_cache: false,
        }
    }
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// The index of a remote repository, from the local copy when allowed.
fn remote_or_cached(repo: &str, url: &str, local: &Path, use_local_cache: bool) -> Result<RepoIndex> {
    if use_local_cache && local.exists() {
        tracing::debug!("{} exists and use-local-cache is set", local.display());
        return RepoIndex::load(local);
    }
    tracing::debug!("Downloading the remote index file {url}");
    RepoIndex::fetch(repo, url)
}

/// Fold legacy `projects` into `stacks` so nothing is lost on write.
fn upgrade(index: &mut RepoIndex) {
    let legacy = std::mem::take(&mut index.projects);
    for versions in legacy.into_values() {
        if let Some(stack) = versions.into_iter().next() {
            if index.find_stack(&stack.id).is_none() {
                index.stacks.push(stack);
            }
        }
    }
    index.api_version = SUPPORTED_API_VERSION.to_string();
}

fn write(ctx: &Context, index: &mut RepoIndex, target: &Path) -> Result<()> {
    upgrade(index);
    index.generated = Some(chrono::Utc::now());
    if ctx.dry_run {
        tracing::info!("Dry Run - Skipping write of {}", target.display());
        return Ok(());
    }
    index.save(target).map_err(|e| {
        AppsodyError::UserInput(format!("Error writing {}: {e}", target.display()))
    })
}

pub fn template_entries(stack_dir: &Path, id: &str, version: &str, release_url: &str) -> Result<Vec<IndexTemplate>> {
    Ok(manifest::template_names(stack_dir)?
        .into_iter()
        .map(|name| IndexTemplate {
            url: format!("{release_url}{}", manifest::template_archive_name(id, version, &name)),
            id: name,
            default: false,
        })
        .collect())
}

/// Add (or replace) the stack at `stack_dir` in the index of `opts.repo`.
/// Returns the index file written.
pub fn add_to_repo(ctx: &Context, stack_dir: &Path, opts: &AddOptions) -> Result<PathBuf> {
    tracing::info!("Running appsody stack add-to-repo");
    if !manifest::templates_dir(stack_dir).is_dir() {
        return Err(AppsodyError::UserInput(
            "Unable to reach templates directory. Current directory must be the root of the stack".into(),
        ));
    }
    let id = manifest::stack_id(stack_dir)?;
    names::validate_stack_id(&id)?;
    let repo = opts.repo.as_str();
    let mut target = paths::local_index_file(&ctx.home, repo);

    let repos = RepositoryFile::load_repaired(ctx)?;
    let mut index = match repos.get(repo) {
        Some(entry) if is_remote(&entry.url) => {
            remote_or_cached(repo, &entry.url, &target, opts.use_local_cache)?
        }
        Some(entry) => {
            tracing::debug!("Modifying the local index {} in place", entry.url);
            let index = RepoIndex::fetch(repo, &entry.url)?;
            if let Some(path) = download::file_url_path(&entry.url) {
                target = path;
            }
            index
        }
        None if opts.use_local_cache && target.exists() => RepoIndex::load(&target)?,
        None => {
            tracing::debug!("Creating a new index for {repo}");
            RepoIndex::default()
        }
    };

    let yaml = StackYaml::load(stack_dir)?;
    let templates = template_entries(stack_dir, &id, &yaml.version, &opts.release_url)?;
    let mut entry = super::package::index_entry(&id, "", &yaml, templates);
    if let Some(existing) = index.find_stack(&id) {
        entry.image = existing.image.clone();
        entry.src = existing.src.clone();
    }
    index.upsert_stack(entry);

    if !ctx.dry_run {
        if let Some(parent) = target.parent() {
            crate::io::ensure_dir(parent)?;
        }
    }
    write(ctx, &mut index, &target)?;
    tracing::info!("Repository index file updated successfully: {}", target.display());
    Ok(target)
}

/// Remove `stack` from the index of `repo`. A missing index or stack is
/// reported, not treated as a failure.
pub fn remove_from_repo(ctx: &Context, repo: &str, stack: &str, use_local_cache: bool) -> Result<Option<PathBuf>> {
    tracing::info!("Running appsody stack remove-from-repo");
    let repos = RepositoryFile::load_repaired(ctx)?;
    let Some(entry) = repos.get(repo) else {
        return Err(AppsodyError::UserInput(format!(
            "{repo} does not exist within the repository list"
        )));
    };

    let mut target = paths::local_index_file(&ctx.home, repo);
    let mut index = if is_remote(&entry.url) {
        remote_or_cached(repo, &entry.url, &target, use_local_cache)?
    } else {
        if let Some(path) = download::file_url_path(&entry.url) {
            target = path;
        }
        if !target.exists() {
            tracing::info!("Index file {} does not exist", target.display());
            return Ok(None);
        }
        RepoIndex::load(&target)?
    };

    if !index.remove_stack(stack) && index.projects.remove(stack).is_none() {
        tracing::info!("Stack {stack} does not exist in repository index {}", target.display());
        return Ok(None);
    }
    if !ctx.dry_run {
        if let Some(parent) = target.parent() {
            crate::io::ensure_dir(parent)?;
        }
    }
    write(ctx, &mut index, &target)?;
    tracing::info!("Repository index file updated successfully");
    Ok(Some(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use crate::index::fixtures::{V1_INDEX, V2_INDEX};
    use crate::stack::manifest::test_support::write_stack;
    use tempfile::TempDir;

    fn registry(ctx: &Context, entries: &[(&str, &str)]) {
        let mut repos = RepositoryFile::with_defaults();
        for (name, url) in entries {
            repos.add(name, url).unwrap();
        }
        repos.save_to_home(ctx).unwrap();
    }

    #[test]
    fn unknown_repo_gets_a_new_index() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        registry(&ctx, &[]);
        let stack = write_stack(dir.path());

        let mut opts = AddOptions::new("myrepo");
        opts.release_url = "https://example.com/releases/".into();
        let written = add_to_repo(&ctx, &stack, &opts).unwrap();
        assert_eq!(written, paths::local_index_file(&ctx.home, "myrepo"));

        let index = RepoIndex::load(&written).unwrap();
        assert_eq!(index.api_version, "v2");
        let entry = index.find_stack("sample-stack").unwrap();
        assert_eq!(entry.version, "0.1.0");
        assert_eq!(
            entry.template("simple").unwrap().url,
            "https://example.com/releases/sample-stack.v0.1.0.templates.simple.tar.gz"
        );
    }

    #[test]
    fn remote_repo_is_downloaded_then_cached() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/index.yaml")
            .with_body(V2_INDEX)
            .expect(1)
            .create();
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let url = format!("{}/index.yaml", server.url());
        registry(&ctx, &[("remote", &url)]);
        let stack = write_stack(dir.path());

        let written = add_to_repo(&ctx, &stack, &AddOptions::new("remote")).unwrap();
        let index = RepoIndex::load(&written).unwrap();
        assert!(index.find_stack("nodejs-express").is_some());
        assert!(index.find_stack("sample-stack").is_some());

        let mut opts = AddOptions::new("remote");
        opts.use_local_cache = true;
        add_to_repo(&ctx, &stack, &opts).unwrap();
        mock.assert();
    }

    #[test]
    fn file_repo_is_edited_in_place_and_upgraded() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let index_path = dir.path().join("legacy-index.yaml");
        std::fs::write(&index_path, V1_INDEX).unwrap();
        registry(&ctx, &[("legacy", &download::to_file_url(&index_path))]);
        let stack = write_stack(dir.path());

        let written = add_to_repo(&ctx, &stack, &AddOptions::new("legacy")).unwrap();
        assert_eq!(written, index_path);
        let index = RepoIndex::load(&index_path).unwrap();
        assert_eq!(index.api_version, "v2");
        assert!(index.projects.is_empty());
        assert!(index.stacks.iter().any(|s| s.id == "sample-stack"));
        assert!(index.stacks.len() > 1);
    }

    #[test]
    fn remove_reports_missing_pieces() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let index_path = dir.path().join("local-index.yaml");
        registry(&ctx, &[("local", &download::to_file_url(&index_path))]);

        let err = remove_from_repo(&ctx, "nope", "x", false).unwrap_err();
        assert!(err.to_string().contains("nope does not exist within the repository list"));
        assert_eq!(remove_from_repo(&ctx, "local", "x", false).unwrap(), None);

        std::fs::write(&index_path, V2_INDEX).unwrap();
        assert_eq!(remove_from_repo(&ctx, "local", "missing", false).unwrap(), None);
        assert_eq!(
            remove_from_repo(&ctx, "local", "nodejs-express", false).unwrap(),
            Some(index_path.clone())
        );
        let index = RepoIndex::load(&index_path).unwrap();
        assert!(index.find_stack("nodejs-express").is_none());
    }

    #[test]
    fn dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        registry(&ctx, &[]);
        let ctx = ctx.with_dry_run(true);
        let stack = write_stack(dir.path());
        let written = add_to_repo(&ctx, &stack, &AddOptions::new("myrepo")).unwrap();
        assert!(!written.exists());
    }
}
