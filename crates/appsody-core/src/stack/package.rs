//! `appsody stack package`: build the stack image, archive every template and
//! publish both through the local `dev.local` repository.

use super::manifest::{self, StackYaml};
use crate::container::{self, BuildSpec};
use crate::context::Context;
use crate::download;
use crate::error::{AppsodyError, Result};
use crate::git;
use crate::index::{IndexStack, IndexTemplate, RepoIndex};
use crate::labels::{self, Description, Labels, IMAGE_COMMIT_PREFIX, OCI_PREFIX, STACK_PREFIX};
use crate::names;
use crate::paths;
use crate::repo::RepositoryFile;
use chrono::Local;
use std::path::{Path, PathBuf};

pub const DEFAULT_IMAGE_NAMESPACE: &str = paths::DEV_LOCAL;

#[derive(Debug, Clone)]
pub struct PackageOptions {
    pub image_namespace: String,
    /// Registry host prefixed to the image; none keeps the image local.
    pub image_registry: Option<String>,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            image_namespace: DEFAULT_IMAGE_NAMESPACE.to_string(),
            image_registry: None,
        }
    }
}

/// What `package` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packaged {
    pub stack_id: String,
    pub image: String,
    pub index_file: PathBuf,
}

/// `[registry/]namespace/id:version`.
pub fn image_name(opts: &PackageOptions, id: &str, version: &str) -> String {
    let namespace = opts.image_namespace.trim_matches('/');
    let image = format!("{namespace}/{id}:{version}");
    match opts.image_registry.as_deref().map(|r| r.trim_end_matches('/')) {
        Some(registry) if !registry.is_empty() => format!("{registry}/{image}"),
        _ => image,
    }
}

/// Git labels re-pointed at the stack's README and image directory.
fn stack_git_labels(stack_dir: &Path) -> Labels {
    let (info, err) = git::info(stack_dir);
    if let Some(e) = err {
        tracing::info!("{e}");
        if info.commit.sha.is_empty() && info.remote_url.is_empty() {
            return Labels::new();
        }
    }
    let mut git = labels::git_labels(&info);
    let source_key = format!("{OCI_PREFIX}source");
    if let Some(mut branch_url) = git.get(&source_key).cloned() {
        if let Some(context_dir) = git.get(&format!("{IMAGE_COMMIT_PREFIX}contextDir")) {
            branch_url.push_str(context_dir);
            git.insert(format!("{OCI_PREFIX}url"), branch_url.clone());
        }
        git.insert(
            format!("{OCI_PREFIX}documentation"),
            format!("{branch_url}/README.md"),
        );
        git.insert(source_key, format!("{branch_url}/image"));
    }
    git
}

pub fn stack_labels(stack_dir: &Path, id: &str, image: &str, yaml: &StackYaml) -> Result<Labels> {
    let desc = Description {
        title: yaml.name.clone(),
        version: yaml.version.clone(),
        description: yaml.description.clone(),
        license: yaml.license.clone(),
        maintainers: yaml.maintainers.clone(),
        ..Description::default()
    };
    let mut labels = stack_git_labels(stack_dir);
    labels.extend(labels::config_labels(&desc, Local::now())?);
    labels.insert(format!("{STACK_PREFIX}id"), id.to_string());
    labels.insert(format!("{STACK_PREFIX}tag"), image.to_string());
    Ok(labels)
}

/// Archive each template with a config pinning `image`. Returns the index
/// entries pointing at the archives through `file://` URLs.
pub fn archive_templates(
    stack_dir: &Path,
    yaml: &StackYaml,
    id: &str,
    image: &str,
    out_dir: &Path,
) -> Result<Vec<IndexTemplate>> {
    let mut templates = Vec::new();
    for name in manifest::template_names(stack_dir)? {
        let source = manifest::templates_dir(stack_dir).join(&name);
        let archive = out_dir.join(manifest::template_archive_name(id, &yaml.version, &name));
        let config = format!("stack: {image}\n");

        tracing::info!("Creating tar for: {name}");
        crate::archive::create_targz(
            &source,
            &archive,
            &[(paths::PROJECT_CONFIG_FILE, config.as_bytes())],
        )?;

        templates.push(IndexTemplate {
            id: name,
            url: download::to_file_url(&archive),
            default: false,
        });
    }
    Ok(templates)
}

pub fn index_entry(id: &str, image: &str, yaml: &StackYaml, templates: Vec<IndexTemplate>) -> IndexStack {
    IndexStack {
        id: id.to_string(),
        name: yaml.name.clone(),
        version: yaml.version.clone(),
        description: yaml.description.clone(),
        license: yaml.license.clone(),
        language: yaml.language.clone(),
        maintainers: yaml.maintainers.clone(),
        default_template: yaml.default_template.clone(),
        templates,
        requirements: yaml.requirements.clone(),
        image: image.to_string(),
        ..IndexStack::default()
    }
}

/// Point `dev.local` at `index_file`, dropping any entry that gets in the way.
pub fn register_dev_local(repos: &mut RepositoryFile, index_file: &Path) -> Result<bool> {
    let url = download::to_file_url(index_file);
    let name = paths::DEV_LOCAL;
    if repos.get(name).is_some_and(|r| r.url == url) {
        return Ok(false);
    }
    if repos.has(name) {
        tracing::info!("Appsody repo {name} is configured with the wrong URL. Deleting and recreating it.");
        repos.remove_unchecked(name);
    }
    let clashing: Vec<String> = repos
        .repositories
        .iter()
        .filter(|r| r.url == url)
        .map(|r| r.name.clone())
        .collect();
    for other in clashing {
        tracing::info!("Appsody repo {other} is configured with {name}'s URL. Deleting it to setup {name}.");
        repos.remove_unchecked(&other);
    }
    tracing::info!("Creating {name} repository");
    repos.add(name, &url)?;
    repos.ensure_default();
    Ok(true)
}

pub fn package(ctx: &Context, stack_dir: &Path, opts: &PackageOptions) -> Result<Packaged> {
    tracing::info!("Running appsody stack package");
    if !manifest::templates_dir(stack_dir).is_dir() {
        return Err(AppsodyError::UserInput(
            "Unable to reach templates directory. Current directory must be the root of the stack".into(),
        ));
    }
    let id = manifest::stack_id(stack_dir)?;
    names::validate_stack_id(&id)?;
    let yaml = StackYaml::load(stack_dir)?;
    let image = image_name(opts, &id, &yaml.version);

    let dev_local = paths::dev_local_dir(&ctx.home);
    let index_file = paths::local_index_file(&ctx.home, paths::DEV_LOCAL);
    tracing::debug!("Local index file is {}", index_file.display());

    let image_dir = stack_dir.join(manifest::IMAGE_DIR);
    let labels = stack_labels(stack_dir, &id, &image, &yaml)?;
    let spec = BuildSpec {
        tag: image.clone(),
        dockerfile: manifest::dockerfile_stack(stack_dir),
        context: image_dir,
        labels: labels::label_args(&labels),
        options: Vec::new(),
    };
    tracing::info!("Running {} build", ctx.engine.program());
    container::build(ctx, &spec)?;

    let packaged = Packaged {
        stack_id: id.clone(),
        image: image.clone(),
        index_file: index_file.clone(),
    };
    if ctx.dry_run {
        tracing::info!(
            "Dry Run - Skipping template archives and index update in {}",
            dev_local.display()
        );
        return Ok(packaged);
    }

    crate::io::ensure_dir(&dev_local)?;
    let mut index = if index_file.exists() {
        RepoIndex::load(&index_file)?
    } else {
        RepoIndex::default()
    };
    let templates = archive_templates(stack_dir, &yaml, &id, &image, &dev_local)?;
    index.upsert_stack(index_entry(&id, &image, &yaml, templates));
    index.generated = Some(chrono::Utc::now());
    tracing::info!("Writing: {}", index_file.display());
    index.save(&index_file)?;

    let mut repos = RepositoryFile::load_repaired(ctx)?;
    if register_dev_local(&mut repos, &index_file)? {
        repos.save_to_home(ctx).map_err(|e| {
            AppsodyError::UserInput(format!(
                "Error adding local repository. Your stack may not be available to appsody commands. {e}"
            ))
        })?;
    }
    tracing::info!("Your local stack is available as part of repo {}", paths::DEV_LOCAL);
    Ok(packaged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use crate::stack::manifest::test_support::{write_stack, STACK_YAML};
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn entries(archive: &Path) -> Vec<(String, String)> {
        let file = std::fs::File::open(archive).unwrap();
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        let mut out = Vec::new();
        for entry in tar.entries().unwrap() {
            let mut entry = entry.unwrap();
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path().unwrap().to_string_lossy().trim_start_matches("./").to_string();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            out.push((path, body));
        }
        out.sort();
        out
    }

    #[test]
    fn image_names() {
        let mut opts = PackageOptions::default();
        assert_eq!(image_name(&opts, "nodejs", "0.3.1"), "dev.local/nodejs:0.3.1");
        opts.image_namespace = "appsody".into();
        opts.image_registry = Some("quay.io/".into());
        assert_eq!(image_name(&opts, "nodejs", "0.3.1"), "quay.io/appsody/nodejs:0.3.1");
    }

    #[test]
    fn labels_identify_the_stack() {
        let dir = TempDir::new().unwrap();
        let stack = write_stack(dir.path());
        let yaml = StackYaml::parse(STACK_YAML).unwrap();
        let labels = stack_labels(&stack, "sample-stack", "dev.local/sample-stack:0.1.0", &yaml).unwrap();
        assert_eq!(labels["dev.appsody.stack.id"], "sample-stack");
        assert_eq!(labels["dev.appsody.stack.tag"], "dev.local/sample-stack:0.1.0");
        assert_eq!(labels["org.opencontainers.image.title"], "Sample Stack");
        assert_eq!(labels["org.opencontainers.image.version"], "0.1.0");
        assert_eq!(
            labels["org.opencontainers.image.authors"],
            "Jane Doe <jane@example.com>"
        );
    }

    #[test]
    fn templates_are_archived_with_a_pinned_config() {
        let dir = TempDir::new().unwrap();
        let stack = write_stack(dir.path());
        let yaml = StackYaml::parse(STACK_YAML).unwrap();
        let out = dir.path().join("out");
        let templates =
            archive_templates(&stack, &yaml, "sample-stack", "dev.local/sample-stack:0.1.0", &out)
                .unwrap();

        assert_eq!(templates.len(), 2);
        assert_eq!(templates[1].id, "simple");
        let archive = out.join("sample-stack.v0.1.0.templates.simple.tar.gz");
        assert_eq!(templates[1].url, download::to_file_url(&archive));
        assert_eq!(
            entries(&archive),
            vec![
                (".appsody-config.yaml".to_string(), "stack: dev.local/sample-stack:0.1.0\n".to_string()),
                ("app.js".to_string(), "console.log('hi')\n".to_string()),
            ]
        );
        assert!(!stack.join("templates/simple/.appsody-config.yaml").exists());
    }

    #[test]
    fn existing_template_config_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let stack = write_stack(dir.path());
        let existing = stack.join("templates/simple/.appsody-config.yaml");
        std::fs::write(&existing, "stack: mine\n").unwrap();
        let yaml = StackYaml::parse(STACK_YAML).unwrap();
        let out = dir.path().join("out");
        archive_templates(&stack, &yaml, "sample-stack", "dev.local/sample-stack:0.1.0", &out)
            .unwrap();

        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "stack: mine\n");
        let archive = out.join("sample-stack.v0.1.0.templates.simple.tar.gz");
        let configs: Vec<_> = entries(&archive)
            .into_iter()
            .filter(|(path, _)| path == ".appsody-config.yaml")
            .collect();
        assert_eq!(
            configs,
            vec![(".appsody-config.yaml".to_string(), "stack: dev.local/sample-stack:0.1.0\n".to_string())]
        );
    }

    #[test]
    fn dev_local_is_registered_once() {
        let mut repos = RepositoryFile::with_defaults();
        let index = Path::new("/home/me/.appsody/stacks/dev.local/dev.local-index.yaml");
        assert!(register_dev_local(&mut repos, index).unwrap());
        assert!(!register_dev_local(&mut repos, index).unwrap());
        assert_eq!(repos.get("dev.local").unwrap().url, download::to_file_url(index));

        repos.remove_unchecked("dev.local");
        repos.add("mine", &download::to_file_url(index)).unwrap();
        assert!(register_dev_local(&mut repos, index).unwrap());
        assert!(!repos.has("mine"));
        assert_eq!(repos.default_name(), Some("incubator"));
    }

    #[test]
    fn dry_run_leaves_home_untouched() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).with_dry_run(true);
        let stack = write_stack(dir.path());
        let packaged = package(&ctx, &stack, &PackageOptions::default()).unwrap();
        assert_eq!(packaged.image, "dev.local/sample-stack:0.1.0");
        assert!(!packaged.index_file.exists());
        assert!(!paths::dev_local_dir(&ctx.home).exists());
    }

    #[test]
    fn requires_templates() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).with_dry_run(true);
        let stack = write_stack(dir.path());
        std::fs::remove_dir_all(stack.join("templates")).unwrap();
        let err = package(&ctx, &stack, &PackageOptions::default()).unwrap_err();
        assert!(err.to_string().contains("Unable to reach templates directory"));
    }
}
