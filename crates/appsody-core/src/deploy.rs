//! `appsody deploy`: keep `app-deploy.yaml` in step with the project, build
//! the image and apply the manifest to the cluster.

use crate::build::{self, BuildOptions};
use crate::cluster;
use crate::container::{self, Engine, ImageConfig};
use crate::context::Context;
use crate::error::{AppsodyError, Result};
use crate::exec::{self, LogTarget, StreamOptions};
use crate::labels;
use crate::manifests::{self, AppsodyApplication, EnvVar, KnativeService};
use crate::names;
use crate::operator;
use crate::paths::{self, CONTAINER_APP_DEPLOY_PATH, DEV_LOCAL};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Deployment manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub file: PathBuf,
    /// Image written into `applicationImage`; the existing value is kept when unset.
    pub tag: Option<String>,
    pub pull_url: Option<String>,
    pub knative: bool,
    /// Extra env vars for the application, typically from `--docker-options`.
    pub env: BTreeMap<String, String>,
}

/// Where the manifest came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// The file already existed and was updated in place.
    Existing,
    /// Copied from the stack image's template.
    Stack,
    /// The stack ships no template; a default document was written.
    Generated,
}

/// Port the deployed service listens on: the stack's `PORT`, else its first
/// exposed port, else 0.
pub fn service_port(cfg: &ImageConfig) -> u16 {
    if let Some(port) = cfg.env("PORT").and_then(|p| p.trim().parse().ok()) {
        return port;
    }
    if cfg.exposed_ports.len() > 1 {
        tracing::warn!(
            "The stack image exposes more than one port: {}. Using {}",
            cfg.exposed_ports.join(", "),
            cfg.exposed_ports[0]
        );
    }
    match cfg.exposed_ports.first().and_then(|p| p.parse().ok()) {
        Some(port) => {
            tracing::warn!("The stack image does not set PORT; using the first exposed port {port}");
            port
        }
        None => {
            tracing::warn!("The stack image does not expose any ports");
            0
        }
    }
}

/// Create `app-deploy.yaml` from the stack, or update it when it exists.
pub fn generate_config(ctx: &Context, opts: &ConfigOptions) -> Result<ConfigSource> {
    if opts.file.exists() {
        update_config(ctx, opts)?;
        return Ok(ConfigSource::Existing);
    }

    let project = ctx.project_config()?;
    let project_name = ctx.project_name()?;
    let image = project.stack_image()?;
    container::pull(ctx, &image)?;
    let port = service_port(&container::inspect(ctx, &image)?);

    let copied = copy_stack_config(ctx, &image, &project_name, &opts.file)?;
    if ctx.dry_run {
        tracing::info!("Dry run skipped construction of file {}", opts.file.display());
        return Ok(if copied {
            ConfigSource::Stack
        } else {
            ConfigSource::Generated
        });
    }

    let local_image = format!("{DEV_LOCAL}/{project_name}");
    let stack_id = names::stack_id_from_image(&image);
    let source = if copied {
        let template = std::fs::read_to_string(&opts.file)?;
        let port = port.to_string();
        let text = manifests::substitute(
            &template,
            &[
                ("APPSODY_PROJECT_NAME", &project_name),
                ("APPSODY_DOCKER_IMAGE", &local_image),
                ("APPSODY_STACK", &stack_id),
                ("APPSODY_PORT", &port),
            ],
        );
        crate::io::atomic_write(&opts.file, text.as_bytes())?;
        ConfigSource::Stack
    } else {
        tracing::warn!(
            "The stack image does not contain {CONTAINER_APP_DEPLOY_PATH}; generating a default deployment manifest"
        );
        AppsodyApplication::generated(&project_name, &local_image, &stack_id, port).save(&opts.file)?;
        ConfigSource::Generated
    };

    update_config(ctx, opts)?;
    tracing::info!("Created deployment manifest: {}", opts.file.display());
    Ok(source)
}

/// Copy the stack's template out of the image. `false` when the stack ships none.
fn copy_stack_config(ctx: &Context, image: &str, project_name: &str, file: &Path) -> Result<bool> {
    let name = crate::extract::default_container_name(project_name);
    container::create(ctx, &name, image, &[])?;

    let target = paths::to_slash(file);
    let copied = match ctx.engine {
        Engine::Docker => container::cp(ctx, &format!("{name}:{CONTAINER_APP_DEPLOY_PATH}"), &target),
        Engine::Buildah => {
            let script = format!("x=`buildah mount {name}`; cp -f $x{CONTAINER_APP_DEPLOY_PATH} {target}");
            let res = exec::stream(
                "/bin/sh",
                &["-c".to_string(), script],
                &StreamOptions::new(LogTarget::Buildah, ctx.dry_run),
            )?;
            if res.success() {
                Ok(())
            } else {
                Err(AppsodyError::ContainerEngine {
                    op: "buildah mount / copy".into(),
                    message: res.stderr.trim().to_string(),
                })
            }
        }
    };
    if let Err(e) = container::remove(ctx, &name, false) {
        tracing::error!("containerRemove error {e}");
    }

    match copied {
        Ok(()) => Ok(true),
        Err(AppsodyError::ContainerEngine { message, .. }) => {
            tracing::debug!("No deployment template in {image}: {message}");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn merge_env(env: &mut Vec<EnvVar>, extra: &BTreeMap<String, String>) {
    for (name, value) in extra {
        match env.iter_mut().find(|e| &e.name == name) {
            Some(existing) => existing.value = value.clone(),
            None => env.push(EnvVar {
                name: name.clone(),
                value: value.clone(),
            }),
        }
    }
}

/// `pullURL/<image without registry>`.
pub fn pull_image(pull_url: &str, image: &str) -> String {
    format!("{}/{}", pull_url.trim_end_matches('/'), names::strip_registry(image))
}

/// Refresh labels, image, knative flag and env of an existing manifest.
pub fn update_config(ctx: &Context, opts: &ConfigOptions) -> Result<()> {
    let mut app = AppsodyApplication::load(&opts.file)?;
    let (kube_labels, annotations) = labels::kube_metadata(&labels::project_labels(ctx)?);
    app.metadata.labels.extend(kube_labels);
    app.metadata.annotations.extend(annotations);
    app.spec.create_knative_service = Some(opts.knative);
    if let Some(tag) = opts.tag.as_deref().filter(|t| !t.is_empty()) {
        app.spec.application_image = tag.to_string();
    }
    if let Some(url) = opts.pull_url.as_deref().filter(|u| !u.is_empty()) {
        app.spec.application_image = pull_image(url, &app.spec.application_image);
    }
    merge_env(&mut app.spec.env, &opts.env);

    if ctx.dry_run {
        tracing::info!("Dry Run - Skipping write of {}", opts.file.display());
        return Ok(());
    }
    app.save(&opts.file)
}

// ---------------------------------------------------------------------------
// Deploy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub build: BuildOptions,
    pub namespace: String,
    pub generate_only: bool,
    /// Regenerate the manifest even when it exists.
    pub force: bool,
}

impl DeployOptions {
    pub fn new() -> Self {
        Self {
            build: BuildOptions::new(),
            namespace: "default".into(),
            generate_only: false,
            force: false,
        }
    }
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Image path after the registry host when there is more than one `/`.
pub fn image_suffix(image: &str) -> &str {
    if image.matches('/').count() > 1 {
        image.split_once('/').map(|(_, rest)| rest).unwrap_or(image)
    } else {
        image
    }
}

fn config_options(ctx: &Context, opts: &DeployOptions, file: &Path) -> ConfigOptions {
    let docker_options = container::split_options(&opts.build.docker_options);
    ConfigOptions {
        file: file.to_path_buf(),
        tag: opts.build.tag.clone(),
        pull_url: opts.build.pull_url.clone(),
        knative: opts.build.knative,
        env: container::env_from_options(&docker_options, &ctx.project_dir),
    }
}

/// Remove a manifest the caller asked to regenerate.
fn discard(ctx: &Context, file: &Path) -> Result<()> {
    if ctx.dry_run {
        tracing::info!("Dry Run - Skipping removal of {}", file.display());
        return Ok(());
    }
    if file.exists() {
        tracing::debug!("Removing existing deployment manifest {}", file.display());
        std::fs::remove_file(file)?;
    }
    Ok(())
}

pub fn deploy(ctx: &Context, opts: &DeployOptions) -> Result<()> {
    let file = paths::app_deploy_path(&ctx.project_dir, &opts.build.app_deploy_file);
    let config = config_options(ctx, opts, &file);

    if opts.generate_only {
        if file.exists() && !opts.force {
            return Err(AppsodyError::UserInput(format!(
                "Error, deploy config file {} already exists. Specify an alternative file using --file or use --force to overwrite it.",
                file.display()
            )));
        }
        if opts.force {
            discard(ctx, &file)?;
        }
        generate_config(ctx, &config)?;
        return Ok(());
    }

    let mut source = ConfigSource::Existing;
    if !file.exists() || opts.force {
        if opts.force {
            discard(ctx, &file)?;
        }
        source = generate_config(ctx, &config)?;
    }
    if source == ConfigSource::Generated && opts.build.knative {
        return deploy_knative(ctx, opts, &file);
    }

    operator::ensure(ctx, &opts.namespace)?;

    let project_name = ctx.project_name()?;
    let current = if file.exists() {
        Some(AppsodyApplication::load(&file)?)
    } else {
        None
    };
    let current_image = current
        .as_ref()
        .map(|a| a.spec.application_image.clone())
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| format!("{DEV_LOCAL}/{project_name}"));
    let image = opts
        .build
        .tag
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or(current_image);
    let suffix = image_suffix(&image).to_string();
    let deploy_image = match opts.build.pull_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => format!("{}/{suffix}", url.trim_end_matches('/')),
        None => image.clone(),
    };

    let push_url = opts.build.push_url.as_deref().filter(|u| !u.is_empty());
    if opts.build.push || push_url.is_some() {
        let push_path = match push_url {
            Some(url) => format!("{}/{suffix}", url.trim_end_matches('/')),
            None => suffix.clone(),
        };
        if push_path.starts_with(DEV_LOCAL) {
            tracing::warn!(
                "The image {push_path} is pushed to {DEV_LOCAL}; the cluster will only find it if it shares the local image store"
            );
        }
    }

    let mut build_opts = opts.build.clone();
    build_opts.tag = Some(suffix);
    build::build(ctx, &build_opts)?;

    if ctx.dry_run {
        tracing::info!("Dry Run - Skipping update of applicationImage in {}", file.display());
    } else {
        let mut app = AppsodyApplication::load(&file)?;
        app.spec.application_image = deploy_image;
        app.spec.create_knative_service = Some(opts.build.knative);
        app.save(&file)?;
    }

    cluster::apply(ctx, &file, &opts.namespace)?;
    tracing::info!("Deployment succeeded.");
    let name = current
        .map(|a| a.metadata.name)
        .filter(|n| !n.is_empty())
        .unwrap_or(project_name);
    tracing::info!("Appsody Deployment name is: {name}");
    report_url(ctx, &name, &opts.namespace)
}

fn report_url(ctx: &Context, service: &str, namespace: &str) -> Result<()> {
    let url = cluster::deployment_url(ctx, service, namespace)?;
    if ctx.dry_run {
        tracing::info!("Dry run complete");
    } else {
        tracing::info!("Deployed project running at {url}");
    }
    Ok(())
}

/// Deploy a plain Knative service for stacks that ship no deployment template.
fn deploy_knative(ctx: &Context, opts: &DeployOptions, file: &Path) -> Result<()> {
    let project_name = ctx.project_name()?;
    let pushed = opts.build.push || opts.build.push_url.as_deref().is_some_and(|u| !u.is_empty());
    let image = match opts.build.tag.as_deref().filter(|t| !t.is_empty()) {
        Some(tag) => tag.to_string(),
        None if pushed => project_name.clone(),
        None => format!("{DEV_LOCAL}/{project_name}"),
    };

    let mut build_opts = opts.build.clone();
    build_opts.tag = Some(image);
    build_opts.skip_deploy_config = true;
    let built = build::build(ctx, &build_opts)?;

    let stack_image = ctx.project_config()?.stack_image()?;
    let port = service_port(&container::inspect(ctx, &stack_image)?);
    let image = match opts.build.pull_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => pull_image(url, &built),
        None => built,
    };

    let service = KnativeService::new(&project_name, &image, port, pushed)?;
    let yaml = service.to_yaml()?;
    tracing::debug!("Generated Knative service:\n{yaml}");
    if ctx.dry_run {
        tracing::info!("Dry Run - Skipping write of {}", file.display());
    } else {
        crate::io::atomic_write(file, yaml.as_bytes())?;
    }

    cluster::apply(ctx, file, &opts.namespace)?;
    tracing::info!("Deployment succeeded.");
    report_url(ctx, &project_name, &opts.namespace)
}

/// `appsody deploy delete`.
pub fn delete(ctx: &Context, file: &Path, namespace: &str) -> Result<()> {
    if !ctx.dry_run && !file.exists() {
        return Err(AppsodyError::UserInput(format!(
            "Cannot delete deployment. Deployment manifest not found: {}",
            file.display()
        )));
    }
    tracing::info!("Deleting deployment using deployment manifest {}", file.display());
    cluster::delete(ctx, file, namespace)?;
    tracing::info!("Deployment deleted");
    Ok(())
}
