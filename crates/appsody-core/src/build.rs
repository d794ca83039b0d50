//! `appsody build`: extract the project, build the application image with
//! the stack's labels, optionally push it, then refresh `app-deploy.yaml`.

use crate::container::{self, BuildSpec, Engine};
use crate::context::Context;
use crate::deploy::{self, ConfigOptions};
use crate::error::{AppsodyError, Result};
use crate::extract::{self, ExtractOptions};
use crate::labels;
use crate::paths;
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Image tag; defaults to the project name.
    pub tag: Option<String>,
    pub push: bool,
    /// Registry prefixed to the tag; implies a push.
    pub push_url: Option<String>,
    /// Registry the cluster pulls from, written into `app-deploy.yaml`.
    pub pull_url: Option<String>,
    pub docker_options: String,
    pub buildah_options: String,
    pub knative: bool,
    /// Deployment manifest to create or update, relative to the project.
    pub app_deploy_file: String,
    /// Skip the deployment manifest entirely.
    pub skip_deploy_config: bool,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self {
            app_deploy_file: paths::APP_DEPLOY_FILE.to_string(),
            ..Self::default()
        }
    }
}

fn check_flags(engine: Engine, opts: &BuildOptions) -> Result<()> {
    if engine == Engine::Buildah && !opts.docker_options.trim().is_empty() {
        return Err(AppsodyError::UserInput(
            "Cannot specify --docker-options flag with --buildah".into(),
        ));
    }
    if engine != Engine::Buildah && !opts.buildah_options.trim().is_empty() {
        return Err(AppsodyError::UserInput(
            "Cannot specify --buildah-options flag without --buildah".into(),
        ));
    }
    Ok(())
}

/// The tag the image is built under: `--tag` or the project name, with
/// `--push-url` prepended.
pub fn image_tag(project_name: &str, opts: &BuildOptions) -> String {
    let tag = opts
        .tag
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(project_name);
    match opts.push_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => format!("{}/{tag}", url.trim_end_matches('/')),
        None => tag.to_string(),
    }
}

/// Assemble the image build without running it.
pub fn plan(ctx: &Context, opts: &BuildOptions, context_dir: PathBuf) -> Result<BuildSpec> {
    check_flags(ctx.engine, opts)?;
    let raw_options = match ctx.engine {
        Engine::Docker => &opts.docker_options,
        Engine::Buildah => &opts.buildah_options,
    };
    let options = container::build_options(raw_options)?;
    if !raw_options.trim().is_empty() {
        tracing::debug!("User provided build options: \"{}\"", raw_options.trim());
    }
    let labels = labels::project_labels(ctx)?;

    Ok(BuildSpec {
        tag: image_tag(&ctx.project_name()?, opts),
        dockerfile: context_dir.join("Dockerfile"),
        context: context_dir,
        labels: labels::label_args(&labels),
        options,
    })
}

/// Build (and optionally push) the application image. Returns its tag.
pub fn build(ctx: &Context, opts: &BuildOptions) -> Result<String> {
    check_flags(ctx.engine, opts)?;
    let project_name = ctx.project_name()?;
    let scratch = paths::extract_dir(&ctx.home, &project_name);

    let built = extract::extract(ctx, &ExtractOptions::default())
        .and_then(|dir| build_extracted(ctx, opts, dir));
    if !ctx.dry_run {
        if let Err(e) = crate::io::remove_dir_if_exists(&scratch) {
            tracing::warn!("Could not remove {}: {e}", scratch.display());
        }
    }
    let tag = built?;

    if !opts.skip_deploy_config {
        deploy::generate_config(
            ctx,
            &ConfigOptions {
                file: paths::app_deploy_path(&ctx.project_dir, &opts.app_deploy_file),
                tag: Some(tag.clone()),
                pull_url: opts.pull_url.clone(),
                knative: opts.knative,
                ..ConfigOptions::default()
            },
        )?;
    }
    Ok(tag)
}

fn build_extracted(ctx: &Context, opts: &BuildOptions, dir: PathBuf) -> Result<String> {
    let spec = plan(ctx, opts, dir)?;
    tracing::info!("Running {} build", ctx.engine.program());
    container::build(ctx, &spec)?;

    if opts.push || opts.push_url.as_deref().is_some_and(|u| !u.is_empty()) {
        container::push(ctx, &spec.tag).map_err(|e| {
            AppsodyError::UserInput(format!(
                "Could not push the docker image - exiting. Error: {e}"
            ))
        })?;
    }
    if !ctx.dry_run {
        tracing::info!("Built docker image {}", spec.tag);
    }
    Ok(spec.tag)
}
