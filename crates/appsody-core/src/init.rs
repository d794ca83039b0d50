//! `appsody init`: resolve a stack reference, lay its template down and set
//! up the project.

use crate::config::ProjectConfig;
use crate::container::{self, Engine};
use crate::context::Context;
use crate::error::{AppsodyError, Result};
use crate::exec::{self, LogTarget, StreamOptions};
use crate::extract::{self, ExtractOptions};
use crate::names;
use crate::paths;
use crate::reference::{self, NO_TEMPLATE};
use crate::repo::RepositoryFile;
use crate::requirements;
use crate::template::{self, InstallOptions};

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// `[repo/]stack`; `None` re-runs setup on an existing project.
    pub stack: Option<String>,
    pub template: Option<String>,
    pub overwrite: bool,
    pub no_template: bool,
    pub project_name: Option<String>,
    pub application_name: Option<String>,
    pub stack_registry: Option<String>,
}

fn validate(opts: &InitOptions) -> Result<()> {
    if let Some(name) = &opts.project_name {
        names::validate_project_name(name)?;
    }
    if let Some(name) = &opts.application_name {
        names::validate_label_value(name)?;
    }
    if let Some(host) = &opts.stack_registry {
        names::validate_host_and_port(host)?;
    }
    let explicit_template = opts
        .template
        .as_deref()
        .is_some_and(|t| !t.is_empty() && t != NO_TEMPLATE);
    if opts.no_template && explicit_template {
        return Err(AppsodyError::UserInput(
            "cannot specify `appsody init <stack> <template>` with both a template and --no-template".into(),
        ));
    }
    Ok(())
}

pub fn init(ctx: &Context, opts: &InitOptions) -> Result<()> {
    if opts.no_template {
        tracing::warn!(
            "The --no-template flag has been deprecated.  Please specify a template value of \"none\" instead."
        );
    }
    validate(opts)?;

    let Some(stack) = opts.stack.as_deref() else {
        ctx.project_config()?;
        install(ctx, opts)?;
        tracing::info!("Successfully initialized Appsody project");
        return Ok(());
    };

    let repos = RepositoryFile::load_repaired(ctx)?;
    if paths::project_config_path(&ctx.project_dir).exists() {
        return Err(AppsodyError::UserInput(
            "cannot run `appsody init <stack>` on an existing appsody project".into(),
        ));
    }

    let resolved = reference::resolve(&repos, stack, opts.template.as_deref(), opts.no_template)?;
    tracing::debug!(
        "Resolved {stack} to template {} of {} in repository {}",
        resolved.template.id,
        resolved.stack.id,
        resolved.repo
    );
    requirements::check(&resolved.stack.requirements, ctx.engine)?;

    if !opts.overwrite && !resolved.no_template {
        if let Err(e) = template::check_laydown_safe(&ctx.project_dir) {
            tracing::error!("Non-empty directory found with files which may conflict with the template project.");
            tracing::info!("It is recommended that you run `appsody init <stack>` in an empty directory.");
            tracing::info!("If you wish to proceed and possibly overwrite files in the current directory, try again with the --overwrite option.");
            return Err(e);
        }
    }

    tracing::info!("Running appsody init...");
    tracing::info!(
        "Downloading {} template project from {}",
        resolved.stack.id,
        resolved.template.url
    );
    let install_opts = InstallOptions {
        overwrite: opts.overwrite,
        no_template: resolved.no_template,
        dry_run: ctx.dry_run,
    };
    template::install(&resolved.template.url, &resolved.stack.id, &ctx.project_dir, install_opts)
        .map_err(|e| {
            if matches!(e, AppsodyError::ConflictsExist(_)) {
                tracing::info!("It is recommended that you run `appsody init <stack>` in an empty directory.");
                tracing::info!("If you wish to proceed and overwrite files in the current directory, try again with the --overwrite option.");
            }
            e
        })?;

    if !ctx.dry_run && !paths::project_config_path(&ctx.project_dir).exists() {
        materialize_config(ctx, &resolved.stack.image, &resolved.stack.id)?;
    }

    install(ctx, opts)?;

    match opts.template.as_deref() {
        None | Some("") => tracing::info!(
            "Successfully initialized Appsody project with the {stack} stack and the default template."
        ),
        Some(NO_TEMPLATE) => {
            tracing::info!("Successfully initialized Appsody project with the {stack} stack and no template.")
        }
        Some(t) => tracing::info!(
            "Successfully initialized Appsody project with the {stack} stack and the {t} template."
        ),
    }
    Ok(())
}

/// Write `.appsody-config.yaml` when the template did not ship one.
fn materialize_config(ctx: &Context, image: &str, stack_id: &str) -> Result<()> {
    if image.is_empty() {
        return Err(AppsodyError::UserInput(format!(
            "The template for {stack_id} did not contain {} and the stack declares no image",
            paths::PROJECT_CONFIG_FILE
        )));
    }
    let image = names::normalize_image_name(image)?;
    tracing::debug!("Writing {} for stack image {image}", paths::PROJECT_CONFIG_FILE);
    ProjectConfig::new(image).save(&ctx.project_dir)
}

/// Record names in the project config and run the stack's init script.
/// A failing script only produces warnings.
pub fn install(ctx: &Context, opts: &InitOptions) -> Result<()> {
    tracing::info!("Setting up the development environment");
    let mut project = match ctx.project_config() {
        Ok(p) => p,
        Err(AppsodyError::NotAnAppsodyProject(_)) if ctx.dry_run => {
            tracing::info!("Dry Run - Skipping project setup");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    match &opts.project_name {
        Some(name) => project.set_project_name(name, &ctx.project_dir, ctx.dry_run)?,
        None if project.project_name.is_none() => {
            project.project_name(&ctx.project_dir, ctx.dry_run)?;
        }
        None => {}
    }
    if let Some(name) = &opts.application_name {
        project.set_application_name(name, &ctx.project_dir, ctx.dry_run)?;
    }
    if let Some(host) = &opts.stack_registry {
        project.set_stack_registry(host, &ctx.project_dir, ctx.dry_run)?;
    }
    tracing::debug!(
        "Setting up the development environment for projectDir: {} and platform: {}",
        ctx.project_dir.display(),
        project.stack
    );

    if let Err(e) = run_init_script(ctx, &project) {
        tracing::warn!("The stack init script failed: {e}");
        tracing::warn!("Your local IDE may not build properly, but the Appsody container should still work.");
        tracing::warn!("To try again, resolve the issue then run `appsody init` with no arguments.");
    }
    Ok(())
}

fn run_init_script(ctx: &Context, project: &ProjectConfig) -> Result<()> {
    let script_name = template::init_script_name();
    let image = project.stack_image()?;
    if ctx.engine != Engine::Buildah {
        container::pull(ctx, &image)?;
        let project_dir = container::inspect(ctx, &image)?.project_dir();
        let found = container::run_bash(
            ctx,
            &image,
            &format!("find {project_dir} -type f -name {script_name}"),
            &[],
        )?;
        if found.trim().is_empty() {
            tracing::debug!("There is no initialization script in the image - skipping extract and initialize");
            return Ok(());
        }
    }

    let workdir = template::init_workdir(&ctx.project_dir);
    if ctx.dry_run {
        tracing::info!("Dry Run skipping extract.");
        return Ok(());
    }
    crate::io::remove_dir_if_exists(&workdir)?;
    let result = extract_and_run(ctx, &workdir, script_name);
    if let Err(e) = crate::io::remove_dir_if_exists(&workdir) {
        tracing::warn!("Could not remove {}: {e}", workdir.display());
    }
    result
}

fn extract_and_run(ctx: &Context, workdir: &std::path::Path, script_name: &str) -> Result<()> {
    extract::extract(
        ctx,
        &ExtractOptions {
            target_dir: Some(workdir.to_path_buf()),
            container_name: None,
        },
    )?;
    let script = workdir.join(script_name);
    if !script.exists() {
        return Ok(());
    }
    tracing::debug!("Running appsody_init script {script_name}");
    let program = script.to_string_lossy().to_string();
    let res = exec::stream(
        &program,
        &[],
        &StreamOptions::new(LogTarget::InitScript, ctx.dry_run).workdir(workdir),
    )?;
    if !res.success() {
        return Err(AppsodyError::ScriptFailed(match res.code {
            Some(code) => format!("{script_name} exited with status {code}"),
            None => format!("{script_name} was terminated by a signal"),
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::write_targz;
    use crate::context::test_support::context;
    use tempfile::TempDir;

    /// A file:// repository with one stack whose template is a local archive.
    fn local_repo(dir: &TempDir, ctx: &Context, with_config: bool) {
        let tgz = dir.path().join("simple.tar.gz");
        let mut files = vec![("app.js", "console.log('hi')"), ("package.json", "{}")];
        if with_config {
            files.push((".appsody-config.yaml", "stack: docker.io/appsody/nodejs-express:0.2\n"));
        }
        write_targz(&tgz, &files);
        let index = format!(
            "apiVersion: v2\nstacks:\n- id: nodejs-express\n  version: 0.2.8\n  image: appsody/nodejs-express:0.2\n  default-template: simple\n  templates:\n  - id: simple\n    url: {}\n",
            crate::download::to_file_url(&tgz)
        );
        let index_path = dir.path().join("index.yaml");
        std::fs::write(&index_path, index).unwrap();

        let mut repos = RepositoryFile::default();
        repos
            .add("local", &crate::download::to_file_url(&index_path))
            .unwrap();
        repos.set_default("local").unwrap();
        repos.save_to_home(ctx).unwrap();
    }

    fn opts(stack: &str) -> InitOptions {
        InitOptions {
            stack: Some(stack.to_string()),
            ..InitOptions::default()
        }
    }

    #[test]
    fn conflicting_template_flags() {
        let mut o = opts("nodejs");
        o.no_template = true;
        o.template = Some("simple".into());
        assert!(validate(&o).is_err());
        o.template = Some("none".into());
        assert!(validate(&o).is_ok());
    }

    #[test]
    fn non_empty_directory_is_refused() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).with_dry_run(true);
        local_repo(&dir, &ctx, true);
        std::fs::write(ctx.project_dir.join("app.js"), "mine").unwrap();

        let err = init(&ctx, &opts("nodejs-express")).unwrap_err();
        assert!(err
            .to_string()
            .contains("non-empty directory found with files which may conflict"));
        assert_eq!(std::fs::read_to_string(ctx.project_dir.join("app.js")).unwrap(), "mine");
    }

    #[test]
    fn existing_project_is_refused() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        local_repo(&dir, &ctx, true);
        ProjectConfig::new("docker.io/appsody/x:1").save(&ctx.project_dir).unwrap();
        let err = init(&ctx, &opts("nodejs-express")).unwrap_err();
        assert!(err.to_string().contains("existing appsody project"));
    }

    #[test]
    fn malformed_reference() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let err = init(&ctx, &opts("/nodejs-express")).unwrap_err();
        assert!(err.to_string().contains("malformed project parameter"));
    }

    #[test]
    fn config_materialized_when_template_has_none() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        local_repo(&dir, &ctx, false);
        let tgz = dir.path().join("simple.tar.gz");
        template::install(
            &crate::download::to_file_url(&tgz),
            "nodejs-express",
            &ctx.project_dir,
            InstallOptions::default(),
        )
        .unwrap();
        materialize_config(&ctx, "appsody/nodejs-express:0.2", "nodejs-express").unwrap();
        let cfg = ctx.project_config().unwrap();
        assert_eq!(cfg.stack, "appsody/nodejs-express:0.2");
        assert!(ctx.project_dir.join("app.js").exists());
    }
}
