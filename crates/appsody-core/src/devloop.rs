//! The development loop behind `appsody run`, `debug` and `test`.
//!
//! A dev container is started from the stack image with the project and the
//! controller mounted; the controller runs the stack's command for the mode
//! and restarts it on file changes. Ctrl-C stops the container by name.
//! With buildah there is no local daemon to run it, so the same container
//! is deployed to the cluster as a Deployment with a Service and Ingress.

use crate::cluster;
use crate::container::{self, Engine, ImageConfig, RunSpec};
use crate::context::Context;
use crate::error::{AppsodyError, Result};
use crate::exec::{self, LogTarget, StreamOptions, StreamResult};
use crate::manifests::{self, ClusterEnv, DevDeployment};
use crate::mounts;
use crate::paths::{self, CONTAINER_CONTROLLER_PATH};
use crate::ports;
use serde_yaml::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEPRECATED_LABEL: &str = "dev.appsody.stack.deprecated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Run,
    Debug,
    Test,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Run => "run",
            Mode::Debug => "debug",
            Mode::Test => "test",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DevOptions {
    pub mode: Mode,
    /// Defaults to `<project>-dev`.
    pub container_name: Option<String>,
    pub ports: Vec<String>,
    pub publish_all: bool,
    pub network: Option<String>,
    /// Defaults to `<project>-deps`.
    pub deps_volume: Option<String>,
    pub docker_options: String,
    pub interactive: bool,
    pub no_watcher: bool,
}

impl DevOptions {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            container_name: None,
            ports: Vec::new(),
            publish_all: false,
            network: None,
            deps_volume: None,
            docker_options: String::new(),
            interactive: false,
            no_watcher: false,
        }
    }
}

pub fn default_container_name(project_name: &str) -> String {
    format!("{project_name}-dev")
}

/// Host uid/gid, from `id`.
fn local_user() -> Result<(String, String)> {
    let uid = exec::capture_stdout("id", &["-u".to_string()], "id -u")?;
    let gid = exec::capture_stdout("id", &["-g".to_string()], "id -g")?;
    Ok((uid, gid))
}

fn warn_if_deprecated(image: &str, cfg: &ImageConfig) {
    if let Some(note) = cfg.labels.get(DEPRECATED_LABEL) {
        tracing::warn!("*** Stack {image} is deprecated: {note} ***");
    }
}

fn controller_args(ctx: &Context, opts: &DevOptions) -> Vec<String> {
    let mut args = vec![format!("--mode={}", opts.mode)];
    if ctx.verbose {
        args.push("-v".into());
    }
    if opts.no_watcher {
        args.push("--no-watcher".into());
    }
    if opts.interactive {
        args.push("--interactive".into());
    }
    args
}

/// Everything up to the `docker run` invocation: validation, pull, inspect
/// and argument assembly.
pub fn plan(ctx: &Context, opts: &DevOptions) -> Result<RunSpec> {
    let project = ctx.project_config()?;
    let project_name = ctx.project_name()?;

    let mut options = container::run_options(&opts.docker_options)?;
    if !opts.docker_options.trim().is_empty() {
        tracing::debug!("User provided Docker options: \"{}\"", opts.docker_options.trim());
    }
    ports::check_port_input(&opts.ports)?;
    if !ctx.dry_run {
        exec::require(ctx.engine.program())?;
    }

    let image = project.stack_image()?;
    container::pull(ctx, &image)?;
    let image_cfg = container::inspect(ctx, &image)?;
    warn_if_deprecated(&image, &image_cfg);

    let mut volumes = mounts::stack_mounts(&image_cfg, &ctx.project_dir)?;
    let deps_name = opts
        .deps_volume
        .clone()
        .unwrap_or_else(|| mounts::default_deps_volume_name(&project_name));
    if let Some(deps) = mounts::deps_volume(&image_cfg, &deps_name) {
        tracing::debug!("Adding dependency cache to volume mounts: {deps}");
        volumes.push(deps);
    }
    volumes.push(crate::controller::mount(ctx)?);

    let port_args = ports::port_args(&image_cfg, &opts.ports, opts.publish_all)?;

    let mut user = None;
    if image_cfg.env_bool("APPSODY_USER_RUN_AS_LOCAL") && !ctx.is_windows() {
        let (uid, gid) = local_user()?;
        user = Some(format!("{uid}:{gid}"));
        options.extend([
            "-e".to_string(),
            format!("APPSODY_USER={uid}"),
            "-e".to_string(),
            format!("APPSODY_GROUP={gid}"),
        ]);
    }

    let command = controller_args(ctx, opts);

    Ok(RunSpec {
        name: opts
            .container_name
            .clone()
            .unwrap_or_else(|| default_container_name(&project_name)),
        keep: false,
        network: opts.network.clone().filter(|n| !n.is_empty()),
        port_args,
        volumes,
        user,
        options,
        interactive: opts.interactive,
        tty: true,
        entrypoint: Some(CONTAINER_CONTROLLER_PATH.to_string()),
        image,
        command,
    })
}

/// How the dev container ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Clean,
    Interrupted,
    Failed(i32),
}

/// Ctrl-C surfaces as a signal or as exit status 2 depending on the platform.
pub fn classify(result: &StreamResult, interrupted: bool) -> Exit {
    match result.code {
        Some(0) => Exit::Clean,
        None | Some(2) => Exit::Interrupted,
        _ if interrupted => Exit::Interrupted,
        Some(code) => Exit::Failed(code),
    }
}

pub fn run(ctx: &Context, opts: &DevOptions) -> Result<()> {
    if ctx.engine == Engine::Buildah {
        return run_in_cluster(ctx, opts);
    }
    let spec = plan(ctx, opts)?;
    let program = ctx.engine.program();
    let args = spec.to_args();
    if ctx.dry_run {
        tracing::info!("Dry Run - Skipping command: {}", exec::command_line(program, &args));
        return Ok(());
    }
    tracing::debug!("Attempting to start image {} with container name {}", spec.image, spec.name);

    let rt = tokio::runtime::Runtime::new()?;
    let (result, interrupted) = rt.block_on(supervise(program, &args, &spec.name, opts.interactive))?;
    match classify(&result, interrupted) {
        Exit::Clean => {
            tracing::info!("Closing down development environment.");
            Ok(())
        }
        Exit::Interrupted => {
            tracing::info!("Closing down, development environment was interrupted.");
            Ok(())
        }
        Exit::Failed(code) => Err(AppsodyError::DevLoopFailed {
            mode: opts.mode.to_string(),
            code,
        }),
    }
}

async fn supervise(
    program: &str,
    args: &[String],
    name: &str,
    interactive: bool,
) -> Result<(StreamResult, bool)> {
    let opts = StreamOptions::new(LogTarget::Container, false).interactive(interactive);
    let child = exec::stream_async(program, args, &opts);
    tokio::pin!(child);

    tokio::select! {
        res = &mut child => Ok((res?, false)),
        _ = shutdown_signal() => {
            tracing::debug!("Inside signal handler for appsody command");
            let stop_args = vec!["stop".to_string(), name.to_string()];
            let stop = StreamOptions::new(LogTarget::Plain, false);
            match exec::stream_async(program, &stop_args, &stop).await {
                Ok(r) if !r.success() => tracing::error!("{program} stop {name} failed: {}", r.stderr.trim()),
                Err(e) => tracing::error!("{program} stop {name} failed: {e}"),
                Ok(_) => {}
            }
            Ok((child.await?, true))
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

// ---------------------------------------------------------------------------
// In-cluster dev loop (buildah)
// ---------------------------------------------------------------------------

const DEV_SERVICE_FILE: &str = "app-service.yaml";
const DEV_INGRESS_FILE: &str = "app-ingress.yaml";
const UNKNOWN_MASTER_IP: &str = "x.x.x.x";
const LOG_RETRY: Duration = Duration::from_secs(5);
const LOG_ATTEMPTS: u32 = 24;

/// Documents applied to run the dev loop in the cluster.
#[derive(Debug, Clone)]
pub struct ClusterPlan {
    pub app: String,
    pub deployment: Value,
    pub service: Value,
    /// Port routed by the ingress; 0 when the stack exposes none.
    pub ingress_port: u16,
    pub exposed: Vec<String>,
}

/// Every `APPSODY_DEBUG_PORT` entry must be an exposed port.
fn check_debug_ports(cfg: &ImageConfig) -> Result<()> {
    let Some(debug_ports) = cfg.env("APPSODY_DEBUG_PORT") else {
        return Ok(());
    };
    for port in debug_ports.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if !cfg.exposed_ports.iter().any(|p| p == port) {
            return Err(AppsodyError::UserInput(format!(
                "The debug port {port} is not exposed by the stack image. Exposed ports: {}",
                cfg.exposed_ports.join(", ")
            )));
        }
    }
    Ok(())
}

/// Host mounts become sub paths of the workspace volume, which holds the
/// project directory's parent.
fn workspace_mounts(mounts: &[String], project_dir: &Path) -> Vec<String> {
    let workspace = project_dir
        .parent()
        .map(paths::to_slash)
        .unwrap_or_default();
    mounts
        .iter()
        .map(|m| match m.strip_prefix(workspace.as_str()) {
            Some(rest) if !workspace.is_empty() => rest.to_string(),
            _ => m.clone(),
        })
        .collect()
}

pub fn cluster_plan(ctx: &Context, opts: &DevOptions) -> Result<ClusterPlan> {
    let project = ctx.project_config()?;
    let project_name = ctx.project_name()?;
    let options = container::run_options(&opts.docker_options)?;

    let image = project.stack_image()?;
    container::pull(ctx, &image)?;
    let cfg = container::inspect(ctx, &image)?;
    warn_if_deprecated(&image, &cfg);
    check_debug_ports(&cfg)?;

    let ports = cfg
        .exposed_ports
        .iter()
        .filter_map(|p| p.parse().ok())
        .collect();
    let mounts = workspace_mounts(&mounts::stack_mounts(&cfg, &ctx.project_dir)?, &ctx.project_dir);
    let app = opts
        .container_name
        .clone()
        .unwrap_or_else(|| default_container_name(&project_name));

    let env = ClusterEnv::from_env();
    let deployment = DevDeployment {
        app: app.clone(),
        image,
        controller_image: crate::controller::cluster_image(),
        ports,
        mounts,
        env: container::env_from_options(&options, &ctx.project_dir),
        args: controller_args(ctx, opts),
    };
    let service = manifests::dev_service(&app, &deployment.ports, &env);
    Ok(ClusterPlan {
        deployment: deployment.to_value(&env),
        service,
        ingress_port: manifests::ingress_port(&cfg.exposed_ports),
        exposed: cfg.exposed_ports.clone(),
        app,
    })
}

fn master_ip(ctx: &Context) -> String {
    let args = [
        "node",
        "--selector",
        "node-role.kubernetes.io/master",
        "-o",
        "jsonpath={.items[0].status.addresses[?(.type==\"InternalIP\")].address}",
    ];
    match cluster::get(ctx, &args, "") {
        Ok(ip) if !ip.trim().is_empty() => ip.trim().to_string(),
        Ok(_) => UNKNOWN_MASTER_IP.to_string(),
        Err(e) => {
            tracing::debug!("Could not determine the master node IP: {e}");
            UNKNOWN_MASTER_IP.to_string()
        }
    }
}

fn apply_doc(ctx: &Context, file: &str, doc: &Value) -> Result<PathBuf> {
    let path = ctx.project_dir.join(file);
    manifests::write_yaml(&path, doc, ctx.dry_run)?;
    cluster::apply(ctx, &path, "")?;
    Ok(path)
}

fn run_in_cluster(ctx: &Context, opts: &DevOptions) -> Result<()> {
    let plan = cluster_plan(ctx, opts)?;
    tracing::debug!("Exposed ports: {:?}", plan.exposed);

    apply_doc(ctx, paths::APP_DEPLOY_FILE, &plan.deployment)?;
    apply_doc(ctx, DEV_SERVICE_FILE, &plan.service)?;
    let env = ClusterEnv::from_env();
    if env.project_id.is_none() && plan.ingress_port > 0 {
        let host = format!("{}.{}.nip.io", plan.app, master_ip(ctx));
        tracing::info!("Exposing {} on http://{host}", plan.ingress_port);
        apply_doc(
            ctx,
            DEV_INGRESS_FILE,
            &manifests::dev_ingress(&plan.app, &host, plan.ingress_port),
        )?;
    }
    tail_logs(ctx, &plan.app)
}

/// Follow the Deployment's logs, retrying until the pod is running.
fn tail_logs(ctx: &Context, app: &str) -> Result<()> {
    if ctx.dry_run {
        tracing::info!("Dry Run - Skipping kubectl logs");
        return Ok(());
    }
    let args = vec![
        "logs".to_string(),
        format!("deployment/{app}"),
        "-f".into(),
        "--pod-running-timeout=2m".into(),
    ];
    follow_with_retries(app, LOG_ATTEMPTS, LOG_RETRY, || {
        exec::stream("kubectl", &args, &StreamOptions::new(LogTarget::Kubectl, false))
    })
}

/// Run `follow` until it succeeds, at most `attempts` times.
fn follow_with_retries(
    app: &str,
    attempts: u32,
    delay: Duration,
    mut follow: impl FnMut() -> Result<StreamResult>,
) -> Result<()> {
    let mut last = String::new();
    for attempt in 1..=attempts {
        let res = follow()?;
        if res.success() {
            return Ok(());
        }
        last = res.stderr.trim().to_string();
        tracing::info!("Waiting for the deployment {app} to start: {last}");
        if attempt < attempts {
            std::thread::sleep(delay);
        }
    }
    Err(AppsodyError::Cluster {
        op: "logs".into(),
        message: format!("gave up following deployment/{app} after {attempts} attempts: {last}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::context::test_support::{context, image_config};
    use tempfile::TempDir;

    const IMAGE: &str = "docker.io/appsody/nodejs-express:0.2";

    fn project(dir: &TempDir, env: &[(&str, &str)], exposed: &[&str]) -> Context {
        let ctx = context(dir).with_dry_run(true);
        ProjectConfig::new(IMAGE).save(&ctx.project_dir).unwrap();
        ctx.cache_image_config(IMAGE, image_config(env, exposed));
        ctx
    }

    fn command(ctx: &Context, opts: &DevOptions) -> String {
        plan(ctx, opts).unwrap().to_args().join(" ")
    }

    #[test]
    fn user_port_overrides_stack_port() {
        let dir = TempDir::new().unwrap();
        let ctx = project(&dir, &[("PORT", "3000")], &["3000", "9229"]);
        let mut opts = DevOptions::new(Mode::Run);
        opts.ports = vec!["3100:3000".into()];
        let cmd = command(&ctx, &opts);
        assert!(cmd.contains("-p 3100:3000 -p 9229:9229"), "{cmd}");
        assert!(!cmd.contains("3000:3000"));
        assert!(cmd.contains("--name project-dev"));
        assert!(cmd.contains(&format!("--entrypoint {CONTAINER_CONTROLLER_PATH} {IMAGE} --mode=run")));
    }

    #[test]
    fn publish_all_emits_no_explicit_ports() {
        let dir = TempDir::new().unwrap();
        let ctx = project(&dir, &[], &["3000", "9229"]);
        let mut opts = DevOptions::new(Mode::Debug);
        opts.publish_all = true;
        let cmd = command(&ctx, &opts);
        assert!(cmd.starts_with("run --rm -P"), "{cmd}");
        assert!(!cmd.contains("-p "));
        assert!(cmd.ends_with("--mode=debug"));
    }

    #[test]
    fn forbidden_docker_option() {
        let dir = TempDir::new().unwrap();
        let ctx = project(&dir, &[], &[]);
        let mut opts = DevOptions::new(Mode::Run);
        opts.docker_options = "--name foo".into();
        let err = plan(&ctx, &opts).unwrap_err();
        assert!(err.to_string().contains("--name is not allowed in --docker-options"));
    }

    #[test]
    fn deps_volume_and_flags() {
        let dir = TempDir::new().unwrap();
        let ctx = project(&dir, &[("APPSODY_DEPS", "/project/node_modules")], &[]);
        let mut opts = DevOptions::new(Mode::Test);
        opts.no_watcher = true;
        opts.interactive = true;
        opts.network = Some("appnet".into());
        opts.container_name = Some("custom".into());
        opts.docker_options = "-e DEBUG=1 --memory 1g".into();
        let cmd = command(&ctx, &opts);
        assert!(cmd.contains("-v project-deps:/project/node_modules"), "{cmd}");
        assert!(cmd.contains("--name custom --network appnet"));
        assert!(cmd.contains("-e DEBUG=1 --memory 1g -i -t"));
        assert!(cmd.ends_with("--mode=test --no-watcher --interactive"));
    }

    #[test]
    fn exit_classification() {
        let result = |code| StreamResult {
            code,
            ..StreamResult::default()
        };
        assert_eq!(classify(&result(Some(0)), false), Exit::Clean);
        assert_eq!(classify(&result(Some(2)), false), Exit::Interrupted);
        assert_eq!(classify(&result(None), false), Exit::Interrupted);
        assert_eq!(classify(&result(Some(137)), true), Exit::Interrupted);
        assert_eq!(classify(&result(Some(1)), false), Exit::Failed(1));
    }

    #[test]
    fn debug_port_must_be_exposed() {
        let ok = image_config(&[("APPSODY_DEBUG_PORT", "9229")], &["3000", "9229"]);
        assert!(check_debug_ports(&ok).is_ok());
        let bad = image_config(&[("APPSODY_DEBUG_PORT", "9229, 5005")], &["3000", "9229"]);
        let err = check_debug_ports(&bad).unwrap_err();
        assert!(err.to_string().contains("The debug port 5005 is not exposed"));
    }

    #[test]
    fn mounts_are_relative_to_workspace() {
        let mounts = vec!["/ws/app/src:/project/user-app".to_string(), "/other:/x".to_string()];
        let rel = workspace_mounts(&mounts, Path::new("/ws/app"));
        assert_eq!(rel, vec!["/app/src:/project/user-app", "/other:/x"]);
    }

    #[test]
    fn cluster_plan_documents() {
        let dir = TempDir::new().unwrap();
        let ctx = project(&dir, &[("PORT", "3000")], &["3000", "9229"]).with_engine(Engine::Buildah);
        let mut opts = DevOptions::new(Mode::Debug);
        opts.docker_options = "-e LOG=debug".into();
        let plan = cluster_plan(&ctx, &opts).unwrap();
        assert_eq!(plan.app, "project-dev");
        assert_eq!(plan.ingress_port, 3000);

        let deployment = serde_yaml::to_string(&plan.deployment).unwrap();
        assert!(deployment.contains("kind: Deployment"), "{deployment}");
        assert!(deployment.contains(IMAGE));
        assert!(deployment.contains("--mode=debug"));
        assert!(deployment.contains("name: LOG"));
        let service = serde_yaml::to_string(&plan.service).unwrap();
        assert!(service.contains("name: project-dev-service"), "{service}");
        assert!(service.contains("port: 9229"));

        run(&ctx, &opts).unwrap();
        assert!(!ctx.project_dir.join(DEV_SERVICE_FILE).exists());
    }

    fn exited(code: i32) -> StreamResult {
        StreamResult {
            code: Some(code),
            stderr: "pod not ready".into(),
            ..StreamResult::default()
        }
    }

    #[test]
    fn log_following_gives_up_after_the_last_attempt() {
        let mut calls = 0;
        let err = follow_with_retries("app", 3, Duration::ZERO, || {
            calls += 1;
            Ok(exited(1))
        })
        .unwrap_err();
        assert_eq!(calls, 3);
        assert!(err.to_string().contains("after 3 attempts: pod not ready"), "{err}");
    }

    #[test]
    fn log_following_stops_once_the_pod_runs() {
        let mut calls = 0;
        follow_with_retries("app", 5, Duration::ZERO, || {
            calls += 1;
            Ok(exited(if calls < 2 { 1 } else { 0 }))
        })
        .unwrap();
        assert_eq!(calls, 2);
    }
}
