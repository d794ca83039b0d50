//! Container engine facade over the `docker` and `buildah` binaries.
//!
//! Mutating operations go through [`exec::stream`] and honour dry-run;
//! queries (inspect, image listing, ps, version) always execute.

use crate::context::Context;
use crate::error::{AppsodyError, Result};
use crate::exec::{self, LogTarget, StreamOptions};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Engine / PullPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Engine {
    #[default]
    Docker,
    Buildah,
}

impl Engine {
    pub fn program(self) -> &'static str {
        match self {
            Engine::Docker => "docker",
            Engine::Buildah => "buildah",
        }
    }

    fn target(self) -> LogTarget {
        match self {
            Engine::Docker => LogTarget::Docker,
            Engine::Buildah => LogTarget::Buildah,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    #[default]
    Always,
    IfNotPresent,
}

impl PullPolicy {
    /// `APPSODY_PULL_POLICY`, case-insensitive; anything unrecognised means `Always`.
    pub fn from_env() -> Self {
        match std::env::var("APPSODY_PULL_POLICY") {
            Ok(v) => Self::parse(&v),
            Err(_) => PullPolicy::Always,
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("ifnotpresent") {
            PullPolicy::IfNotPresent
        } else {
            PullPolicy::Always
        }
    }
}

// ---------------------------------------------------------------------------
// ImageConfig (normalised inspect output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Container-side ports, protocol suffix removed, numerically sorted.
    pub exposed_ports: Vec<String>,
}

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(rename = "Env", alias = "env", default)]
    env: Option<Vec<String>>,
    #[serde(rename = "Labels", alias = "labels", default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(rename = "ExposedPorts", alias = "exposedPorts", default)]
    exposed_ports: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Deserialize)]
struct DockerInspect {
    #[serde(rename = "Config")]
    config: RawConfig,
}

#[derive(Deserialize)]
struct BuildahInspect {
    config: RawConfig,
}

impl From<RawConfig> for ImageConfig {
    fn from(raw: RawConfig) -> Self {
        let env = raw
            .env
            .unwrap_or_default()
            .into_iter()
            .filter_map(|kv| {
                kv.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect();
        let mut exposed_ports: Vec<String> = raw
            .exposed_ports
            .unwrap_or_default()
            .into_keys()
            .map(|p| p.split('/').next().unwrap_or_default().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        exposed_ports.sort_by_key(|p| p.parse::<u32>().unwrap_or(u32::MAX));
        exposed_ports.dedup();
        Self {
            env,
            labels: raw.labels.unwrap_or_default(),
            exposed_ports,
        }
    }
}

impl ImageConfig {
    pub fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn env_bool(&self, key: &str) -> bool {
        self.env(key)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// `APPSODY_PROJECT_DIR`, falling back to `/project`.
    pub fn project_dir(&self) -> String {
        match self.env("APPSODY_PROJECT_DIR") {
            Some(dir) if !dir.is_empty() => dir.to_string(),
            _ => {
                tracing::warn!("The stack image does not contain APPSODY_PROJECT_DIR. Using /project");
                "/project".to_string()
            }
        }
    }
}

pub fn parse_docker_inspect(image: &str, json: &str) -> Result<ImageConfig> {
    let parsed: Vec<DockerInspect> =
        serde_json::from_str(json).map_err(|e| inspect_failed(image, e))?;
    let first = parsed
        .into_iter()
        .next()
        .ok_or_else(|| inspect_failed(image, "empty inspect output"))?;
    Ok(first.config.into())
}

pub fn parse_buildah_inspect(image: &str, json: &str) -> Result<ImageConfig> {
    let parsed: BuildahInspect =
        serde_json::from_str(json).map_err(|e| inspect_failed(image, e))?;
    Ok(parsed.config.into())
}

fn inspect_failed(image: &str, reason: impl std::fmt::Display) -> AppsodyError {
    AppsodyError::InspectFailed {
        image: image.to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Pass-through options
// ---------------------------------------------------------------------------

static RUN_FORBIDDEN_RE: OnceLock<Regex> = OnceLock::new();
static BUILD_FORBIDDEN_RE: OnceLock<Regex> = OnceLock::new();

fn run_forbidden_re() -> &'static Regex {
    RUN_FORBIDDEN_RE.get_or_init(|| {
        Regex::new(
            r"^((--help)|(-p)|(--publish)|(--publish-all)|(-P)|(-u)|(--user)|(--name)|(--network)|(-t)|(--tty)|(--rm)|(--entrypoint)|(-v)|(--volume))((=?$)|(=.*))",
        )
        .unwrap()
    })
}

fn build_forbidden_re() -> &'static Regex {
    BUILD_FORBIDDEN_RE
        .get_or_init(|| Regex::new(r"^((-t)|(--tag)|(-f)|(--file))((=?$)|(=.*))").unwrap())
}

/// Split an option string on whitespace, keeping quoted sections together.
pub fn split_options(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;
    for c in raw.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => cur.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    out.push(std::mem::take(&mut cur));
                    in_token = false;
                }
            }
            (None, c) => {
                cur.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        out.push(cur);
    }
    out
}

/// Parse `--docker-options` for a dev container, rejecting flags the driver sets itself.
pub fn run_options(raw: &str) -> Result<Vec<String>> {
    let opts = split_options(raw);
    if let Some(bad) = opts.iter().find(|o| run_forbidden_re().is_match(o)) {
        return Err(AppsodyError::InvalidOption(bad.clone()));
    }
    Ok(opts)
}

/// Parse `--docker-options`/`--buildah-options` for an image build.
pub fn build_options(raw: &str) -> Result<Vec<String>> {
    let opts = split_options(raw);
    if let Some(bad) = opts.iter().find(|o| build_forbidden_re().is_match(o)) {
        return Err(AppsodyError::InvalidOption(bad.clone()));
    }
    Ok(opts)
}

/// Env vars passed with `-e`, `--env` or `--env-file` in pass-through options.
/// Env files are read relative to `base`; unreadable files are skipped with a warning.
pub fn env_from_options(opts: &[String], base: &Path) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let add = |kv: &str, env: &mut BTreeMap<String, String>| {
        let kv = kv.trim();
        if kv.is_empty() || kv.starts_with('#') {
            return;
        }
        match kv.split_once('=') {
            Some((k, v)) => env.insert(k.to_string(), v.to_string()),
            None => env.insert(kv.to_string(), std::env::var(kv).unwrap_or_default()),
        };
    };
    let mut iter = opts.iter();
    while let Some(opt) = iter.next() {
        let (flag, inline) = match opt.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f, Some(v.to_string())),
            _ => (opt.as_str(), None),
        };
        match flag {
            "-e" | "--env" => {
                if let Some(v) = inline.or_else(|| iter.next().cloned()) {
                    add(&v, &mut env);
                }
            }
            "--env-file" => {
                let Some(file) = inline.or_else(|| iter.next().cloned()) else {
                    continue;
                };
                let path = base.join(&file);
                match std::fs::read_to_string(&path) {
                    Ok(data) => data.lines().for_each(|l| add(l, &mut env)),
                    Err(e) => tracing::warn!("Could not read env file {}: {e}", path.display()),
                }
            }
            _ => {}
        }
    }
    env
}

// ---------------------------------------------------------------------------
// Run / build specs
// ---------------------------------------------------------------------------

/// Arguments for `docker run` of a dev or utility container.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub name: String,
    /// Omit `--rm` so the container can be copied from after it exits.
    pub keep: bool,
    pub network: Option<String>,
    /// Already computed `-P` / `-p host:container` arguments.
    pub port_args: Vec<String>,
    /// `src:dst` mounts, each emitted as `-v`.
    pub volumes: Vec<String>,
    pub user: Option<String>,
    pub options: Vec<String>,
    pub interactive: bool,
    pub tty: bool,
    pub entrypoint: Option<String>,
    pub image: String,
    pub command: Vec<String>,
}

impl RunSpec {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string()];
        if !self.keep {
            args.push("--rm".into());
        }
        args.extend(self.port_args.iter().cloned());
        if !self.name.is_empty() {
            args.push("--name".into());
            args.push(self.name.clone());
        }
        if let Some(net) = &self.network {
            args.push("--network".into());
            args.push(net.clone());
        }
        if let Some(user) = &self.user {
            args.push("-u".into());
            args.push(user.clone());
        }
        for v in &self.volumes {
            args.push("-v".into());
            args.push(v.clone());
        }
        args.extend(self.options.iter().cloned());
        if self.interactive {
            args.push("-i".into());
        }
        if self.tty {
            args.push("-t".into());
        }
        if let Some(ep) = &self.entrypoint {
            args.push("--entrypoint".into());
            args.push(ep.clone());
        }
        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildSpec {
    pub tag: String,
    pub dockerfile: PathBuf,
    pub context: PathBuf,
    /// `key=value` pairs, emitted in order as `--label`.
    pub labels: Vec<String>,
    pub options: Vec<String>,
}

impl BuildSpec {
    pub fn to_args(&self, engine: Engine) -> Vec<String> {
        let verb = match engine {
            Engine::Docker => "build",
            Engine::Buildah => "bud",
        };
        let mut args = vec![verb.to_string(), "-t".to_string(), self.tag.clone()];
        args.extend(self.options.iter().cloned());
        for l in &self.labels {
            args.push("--label".into());
            args.push(l.clone());
        }
        args.push("-f".into());
        args.push(crate::paths::to_slash(&self.dockerfile));
        args.push(crate::paths::to_slash(&self.context));
        args
    }
}

// ---------------------------------------------------------------------------
// Driver operations
// ---------------------------------------------------------------------------

fn mutate(ctx: &Context, args: Vec<String>, op: &str) -> Result<exec::StreamResult> {
    let engine = ctx.engine;
    let res = exec::stream(
        engine.program(),
        &args,
        &StreamOptions::new(engine.target(), ctx.dry_run),
    )?;
    if !res.success() {
        return Err(AppsodyError::ContainerEngine {
            op: format!("{} {op}", engine.program()),
            message: last_line(&res.stderr, res.code),
        });
    }
    Ok(res)
}

fn last_line(stderr: &str, code: Option<i32>) -> String {
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match code {
            Some(c) => format!("exit status {c}"),
            None => "terminated by signal".to_string(),
        })
}

fn query(ctx: &Context, args: Vec<String>, op: &str) -> Result<String> {
    exec::capture_stdout(ctx.engine.program(), &args, &format!("{} {op}", ctx.engine.program()))
}

/// Pull an image according to the context's pull policy, at most once per invocation.
pub fn pull(ctx: &Context, image: &str) -> Result<()> {
    if ctx.is_pulled(image) {
        return Ok(());
    }
    let policy = if image.contains("dev.local/") {
        PullPolicy::IfNotPresent
    } else {
        ctx.pull_policy
    };
    if policy == PullPolicy::IfNotPresent && image_exists(ctx, image)? {
        tracing::debug!("Image {image} found locally, skipping pull");
        ctx.mark_pulled(image);
        return Ok(());
    }
    tracing::info!("Pulling docker image {image}");
    match mutate(ctx, vec!["pull".into(), image.to_string()], "pull") {
        Ok(_) => {}
        Err(AppsodyError::ContainerEngine { message, .. }) => {
            if image_exists(ctx, image)? {
                tracing::warn!(
                    "Docker image pull failed: {message}. Using local image {image} if it exists"
                );
            } else {
                return Err(AppsodyError::PullFailed(image.to_string()));
            }
        }
        Err(e) => return Err(e),
    }
    ctx.mark_pulled(image);
    Ok(())
}

pub fn image_exists(ctx: &Context, image: &str) -> Result<bool> {
    let args = match ctx.engine {
        Engine::Docker => vec!["image".into(), "ls".into(), "-q".into(), image.to_string()],
        Engine::Buildah => vec!["images".into(), "-q".into(), image.to_string()],
    };
    let out = exec::capture(ctx.engine.program(), &args)?;
    Ok(out.status.success() && !String::from_utf8_lossy(&out.stdout).trim().is_empty())
}

/// Normalised image config; cached per invocation.
pub fn inspect(ctx: &Context, image: &str) -> Result<ImageConfig> {
    if let Some(cfg) = ctx.cached_image_config(image) {
        return Ok(cfg);
    }
    let cfg = match ctx.engine {
        Engine::Docker => {
            let args = vec!["image".into(), "inspect".into(), image.to_string()];
            let out = exec::capture("docker", &args)?;
            if !out.status.success() {
                return Err(inspect_failed(
                    image,
                    String::from_utf8_lossy(&out.stderr).trim(),
                ));
            }
            parse_docker_inspect(image, &String::from_utf8_lossy(&out.stdout))?
        }
        Engine::Buildah => {
            let args = vec![
                "inspect".into(),
                "--format={{.Config}}".into(),
                image.to_string(),
            ];
            let out = exec::capture("buildah", &args)?;
            if !out.status.success() {
                return Err(inspect_failed(
                    image,
                    String::from_utf8_lossy(&out.stderr).trim(),
                ));
            }
            parse_buildah_inspect(image, &String::from_utf8_lossy(&out.stdout))?
        }
    };
    ctx.cache_image_config(image, cfg.clone());
    Ok(cfg)
}

pub fn build(ctx: &Context, spec: &BuildSpec) -> Result<()> {
    mutate(ctx, spec.to_args(ctx.engine), "build")
        .map(|_| ())
        .map_err(|e| match e {
            AppsodyError::ContainerEngine { message, .. } => AppsodyError::BuildFailed(message),
            other => other,
        })
}

pub fn stop(ctx: &Context, name: &str) -> Result<()> {
    let args = match ctx.engine {
        Engine::Docker => vec!["stop".into(), name.to_string()],
        Engine::Buildah => vec!["rm".into(), name.to_string()],
    };
    mutate(ctx, args, "stop").map(|_| ())
}

pub fn remove(ctx: &Context, name: &str, force: bool) -> Result<()> {
    let mut args = vec!["rm".to_string()];
    if force && ctx.engine == Engine::Docker {
        args.push("-f".into());
    }
    args.push(name.to_string());
    mutate(ctx, args, "rm").map(|_| ())
}

pub fn tag(ctx: &Context, src: &str, dst: &str) -> Result<()> {
    mutate(ctx, vec!["tag".into(), src.to_string(), dst.to_string()], "tag").map(|_| ())
}

pub fn push(ctx: &Context, image: &str) -> Result<()> {
    mutate(ctx, vec!["push".into(), image.to_string()], "push").map(|_| ())
}

/// Create (but do not start) a container; `buildah from` for buildah.
pub fn create(ctx: &Context, name: &str, image: &str, volumes: &[String]) -> Result<()> {
    let mut args = match ctx.engine {
        Engine::Docker => vec!["create".to_string()],
        Engine::Buildah => vec!["from".to_string()],
    };
    args.push("--name".into());
    args.push(name.to_string());
    if ctx.engine == Engine::Docker {
        for v in volumes {
            args.push("-v".into());
            args.push(v.clone());
        }
    }
    args.push(image.to_string());
    mutate(ctx, args, "create").map(|_| ())
}

/// `docker cp <src> <dst>`; either side may be `container:path`.
pub fn cp(ctx: &Context, src: &str, dst: &str) -> Result<()> {
    mutate(ctx, vec!["cp".into(), src.to_string(), dst.to_string()], "cp").map(|_| ())
}

/// Run a bash command in a throwaway container and return its stdout.
pub fn run_bash(ctx: &Context, image: &str, command: &str, volumes: &[String]) -> Result<String> {
    let spec = RunSpec {
        volumes: volumes.to_vec(),
        image: image.to_string(),
        ..RunSpec::default()
    };
    run_bash_with(ctx, spec, command)
}

/// Like [`run_bash`] but with a caller-assembled spec (name, `keep`, ...).
pub fn run_bash_with(ctx: &Context, mut spec: RunSpec, command: &str) -> Result<String> {
    pull(ctx, &spec.image)?;
    spec.entrypoint = Some("/bin/bash".into());
    spec.command = vec!["-c".into(), command.to_string()];
    let out = exec::capture("docker", &spec.to_args())?;
    if !out.status.success() {
        return Err(AppsodyError::ContainerEngine {
            op: "docker run".into(),
            message: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

pub fn image_ls(ctx: &Context, reference: &str) -> Result<Vec<String>> {
    let args = match ctx.engine {
        Engine::Docker => vec![
            "image".into(),
            "ls".into(),
            "--format".into(),
            "{{.Repository}}:{{.Tag}}".into(),
            reference.to_string(),
        ],
        Engine::Buildah => vec![
            "images".into(),
            "--format".into(),
            "{{.Name}}:{{.Tag}}".into(),
            reference.to_string(),
        ],
    };
    let out = query(ctx, args, "image ls")?;
    Ok(out.lines().map(str::to_string).collect())
}

/// Engine version string, e.g. `19.03.5`.
pub fn version(engine: Engine) -> Result<String> {
    let args = match engine {
        Engine::Docker => vec!["version".into(), "--format".into(), "{{.Client.Version}}".into()],
        Engine::Buildah => vec!["version".into()],
    };
    exec::capture_stdout(engine.program(), &args, "version")
}

// ---------------------------------------------------------------------------
// ps
// ---------------------------------------------------------------------------

const PS_SEPARATOR: &str = "$!$!$!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRow {
    pub id: String,
    pub image: String,
    pub status: String,
    pub name: String,
    pub command: String,
}

pub fn parse_ps(output: &str) -> Vec<ContainerRow> {
    output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split(PS_SEPARATOR).collect();
            if cols.len() != 5 {
                return None;
            }
            Some(ContainerRow {
                id: cols[0].chars().take(12).collect(),
                image: cols[1].to_string(),
                status: cols[2].to_string(),
                name: cols[3].to_string(),
                command: cols[4].to_string(),
            })
        })
        .filter(|row| row.command.contains(crate::paths::CONTROLLER_BINARY))
        .collect()
}

/// Running dev containers (those whose command is the appsody controller).
pub fn ps() -> Result<Vec<ContainerRow>> {
    let format = ["{{.ID}}", "{{.Image}}", "{{.Status}}", "{{.Names}}", "{{.Command}}"]
        .join(PS_SEPARATOR);
    let args = vec![
        "ps".into(),
        "--no-trunc".into(),
        "--format".into(),
        format,
    ];
    let out = exec::capture_stdout("docker", &args, "docker ps")?;
    Ok(parse_ps(&out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_inspect_shape() {
        let json = r#"[{"Config":{"Env":["PATH=/bin","APPSODY_MOUNTS=.:/project/user-app;~/.npm:/root/.npm","EMPTY="],
            "Labels":{"dev.appsody.stack.id":"nodejs"},
            "ExposedPorts":{"9229/tcp":{},"3000/tcp":{}}}}]"#;
        let cfg = parse_docker_inspect("img", json).unwrap();
        assert_eq!(
            cfg.env("APPSODY_MOUNTS"),
            Some(".:/project/user-app;~/.npm:/root/.npm")
        );
        assert_eq!(cfg.env("EMPTY"), Some(""));
        assert_eq!(cfg.exposed_ports, vec!["3000", "9229"]);
        assert_eq!(cfg.labels["dev.appsody.stack.id"], "nodejs");
    }

    #[test]
    fn buildah_inspect_shape() {
        let json = r#"{"config":{"Env":["PORT=8080"],"Labels":null,"ExposedPorts":{"8080/tcp":{}}}}"#;
        let cfg = parse_buildah_inspect("img", json).unwrap();
        assert_eq!(cfg.env("PORT"), Some("8080"));
        assert_eq!(cfg.exposed_ports, vec!["8080"]);
        assert!(cfg.labels.is_empty());
    }

    #[test]
    fn malformed_inspect_is_inspect_failed() {
        let err = parse_docker_inspect("img", "not json").unwrap_err();
        assert!(matches!(err, AppsodyError::InspectFailed { .. }));
        let err = parse_docker_inspect("img", "[]").unwrap_err();
        assert!(matches!(err, AppsodyError::InspectFailed { .. }));
    }

    #[test]
    fn forbidden_run_options() {
        for bad in [
            "--name foo", "-p 80:80", "--publish=80:80", "-P", "--rm", "-t", "--tty",
            "-u 0", "--user=root", "--network host", "--entrypoint sh", "--help",
            "-v /a:/b", "--volume=/a:/b",
        ] {
            assert!(run_options(bad).is_err(), "{bad} should be rejected");
        }
        let err = run_options("-e A=1 --name foo").unwrap_err();
        assert_eq!(err.to_string(), "--name is not allowed in --docker-options");
        assert_eq!(
            run_options("-e A=1 --memory=512m").unwrap(),
            vec!["-e", "A=1", "--memory=512m"]
        );
        assert!(run_options("--publisher").is_ok());
    }

    #[test]
    fn forbidden_build_options() {
        assert!(build_options("-t x").is_err());
        assert!(build_options("--file=Dockerfile").is_err());
        assert!(build_options("--no-cache --build-arg A=1").is_ok());
    }

    #[test]
    fn split_options_honours_quotes() {
        assert_eq!(
            split_options(r#"-e "A=hello world" --label='x y'"#),
            vec!["-e", "A=hello world", "--label=x y"]
        );
        assert!(split_options("   ").is_empty());
    }

    #[test]
    fn env_harvested_from_options() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("vars.env"), "# comment\nB=2\n\nC=3\n").unwrap();
        let opts = split_options("-e A=1 --env=D=4 --env-file vars.env --memory 1g");
        let env = env_from_options(&opts, dir.path());
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "2");
        assert_eq!(env["C"], "3");
        assert_eq!(env["D"], "4");
        assert_eq!(env.len(), 4);
    }

    #[test]
    fn run_spec_order() {
        let spec = RunSpec {
            name: "app-dev".into(),
            port_args: vec!["-p".into(), "3000:3000".into()],
            volumes: vec!["/p:/project".into()],
            tty: true,
            entrypoint: Some("/appsody/appsody-controller".into()),
            image: "appsody/nodejs:0.3".into(),
            command: vec!["--mode=run".into()],
            ..RunSpec::default()
        };
        assert_eq!(
            spec.to_args().join(" "),
            "run --rm -p 3000:3000 --name app-dev -v /p:/project -t --entrypoint /appsody/appsody-controller appsody/nodejs:0.3 --mode=run"
        );
    }

    #[test]
    fn build_spec_args_per_engine() {
        let spec = BuildSpec {
            tag: "my-app".into(),
            dockerfile: PathBuf::from("/x/Dockerfile"),
            context: PathBuf::from("/x"),
            labels: vec!["a=b".into()],
            options: vec!["--no-cache".into()],
        };
        assert_eq!(
            spec.to_args(Engine::Docker).join(" "),
            "build -t my-app --no-cache --label a=b -f /x/Dockerfile /x"
        );
        assert_eq!(spec.to_args(Engine::Buildah)[0], "bud");
    }

    #[test]
    fn ps_keeps_controller_containers() {
        let out = [
            "0123456789abcdef$!$!$!appsody/nodejs$!$!$!Up 2 minutes$!$!$!app-dev$!$!$!\"/appsody/appsody-controller --mode=run\"",
            "fedcba9876543210$!$!$!nginx$!$!$!Up 1 hour$!$!$!web$!$!$!\"nginx -g\"",
        ]
        .join("\n");
        let rows = parse_ps(&out);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "0123456789ab");
        assert_eq!(rows[0].name, "app-dev");
    }

    #[test]
    fn pull_policy_parse() {
        assert_eq!(PullPolicy::parse("IFNOTPRESENT"), PullPolicy::IfNotPresent);
        assert_eq!(PullPolicy::parse("always"), PullPolicy::Always);
        assert_eq!(PullPolicy::parse("bogus"), PullPolicy::Always);
    }
}
