//! `appsody stack validate`: lint and package a stack, then exercise it end to
//! end with a throwaway project.

use super::{lint, manifest, package};
use crate::build::{self, BuildOptions};
use crate::container::{self, PullPolicy};
use crate::context::Context;
use crate::devloop::{self, DevOptions, Mode};
use crate::error::{AppsodyError, Result};
use crate::init::{self, InitOptions};
use crate::paths;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

const HEALTH_INTERVAL: Duration = Duration::from_secs(2);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(60);
const RUN_CONTAINER: &str = "appsody-validate-run";

#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    pub no_lint: bool,
    pub no_package: bool,
    pub package: package::PackageOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub step: &'static str,
    pub passed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ValidateReport {
    pub stack: String,
    pub steps: Vec<StepResult>,
}

impl ValidateReport {
    fn record(&mut self, step: &'static str, result: Result<()>) -> bool {
        let passed = match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("{e}");
                false
            }
        };
        self.steps.push(StepResult { step, passed });
        passed
    }

    pub fn passed(&self) -> usize {
        self.steps.iter().filter(|s| s.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.steps.len() - self.passed()
    }

    pub fn summary(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .steps
            .iter()
            .map(|s| {
                let verdict = if s.passed { "PASSED" } else { "FAILED" };
                format!("{verdict}: {} for stack: {}", s.step, self.stack)
            })
            .collect();
        lines.push(format!("Total PASSED: {}", self.passed()));
        lines.push(format!("Total FAILED: {}", self.failed()));
        lines
    }
}

pub fn validate(ctx: &Context, stack_dir: &Path, opts: &ValidateOptions) -> Result<ValidateReport> {
    let stack = manifest::stack_id(stack_dir)?;
    let mut report = ValidateReport {
        stack: stack.clone(),
        ..ValidateReport::default()
    };
    tracing::info!("Validating stack {stack}");

    if !opts.no_lint {
        report.record("Lint", lint::lint(stack_dir).map(|_| ()));
    }
    if !opts.no_package {
        report.record("Package", package::package(ctx, stack_dir, &opts.package).map(|_| ()));
    }

    let scratch = tempfile::Builder::new().prefix("appsody-validate-").tempdir()?;
    let project_dir = scratch.path().join(format!("appsody-{stack}-test-project"));
    crate::io::ensure_dir(&project_dir)?;
    tracing::info!("Created project dir: {}", project_dir.display());
    let mut project = ctx.detached().with_project_dir(&project_dir);
    project.pull_policy = PullPolicy::IfNotPresent;

    let init_opts = InitOptions {
        stack: Some(format!("{}/{stack}", paths::DEV_LOCAL)),
        ..InitOptions::default()
    };
    if report.record("Init", init::init(&project, &init_opts)) {
        report.record("Run", run_step(&project));
        let mut test = DevOptions::new(Mode::Test);
        test.no_watcher = true;
        report.record("Test", devloop::run(&project, &test));
        report.record("Build", build_step(&project));
    }

    tracing::info!("Removing project dir: {}", project_dir.display());
    drop(scratch);

    tracing::info!("@@@@@@@@@ Validate Summary Start @@@@@@@@@@");
    for line in report.summary() {
        tracing::info!("{line}");
    }
    tracing::info!("@@@@@@@@@ Validate Summary End @@@@@@@@@@");
    Ok(report)
}

/// Start `appsody run` in the background and wait for its container to show up.
fn run_step(ctx: &Context) -> Result<()> {
    let mut opts = DevOptions::new(Mode::Run);
    opts.container_name = Some(RUN_CONTAINER.to_string());
    if ctx.dry_run {
        return devloop::run(ctx, &opts);
    }

    let worker = ctx.detached();
    let (tx, rx) = mpsc::channel();
    let handle = std::thread::spawn(move || {
        let _ = tx.send(devloop::run(&worker, &opts));
    });

    let mut waited = Duration::ZERO;
    while waited < HEALTH_TIMEOUT {
        match rx.recv_timeout(HEALTH_INTERVAL) {
            Ok(Err(e)) => return Err(e),
            Ok(Ok(())) => {
                return Err(AppsodyError::UserInput(
                    "appsody run exited before its container was found".into(),
                ))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(AppsodyError::Internal("appsody run ended without a result".into()))
            }
            Err(RecvTimeoutError::Timeout) => waited += HEALTH_INTERVAL,
        }
        let rows = container::ps()?;
        if rows.iter().any(|r| r.name == RUN_CONTAINER) {
            tracing::info!("appsody ps contains the container {RUN_CONTAINER}");
            if let Err(e) = container::stop(ctx, RUN_CONTAINER) {
                tracing::error!("appsody stop failed: {e}");
            }
            let _ = handle.join();
            return Ok(());
        }
        tracing::debug!("appsody ps does not list {RUN_CONTAINER} yet");
    }

    if let Err(e) = container::stop(ctx, RUN_CONTAINER) {
        tracing::debug!("appsody stop failed: {e}");
    }
    Err(AppsodyError::UserInput(
        "appsody ps never found the correct container".into(),
    ))
}

fn build_step(ctx: &Context) -> Result<()> {
    let image = format!("{}/{}", paths::DEV_LOCAL, ctx.project_name()?);
    let opts = BuildOptions {
        tag: Some(image.clone()),
        ..BuildOptions::new()
    };
    build::build(ctx, &opts)?;
    if ctx.dry_run {
        return Ok(());
    }
    let found = container::image_ls(ctx, &image)?
        .iter()
        .any(|line| line.starts_with(&image));
    if !found {
        return Err(AppsodyError::BuildFailed(format!("image {image} was never built")));
    }
    tracing::info!("Image {image} was found");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use crate::stack::manifest::test_support::write_stack;
    use tempfile::TempDir;

    #[test]
    fn summary_counts_steps() {
        let mut report = ValidateReport {
            stack: "nodejs".into(),
            ..ValidateReport::default()
        };
        assert!(report.record("Lint", Ok(())));
        assert!(!report.record("Package", Err(AppsodyError::BuildFailed("boom".into()))));
        assert_eq!(
            report.summary(),
            vec![
                "PASSED: Lint for stack: nodejs",
                "FAILED: Package for stack: nodejs",
                "Total PASSED: 1",
                "Total FAILED: 1",
            ]
        );
    }

    #[test]
    fn failed_init_skips_the_project_steps() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).with_dry_run(true);
        let stack = write_stack(dir.path());
        let opts = ValidateOptions {
            no_package: true,
            ..ValidateOptions::default()
        };
        let report = validate(&ctx, &stack, &opts).unwrap();
        let steps: Vec<(&str, bool)> = report.steps.iter().map(|s| (s.step, s.passed)).collect();
        // nothing was packaged, so dev.local has no index to init from
        assert_eq!(steps, vec![("Lint", true), ("Init", false)]);
        assert_eq!(report.failed(), 1);
    }
}
