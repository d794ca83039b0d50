//! `kubectl` facade. Every call, queries included, is skipped in dry-run.

use crate::context::Context;
use crate::error::{AppsodyError, Result};
use crate::exec;
use std::path::Path;

const KUBECTL: &str = "kubectl";

/// Run `kubectl <args>` and return trimmed stdout; `op` names the failure.
pub fn run(ctx: &Context, args: Vec<String>, op: &str) -> Result<String> {
    if ctx.dry_run {
        tracing::info!(
            "Dry run - skipping execution of: {}",
            exec::command_line(KUBECTL, &args)
        );
        return Ok(String::new());
    }
    tracing::info!("Running command: {}", exec::command_line(KUBECTL, &args));
    let out = exec::capture(KUBECTL, &args)?;
    let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        return Err(AppsodyError::Cluster {
            op: op.to_string(),
            message: if stderr.is_empty() { stdout } else { stderr },
        });
    }
    tracing::debug!("kubectl {op} success: {stdout}");
    Ok(stdout)
}

fn with_namespace(mut args: Vec<String>, namespace: &str) -> Vec<String> {
    if !namespace.is_empty() {
        args.push("--namespace".into());
        args.push(namespace.to_string());
    }
    args
}

pub fn apply(ctx: &Context, file: &Path, namespace: &str) -> Result<()> {
    tracing::info!("Attempting to apply resource in Kubernetes ...");
    let args = vec!["apply".into(), "-f".into(), file.to_string_lossy().to_string()];
    run(ctx, with_namespace(args, namespace), "apply").map(|_| ())
}

pub fn delete(ctx: &Context, file: &Path, namespace: &str) -> Result<()> {
    tracing::info!("Attempting to delete resource from Kubernetes...");
    let args = vec!["delete".into(), "-f".into(), file.to_string_lossy().to_string()];
    run(ctx, with_namespace(args, namespace), "delete").map(|_| ())
}

pub fn get(ctx: &Context, args: &[&str], namespace: &str) -> Result<String> {
    let mut full = vec!["get".to_string()];
    full.extend(args.iter().map(|a| a.to_string()));
    run(ctx, with_namespace(full, namespace), "get")
}

/// External URL of a deployed service: Knative route, then OpenShift route,
/// then node port.
pub fn deployment_url(ctx: &Context, service: &str, namespace: &str) -> Result<String> {
    let attempts: [&[&str]; 3] = [
        &["rt", service, "-o", "jsonpath={.status.url}"],
        &["route", service, "-o", "jsonpath={.status.ingress[0].host}"],
        &[
            "svc",
            service,
            "-o",
            "jsonpath=http://{.status.loadBalancer.ingress[0].hostname}:{.spec.ports[0].nodePort}",
        ],
    ];
    let mut last_err = None;
    for args in attempts {
        match get(ctx, args, namespace) {
            Ok(url) => return Ok(url),
            Err(e) => {
                tracing::debug!("URL lookup failed: {e}");
                last_err = Some(e);
            }
        }
    }
    if let Some(e) = last_err {
        tracing::error!("Failed to get deployment hostname and port: {e}");
    }
    Err(AppsodyError::ClusterNotFound(service.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use tempfile::TempDir;

    #[test]
    fn namespace_is_appended() {
        let args = with_namespace(vec!["get".into(), "pods".into()], "dev");
        assert_eq!(args, vec!["get", "pods", "--namespace", "dev"]);
        let args = with_namespace(vec!["get".into()], "");
        assert_eq!(args, vec!["get"]);
    }

    #[test]
    fn dry_run_returns_empty_output() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).with_dry_run(true);
        assert_eq!(get(&ctx, &["pods"], "default").unwrap(), "");
        apply(&ctx, Path::new("app-deploy.yaml"), "default").unwrap();
        assert_eq!(deployment_url(&ctx, "svc", "default").unwrap(), "");
    }
}
