//! Installing and removing the appsody operator that reconciles
//! `AppsodyApplication` resources.

use crate::cluster;
use crate::context::Context;
use crate::download;
use crate::error::{AppsodyError, Result};
use crate::manifests;
use crate::paths;
use std::path::PathBuf;

pub const CRD_FILE: &str = "appsody-app-crd.yaml";
pub const RBAC_FILE: &str = "appsody-app-cluster-rbac.yaml";
pub const OPERATOR_FILE: &str = "appsody-app-operator.yaml";
const OPERATOR_NAME: &str = "appsody-operator";

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub namespace: String,
    /// Namespace to watch; defaults to `namespace`.
    pub watchspace: Option<String>,
    pub watch_all: bool,
}

impl InstallOptions {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            watchspace: None,
            watch_all: false,
        }
    }

    /// The namespace the operator will watch; empty means all of them.
    pub fn watch_namespace(&self) -> String {
        if self.watch_all {
            return String::new();
        }
        self.watchspace
            .clone()
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| self.namespace.clone())
    }
}

/// jsonpath output sometimes arrives quoted.
fn trim_output(out: &str) -> &str {
    out.trim_matches(|c: char| c == '\'' || c == '\u{2019}' || c.is_whitespace())
}

fn name_filter(field: &str) -> String {
    format!("-o=jsonpath={{.items[?(@.metadata.name==\"{OPERATOR_NAME}\")].{field}}}")
}

pub fn exists_in_namespace(ctx: &Context, namespace: &str) -> Result<bool> {
    let out = cluster::get(ctx, &["deployments", &name_filter("metadata.namespace")], namespace)?;
    Ok(!trim_output(&out).is_empty())
}

fn watchspace_of(ctx: &Context, namespace: &str) -> Result<String> {
    let filter = name_filter("spec.template.spec.containers[0].env[?(@.name==\"WATCH_NAMESPACE\")].value");
    let out = cluster::get(ctx, &["deployment", &filter], namespace)?;
    Ok(trim_output(&out).to_string())
}

/// Namespace of an operator that already covers `watch`, if any. An empty
/// `watch` asks for a cluster-wide operator, which conflicts with any other.
pub fn exists_with_watchspace(ctx: &Context, watch: &str) -> Result<Option<String>> {
    tracing::debug!("Looking for an operator matching watchspace: {watch}");
    let out = cluster::get(
        ctx,
        &["deployments", &name_filter("metadata.namespace"), "--all-namespaces"],
        "",
    )?;
    let namespaces: Vec<&str> = trim_output(&out).split_whitespace().collect();
    if namespaces.is_empty() {
        tracing::info!("There are no deployments with {OPERATOR_NAME}");
        return Ok(None);
    }
    if watch.is_empty() {
        return Err(AppsodyError::UserInput(
            "You specified --watch-all, but there are already instances of the appsody operator on the cluster".into(),
        ));
    }
    for ns in namespaces {
        let watching = watchspace_of(ctx, ns)?;
        tracing::debug!("Operator in namespace {ns} is watching namespace '{watching}'");
        if watching == watch {
            return Ok(Some(ns.to_string()));
        }
        if watching.is_empty() {
            tracing::info!("An operator exists in namespace {ns}, that is watching all namespaces");
            return Ok(Some(ns.to_string()));
        }
    }
    Ok(None)
}

pub fn count(ctx: &Context) -> Result<usize> {
    let out = cluster::get(
        ctx,
        &["deployments", &name_filter("metadata.name"), "--all-namespaces"],
        "",
    )?;
    Ok(out.matches(OPERATOR_NAME).count())
}

fn application_count(ctx: &Context, namespace: &str) -> Result<usize> {
    let mut args = vec!["AppsodyApplication", "-o=jsonpath={.items[*].kind}"];
    if namespace.is_empty() {
        args.push("--all-namespaces");
    }
    let out = cluster::get(ctx, &args, namespace)?;
    Ok(out.matches(manifests::APPSODY_KIND).count())
}

/// Download one operator manifest into `<home>/deploy`, substituting placeholders.
fn fetch_manifest(ctx: &Context, name: &str, vars: &[(&str, &str)]) -> Result<PathBuf> {
    let url = format!("{}/{name}", ctx.config.operator.trim_end_matches('/'));
    let target = paths::deploy_config_dir(&ctx.home).join(name);
    if ctx.dry_run {
        tracing::info!("Skipping download of yaml: {url}");
        return Ok(target);
    }
    let body = download::fetch_string(&url).map_err(|e| {
        AppsodyError::UserInput(format!("Could not download Operator YAML file {url}: {e}"))
    })?;
    crate::io::atomic_write(&target, manifests::substitute(&body, vars).as_bytes())?;
    Ok(target)
}

fn remove_local(ctx: &Context, path: &std::path::Path) -> Result<()> {
    if !ctx.dry_run && path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

pub fn install(ctx: &Context, opts: &InstallOptions) -> Result<()> {
    let namespace = opts.namespace.as_str();
    let watch = opts.watch_namespace();
    tracing::debug!("Installing operator in {namespace} watching '{watch}'");

    if exists_in_namespace(ctx, namespace)? {
        return Err(AppsodyError::UserInput(format!(
            "An operator already exists in namespace: {namespace}"
        )));
    }
    if exists_with_watchspace(ctx, &watch)?.is_some() {
        return Err(AppsodyError::UserInput(format!(
            "An operator already exists watching namespace: {watch}"
        )));
    }

    let crd = fetch_manifest(ctx, CRD_FILE, &[])?;
    cluster::apply(ctx, &crd, "")?;

    if namespace != watch || opts.watch_all {
        let rbac = fetch_manifest(ctx, RBAC_FILE, &[("APPSODY_OPERATOR_NAMESPACE", namespace)])?;
        cluster::apply(ctx, &rbac, "")?;
    }

    let operator = fetch_manifest(
        ctx,
        OPERATOR_FILE,
        &[
            ("APPSODY_OPERATOR_NAMESPACE", namespace),
            ("APPSODY_WATCH_NAMESPACE", &watch),
        ],
    )?;
    cluster::apply(ctx, &operator, namespace)?;
    tracing::info!("Appsody operator deployed to Kubernetes");
    Ok(())
}

pub fn uninstall(ctx: &Context, namespace: &str, force: bool) -> Result<()> {
    let watch = if ctx.dry_run {
        tracing::info!("Dry run - skipping lookup of the operator watchspace in {namespace}");
        String::new()
    } else {
        if !exists_in_namespace(ctx, namespace)? {
            return Err(AppsodyError::UserInput(format!(
                "An appsody operator could not be found in namespace: {namespace}"
            )));
        }
        watchspace_of(ctx, namespace)?
    };
    tracing::debug!("Operator is watching the '{watch}' namespace");

    let apps = application_count(ctx, &watch).map_err(|e| {
        AppsodyError::UserInput(format!(
            "Could not determine if there are AppsodyApplication instances: {e}"
        ))
    })?;
    if apps > 0 {
        if !force {
            return Err(AppsodyError::UserInput(
                "There are outstanding appsody applications for this operator - resubmit the command with --force if you want to remove them.".into(),
            ));
        }
        let mut args = vec!["delete".to_string(), manifests::APPSODY_KIND.to_string(), "--all".to_string()];
        if !watch.is_empty() {
            args.extend(["-n".to_string(), watch.clone()]);
        }
        cluster::run(ctx, args, "delete")?;
    }

    if watch != namespace {
        let rbac = fetch_manifest(ctx, RBAC_FILE, &[("APPSODY_OPERATOR_NAMESPACE", namespace)])?;
        match cluster::delete(ctx, &rbac, "") {
            Err(AppsodyError::Cluster { message, .. }) if message.contains("(NotFound)") => {
                tracing::debug!("Operator RBAC was already removed: {message}");
            }
            other => other?,
        }
        remove_local(ctx, &rbac)?;
    }

    let operator = fetch_manifest(
        ctx,
        OPERATOR_FILE,
        &[
            ("APPSODY_OPERATOR_NAMESPACE", namespace),
            ("APPSODY_WATCH_NAMESPACE", &watch),
        ],
    )?;
    cluster::delete(ctx, &operator, namespace)?;
    remove_local(ctx, &operator)?;
    tracing::info!("Appsody operator removed from Kubernetes");

    let remaining = count(ctx)?;
    tracing::debug!("Appsody operator count is: {remaining}");
    if remaining == 0 {
        let crd = fetch_manifest(ctx, CRD_FILE, &[])?;
        cluster::delete(ctx, &crd, "")?;
        remove_local(ctx, &crd)?;
    }
    Ok(())
}

/// Install an operator watching `namespace` unless one already covers it.
pub fn ensure(ctx: &Context, namespace: &str) -> Result<()> {
    match exists_with_watchspace(ctx, namespace)? {
        Some(ns) => {
            tracing::debug!("Using the operator in namespace {ns}");
            Ok(())
        }
        None => {
            tracing::info!("Deploying an appsody operator to namespace {namespace}");
            install(ctx, &InstallOptions::new(namespace))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use tempfile::TempDir;

    #[test]
    fn watch_namespace_defaults() {
        let mut opts = InstallOptions::new("ops");
        assert_eq!(opts.watch_namespace(), "ops");
        opts.watchspace = Some("apps".into());
        assert_eq!(opts.watch_namespace(), "apps");
        opts.watch_all = true;
        assert_eq!(opts.watch_namespace(), "");
    }

    #[test]
    fn quoted_jsonpath_output() {
        assert_eq!(trim_output("'default kube-system'\n"), "default kube-system");
        assert_eq!(trim_output("''"), "");
    }

    #[test]
    fn manifest_placeholders_are_substituted() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/appsody-app-operator.yaml")
            .with_body("namespace: APPSODY_OPERATOR_NAMESPACE\nwatch: APPSODY_WATCH_NAMESPACE\n")
            .create();

        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        ctx.config.operator = server.url();
        let path = fetch_manifest(
            &ctx,
            OPERATOR_FILE,
            &[("APPSODY_OPERATOR_NAMESPACE", "ops"), ("APPSODY_WATCH_NAMESPACE", "apps")],
        )
        .unwrap();
        mock.assert();
        assert_eq!(path, paths::deploy_config_dir(&ctx.home).join(OPERATOR_FILE));
        assert_eq!(
            std::fs::read_to_string(path).unwrap(),
            "namespace: ops\nwatch: apps\n"
        );
    }

    #[test]
    fn missing_manifest_is_reported() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/appsody-app-crd.yaml").with_status(404).create();
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        ctx.config.operator = server.url();
        let err = fetch_manifest(&ctx, CRD_FILE, &[]).unwrap_err();
        assert!(err.to_string().contains("Could not download Operator YAML file"));
    }

    #[test]
    fn dry_run_install_skips_cluster_and_downloads() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).with_dry_run(true);
        install(&ctx, &InstallOptions::new("default")).unwrap();
        ensure(&ctx, "default").unwrap();
        assert!(!paths::deploy_config_dir(&ctx.home).join(CRD_FILE).exists());
    }
}
