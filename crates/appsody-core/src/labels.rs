//! Image labels: collected from the stack image, the project config and git,
//! and converted to Kubernetes label/annotation keys for deploy manifests.

use crate::container;
use crate::context::Context;
use crate::error::{AppsodyError, Result};
use crate::git::{self, GitInfo};
use crate::index::Maintainer;
use crate::names;
use chrono::{DateTime, Local, SecondsFormat};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const OCI_PREFIX: &str = "org.opencontainers.image.";
pub const STACK_PREFIX: &str = "dev.appsody.stack.";
pub const IMAGE_COMMIT_PREFIX: &str = "dev.appsody.image.commit.";
pub const APP_NAME_LABEL: &str = "dev.appsody.app.name";

/// Kubernetes keys that go to `metadata.labels`; everything else becomes an annotation.
pub const SUPPORTED_KUBE_LABELS: &[&str] = &[
    "image.opencontainers.org/title",
    "image.opencontainers.org/version",
    "image.opencontainers.org/licenses",
    "stack.appsody.dev/id",
    "stack.appsody.dev/version",
    "app.appsody.dev/name",
];

const MAX_KUBE_PREFIX_LEN: usize = 253;

pub type Labels = BTreeMap<String, String>;

/// Descriptive fields that become OCI labels. Filled from the project config
/// for builds and from `stack.yaml` for stack packaging.
#[derive(Debug, Clone, Default)]
pub struct Description {
    pub title: String,
    pub version: String,
    pub description: String,
    pub license: String,
    pub maintainers: Vec<Maintainer>,
    pub stack: String,
    pub application_name: String,
}

fn validated(field: &str, value: &str) -> Result<String> {
    names::validate_label_value(value).map_err(|e| {
        AppsodyError::UserInput(format!(
            "{} {field} value is invalid. {e}",
            crate::paths::PROJECT_CONFIG_FILE
        ))
    })?;
    Ok(value.to_string())
}

pub fn config_labels(desc: &Description, created: DateTime<Local>) -> Result<Labels> {
    let mut labels = Labels::new();
    labels.insert(
        format!("{OCI_PREFIX}created"),
        created.to_rfc3339_opts(SecondsFormat::Secs, false),
    );

    let authors = desc
        .maintainers
        .iter()
        .map(|m| format!("{} <{}>", m.name, m.email))
        .collect::<Vec<_>>()
        .join(", ");
    if !authors.is_empty() {
        labels.insert(format!("{OCI_PREFIX}authors"), authors);
    }
    if !desc.version.is_empty() {
        labels.insert(format!("{OCI_PREFIX}version"), validated("version", &desc.version)?);
    }
    if !desc.license.is_empty() {
        labels.insert(format!("{OCI_PREFIX}licenses"), validated("license", &desc.license)?);
    }
    if !desc.title.is_empty() {
        labels.insert(format!("{OCI_PREFIX}title"), desc.title.clone());
    }
    if !desc.description.is_empty() {
        labels.insert(format!("{OCI_PREFIX}description"), desc.description.clone());
    }
    if !desc.stack.is_empty() {
        labels.insert(format!("{STACK_PREFIX}configured"), desc.stack.clone());
    }
    if !desc.application_name.is_empty() {
        labels.insert(
            APP_NAME_LABEL.to_string(),
            validated("application-name", &desc.application_name)?,
        );
    }
    Ok(labels)
}

pub fn git_labels(info: &GitInfo) -> Labels {
    let mut labels = Labels::new();
    if !info.remote_url.is_empty() {
        labels.insert(format!("{OCI_PREFIX}url"), info.remote_url.clone());
        labels.insert(format!("{OCI_PREFIX}documentation"), info.remote_url.clone());
        let branch = match info.upstream.split('/').nth(1) {
            Some(b) => b,
            None => &info.branch,
        };
        labels.insert(
            format!("{OCI_PREFIX}source"),
            format!("{}/tree/{branch}", info.remote_url),
        );
    }

    let commit = &info.commit;
    if !commit.sha.is_empty() {
        let mut revision = commit.sha.clone();
        if info.changes_made {
            revision.push_str("-modified");
        }
        labels.insert(format!("{OCI_PREFIX}revision"), revision);
    }
    let person = |name: &str, email: &str| match (name.is_empty(), email.is_empty()) {
        (true, true) => None,
        (false, true) => Some(name.to_string()),
        (true, false) => Some(format!(" <{email}>")),
        (false, false) => Some(format!("{name} <{email}>")),
    };
    if let Some(author) = person(&commit.author, &commit.author_email) {
        labels.insert(format!("{IMAGE_COMMIT_PREFIX}author"), author);
    }
    if let Some(committer) = person(&commit.committer, &commit.committer_email) {
        labels.insert(format!("{IMAGE_COMMIT_PREFIX}committer"), committer);
    }
    for (key, value) in [
        ("date", &commit.date),
        ("message", &commit.message),
        ("contextDir", &commit.context_dir),
    ] {
        if !value.is_empty() {
            labels.insert(format!("{IMAGE_COMMIT_PREFIX}{key}"), value.clone());
        }
    }
    labels
}

/// Stack image labels are re-homed under `dev.appsody.stack.` on the app image.
pub fn remap_stack_key(key: &str) -> String {
    if key == "appsody.stack" {
        return format!("{STACK_PREFIX}tag");
    }
    key.replacen(OCI_PREFIX, STACK_PREFIX, 1)
        .replacen(IMAGE_COMMIT_PREFIX, &format!("{STACK_PREFIX}commit."), 1)
}

/// Stack labels override config labels with the same key; git labels win last.
pub fn merge(stack: &Labels, mut config: Labels, git: Labels) -> Labels {
    let mut labels = Labels::new();
    for (key, value) in stack {
        let key = remap_stack_key(key);
        config.remove(&key);
        labels.insert(key, value.clone());
    }
    labels.extend(config);
    labels.extend(git);
    labels
}

/// Git labels for the project directory, logging (not failing) when git
/// cannot tell us everything.
pub fn project_git_labels(ctx: &Context) -> Labels {
    let (info, err) = git::info(&ctx.project_dir);
    if let Some(e) = err {
        tracing::info!("{e}");
    }
    git_labels(&info)
}

/// All labels for an application image built from the current project.
pub fn project_labels(ctx: &Context) -> Result<Labels> {
    let project = ctx.project_config()?;
    let image = project.stack_image()?;
    container::pull(ctx, &image)?;
    let stack = container::inspect(ctx, &image)?.labels;

    let desc = Description {
        title: ctx.project_name()?,
        stack: project.stack.clone(),
        application_name: project.application_name.clone().unwrap_or_default(),
        ..Description::default()
    };
    let config = config_labels(&desc, Local::now())?;
    Ok(merge(&stack, config, project_git_labels(ctx)))
}

/// `--label k=v` pairs in key order.
pub fn label_args(labels: &Labels) -> Vec<String> {
    labels.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

// ---------------------------------------------------------------------------
// Kubernetes keys
// ---------------------------------------------------------------------------

static DOMAIN_RE: OnceLock<Regex> = OnceLock::new();

fn domain_re() -> &'static Regex {
    DOMAIN_RE.get_or_init(|| Regex::new(r"^[a-z0-9A-Z][a-z0-9A-Z.]*\.").unwrap())
}

/// `org.opencontainers.image.title` becomes `image.opencontainers.org/title`.
pub fn to_kube_key(key: &str) -> Result<String> {
    let (prefix, name) = match domain_re().find(key) {
        None => (String::new(), key),
        Some(m) => {
            let domain: Vec<&str> = key[..m.end()].split('.').filter(|s| !s.is_empty()).rev().collect();
            (format!("{}/", domain.join(".")), &key[m.end()..])
        }
    };
    let invalid = |reason: String| AppsodyError::InvalidName {
        name: key.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("Invalid kubernetes metadata name. Must not be empty".into()));
    }
    if prefix.len() > MAX_KUBE_PREFIX_LEN {
        return Err(invalid(format!(
            "Invalid kubernetes metadata prefix. Must be less than {MAX_KUBE_PREFIX_LEN} characters"
        )));
    }
    names::validate_label_value(name)
        .map_err(|e| invalid(format!("Invalid kubernetes metadata name. {e}")))?;
    Ok(format!("{prefix}{name}"))
}

/// Split image labels into Kubernetes `(labels, annotations)`. Keys that
/// cannot be expressed are dropped.
pub fn kube_metadata(labels: &Labels) -> (Labels, Labels) {
    let mut annotations = Labels::new();
    for (key, value) in labels {
        match to_kube_key(key) {
            Ok(k) => {
                annotations.insert(k, value.clone());
            }
            Err(e) => tracing::debug!("Skipping image label \"{key}\" - {e}"),
        }
    }
    let mut selected = Labels::new();
    for key in SUPPORTED_KUBE_LABELS {
        if let Some(value) = annotations.remove(*key) {
            if !value.is_empty() {
                selected.insert(key.to_string(), value);
            }
        }
    }
    (selected, annotations)
}
