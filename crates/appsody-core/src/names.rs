//! Name rules shared by projects, stacks, Kubernetes labels and image references.
//!
//! Project names double as Kubernetes resource names, label values and
//! container names, so they follow the strictest of the three rule sets.

use crate::error::{AppsodyError, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

pub const MAX_PROJECT_NAME_LEN: usize = 68;
pub const MAX_LABEL_VALUE_LEN: usize = 63;

static PROJECT_NAME_RE: OnceLock<Regex> = OnceLock::new();
static LABEL_VALUE_RE: OnceLock<Regex> = OnceLock::new();
static HOST_PORT_RE: OnceLock<Regex> = OnceLock::new();
static INVALID_CHARS_RE: OnceLock<Regex> = OnceLock::new();

fn project_name_re() -> &'static Regex {
    PROJECT_NAME_RE.get_or_init(|| Regex::new(r"^[a-z]([a-z0-9-]*[a-z0-9])?$").unwrap())
}

fn label_value_re() -> &'static Regex {
    LABEL_VALUE_RE
        .get_or_init(|| Regex::new(r"^[a-z0-9A-Z]([a-z0-9A-Z\-_.]*[a-z0-9A-Z])?$").unwrap())
}

fn host_port_re() -> &'static Regex {
    HOST_PORT_RE.get_or_init(|| {
        Regex::new(
            r"^(([a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9\-]*[a-zA-Z0-9])\.)*([A-Za-z0-9]|[A-Za-z0-9][A-Za-z0-9\-]*[A-Za-z0-9])($|:[0-9]{1,5}$)",
        )
        .unwrap()
    })
}

fn invalid_chars_re() -> &'static Regex {
    INVALID_CHARS_RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").unwrap())
}

// ---------------------------------------------------------------------------
// Project and stack names
// ---------------------------------------------------------------------------

pub fn validate_project_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppsodyError::InvalidName {
            name: String::new(),
            reason: "the name cannot be an empty string".into(),
        });
    }
    if name.len() > MAX_PROJECT_NAME_LEN {
        return Err(AppsodyError::InvalidName {
            name: name.to_string(),
            reason: format!("the name must be {MAX_PROJECT_NAME_LEN} characters or less"),
        });
    }
    if !project_name_re().is_match(name) {
        return Err(AppsodyError::InvalidName {
            name: name.to_string(),
            reason: "the name must start with a lowercase letter, contain only lowercase letters, numbers, or dashes, and cannot end in a dash".into(),
        });
    }
    Ok(())
}

/// Stack ids follow the project-name rules.
pub fn validate_stack_id(id: &str) -> Result<()> {
    validate_project_name(id)
}

pub fn is_valid_project_name(name: &str) -> bool {
    validate_project_name(name).is_ok()
}

/// Derive a valid project name from a directory path.
pub fn project_name_from_dir(dir: &Path) -> Result<String> {
    let base = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if is_valid_project_name(&base) {
        return Ok(base);
    }
    Ok(sanitize_project_name(&base))
}

fn sanitize_project_name(raw: &str) -> String {
    let mut name: String = raw.chars().take(MAX_PROJECT_NAME_LEN).collect();
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        name = format!("appsody-{name}");
    }
    let mut name = invalid_chars_re().replace_all(&name, "-").into_owned();
    if name.len() > MAX_PROJECT_NAME_LEN {
        name.truncate(MAX_PROJECT_NAME_LEN);
    }
    if name.ends_with('-') {
        name.push_str("app");
        if name.len() > MAX_PROJECT_NAME_LEN {
            let keep = MAX_PROJECT_NAME_LEN - 4;
            name = format!("{}-app", name[..keep].trim_end_matches('-'));
        }
    }
    name
}

// ---------------------------------------------------------------------------
// Kubernetes labels
// ---------------------------------------------------------------------------

pub fn validate_label_value(value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_LABEL_VALUE_LEN {
        return Err(AppsodyError::InvalidName {
            name: value.to_string(),
            reason: format!("the label must be {MAX_LABEL_VALUE_LEN} characters or less"),
        });
    }
    if !label_value_re().is_match(value) {
        return Err(AppsodyError::InvalidName {
            name: value.to_string(),
            reason: "the label must begin and end with an alphanumeric character ([a-z0-9A-Z]) with dashes (-), underscores (_), dots (.), and alphanumerics between".into(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Image references
// ---------------------------------------------------------------------------

pub fn validate_host_and_port(host: &str) -> Result<()> {
    if host_port_re().is_match(host) {
        Ok(())
    } else {
        Err(AppsodyError::UserInput(format!(
            "This is an invalid host name: {host}"
        )))
    }
}

/// `nodejs` becomes `docker.io/nodejs`; `index.docker.io/a/b` becomes `docker.io/a/b`.
pub fn normalize_image_name(image: &str) -> Result<String> {
    let parts: Vec<&str> = image.split('/').collect();
    match parts.len() {
        1 => Ok(format!("docker.io/{image}")),
        2 => Ok(image.to_string()),
        3 if parts[0] == "index.docker.io" => Ok(format!("docker.io/{}/{}", parts[1], parts[2])),
        3 => Ok(image.to_string()),
        _ => Err(AppsodyError::UserInput(format!(
            "Image name is invalid: {image}"
        ))),
    }
}

/// Replace (3 components) or prepend (1-2 components) the registry host of an image.
pub fn override_stack_registry(registry: &str, image: &str) -> Result<String> {
    if registry.is_empty() {
        return Ok(image.to_string());
    }
    validate_host_and_port(registry)?;
    let mut parts: Vec<&str> = image.split('/').collect();
    match parts.len() {
        3 => parts[0] = registry,
        1 | 2 => parts.insert(0, registry),
        _ => {
            return Err(AppsodyError::UserInput(format!(
                "Image name is invalid and needs to be changed in the project config file (.appsody-config.yaml): {image}. Too many slashes (/) - the override cannot take place."
            )))
        }
    }
    Ok(parts.join("/"))
}

/// Stack id component of an image reference: `docker.io/appsody/nodejs:0.3` -> `nodejs`.
pub fn stack_id_from_image(image: &str) -> String {
    let without_tag = match image.rfind(':') {
        Some(i) if !image[i..].contains('/') => &image[..i],
        _ => image,
    };
    without_tag
        .rsplit('/')
        .next()
        .unwrap_or(without_tag)
        .to_string()
}

/// Everything after the registry host: `reg:5000/ns/app:1` -> `ns/app:1`.
pub fn strip_registry(image: &str) -> String {
    let parts: Vec<&str> = image.splitn(2, '/').collect();
    if parts.len() == 2 && (parts[0].contains('.') || parts[0].contains(':')) {
        parts[1].to_string()
    } else {
        image.to_string()
    }
}
