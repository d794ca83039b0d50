//! `appsody stack lint`: structural and content checks over a stack source tree.

use super::manifest::{self, StackYaml};
use crate::error::{AppsodyError, Result};
use crate::names;
use crate::paths;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

const MAX_NAME_LEN: usize = 30;
const MAX_DESCRIPTION_LEN: usize = 70;

const REQUIRED_ENV: &[&str] = &[
    "APPSODY_MOUNTS",
    "APPSODY_RUN",
    "APPSODY_RUN_ON_CHANGE",
    "APPSODY_RUN_KILL",
    "APPSODY_DEBUG",
    "APPSODY_DEBUG_ON_CHANGE",
    "APPSODY_DEBUG_KILL",
    "APPSODY_TEST",
    "APPSODY_TEST_ON_CHANGE",
    "APPSODY_TEST_KILL",
];
const OPTIONAL_ENV: &[&str] = &["APPSODY_DEPS", "APPSODY_WATCH_DIR"];

fn templating_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9]*$").unwrap())
}

/// Findings of one lint run. Each finding is logged as it is recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl LintReport {
    fn error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::error!("{msg}");
        self.errors.push(msg);
    }

    fn warning(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::warn!("{msg}");
        self.warnings.push(msg);
    }

    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Lint `stack_dir`, log the totals and fail with `LintFailed` on any error.
pub fn lint(stack_dir: &Path) -> Result<LintReport> {
    let report = check(stack_dir)?;
    if !report.passed() {
        tracing::info!("TOTAL ERRORS: {}", report.errors.len());
        tracing::info!("TOTAL WARNINGS: {}", report.warnings.len());
        return Err(AppsodyError::LintFailed {
            errors: report.errors.len(),
            warnings: report.warnings.len(),
        });
    }
    tracing::info!("TOTAL WARNINGS: {}", report.warnings.len());
    tracing::info!("LINT TEST PASSED");
    Ok(report)
}

/// Run every check without deciding pass or fail.
pub fn check(stack_dir: &Path) -> Result<LintReport> {
    let mut report = LintReport::default();
    if !stack_dir.is_dir() {
        return Err(AppsodyError::UserInput(format!(
            "The stack directory {} does not exist",
            stack_dir.display()
        )));
    }
    let id = manifest::stack_id(stack_dir)?;
    tracing::info!("LINTING {id}");
    if let Err(e) = names::validate_stack_id(&id) {
        report.error(format!("The stack directory name is not a valid stack id: {e}"));
    }

    check_structure(stack_dir, &mut report);
    check_stack_yaml(stack_dir, &mut report);
    check_dockerfile_stack(stack_dir, &mut report);
    Ok(report)
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

fn check_structure(stack_dir: &Path, report: &mut LintReport) {
    let image = stack_dir.join(manifest::IMAGE_DIR);
    let templates = manifest::templates_dir(stack_dir);

    for (path, place) in [
        (stack_dir.join(manifest::README_FILE), stack_dir),
        (stack_dir.join(manifest::STACK_FILE), stack_dir),
        (image.clone(), stack_dir),
        (image.join(manifest::DOCKERFILE_STACK), image.as_path()),
        (image.join(manifest::LICENSE_FILE), image.as_path()),
    ] {
        if !path.exists() {
            report.error(format!(
                "Missing {} in: {}",
                file_name(&path),
                place.display()
            ));
        }
    }

    let config = image.join("config");
    if !config.join(paths::APP_DEPLOY_FILE).exists() {
        report.warning(format!(
            "Missing {} in: {} (Knative deployment will be used over Kubernetes)",
            paths::APP_DEPLOY_FILE,
            config.display()
        ));
    }
    let project = image.join("project");
    if !project.join("Dockerfile").exists() {
        report.warning(format!("Missing Dockerfile in: {}", project.display()));
    }

    if !templates.is_dir() {
        report.error(format!("Missing template directory in: {}", stack_dir.display()));
        return;
    }
    let names = manifest::template_names(stack_dir).unwrap_or_default();
    if names.is_empty() {
        report.error(format!("No templates found in: {}", templates.display()));
    }
    for name in names {
        let dir = templates.join(&name);
        if dir.join(paths::PROJECT_CONFIG_FILE).exists() {
            report.error(format!(
                "Unexpected {} in: {}",
                paths::PROJECT_CONFIG_FILE,
                dir.display()
            ));
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// stack.yaml
// ---------------------------------------------------------------------------

fn check_stack_yaml(stack_dir: &Path, report: &mut LintReport) {
    let path = stack_dir.join(manifest::STACK_FILE);
    if !path.exists() {
        return;
    }
    tracing::info!("LINTING {}: {}", manifest::STACK_FILE, path.display());
    let yaml = match StackYaml::load(stack_dir) {
        Ok(yaml) => yaml,
        Err(e) => {
            report.error(e.to_string());
            return;
        }
    };

    for (field, value) in [
        ("name", &yaml.name),
        ("version", &yaml.version),
        ("description", &yaml.description),
        ("license", &yaml.license),
        ("language", &yaml.language),
        ("default-template", &yaml.default_template),
    ] {
        if value.trim().is_empty() {
            report.error(format!("Missing value for field: {field}"));
        }
    }
    let license = yaml.license.trim();
    if !license.is_empty() && spdx::license_id(license).is_none() {
        report.error(format!(
            "The stack.yaml SPDX license ID is invalid: {license}"
        ));
    }
    if yaml.maintainers.is_empty() {
        report.error("At least one maintainer must be listed under field: maintainers");
    }
    if !yaml.version.is_empty() && semver::Version::parse(&yaml.version).is_err() {
        report.error(format!(
            "Version must be formatted as major.minor.patch: {}",
            yaml.version
        ));
    }
    if yaml.name.chars().count() > MAX_NAME_LEN {
        report.error(format!("Stack name must be under {MAX_NAME_LEN} characters"));
    }
    if yaml.description.chars().count() > MAX_DESCRIPTION_LEN {
        report.error(format!(
            "Description must be under {MAX_DESCRIPTION_LEN} characters"
        ));
    }

    if yaml.templating_data.is_empty() {
        report.warning("No custom templating data defined in stack.yaml");
    }
    for (key, value) in &yaml.templating_data {
        if !templating_re().is_match(key) {
            report.error(format!(
                "templating-data key {key} must only contain alphanumeric characters"
            ));
        }
        if !templating_re().is_match(value) {
            report.error(format!(
                "templating-data value for {key} must only contain alphanumeric characters"
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Dockerfile-stack
// ---------------------------------------------------------------------------

fn unquote(value: &str) -> &str {
    let v = value.trim();
    for q in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return &v[1..v.len() - 1];
        }
    }
    v
}

/// `ENV` instructions of a Dockerfile, in either `KEY=value` or `KEY value`
/// form. Line continuations are joined first.
pub fn parse_env(dockerfile: &str) -> BTreeMap<String, String> {
    let mut logical = Vec::new();
    let mut current = String::new();
    for line in dockerfile.lines() {
        let trimmed = line.trim();
        if let Some(head) = trimmed.strip_suffix('\\') {
            current.push_str(head);
            current.push(' ');
            continue;
        }
        current.push_str(trimmed);
        logical.push(std::mem::take(&mut current));
    }
    if !current.is_empty() {
        logical.push(current);
    }

    let mut env = BTreeMap::new();
    for line in logical {
        let Some(rest) = line.strip_prefix("ENV ") else {
            continue;
        };
        let rest = rest.trim();
        let first_space = rest.find(char::is_whitespace).unwrap_or(rest.len());
        match rest.find('=') {
            Some(eq) if eq < first_space => {
                env.insert(rest[..eq].to_string(), unquote(&rest[eq + 1..]).to_string());
            }
            _ => {
                let (key, value) = rest.split_at(first_space);
                env.insert(key.to_string(), unquote(value).to_string());
            }
        }
    }
    env
}

fn check_dockerfile_stack(stack_dir: &Path, report: &mut LintReport) {
    let path = manifest::dockerfile_stack(stack_dir);
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return;
    };
    tracing::info!("Linting {}: {}", manifest::DOCKERFILE_STACK, path.display());
    let env = parse_env(&contents);

    for var in REQUIRED_ENV {
        if !env.contains_key(*var) {
            report.error(format!("Missing {var}"));
        }
    }
    for var in OPTIONAL_ENV {
        if !env.contains_key(*var) {
            report.warning(format!("Missing {var}"));
        }
    }

    if env.contains_key("APPSODY_WATCH_DIR") && !env.keys().any(|k| k.contains("_ON_CHANGE")) {
        report.error("APPSODY_WATCH_DIR is defined, but no ON_CHANGE variable is defined");
    }
    for (key, value) in &env {
        if key.contains("APPSODY_INSTALL") {
            report.warning("APPSODY_INSTALL is deprecated, use APPSODY_PREP instead");
        }
        if key.ends_with("_KILL") && !matches!(value.to_lowercase().as_str(), "true" | "false") {
            report.error(format!("{key} can only have value true/false"));
        }
        if key == "APPSODY_WATCH_REGEX" {
            if let Err(e) = Regex::new(value) {
                report.error(format!("APPSODY_WATCH_REGEX is not a valid regex: {e}"));
            }
        }
    }

    if let Some(mounts) = env.get("APPSODY_MOUNTS") {
        check_mounts(stack_dir, mounts, report);
    }
}

/// Each `src:dst` mount source must exist in every template.
fn check_mounts(stack_dir: &Path, mounts: &str, report: &mut LintReport) {
    let Ok(templates) = manifest::template_names(stack_dir) else {
        return;
    };
    for raw in mounts.split(';').filter(|m| !m.trim().is_empty()) {
        let mount = raw.trim().trim_matches('"');
        tracing::debug!("mount pair: {mount}");
        let Some((source, _)) = mount.split_once(':') else {
            report.error(format!(
                "Mount is not properly formatted, it is missing the colon: {mount}"
            ));
            continue;
        };
        if source.is_empty() {
            report.error(format!("Path for mount {mount} is empty"));
            continue;
        }
        if source == "/" || source == "." || source.starts_with('~') {
            tracing::debug!("Path {source} for mount {mount} is not checked");
            continue;
        }
        for template in &templates {
            let path = manifest::templates_dir(stack_dir).join(template).join(source);
            match std::fs::metadata(&path) {
                Err(_) => report.error(format!(
                    "Could not stat path: {} for mount {mount}",
                    path.display()
                )),
                Ok(meta) if !meta.is_dir() => report.warning(format!(
                    "Path {} for mount {mount} points to a single file. Single file mount paths cause unexpected behavior",
                    path.display()
                )),
                Ok(_) => {}
            }
        }
    }
}
