//! Minimum tool versions a stack declares in its index entry.

use crate::container::{self, Engine};
use crate::error::{AppsodyError, Result};
use crate::index::Requirements;
use regex::Regex;
use semver::{Version, VersionReq};
use std::sync::OnceLock;

static VERSION_RE: OnceLock<Regex> = OnceLock::new();
static JOIN_RE: OnceLock<Regex> = OnceLock::new();

fn version_re() -> &'static Regex {
    VERSION_RE.get_or_init(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").unwrap())
}

fn join_re() -> &'static Regex {
    JOIN_RE.get_or_init(|| Regex::new(r"([0-9*xX])\s+([<>=~^])").unwrap())
}

/// First `x.y.z` in a tool's version output, leading zeros tolerated (`19.03.5`).
pub fn extract_version(output: &str) -> Option<Version> {
    let caps = version_re().captures(output)?;
    let n = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    Some(Version::new(n(1)?, n(2)?, n(3)?))
}

/// Parse a constraint; space-separated comparators are treated as a conjunction.
pub fn parse_constraint(raw: &str) -> Option<VersionReq> {
    let raw = raw.trim();
    VersionReq::parse(raw)
        .or_else(|_| VersionReq::parse(&join_re().replace_all(raw, "$1, $2")))
        .ok()
}

/// Versions of the tools a stack may constrain. `None` means unknown.
#[derive(Debug, Clone, Default)]
pub struct ToolVersions {
    pub appsody: Option<Version>,
    pub docker: Option<Version>,
    pub buildah: Option<Version>,
}

impl ToolVersions {
    /// Query the engine in use; the other engine's constraint is skipped.
    pub fn detect(engine: Engine) -> Self {
        let appsody = Version::parse(crate::APPSODY_VERSION)
            .ok()
            .filter(|v| *v != Version::new(0, 0, 0));
        let engine_version = container::version(engine)
            .ok()
            .and_then(|out| extract_version(&out));
        match engine {
            Engine::Docker => Self {
                appsody,
                docker: engine_version,
                buildah: None,
            },
            Engine::Buildah => Self {
                appsody,
                docker: None,
                buildah: engine_version,
            },
        }
    }
}

/// Count of constraints the given versions fail. Unparseable constraints and
/// unknown versions are warnings only.
pub fn unmet(req: &Requirements, versions: &ToolVersions, engine: Engine) -> usize {
    let checks = [
        ("Appsody", &req.appsody, &versions.appsody, true),
        ("Docker", &req.docker, &versions.docker, engine == Engine::Docker),
        ("Buildah", &req.buildah, &versions.buildah, engine == Engine::Buildah),
    ];
    let mut failures = 0;
    for (tool, constraint, actual, applies) in checks {
        if constraint.is_empty() || !applies {
            continue;
        }
        let Some(parsed) = parse_constraint(constraint) else {
            tracing::warn!("Could not parse the {tool} version constraint \"{constraint}\"; skipping");
            continue;
        };
        let Some(actual) = actual else {
            tracing::debug!("Unknown {tool} version; skipping requirement {constraint}");
            continue;
        };
        if parsed.matches(actual) {
            tracing::debug!("{tool} version {actual} satisfies {constraint}");
        } else {
            tracing::error!("{tool} version {actual} does not meet the stack requirement {constraint}");
            failures += 1;
        }
    }
    failures
}

pub fn check(req: &Requirements, engine: Engine) -> Result<()> {
    if req.is_empty() {
        return Ok(());
    }
    let failures = unmet(req, &ToolVersions::detect(engine), engine);
    if failures > 0 {
        return Err(AppsodyError::RequirementsUnmet(failures));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions() -> ToolVersions {
        ToolVersions {
            appsody: Some(Version::new(0, 5, 4)),
            docker: Some(Version::new(19, 3, 5)),
            buildah: Some(Version::new(1, 11, 0)),
        }
    }

    #[test]
    fn extracts_first_version() {
        assert_eq!(
            extract_version("Docker version 19.03.5, build 633a0ea"),
            Some(Version::new(19, 3, 5))
        );
        assert_eq!(extract_version("no digits"), None);
    }

    #[test]
    fn constraint_grammar() {
        assert!(parse_constraint(">= 0.5.0").unwrap().matches(&Version::new(0, 5, 4)));
        assert!(parse_constraint("^0.5").unwrap().matches(&Version::new(0, 5, 9)));
        assert!(parse_constraint("~1.11.0").unwrap().matches(&Version::new(1, 11, 3)));
        let range = parse_constraint(">= 1.0.0 < 2.0.0").unwrap();
        assert!(range.matches(&Version::new(1, 9, 0)));
        assert!(!range.matches(&Version::new(2, 0, 0)));
        assert!(parse_constraint("not a version").is_none());
    }

    #[test]
    fn counts_failing_constraints_for_active_engine() {
        let req = Requirements {
            docker: ">= 20.0.0".into(),
            appsody: ">= 1.0.0".into(),
            buildah: ">= 99.0.0".into(),
        };
        assert_eq!(unmet(&req, &versions(), Engine::Docker), 2);
        assert_eq!(unmet(&req, &versions(), Engine::Buildah), 2);
    }

    #[test]
    fn unparseable_constraint_is_not_a_failure() {
        let req = Requirements {
            docker: "garbage".into(),
            ..Requirements::default()
        };
        assert_eq!(unmet(&req, &versions(), Engine::Docker), 0);
    }

    #[test]
    fn satisfied_requirements_pass() {
        let req = Requirements {
            docker: ">= 17.9.0".into(),
            appsody: ">= 0.5.0".into(),
            buildah: String::new(),
        };
        assert_eq!(unmet(&req, &versions(), Engine::Docker), 0);
    }
}
