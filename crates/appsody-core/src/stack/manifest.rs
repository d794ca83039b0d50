//! `stack.yaml` and the on-disk layout of a stack source tree.

use crate::error::{AppsodyError, Result};
use crate::index::{Maintainer, Requirements};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const STACK_FILE: &str = "stack.yaml";
pub const README_FILE: &str = "README.md";
pub const IMAGE_DIR: &str = "image";
pub const TEMPLATES_DIR: &str = "templates";
pub const DOCKERFILE_STACK: &str = "Dockerfile-stack";
pub const LICENSE_FILE: &str = "LICENSE";

/// Finder metadata that must never be treated as a template.
const IGNORED_ENTRIES: &[&str] = &[".DS_Store"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StackYaml {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub maintainers: Vec<Maintainer>,
    #[serde(default)]
    pub default_template: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub templating_data: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Requirements::is_empty")]
    pub requirements: Requirements,
}

impl StackYaml {
    pub fn parse(data: &str) -> Result<Self> {
        serde_yaml::from_str(data).map_err(|e| {
            AppsodyError::UserInput(format!("Error parsing the {STACK_FILE} file: {e}"))
        })
    }

    pub fn load(stack_dir: &Path) -> Result<Self> {
        let path = stack_dir.join(STACK_FILE);
        let data = std::fs::read_to_string(&path).map_err(|e| {
            AppsodyError::UserInput(format!("Error reading {}: {e}", path.display()))
        })?;
        Self::parse(&data)
    }
}

/// The stack id is the name of its source directory.
pub fn stack_id(stack_dir: &Path) -> Result<String> {
    let canonical = stack_dir.canonicalize()?;
    canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            AppsodyError::UserInput(format!(
                "Could not determine the stack id of {}",
                stack_dir.display()
            ))
        })
}

pub fn templates_dir(stack_dir: &Path) -> PathBuf {
    stack_dir.join(TEMPLATES_DIR)
}

pub fn dockerfile_stack(stack_dir: &Path) -> PathBuf {
    stack_dir.join(IMAGE_DIR).join(DOCKERFILE_STACK)
}

/// Template directory names, sorted.
pub fn template_names(stack_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(templates_dir(stack_dir))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if IGNORED_ENTRIES.contains(&name.as_str()) || !entry.file_type()?.is_dir() {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Archive name of one packaged template.
pub fn template_archive_name(id: &str, version: &str, template: &str) -> String {
    format!("{id}.v{version}.templates.{template}.tar.gz")
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::{Path, PathBuf};

    pub const STACK_YAML: &str = "\
name: Sample Stack
version: 0.1.0
description: A stack used by the test suite
license: Apache-2.0
language: nodejs
maintainers:
  - name: Jane Doe
    email: jane@example.com
    github-id: jdoe
default-template: simple
templating-data:
  variable1: value1
";

    pub const DOCKERFILE_STACK: &str = "\
FROM node:12
ENV APPSODY_MOUNTS=/:/project/user-app
ENV APPSODY_DEPS=/project/user-app/node_modules
ENV APPSODY_WATCH_DIR=/project/user-app
ENV APPSODY_WATCH_REGEX=\"^.*.js$\"
ENV APPSODY_RUN=\"npm start\"
ENV APPSODY_RUN_ON_CHANGE=\"npm start\"
ENV APPSODY_RUN_KILL=true
ENV APPSODY_DEBUG=\"npm run debug\"
ENV APPSODY_DEBUG_ON_CHANGE=\"npm run debug\"
ENV APPSODY_DEBUG_KILL=true
ENV APPSODY_TEST=\"npm test\"
ENV APPSODY_TEST_ON_CHANGE=\"\"
ENV APPSODY_TEST_KILL=false
ENV PORT=3000
EXPOSE 3000
";

    /// A complete, lint-clean stack named `sample-stack` under `root`.
    pub fn write_stack(root: &Path) -> PathBuf {
        let dir = root.join("sample-stack");
        let files = [
            ("README.md", "# Sample\n"),
            ("stack.yaml", STACK_YAML),
            ("image/Dockerfile-stack", DOCKERFILE_STACK),
            ("image/LICENSE", "Apache-2.0\n"),
            ("image/config/app-deploy.yaml", "kind: AppsodyApplication\n"),
            ("image/project/Dockerfile", "FROM node:12\n"),
            ("templates/simple/app.js", "console.log('hi')\n"),
            ("templates/scaffold/app.js", "console.log('scaffold')\n"),
        ];
        for (name, body) in files {
            let path = dir.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_stack_yaml() {
        let yaml = StackYaml::parse(STACK_YAML).unwrap();
        assert_eq!(yaml.name, "Sample Stack");
        assert_eq!(yaml.default_template, "simple");
        assert_eq!(yaml.maintainers[0].github_id, "jdoe");
        assert_eq!(yaml.templating_data["variable1"], "value1");
    }

    #[test]
    fn templates_skip_files_and_finder_metadata() {
        let dir = TempDir::new().unwrap();
        let stack = write_stack(dir.path());
        std::fs::write(stack.join("templates/.DS_Store"), "").unwrap();
        std::fs::write(stack.join("templates/notes.txt"), "").unwrap();
        assert_eq!(template_names(&stack).unwrap(), vec!["scaffold", "simple"]);
        assert_eq!(stack_id(&stack).unwrap(), "sample-stack");
    }

    #[test]
    fn archive_names() {
        assert_eq!(
            template_archive_name("nodejs", "0.3.1", "simple"),
            "nodejs.v0.3.1.templates.simple.tar.gz"
        );
    }
}
