//! Repository index documents and multi-repository listing.

use crate::error::{AppsodyError, IndexError, Result};
use crate::repo::RepositoryFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const SUPPORTED_API_VERSION: &str = "v2";

// ---------------------------------------------------------------------------
// Index document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Maintainer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub github_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(rename = "docker-version", default, skip_serializing_if = "String::is_empty")]
    pub docker: String,
    #[serde(rename = "appsody-version", default, skip_serializing_if = "String::is_empty")]
    pub appsody: String,
    #[serde(rename = "buildah-version", default, skip_serializing_if = "String::is_empty")]
    pub buildah: String,
}

impl Requirements {
    pub fn is_empty(&self) -> bool {
        self.docker.is_empty() && self.appsody.is_empty() && self.buildah.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexTemplate {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndexStack {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub license: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_template: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates: Vec<IndexTemplate>,
    #[serde(default, skip_serializing_if = "Requirements::is_empty")]
    pub requirements: Requirements,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// Stack source archive used by `stack create`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
}

impl IndexStack {
    pub fn template(&self, id: &str) -> Option<&IndexTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// `default-template`, else the template flagged `default`.
    pub fn default_template_id(&self) -> Option<&str> {
        if !self.default_template.is_empty() {
            return Some(&self.default_template);
        }
        self.templates
            .iter()
            .find(|t| t.default)
            .map(|t| t.id.as_str())
    }

    /// `scaffold, *simple`: ids sorted, the default marked with `*`.
    pub fn templates_summary(&self) -> String {
        let default = self.default_template_id();
        let mut ids: Vec<&str> = self.templates.iter().map(|t| t.id.as_str()).collect();
        ids.sort_unstable();
        ids.iter()
            .map(|id| {
                if Some(*id) == default {
                    format!("*{id}")
                } else {
                    id.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoIndex {
    #[serde(default)]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<DateTime<Utc>>,
    /// Legacy v1 layout: id -> versions, newest first. Read-only.
    #[serde(default, skip_serializing)]
    pub projects: BTreeMap<String, Vec<IndexStack>>,
    #[serde(default)]
    pub stacks: Vec<IndexStack>,
}

impl Default for RepoIndex {
    fn default() -> Self {
        Self {
            api_version: SUPPORTED_API_VERSION.to_string(),
            generated: Some(Utc::now()),
            projects: BTreeMap::new(),
            stacks: Vec::new(),
        }
    }
}

impl RepoIndex {
    pub fn parse(data: &str) -> Result<Self> {
        let mut index: RepoIndex = serde_yaml::from_str(data)
            .map_err(|e| AppsodyError::IndexSchema(e.to_string()))?;
        for (id, versions) in index.projects.iter_mut() {
            for v in versions.iter_mut().filter(|v| v.id.is_empty()) {
                v.id = id.clone();
            }
        }
        Ok(index)
    }

    /// Download and parse the index of one repository.
    pub fn fetch(repo: &str, url: &str) -> Result<Self> {
        tracing::debug!("Downloading appsody repository index from {url}");
        let unreadable = |reason: String| AppsodyError::IndexUnreadable {
            repo: repo.to_string(),
            reason,
        };
        let data = crate::download::fetch_string(url).map_err(|e| unreadable(e.to_string()))?;
        let index = Self::parse(&data).map_err(|e| {
            tracing::debug!("Contents of downloaded index from {url}\n{data}");
            unreadable(e.to_string())
        })?;
        if index.is_unsupported() {
            tracing::warn!(
                "The repository {repo} uses index apiVersion {} which this version of appsody does not fully support",
                index.api_version
            );
        }
        Ok(index)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// True when the document declares a newer apiVersion than `v2`.
    pub fn is_unsupported(&self) -> bool {
        match (
            api_major(&self.api_version),
            api_major(SUPPORTED_API_VERSION),
        ) {
            (Some(have), Some(supported)) => have > supported,
            _ => false,
        }
    }

    /// Look up a stack: legacy `projects` first, then `stacks`.
    pub fn find_stack(&self, id: &str) -> Option<&IndexStack> {
        self.projects
            .get(id)
            .and_then(|versions| versions.first())
            .or_else(|| self.stacks.iter().find(|s| s.id == id))
    }

    /// Every stack once, legacy entries included, sorted by id.
    pub fn all_stacks(&self) -> Vec<&IndexStack> {
        let mut out: Vec<&IndexStack> = self
            .projects
            .values()
            .filter_map(|v| v.first())
            .collect();
        for s in &self.stacks {
            if !out.iter().any(|o| o.id == s.id) {
                out.push(s);
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn remove_stack(&mut self, id: &str) -> bool {
        let before = self.stacks.len();
        self.stacks.retain(|s| s.id != id);
        before != self.stacks.len()
    }

    /// Replace any existing entry with the same id.
    pub fn upsert_stack(&mut self, stack: IndexStack) {
        self.remove_stack(&stack.id);
        self.stacks.push(stack);
    }
}

/// Numeric part of `vN` (`v2beta1` reads as 2).
fn api_major(version: &str) -> Option<u32> {
    let digits: String = version
        .strip_prefix('v')?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

// ---------------------------------------------------------------------------
// Multi-repository fetch
// ---------------------------------------------------------------------------

/// Indices of every readable repository plus one error per unreadable one.
#[derive(Debug, Default)]
pub struct Indices {
    pub indices: BTreeMap<String, RepoIndex>,
    pub errors: Vec<IndexError>,
    pub unsupported: Vec<String>,
}

/// Fetch indices sequentially, continuing past failures.
pub fn fetch_all(repos: &RepositoryFile) -> Indices {
    let mut out = Indices::default();
    for entry in &repos.repositories {
        match RepoIndex::fetch(&entry.name, &entry.url) {
            Ok(index) => {
                if index.is_unsupported() {
                    out.unsupported.push(entry.name.clone());
                }
                out.indices.insert(entry.name.clone(), index);
            }
            Err(e) => out.errors.push(IndexError {
                repo: entry.name.clone(),
                reason: match e {
                    AppsodyError::IndexUnreadable { reason, .. } => reason,
                    other => other.to_string(),
                },
            }),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRow {
    pub repo: String,
    pub id: String,
    pub version: String,
    pub templates: String,
    pub description: String,
}

/// One row per (repo, stack), ordered by repo then id; rows of the default
/// repository are prefixed with `*`.
pub fn stack_rows(repos: &RepositoryFile, indices: &BTreeMap<String, RepoIndex>) -> Vec<StackRow> {
    let default = repos.default_name();
    let mut rows = Vec::new();
    for (repo, index) in indices {
        let label = if Some(repo.as_str()) == default {
            format!("*{repo}")
        } else {
            repo.clone()
        };
        for stack in index.all_stacks() {
            rows.push(StackRow {
                repo: label.clone(),
                id: stack.id.clone(),
                version: stack.version.clone(),
                templates: stack.templates_summary(),
                description: stack.description.clone(),
            });
        }
    }
    rows
}

/// Machine-readable listing shape (`-o json|yaml`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexOutput {
    pub api_version: String,
    pub generated: DateTime<Utc>,
    pub repositories: Vec<RepositoryOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepositoryOutput {
    pub name: String,
    pub stacks: Vec<IndexStack>,
}

pub fn index_output(indices: &BTreeMap<String, RepoIndex>) -> IndexOutput {
    IndexOutput {
        api_version: SUPPORTED_API_VERSION.to_string(),
        generated: Utc::now(),
        repositories: indices
            .iter()
            .map(|(name, index)| RepositoryOutput {
                name: name.clone(),
                stacks: index.all_stacks().into_iter().cloned().collect(),
            })
            .collect(),
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::repo::RepositoryEntry;

    #[test]
    fn parses_v2_index() {
        let index = RepoIndex::parse(V2_INDEX).unwrap();
        assert!(!index.is_unsupported());
        let stack = index.find_stack("nodejs-express").unwrap();
        assert_eq!(stack.default_template_id(), Some("simple"));
        assert_eq!(stack.templates_summary(), "scaffold, *simple");
        assert_eq!(stack.maintainers[0].github_id, "jdoe");
        let java = index.find_stack("java-microprofile").unwrap();
        assert_eq!(java.default_template_id(), Some("default"));
    }

    #[test]
    fn legacy_projects_take_precedence() {
        let index = RepoIndex::parse(V1_INDEX).unwrap();
        let stack = index.find_stack("nodejs").unwrap();
        assert_eq!(stack.version, "0.2.0");
        assert_eq!(stack.id, "nodejs");
        assert_eq!(index.all_stacks().len(), 1);
    }

    #[test]
    fn newer_api_version_is_unsupported_but_parsed() {
        let index = RepoIndex::parse("apiVersion: v3\nstacks: []\n").unwrap();
        assert!(index.is_unsupported());
        let index = RepoIndex::parse("apiVersion: v10\nstacks: []\n").unwrap();
        assert!(index.is_unsupported());
        let index = RepoIndex::parse("apiVersion: v1\nstacks: []\n").unwrap();
        assert!(!index.is_unsupported());
    }

    #[test]
    fn malformed_index_is_schema_error() {
        let err = RepoIndex::parse("stacks: {not: [a list").unwrap_err();
        assert!(matches!(err, AppsodyError::IndexSchema(_)));
    }

    #[test]
    fn serialising_drops_legacy_projects() {
        let index = RepoIndex::parse(V1_INDEX).unwrap();
        let out = serde_yaml::to_string(&index).unwrap();
        assert!(!out.contains("projects"));
    }

    #[test]
    fn upsert_replaces_existing_stack() {
        let mut index = RepoIndex::parse(V2_INDEX).unwrap();
        let mut s = index.find_stack("nodejs-express").unwrap().clone();
        s.version = "0.3.0".into();
        index.upsert_stack(s);
        assert_eq!(index.stacks.len(), 2);
        assert_eq!(index.find_stack("nodejs-express").unwrap().version, "0.3.0");
        assert!(index.remove_stack("nodejs-express"));
        assert!(!index.remove_stack("nodejs-express"));
    }

    #[test]
    fn fetch_all_aggregates_errors() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/good.yaml")
            .with_status(200)
            .with_body(V2_INDEX)
            .create();
        server.mock("GET", "/bad.yaml").with_status(500).create();

        let mut repos = RepositoryFile::default();
        repos.repositories.push(RepositoryEntry {
            is_default: true,
            ..RepositoryEntry::new("good", format!("{}/good.yaml", server.url()))
        });
        repos
            .repositories
            .push(RepositoryEntry::new("bad", format!("{}/bad.yaml", server.url())));

        let all = fetch_all(&repos);
        assert_eq!(all.indices.len(), 1);
        assert_eq!(all.errors.len(), 1);
        assert_eq!(all.errors[0].repo, "bad");

        let rows = stack_rows(&repos, &all.indices);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.repo == "*good"));
        assert_eq!(rows[0].id, "java-microprofile");
        assert_eq!(rows[1].id, "nodejs-express");
    }

    #[test]
    fn index_output_groups_by_repository() {
        let mut indices = BTreeMap::new();
        indices.insert("incubator".to_string(), RepoIndex::parse(V2_INDEX).unwrap());
        let out = index_output(&indices);
        assert_eq!(out.repositories.len(), 1);
        assert_eq!(out.repositories[0].stacks.len(), 2);
        let json = serde_json::to_string(&out).unwrap();
        assert!(json.contains("\"apiVersion\":\"v2\""));
    }
}
