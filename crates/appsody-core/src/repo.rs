//! The user's registry of stack repositories (`<home>/repository/repository.yaml`).

use crate::context::Context;
use crate::error::{AppsodyError, Result};
use crate::paths;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

pub const INCUBATOR: &str = "incubator";
pub const EXPERIMENTAL: &str = "experimental";
pub const LEGACY_INCUBATOR: &str = "appsodyhub";
pub const INCUBATOR_URL: &str =
    "https://github.com/appsody/stacks/releases/latest/download/incubator-index.yaml";
pub const EXPERIMENTAL_URL: &str =
    "https://github.com/appsody/stacks/releases/latest/download/experimental-index.yaml";
pub const LEGACY_INDEX_URL: &str = "https://raw.githubusercontent.com/appsody/stacks/master/index.yaml";

const REPO_FILE_API_VERSION: &str = "v1";
const MAX_REPO_NAME_LEN: usize = 50;

static REPO_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn repo_name_re() -> &'static Regex {
    REPO_NAME_RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9\-_]{1,50}$").unwrap())
}

fn is_false(b: &bool) -> bool {
    !*b
}

// ---------------------------------------------------------------------------
// RepositoryEntry / RepositoryFile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub name: String,
    pub url: String,
    #[serde(rename = "default", default, skip_serializing_if = "is_false")]
    pub is_default: bool,
}

impl RepositoryEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            is_default: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryFile {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "Utc::now")]
    pub generated: DateTime<Utc>,
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
}

fn default_api_version() -> String {
    REPO_FILE_API_VERSION.to_string()
}

impl Default for RepositoryFile {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            generated: Utc::now(),
            repositories: Vec::new(),
        }
    }
}

impl RepositoryFile {
    /// `incubator` (default) and `experimental`.
    pub fn with_defaults() -> Self {
        let mut file = Self::default();
        file.repositories.push(RepositoryEntry {
            is_default: true,
            ..RepositoryEntry::new(INCUBATOR, INCUBATOR_URL)
        });
        file.repositories
            .push(RepositoryEntry::new(EXPERIMENTAL, EXPERIMENTAL_URL));
        file
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AppsodyError::UserInput(format!(
                "Repository file does not exist {}. Check to make sure appsody init has been run.",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: RepositoryFile = serde_yaml::from_str(&data).map_err(|e| {
            AppsodyError::UserInput(format!("Failed to parse repository file {e}"))
        })?;
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Load the registry, apply legacy migrations and the default-entry
    /// repair, and persist any change (not in dry-run).
    pub fn load_repaired(ctx: &Context) -> Result<Self> {
        let path = paths::repository_file(&ctx.home);
        let mut file = if ctx.dry_run && !path.exists() {
            Self::with_defaults()
        } else {
            Self::load(&path)?
        };
        let migrated = file.migrate_legacy();
        let repaired = file.ensure_default();
        if migrated || repaired {
            if ctx.dry_run {
                tracing::info!("Dry Run - Skipping update of {}", path.display());
            } else {
                file.save(&path)?;
            }
        }
        Ok(file)
    }

    pub fn save_to_home(&self, ctx: &Context) -> Result<()> {
        self.save(&paths::repository_file(&ctx.home))
    }

    /// Rename `appsodyhub` to `incubator` and rewrite the legacy index URL.
    pub fn migrate_legacy(&mut self) -> bool {
        let mut changed = false;
        let has_incubator = self.has(INCUBATOR);
        for entry in &mut self.repositories {
            if entry.url == LEGACY_INDEX_URL {
                tracing::info!("Updating the {} repository URL to {INCUBATOR_URL}", entry.name);
                entry.url = INCUBATOR_URL.to_string();
                changed = true;
            }
            if entry.name == LEGACY_INCUBATOR && entry.url == INCUBATOR_URL && !has_incubator {
                tracing::info!("Migrating your repo name from 'appsodyhub' to 'incubator'");
                entry.name = INCUBATOR.to_string();
                changed = true;
            }
        }
        changed
    }

    /// Make exactly one entry the default. Returns true when the file changed.
    pub fn ensure_default(&mut self) -> bool {
        if self.repositories.is_empty() {
            return false;
        }
        let defaults = self.repositories.iter().filter(|r| r.is_default).count();
        if defaults == 1 {
            return false;
        }
        if defaults > 1 {
            let mut seen = false;
            for r in &mut self.repositories {
                if r.is_default {
                    r.is_default = !seen;
                    seen = true;
                }
            }
            return true;
        }
        let idx = self
            .repositories
            .iter()
            .position(|r| r.name == INCUBATOR)
            .unwrap_or(0);
        self.repositories[idx].is_default = true;
        tracing::info!(
            "Your default repository is now set to {}",
            self.repositories[idx].name
        );
        true
    }

    pub fn get(&self, name: &str) -> Option<&RepositoryEntry> {
        self.repositories.iter().find(|r| r.name == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn has_url(&self, url: &str) -> bool {
        self.repositories.iter().any(|r| r.url == url)
    }

    pub fn default_repo(&self) -> Result<&RepositoryEntry> {
        if self.repositories.is_empty() {
            return Err(AppsodyError::EmptyRegistry);
        }
        self.repositories
            .iter()
            .find(|r| r.is_default)
            .ok_or_else(|| AppsodyError::Internal("no default repository is set".into()))
    }

    pub fn default_name(&self) -> Option<&str> {
        self.repositories
            .iter()
            .find(|r| r.is_default)
            .map(|r| r.name.as_str())
    }

    /// Validate and append a new entry.
    pub fn add(&mut self, name: &str, url: &str) -> Result<()> {
        validate_repo_name(name)?;
        if self.has(name) {
            return Err(AppsodyError::UserInput(format!(
                "A repository with the name '{name}' already exists."
            )));
        }
        if self.has_url(url) {
            return Err(AppsodyError::UserInput(format!(
                "A repository with the URL '{url}' already exists."
            )));
        }
        let is_default = self.repositories.is_empty();
        self.repositories.push(RepositoryEntry {
            is_default,
            ..RepositoryEntry::new(name, url)
        });
        Ok(())
    }

    /// Remove an entry. The default repository cannot be removed.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let Some(entry) = self.get(name) else {
            return Err(AppsodyError::RepoNotFound(name.to_string()));
        };
        if entry.is_default {
            return Err(AppsodyError::UserInput(format!(
                "Cannot remove the default repository {name}. Use `appsody repo set-default` to choose another default first."
            )));
        }
        self.repositories.retain(|r| r.name != name);
        Ok(())
    }

    /// Remove regardless of default status; used when repairing `dev.local`.
    pub fn remove_unchecked(&mut self, name: &str) {
        self.repositories.retain(|r| r.name != name);
    }

    /// Returns false when `name` already was the default.
    pub fn set_default(&mut self, name: &str) -> Result<bool> {
        if !self.has(name) {
            return Err(AppsodyError::RepoNotFound(name.to_string()));
        }
        if self.default_name() == Some(name) {
            return Ok(false);
        }
        for r in &mut self.repositories {
            r.is_default = r.name == name;
        }
        Ok(true)
    }

    /// Entries sorted by name, the default prefixed with `*`.
    pub fn rows(&self) -> Vec<(String, String)> {
        let mut rows: Vec<(String, String)> = self
            .repositories
            .iter()
            .map(|r| {
                let name = if r.is_default {
                    format!("*{}", r.name)
                } else {
                    r.name.clone()
                };
                (name, r.url.clone())
            })
            .collect();
        rows.sort_by(|a, b| a.0.trim_start_matches('*').cmp(b.0.trim_start_matches('*')));
        rows
    }
}

pub fn validate_repo_name(name: &str) -> Result<()> {
    if name.len() > MAX_REPO_NAME_LEN {
        return Err(AppsodyError::UserInput(
            "Invalid repository name. The <name> must be less than 50 characters.".into(),
        ));
    }
    if !repo_name_re().is_match(name) {
        return Err(AppsodyError::UserInput(
            "Invalid repository name. The <name> may only contain digits, numbers, dashes '-', and underscores '_'.".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_have_incubator_as_default() {
        let f = RepositoryFile::with_defaults();
        assert_eq!(f.default_name(), Some(INCUBATOR));
        assert!(f.has(EXPERIMENTAL));
    }

    #[test]
    fn missing_default_prefers_incubator() {
        let mut f = RepositoryFile::default();
        f.repositories.push(RepositoryEntry::new("a", "u1"));
        f.repositories.push(RepositoryEntry::new(INCUBATOR, "u2"));
        assert!(f.ensure_default());
        assert_eq!(f.default_name(), Some(INCUBATOR));
        assert!(!f.ensure_default());
    }

    #[test]
    fn missing_default_falls_back_to_first() {
        let mut f = RepositoryFile::default();
        f.repositories.push(RepositoryEntry::new("a", "u1"));
        f.repositories.push(RepositoryEntry::new("b", "u2"));
        f.ensure_default();
        assert_eq!(f.default_name(), Some("a"));
    }

    #[test]
    fn save_load_is_idempotent_after_repair() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repository.yaml");
        std::fs::write(
            &path,
            "apiVersion: v1\ngenerated: 2020-01-01T00:00:00Z\nrepositories:\n- name: a\n  url: u1\n- name: b\n  url: u2\n",
        )
        .unwrap();
        let mut f = RepositoryFile::load(&path).unwrap();
        f.ensure_default();
        f.save(&path).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        let mut again = RepositoryFile::load(&path).unwrap();
        assert!(!again.ensure_default());
        again.save(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
        assert_eq!(again.repositories.iter().filter(|r| r.is_default).count(), 1);
    }

    #[test]
    fn legacy_names_and_urls_migrate() {
        let mut f = RepositoryFile::default();
        f.repositories.push(RepositoryEntry {
            is_default: true,
            ..RepositoryEntry::new(LEGACY_INCUBATOR, LEGACY_INDEX_URL)
        });
        assert!(f.migrate_legacy());
        assert_eq!(f.repositories[0].name, INCUBATOR);
        assert_eq!(f.repositories[0].url, INCUBATOR_URL);
    }

    #[test]
    fn add_rejects_duplicates_and_bad_names() {
        let mut f = RepositoryFile::with_defaults();
        assert!(f.add(INCUBATOR, "x").is_err());
        assert!(f.add("new", INCUBATOR_URL).is_err());
        assert!(f.add("bad name", "x").is_err());
        assert!(f.add(&"a".repeat(51), "x").is_err());
        f.add("mine", "file:///tmp/idx.yaml").unwrap();
        assert!(f.has("mine"));
        assert!(!f.get("mine").unwrap().is_default);
    }

    #[test]
    fn remove_refuses_default() {
        let mut f = RepositoryFile::with_defaults();
        assert!(f.remove(INCUBATOR).is_err());
        f.remove(EXPERIMENTAL).unwrap();
        assert!(!f.has(EXPERIMENTAL));
        assert!(matches!(
            f.remove("nope").unwrap_err(),
            AppsodyError::RepoNotFound(_)
        ));
    }

    #[test]
    fn set_default_switches_flag() {
        let mut f = RepositoryFile::with_defaults();
        assert!(f.set_default(EXPERIMENTAL).unwrap());
        assert_eq!(f.default_name(), Some(EXPERIMENTAL));
        assert!(!f.set_default(EXPERIMENTAL).unwrap());
        assert!(f.set_default("nope").is_err());
    }

    #[test]
    fn rows_mark_default() {
        let f = RepositoryFile::with_defaults();
        let rows = f.rows();
        assert_eq!(rows[0].0, "experimental");
        assert_eq!(rows[1].0, "*incubator");
    }
}
