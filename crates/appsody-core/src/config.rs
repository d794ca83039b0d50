use crate::error::{AppsodyError, Result};
use crate::names;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_IMAGES: &str = "docker.io";
pub const LEGACY_IMAGES: &str = "index.docker.io";
pub const OPERATOR_HOME: &str =
    "https://github.com/appsody/appsody-operator/releases/latest/download";

// ---------------------------------------------------------------------------
// CliConfig (<home>/.appsody.yaml)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CliConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,
    #[serde(default = "default_images")]
    pub images: String,
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tektonserver: String,
    #[serde(default = "default_last_version_check")]
    pub lastversioncheck: String,
}

fn default_images() -> String {
    DEFAULT_IMAGES.to_string()
}

fn default_operator() -> String {
    OPERATOR_HOME.to_string()
}

fn default_last_version_check() -> String {
    "none".to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            home: None,
            images: default_images(),
            operator: default_operator(),
            tektonserver: String::new(),
            lastversioncheck: default_last_version_check(),
        }
    }
}

impl CliConfig {
    /// Read the global config. A missing or empty file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut cfg: CliConfig = serde_yaml::from_str(&data)?;
        if cfg.images == LEGACY_IMAGES {
            tracing::debug!("Updating reference to 'index.docker.io' in {}", path.display());
            cfg.images = DEFAULT_IMAGES.to_string();
        }
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// The home directory every other persisted path hangs off.
    pub fn home_dir(&self) -> Result<PathBuf> {
        match &self.home {
            Some(h) => Ok(h.clone()),
            None => paths::default_home(),
        }
    }
}

/// Create the home layout, default repository file and config file on first use.
pub fn ensure_config(home: &Path, config_file: &Path, cfg: &CliConfig, dry_run: bool) -> Result<()> {
    for dir in [home.to_path_buf(), paths::repository_dir(home)] {
        if dir.exists() {
            if !dir.is_dir() {
                return Err(AppsodyError::UserInput(format!(
                    "{} must be a directory",
                    dir.display()
                )));
            }
        } else if dry_run {
            tracing::info!("Dry Run - Skipping create of directory {}", dir.display());
        } else {
            tracing::debug!("Creating {}", dir.display());
            crate::io::ensure_dir(&dir)?;
        }
    }

    let repo_file = paths::repository_file(home);
    if repo_file.is_dir() {
        return Err(AppsodyError::UserInput(format!(
            "{} must be a file, not a directory",
            repo_file.display()
        )));
    }
    if !repo_file.exists() {
        if dry_run {
            tracing::info!(
                "Dry Run - Skipping creation of incubator repo: {}",
                crate::repo::INCUBATOR_URL
            );
        } else {
            tracing::debug!("Creating {}", repo_file.display());
            crate::repo::RepositoryFile::with_defaults().save(&repo_file)?;
        }
    }

    if dry_run {
        tracing::info!("Dry Run - Skip writing config file {}", config_file.display());
    } else {
        tracing::debug!("Writing config file {}", config_file.display());
        cfg.save(config_file)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ProjectConfig (<project>/.appsody-config.yaml)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectConfig {
    #[serde(default)]
    pub stack: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_registry: Option<String>,
}

impl ProjectConfig {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            ..Self::default()
        }
    }

    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = paths::project_config_path(project_dir);
        if !path.exists() {
            return Err(AppsodyError::NotAnAppsodyProject(path));
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: ProjectConfig = serde_yaml::from_str(&data)?;
        if cfg.stack.is_empty() {
            return Err(AppsodyError::UserInput(format!(
                "The stack field is missing from {}",
                path.display()
            )));
        }
        Ok(cfg)
    }

    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let path = paths::project_config_path(project_dir);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Stack image with the `stack-registry` override applied.
    pub fn stack_image(&self) -> Result<String> {
        match self.stack_registry.as_deref() {
            Some(reg) if !reg.is_empty() => names::override_stack_registry(reg, &self.stack),
            _ => Ok(self.stack.clone()),
        }
    }

    /// Saved project name, or one derived from the directory (and persisted).
    pub fn project_name(&mut self, project_dir: &Path, dry_run: bool) -> Result<String> {
        if let Some(name) = &self.project_name {
            if names::is_valid_project_name(name) {
                return Ok(name.clone());
            }
            tracing::warn!(
                "Invalid project-name \"{name}\" in {}, deriving one from the directory",
                paths::PROJECT_CONFIG_FILE
            );
        }
        let dir = project_dir
            .canonicalize()
            .unwrap_or_else(|_| project_dir.to_path_buf());
        let name = names::project_name_from_dir(&dir)?;
        self.set_project_name(&name, project_dir, dry_run)?;
        Ok(name)
    }

    pub fn set_project_name(&mut self, name: &str, project_dir: &Path, dry_run: bool) -> Result<()> {
        names::validate_project_name(name)?;
        self.project_name = Some(name.to_string());
        self.persist(project_dir, dry_run, "project-name")
    }

    pub fn set_application_name(&mut self, name: &str, project_dir: &Path, dry_run: bool) -> Result<()> {
        names::validate_label_value(name)?;
        self.application_name = Some(name.to_string());
        self.persist(project_dir, dry_run, "application-name")
    }

    /// Validates the host and rewrites `stack` with it.
    pub fn set_stack_registry(&mut self, host: &str, project_dir: &Path, dry_run: bool) -> Result<()> {
        names::validate_host_and_port(host)?;
        self.stack = names::override_stack_registry(host, &self.stack)?;
        self.stack_registry = Some(host.to_string());
        self.persist(project_dir, dry_run, "stack-registry")
    }

    fn persist(&self, project_dir: &Path, dry_run: bool, field: &str) -> Result<()> {
        if dry_run {
            tracing::info!("Dry Run - Skipping save of {field} to {}", paths::PROJECT_CONFIG_FILE);
            return Ok(());
        }
        tracing::debug!("Saving {field} to {}", paths::PROJECT_CONFIG_FILE);
        self.save(project_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cli_config_defaults_and_legacy_images() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".appsody.yaml");
        let cfg = CliConfig::load(&path).unwrap();
        assert_eq!(cfg.images, "docker.io");
        assert_eq!(cfg.operator, OPERATOR_HOME);

        std::fs::write(&path, "images: index.docker.io\n").unwrap();
        let cfg = CliConfig::load(&path).unwrap();
        assert_eq!(cfg.images, "docker.io");
    }

    #[test]
    fn cli_config_home_relocates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".appsody.yaml");
        std::fs::write(&path, "home: /opt/appsody\n").unwrap();
        let cfg = CliConfig::load(&path).unwrap();
        assert_eq!(cfg.home_dir().unwrap(), Path::new("/opt/appsody"));
    }

    #[test]
    fn ensure_config_creates_layout() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join(".appsody");
        let cfg_file = home.join(".appsody.yaml");
        ensure_config(&home, &cfg_file, &CliConfig::default(), false).unwrap();
        assert!(paths::repository_file(&home).exists());
        assert!(cfg_file.exists());
    }

    #[test]
    fn ensure_config_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join(".appsody");
        let cfg_file = home.join(".appsody.yaml");
        ensure_config(&home, &cfg_file, &CliConfig::default(), true).unwrap();
        assert!(!home.exists());
    }

    #[test]
    fn project_config_missing_is_distinguished() {
        let dir = TempDir::new().unwrap();
        let err = ProjectConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, AppsodyError::NotAnAppsodyProject(_)));
    }

    #[test]
    fn project_config_round_trip_uses_kebab_keys() {
        let dir = TempDir::new().unwrap();
        let mut cfg = ProjectConfig::new("docker.io/appsody/nodejs:0.3");
        cfg.set_project_name("my-app", dir.path(), false).unwrap();
        let raw = std::fs::read_to_string(dir.path().join(".appsody-config.yaml")).unwrap();
        assert!(raw.contains("project-name: my-app"));
        let loaded = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn project_name_derived_from_dir() {
        let dir = TempDir::new().unwrap();
        let proj = dir.path().join("My_Project");
        std::fs::create_dir(&proj).unwrap();
        let mut cfg = ProjectConfig::new("appsody/nodejs");
        let name = cfg.project_name(&proj, false).unwrap();
        assert_eq!(name, "my-project");
        let loaded = ProjectConfig::load(&proj).unwrap();
        assert_eq!(loaded.project_name.as_deref(), Some("my-project"));
    }

    #[test]
    fn stack_registry_rewrites_stack() {
        let dir = TempDir::new().unwrap();
        let mut cfg = ProjectConfig::new("docker.io/appsody/nodejs:0.3");
        cfg.set_stack_registry("localhost:5000", dir.path(), false).unwrap();
        assert_eq!(cfg.stack, "localhost:5000/appsody/nodejs:0.3");
        assert!(cfg
            .set_stack_registry("bad_host!", dir.path(), false)
            .is_err());
    }
}
