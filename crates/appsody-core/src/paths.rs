use crate::error::{AppsodyError, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File and directory names
// ---------------------------------------------------------------------------

pub const HOME_DIR_NAME: &str = ".appsody";
pub const GLOBAL_CONFIG_FILE: &str = ".appsody.yaml";
pub const PROJECT_CONFIG_FILE: &str = ".appsody-config.yaml";

pub const REPOSITORY_DIR: &str = "repository";
pub const REPOSITORY_FILE: &str = "repository.yaml";
pub const EXTRACT_DIR: &str = "extract";
pub const STACKS_DIR: &str = "stacks";
pub const LOGS_DIR: &str = "logs";
pub const DEPLOY_DIR: &str = "deploy";

pub const DEV_LOCAL: &str = "dev.local";
pub const CONTROLLER_BINARY: &str = "appsody-controller";
pub const APP_DEPLOY_FILE: &str = "app-deploy.yaml";
pub const INIT_WORKDIR: &str = ".appsody_init";

/// Where the controller binary is mounted inside every dev container.
pub const CONTAINER_CONTROLLER_PATH: &str = "/appsody/appsody-controller";
/// Controller location when the dev loop runs as a cluster Deployment.
pub const CLUSTER_CONTROLLER_PATH: &str = "/.appsody/appsody-controller";
/// Where stacks keep their deployment template inside the stack image.
pub const CONTAINER_APP_DEPLOY_PATH: &str = "/config/app-deploy.yaml";

// ---------------------------------------------------------------------------
// Home layout
// ---------------------------------------------------------------------------

pub fn default_home() -> Result<PathBuf> {
    home::home_dir()
        .map(|h| h.join(HOME_DIR_NAME))
        .ok_or(AppsodyError::HomeNotFound)
}

pub fn user_home() -> Result<PathBuf> {
    home::home_dir().ok_or(AppsodyError::HomeNotFound)
}

pub fn global_config_path(home: &Path) -> PathBuf {
    home.join(GLOBAL_CONFIG_FILE)
}

pub fn repository_dir(home: &Path) -> PathBuf {
    home.join(REPOSITORY_DIR)
}

pub fn repository_file(home: &Path) -> PathBuf {
    repository_dir(home).join(REPOSITORY_FILE)
}

pub fn extract_root(home: &Path) -> PathBuf {
    home.join(EXTRACT_DIR)
}

pub fn extract_dir(home: &Path, project_name: &str) -> PathBuf {
    extract_root(home).join(project_name)
}

pub fn dev_local_dir(home: &Path) -> PathBuf {
    home.join(STACKS_DIR).join(DEV_LOCAL)
}

/// Local index file for a repository managed by the stack toolkit,
/// e.g. `<home>/stacks/dev.local/dev.local-index.yaml`.
pub fn local_index_file(home: &Path, repo_name: &str) -> PathBuf {
    dev_local_dir(home).join(format!("{repo_name}-index.yaml"))
}

pub fn controller_path(home: &Path) -> PathBuf {
    home.join(CONTROLLER_BINARY)
}

pub fn deploy_config_dir(home: &Path) -> PathBuf {
    home.join(DEPLOY_DIR)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    home.join(LOGS_DIR)
}

/// Verbose log file name: `appsody2019-10-01T09-30-00.log`. Colons are
/// replaced so the name is valid on every filesystem.
pub fn log_file(home: &Path, now: DateTime<Local>) -> PathBuf {
    let stamp = now.format("%Y-%m-%dT%H:%M:%S").to_string().replace(':', "-");
    logs_dir(home).join(format!("appsody{stamp}.log"))
}

// ---------------------------------------------------------------------------
// Project layout
// ---------------------------------------------------------------------------

pub fn project_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(PROJECT_CONFIG_FILE)
}

pub fn app_deploy_path(project_dir: &Path, file: &str) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        project_dir.join(p)
    }
}

/// Render a path with forward slashes; docker accepts them on every platform.
pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn log_file_has_no_colons() {
        let now = Local.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let p = log_file(Path::new("/h"), now);
        let name = p.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name, "appsody2020-01-02T03-04-05.log");
        assert!(p.starts_with("/h/logs"));
    }

    #[test]
    fn local_index_file_is_named_after_repo() {
        let p = local_index_file(Path::new("/h"), "incubator");
        assert_eq!(p, Path::new("/h/stacks/dev.local/incubator-index.yaml"));
    }

    #[test]
    fn app_deploy_path_keeps_absolute() {
        assert_eq!(
            app_deploy_path(Path::new("/proj"), "/tmp/x.yaml"),
            Path::new("/tmp/x.yaml")
        );
        assert_eq!(
            app_deploy_path(Path::new("/proj"), APP_DEPLOY_FILE),
            Path::new("/proj/app-deploy.yaml")
        );
    }
}
