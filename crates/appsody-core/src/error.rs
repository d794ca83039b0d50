use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One repository that could not be read during a multi-repository operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexError {
    pub repo: String,
    pub reason: String,
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "- Repository: {}\n  Reason: {}", self.repo, self.reason)
    }
}

pub fn format_index_errors(errors: &[IndexError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum AppsodyError {
    #[error("The current directory is not a valid appsody project ({} not found). Run `appsody init <stack>` to create one. Run `appsody list` to see the available stacks.", .0.display())]
    NotAnAppsodyProject(PathBuf),

    #[error("malformed project parameter - {0}")]
    MalformedReference(String),

    #[error("invalid name \"{name}\": {reason}")]
    InvalidName { name: String, reason: String },

    #[error("{0} is not allowed in --docker-options")]
    InvalidOption(String),

    #[error("{0}")]
    UserInput(String),

    #[error("non-empty directory found with files which may conflict with the template project")]
    NonEmptyDirectory,

    #[error("conflicts exist: {}", .0.join(", "))]
    ConflictsExist(Vec<String>),

    #[error("Could not download {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("repository {repo} could not be read: {reason}")]
    IndexUnreadable { repo: String, reason: String },

    #[error("the following repositories could not be read:\n{}", format_index_errors(.0))]
    IndexErrors(Vec<IndexError>),

    #[error("Repository index formatting error: {0}")]
    IndexSchema(String),

    #[error("Repository {0} is not in configured list of repositories")]
    RepoNotFound(String),

    #[error("Your stack repository is empty - please use `appsody repo add` to add a repository.")]
    EmptyRegistry,

    #[error("Could not find a stack with the id \"{stack}\" in repository \"{repo}\". Run `appsody list` to see the available stacks or -h for help.")]
    StackNotFound { stack: String, repo: String },

    #[error("Could not find a template \"{template}\" for stack id \"{stack}\" in repository \"{repo}\"")]
    TemplateNotFound {
        template: String,
        stack: String,
        repo: String,
    },

    #[error("Cannot proceed, no template or \"none\" was specified and there is no default template.")]
    NoDefaultTemplate,

    #[error("One or more technologies need upgrading to use this stack. Upgrades required: {0}")]
    RequirementsUnmet(usize),

    #[error("{0} is not installed or could not be found on the PATH")]
    NotInstalled(String),

    #[error("{op} failed: {message}")]
    ContainerEngine { op: String, message: String },

    #[error("Could not find the image either in docker hub or locally: {0}")]
    PullFailed(String),

    #[error("Could not inspect the image {image}: {reason}")]
    InspectFailed { image: String, reason: String },

    #[error("container exited with status {0}")]
    RunFailed(i32),

    #[error("image build failed: {0}")]
    BuildFailed(String),

    #[error("kubectl {op} failed: {message}")]
    Cluster { op: String, message: String },

    #[error("Failed to find deployed service IP and Port for {0}")]
    ClusterNotFound(String),

    #[error("Error in 'appsody {mode}': exit status {code}")]
    DevLoopFailed { mode: String, code: i32 },

    #[error("LINT TEST FAILED ({errors} errors, {warnings} warnings)")]
    LintFailed { errors: usize, warnings: usize },

    #[error("{0}")]
    ScriptFailed(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("path escapes the extraction root: {0}")]
    PathTraversal(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, AppsodyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_errors_render_one_block_per_repo() {
        let err = AppsodyError::IndexErrors(vec![
            IndexError {
                repo: "incubator".into(),
                reason: "timed out".into(),
            },
            IndexError {
                repo: "mine".into(),
                reason: "404".into(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("- Repository: incubator\n  Reason: timed out"));
        assert!(msg.contains("- Repository: mine\n  Reason: 404"));
    }

    #[test]
    fn invalid_option_names_the_option() {
        let err = AppsodyError::InvalidOption("--name".into());
        assert_eq!(err.to_string(), "--name is not allowed in --docker-options");
    }
}
