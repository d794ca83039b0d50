use crate::config::{CliConfig, ProjectConfig};
use crate::container::{Engine, ImageConfig, PullPolicy};
use crate::error::Result;
use crate::paths;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Per-invocation state threaded through every operation: where things live,
/// how side effects behave, and the image caches that keep repeated pulls and
/// inspects down to one per image.
#[derive(Debug)]
pub struct Context {
    pub home: PathBuf,
    pub config_file: PathBuf,
    pub config: CliConfig,
    pub project_dir: PathBuf,
    pub dry_run: bool,
    pub verbose: bool,
    pub engine: Engine,
    pub pull_policy: PullPolicy,
    pulled: RefCell<HashSet<String>>,
    inspected: RefCell<HashMap<String, ImageConfig>>,
}

impl Context {
    pub fn new(home: PathBuf, config_file: PathBuf, config: CliConfig, project_dir: PathBuf) -> Self {
        Self {
            home,
            config_file,
            config,
            project_dir,
            dry_run: false,
            verbose: false,
            engine: Engine::Docker,
            pull_policy: PullPolicy::Always,
            pulled: RefCell::new(HashSet::new()),
            inspected: RefCell::new(HashMap::new()),
        }
    }

    /// Resolve the global config (`--config` or `<home>/.appsody.yaml`), the
    /// home directory, and use the current directory as the project.
    pub fn load(config_file: Option<&Path>, dry_run: bool, verbose: bool) -> Result<Self> {
        let config_file = match config_file {
            Some(p) => p.to_path_buf(),
            None => paths::global_config_path(&paths::default_home()?),
        };
        let config = CliConfig::load(&config_file)?;
        let home = config.home_dir()?;
        let project_dir = std::env::current_dir()?;
        tracing::debug!("Running with home {} and config {}", home.display(), config_file.display());
        let mut ctx = Self::new(home, config_file, config, project_dir);
        ctx.dry_run = dry_run;
        ctx.verbose = verbose;
        ctx.pull_policy = PullPolicy::from_env();
        Ok(ctx)
    }

    pub fn with_project_dir(mut self, dir: &Path) -> Self {
        self.project_dir = dir.to_path_buf();
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Same settings with empty caches, for work handed to another thread.
    pub fn detached(&self) -> Self {
        let mut ctx = Self::new(
            self.home.clone(),
            self.config_file.clone(),
            self.config.clone(),
            self.project_dir.clone(),
        );
        ctx.dry_run = self.dry_run;
        ctx.verbose = self.verbose;
        ctx.engine = self.engine;
        ctx.pull_policy = self.pull_policy;
        ctx
    }

    /// Create the home layout and default files if they are missing.
    pub fn ensure_home(&self) -> Result<()> {
        crate::config::ensure_config(&self.home, &self.config_file, &self.config, self.dry_run)
    }

    pub fn project_config(&self) -> Result<ProjectConfig> {
        ProjectConfig::load(&self.project_dir)
    }

    /// Project name for the current project (derived and saved when missing).
    pub fn project_name(&self) -> Result<String> {
        let mut cfg = self.project_config()?;
        cfg.project_name(&self.project_dir, self.dry_run)
    }

    pub fn is_windows(&self) -> bool {
        cfg!(windows)
    }

    // -----------------------------------------------------------------------
    // Image caches
    // -----------------------------------------------------------------------

    pub fn is_pulled(&self, image: &str) -> bool {
        self.pulled.borrow().contains(image)
    }

    pub fn mark_pulled(&self, image: &str) {
        self.pulled.borrow_mut().insert(image.to_string());
    }

    pub fn cached_image_config(&self, image: &str) -> Option<ImageConfig> {
        self.inspected.borrow().get(image).cloned()
    }

    /// Record an inspect result; also used to seed the cache in tests.
    pub fn cache_image_config(&self, image: &str, cfg: ImageConfig) {
        self.inspected.borrow_mut().insert(image.to_string(), cfg);
    }
}
