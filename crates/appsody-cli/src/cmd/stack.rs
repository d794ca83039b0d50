use anyhow::bail;
use appsody_core::stack::create::{self, DEFAULT_COPY};
use appsody_core::stack::lint;
use appsody_core::stack::package::{self, PackageOptions};
use appsody_core::stack::repo_index::{self, AddOptions, DEFAULT_RELEASE_URL};
use appsody_core::stack::validate::{self, ValidateOptions};
use appsody_core::{paths, Context};
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct ImageArgs {
    /// Namespace of the stack image
    #[arg(long, default_value = paths::DEV_LOCAL)]
    pub image_namespace: String,
    /// Registry host of the stack image
    #[arg(long)]
    pub image_registry: Option<String>,
}

impl ImageArgs {
    fn options(&self) -> PackageOptions {
        PackageOptions {
            image_namespace: self.image_namespace.clone(),
            image_registry: self.image_registry.clone(),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum StackSubcommand {
    /// Create a new stack by copying an existing one
    Create {
        /// Name of the new stack directory
        name: String,
        /// Stack to copy: [repo/]stack
        #[arg(long, default_value = DEFAULT_COPY)]
        copy: String,
    },
    /// Check the structure of a stack
    Lint {
        /// Stack directory (default: the current directory)
        path: Option<PathBuf>,
    },
    /// Build the stack image and publish it to the dev.local repository
    Package {
        #[command(flatten)]
        image: ImageArgs,
    },
    /// Lint, package and exercise the stack with a throwaway project
    Validate {
        /// Skip the lint step
        #[arg(long)]
        no_lint: bool,
        /// Skip the package step
        #[arg(long)]
        no_package: bool,
        #[command(flatten)]
        image: ImageArgs,
    },
    /// Add the stack to the index of a repository
    AddToRepo {
        /// Repository whose index is updated
        repo: String,
        /// URL prefix of the template archives
        #[arg(long, default_value = DEFAULT_RELEASE_URL)]
        release_url: String,
        /// Update the local copy of the index instead of downloading it
        #[arg(long)]
        use_local_cache: bool,
    },
    /// Remove a stack from the index of a repository
    RemoveFromRepo {
        repo: String,
        stack: String,
        /// Update the local copy of the index instead of downloading it
        #[arg(long)]
        use_local_cache: bool,
    },
}

pub fn run(ctx: &Context, subcmd: StackSubcommand) -> anyhow::Result<()> {
    let here = ctx.project_dir.as_path();
    match subcmd {
        StackSubcommand::Create { name, copy } => {
            create::create(ctx, &name, &copy)?;
        }
        StackSubcommand::Lint { path } => {
            let dir = path.unwrap_or_else(|| here.to_path_buf());
            lint::lint(&dir)?;
        }
        StackSubcommand::Package { image } => {
            package::package(ctx, here, &image.options())?;
        }
        StackSubcommand::Validate {
            no_lint,
            no_package,
            image,
        } => {
            let opts = ValidateOptions {
                no_lint,
                no_package,
                package: image.options(),
            };
            let report = validate::validate(ctx, here, &opts)?;
            if report.failed() > 0 {
                bail!("stack validation failed for {}", report.stack);
            }
        }
        StackSubcommand::AddToRepo {
            repo,
            release_url,
            use_local_cache,
        } => {
            let opts = AddOptions {
                release_url,
                use_local_cache,
                ..AddOptions::new(&repo)
            };
            repo_index::add_to_repo(ctx, here, &opts)?;
        }
        StackSubcommand::RemoveFromRepo {
            repo,
            stack,
            use_local_cache,
        } => {
            repo_index::remove_from_repo(ctx, &repo, &stack, use_local_cache)?;
        }
    }
    Ok(())
}
