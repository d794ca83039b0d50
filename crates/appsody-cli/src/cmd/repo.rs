use crate::output::{print_formatted, print_table, OutputFormat};
use appsody_core::index::RepoIndex;
use appsody_core::repo::RepositoryFile;
use appsody_core::Context;
use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum RepoSubcommand {
    /// Add a stack repository
    Add {
        /// Repository name (letters, digits, '-' and '_', at most 50 characters)
        name: String,
        /// URL of the repository index
        url: String,
    },
    /// Remove a stack repository
    Remove { name: String },
    /// List the configured repositories
    List {
        /// Output format
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },
    /// Make a repository the default for `appsody init <stack>`
    SetDefault { name: String },
}

pub fn run(ctx: &Context, subcmd: RepoSubcommand) -> anyhow::Result<()> {
    match subcmd {
        RepoSubcommand::Add { name, url } => add(ctx, &name, &url),
        RepoSubcommand::Remove { name } => remove(ctx, &name),
        RepoSubcommand::List { output } => list(ctx, output),
        RepoSubcommand::SetDefault { name } => set_default(ctx, &name),
    }
}

fn add(ctx: &Context, name: &str, url: &str) -> anyhow::Result<()> {
    let mut repos = RepositoryFile::load_repaired(ctx)?;
    repos.add(name, url)?;

    let index = RepoIndex::fetch(name, url)?;
    if index.is_unsupported() {
        tracing::warn!(
            "The repository index at {url} uses apiVersion {}; only {} is fully supported",
            index.api_version,
            appsody_core::index::SUPPORTED_API_VERSION
        );
    }

    if ctx.dry_run {
        tracing::info!("Dry Run - Skipping appsody repo add repository Name: {name}, URL: {url}");
        return Ok(());
    }
    repos.save_to_home(ctx)?;
    Ok(())
}

fn remove(ctx: &Context, name: &str) -> anyhow::Result<()> {
    let mut repos = RepositoryFile::load_repaired(ctx)?;
    repos.remove(name)?;
    if ctx.dry_run {
        tracing::info!("Dry Run - Skipping appsody repo remove {name}");
        return Ok(());
    }
    repos.save_to_home(ctx)?;
    tracing::info!("The {name} repository has been removed from your configured list of repositories.");
    Ok(())
}

fn list(ctx: &Context, output: Option<OutputFormat>) -> anyhow::Result<()> {
    let repos = RepositoryFile::load_repaired(ctx)?;
    match output {
        Some(format) => print_formatted(format, &repos),
        None => {
            let rows: Vec<Vec<String>> = repos
                .rows()
                .into_iter()
                .map(|(name, url)| vec![name, url])
                .collect();
            print_table(&["NAME", "URL"], &rows);
            Ok(())
        }
    }
}

fn set_default(ctx: &Context, name: &str) -> anyhow::Result<()> {
    let mut repos = RepositoryFile::load_repaired(ctx)?;
    if !repos.set_default(name)? {
        tracing::info!("Your default repository has already been set to {name}");
        return Ok(());
    }
    if ctx.dry_run {
        tracing::info!("Dry Run - Skipping appsody repo set-default {name}");
        return Ok(());
    }
    repos.save_to_home(ctx)?;
    tracing::info!("Your default repository is now set to {name}");
    Ok(())
}
