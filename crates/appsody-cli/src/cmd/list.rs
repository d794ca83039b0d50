use crate::output::{print_formatted, print_table, OutputFormat};
use appsody_core::error::format_index_errors;
use appsody_core::index::{self, Indices};
use appsody_core::repo::RepositoryFile;
use appsody_core::{AppsodyError, Context};

pub fn run(ctx: &Context, repo: Option<&str>, output: Option<OutputFormat>) -> anyhow::Result<()> {
    let mut repos = RepositoryFile::load_repaired(ctx)?;
    if let Some(name) = repo {
        if !repos.has(name) {
            return Err(AppsodyError::RepoNotFound(name.to_string()).into());
        }
        repos.repositories.retain(|r| r.name == name);
    }

    let Indices {
        indices,
        errors,
        unsupported,
    } = index::fetch_all(&repos);
    if repo.is_some() && !errors.is_empty() {
        return Err(AppsodyError::IndexErrors(errors).into());
    }
    for name in &unsupported {
        tracing::warn!("The repository {name} uses an index format this version of appsody does not fully support");
    }

    match output {
        Some(format) => print_formatted(format, &index::index_output(&indices))?,
        None => {
            let rows: Vec<Vec<String>> = index::stack_rows(&repos, &indices)
                .into_iter()
                .map(|r| vec![r.repo, r.id, r.version, r.templates, r.description])
                .collect();
            print_table(&["REPO", "ID", "VERSION", "TEMPLATES", "DESCRIPTION"], &rows);
        }
    }

    if !errors.is_empty() {
        tracing::warn!(
            "The following repositories could not be read:\n{}",
            format_index_errors(&errors)
        );
    }
    Ok(())
}
