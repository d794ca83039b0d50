//! Turning a user's `[repo/]stack [template]` into a concrete template URL.

use crate::error::{AppsodyError, Result};
use crate::index::{IndexStack, IndexTemplate, RepoIndex};
use crate::repo::RepositoryFile;

pub const NO_TEMPLATE: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRef {
    /// `None` means the default repository.
    pub repo: Option<String>,
    pub stack: String,
}

/// `stack` or `repo/stack`; anything else is malformed.
pub fn parse_reference(raw: &str) -> Result<StackRef> {
    let parts: Vec<&str> = raw.split('/').collect();
    match parts.as_slice() {
        [stack] if !stack.is_empty() => Ok(StackRef {
            repo: None,
            stack: stack.to_string(),
        }),
        [repo, stack] if !repo.is_empty() && !stack.is_empty() => Ok(StackRef {
            repo: Some(repo.to_string()),
            stack: stack.to_string(),
        }),
        _ => Err(AppsodyError::MalformedReference(raw.to_string())),
    }
}

/// A stack reference resolved against its repository index.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub repo: String,
    pub stack: IndexStack,
    pub template: IndexTemplate,
    /// True when only the project config should be materialised.
    pub no_template: bool,
    /// True when the template came from the stack's default.
    pub used_default: bool,
}

/// Pick the repository for a reference, failing on an empty or unknown registry.
pub fn select_repo<'a>(
    repos: &'a RepositoryFile,
    reference: &StackRef,
) -> Result<&'a crate::repo::RepositoryEntry> {
    if repos.repositories.is_empty() {
        return Err(AppsodyError::EmptyRegistry);
    }
    match &reference.repo {
        Some(name) => repos
            .get(name)
            .ok_or_else(|| AppsodyError::RepoNotFound(name.clone())),
        None => repos.default_repo(),
    }
}

/// Find the stack and template in an already-fetched index.
pub fn resolve_in_index(
    repo: &str,
    index: &RepoIndex,
    stack_id: &str,
    template: Option<&str>,
    no_template: bool,
) -> Result<Resolved> {
    let no_template = no_template || template == Some(NO_TEMPLATE);
    let stack = index
        .find_stack(stack_id)
        .ok_or_else(|| AppsodyError::StackNotFound {
            stack: stack_id.to_string(),
            repo: repo.to_string(),
        })?;

    let explicit = template.filter(|t| !t.is_empty() && *t != NO_TEMPLATE);
    let (template_id, used_default) = match explicit {
        Some(t) => (t.to_string(), false),
        None => (
            stack
                .default_template_id()
                .ok_or(AppsodyError::NoDefaultTemplate)?
                .to_string(),
            true,
        ),
    };
    let template = stack
        .template(&template_id)
        .cloned()
        .ok_or_else(|| AppsodyError::TemplateNotFound {
            template: template_id.clone(),
            stack: stack_id.to_string(),
            repo: repo.to_string(),
        })?;
    if template.url.is_empty() {
        return Err(AppsodyError::TemplateNotFound {
            template: template_id,
            stack: stack_id.to_string(),
            repo: repo.to_string(),
        });
    }
    Ok(Resolved {
        repo: repo.to_string(),
        stack: stack.clone(),
        template,
        no_template,
        used_default,
    })
}

/// Full resolution: pick the repository, fetch its index, find the template.
/// A single-repository fetch failure is fatal.
pub fn resolve(
    repos: &RepositoryFile,
    raw: &str,
    template: Option<&str>,
    no_template: bool,
) -> Result<Resolved> {
    let reference = parse_reference(raw)?;
    let entry = select_repo(repos, &reference)?;
    let index = RepoIndex::fetch(&entry.name, &entry.url)?;
    resolve_in_index(&entry.name, &index, &reference.stack, template, no_template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::fixtures::V2_INDEX;

    fn index() -> RepoIndex {
        RepoIndex::parse(V2_INDEX).unwrap()
    }

    #[test]
    fn reference_forms() {
        assert_eq!(
            parse_reference("nodejs").unwrap(),
            StackRef {
                repo: None,
                stack: "nodejs".into()
            }
        );
        assert_eq!(
            parse_reference("incubator/nodejs").unwrap().repo.as_deref(),
            Some("incubator")
        );
        for bad in ["/nodejs-express", "incubator/", "a/b/c", ""] {
            let err = parse_reference(bad).unwrap_err();
            assert!(err.to_string().contains("malformed project parameter"), "{bad}");
        }
    }

    #[test]
    fn default_template_used_when_unspecified() {
        let r = resolve_in_index("incubator", &index(), "nodejs-express", None, false).unwrap();
        assert_eq!(r.template.id, "simple");
        assert!(r.used_default);
        assert!(!r.no_template);
    }

    #[test]
    fn none_template_means_no_template() {
        let r = resolve_in_index("incubator", &index(), "nodejs-express", Some("none"), false).unwrap();
        assert!(r.no_template);
        assert_eq!(r.template.id, "simple");
    }

    #[test]
    fn unknown_stack_and_template() {
        let err = resolve_in_index("incubator", &index(), "nope", None, false).unwrap_err();
        assert!(matches!(err, AppsodyError::StackNotFound { .. }));
        let err =
            resolve_in_index("incubator", &index(), "nodejs-express", Some("x"), false).unwrap_err();
        assert!(matches!(err, AppsodyError::TemplateNotFound { .. }));
    }

    #[test]
    fn missing_default_template() {
        let idx = RepoIndex::parse(
            "apiVersion: v2\nstacks:\n- id: s\n  templates:\n  - id: a\n    url: u\n",
        )
        .unwrap();
        let err = resolve_in_index("r", &idx, "s", None, false).unwrap_err();
        assert!(matches!(err, AppsodyError::NoDefaultTemplate));
        assert!(resolve_in_index("r", &idx, "s", Some("a"), false).is_ok());
    }

    #[test]
    fn repo_selection() {
        let repos = RepositoryFile::with_defaults();
        let r = select_repo(&repos, &parse_reference("nodejs").unwrap()).unwrap();
        assert_eq!(r.name, "incubator");
        let err = select_repo(&repos, &parse_reference("zzz/nodejs").unwrap()).unwrap_err();
        assert!(matches!(err, AppsodyError::RepoNotFound(_)));
        let err = select_repo(&RepositoryFile::default(), &parse_reference("x").unwrap()).unwrap_err();
        assert!(matches!(err, AppsodyError::EmptyRegistry));
    }
}
