//! Stack author toolkit.
//!
//! Everything behind `appsody stack ...`: `lint` checks a stack source tree,
//! `package` builds its image and template archives into the `dev.local`
//! repository, `add-to-repo` / `remove-from-repo` edit a repository index,
//! `create` scaffolds a new stack from an existing one, and `validate` chains
//! them with a throwaway project.

pub mod create;
pub mod lint;
pub mod manifest;
pub mod package;
pub mod repo_index;
pub mod validate;

pub use lint::LintReport;
pub use manifest::StackYaml;
