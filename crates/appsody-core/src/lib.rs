pub mod archive;
pub mod build;
pub mod cluster;
pub mod config;
pub mod container;
pub mod context;
pub mod controller;
pub mod deploy;
pub mod devloop;
pub mod download;
pub mod error;
pub mod exec;
pub mod extract;
pub mod git;
pub mod index;
pub mod init;
pub mod io;
pub mod labels;
pub mod manifests;
pub mod mounts;
pub mod names;
pub mod operator;
pub mod paths;
pub mod ports;
pub mod reference;
pub mod repo;
pub mod requirements;
pub mod stack;
pub mod template;

/// Version of this CLI, checked against a stack's `appsody-version` requirement.
pub const APPSODY_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use context::Context;
pub use error::{AppsodyError, Result};
