//! HTTP(S) and `file://` downloads for indices, templates and operator manifests.

use crate::error::{AppsodyError, Result};
use std::path::{Path, PathBuf};

/// Local path for a `file://` URL.
pub fn file_url_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
}

pub fn is_file_url(url: &str) -> bool {
    url.starts_with("file://")
}

pub fn to_file_url(path: &Path) -> String {
    format!("file://{}", crate::paths::to_slash(path))
}

/// Fetch the full body of `url`.
pub fn fetch(url: &str) -> Result<Vec<u8>> {
    if let Some(path) = file_url_path(url) {
        tracing::debug!("Reading {}", path.display());
        return std::fs::read(&path).map_err(|e| AppsodyError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        });
    }
    tracing::debug!("Downloading {url}");
    let network = |reason: String| AppsodyError::Network {
        url: url.to_string(),
        reason,
    };
    let resp = reqwest::blocking::get(url).map_err(|e| network(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(network(format!("{} response code", status.as_u16())));
    }
    let body = resp.bytes().map_err(|e| network(e.to_string()))?;
    Ok(body.to_vec())
}

pub fn fetch_string(url: &str) -> Result<String> {
    let bytes = fetch(url)?;
    String::from_utf8(bytes).map_err(|e| AppsodyError::Network {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Download `url` to `target`, creating parent directories.
pub fn download_to(url: &str, target: &Path, dry_run: bool) -> Result<()> {
    if dry_run {
        tracing::info!("Dry Run - Skipping download of {url} to {}", target.display());
        return Ok(());
    }
    tracing::debug!("Downloading {url} to {}", target.display());
    let body = fetch(url)?;
    crate::io::atomic_write(target, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_urls_read_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx.yaml");
        std::fs::write(&path, "apiVersion: v2\n").unwrap();
        let url = to_file_url(&path);
        assert!(is_file_url(&url));
        assert_eq!(fetch_string(&url).unwrap(), "apiVersion: v2\n");
    }

    #[test]
    fn missing_file_is_network_error() {
        let err = fetch("file:///definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, AppsodyError::Network { .. }));
    }

    #[test]
    fn http_download_and_status_errors() {
        let mut server = mockito::Server::new();
        let ok = server
            .mock("GET", "/index.yaml")
            .with_status(200)
            .with_body("stacks: []\n")
            .create();
        let missing = server.mock("GET", "/missing.yaml").with_status(404).create();

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested/index.yaml");
        download_to(&format!("{}/index.yaml", server.url()), &target, false).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "stacks: []\n");

        let err = fetch(&format!("{}/missing.yaml", server.url())).unwrap_err();
        assert!(err.to_string().contains("404"));
        ok.assert();
        missing.assert();
    }

    #[test]
    fn dry_run_download_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("x");
        download_to("http://127.0.0.1:1/x", &target, true).unwrap();
        assert!(!target.exists());
    }
}
