//! Published-port computation for dev containers.

use crate::container::ImageConfig;
use crate::error::{AppsodyError, Result};
use regex::Regex;
use std::sync::OnceLock;

static PORT_RE: OnceLock<Regex> = OnceLock::new();

fn port_re() -> &'static Regex {
    PORT_RE.get_or_init(|| {
        Regex::new(
            r"^([0-9]{1,4}|[1-5][0-9]{4}|6[0-4][0-9]{3}|65[0-4][0-9]{2}|655[0-2][0-9]|6553[0-5])$",
        )
        .unwrap()
    })
}

pub fn is_valid_port(port: &str) -> bool {
    port_re().is_match(port)
}

/// Validate user `host:container` mappings.
pub fn check_port_input(published: &[String]) -> Result<()> {
    for mapping in published {
        let Some((host, container)) = mapping.split_once(':') else {
            return Err(AppsodyError::UserInput(format!(
                "The port input: {mapping} is not valid as the : separator is missing."
            )));
        };
        if !is_valid_port(host) || !is_valid_port(container) {
            return Err(AppsodyError::UserInput(format!(
                "The numeric port input: {mapping} is not valid."
            )));
        }
    }
    Ok(())
}

/// `-P` / `-p host:container` arguments for `docker run`.
///
/// User mappings come first and win over exposed ports with the same
/// container-side port. `PORT` from the stack is treated as exposed. With
/// `publish_all` only a `PORT` missing from the image's EXPOSE list is mapped
/// explicitly, since `-P` will not publish it.
pub fn port_args(stack: &ImageConfig, published: &[String], publish_all: bool) -> Result<Vec<String>> {
    check_port_input(published)?;

    let mut exposed = stack.exposed_ports.clone();
    let container_port = stack.env("PORT").unwrap_or("").trim().to_string();
    let port_is_exposed = exposed.iter().any(|p| *p == container_port);
    tracing::debug!("Exposed ports provided by the stack: {exposed:?}; PORT={container_port}");
    if !container_port.is_empty() && !port_is_exposed {
        exposed.push(container_port.clone());
    }

    let mut args = Vec::new();
    if publish_all {
        args.push("-P".to_string());
        exposed.clear();
        if !container_port.is_empty() && !port_is_exposed {
            exposed.push(container_port);
        }
    }

    let mut mappings: Vec<String> = published.to_vec();
    for port in exposed {
        let overridden = published
            .iter()
            .any(|m| m.split_once(':').map(|(_, c)| c) == Some(port.as_str()));
        if !overridden {
            mappings.push(format!("{port}:{port}"));
        }
    }
    for m in mappings {
        args.push("-p".to_string());
        args.push(m);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::image_config;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn user_override_replaces_exposed_port() {
        let stack = image_config(&[("PORT", "3000")], &["3000", "9229"]);
        let args = port_args(&stack, &strings(&["3100:3000"]), false).unwrap();
        assert_eq!(args.join(" "), "-p 3100:3000 -p 9229:9229");
    }

    #[test]
    fn publish_all_emits_no_explicit_mappings() {
        let stack = image_config(&[], &["3000", "9229"]);
        let args = port_args(&stack, &[], true).unwrap();
        assert_eq!(args, vec!["-P"]);
    }

    #[test]
    fn publish_all_still_maps_unexposed_port_env() {
        let stack = image_config(&[("PORT", "8080")], &["3000"]);
        let args = port_args(&stack, &[], true).unwrap();
        assert_eq!(args.join(" "), "-P -p 8080:8080");
    }

    #[test]
    fn port_env_added_when_not_exposed() {
        let stack = image_config(&[("PORT", "8080")], &["3000"]);
        let args = port_args(&stack, &[], false).unwrap();
        assert_eq!(args.join(" "), "-p 3000:3000 -p 8080:8080");
    }

    #[test]
    fn invalid_port_input_rejected() {
        let stack = image_config(&[], &[]);
        let err = port_args(&stack, &strings(&["3000"]), false).unwrap_err();
        assert!(err.to_string().contains("separator is missing"));
        let err = port_args(&stack, &strings(&["70000:3000"]), false).unwrap_err();
        assert!(err.to_string().contains("is not valid"));
    }

    #[test]
    fn every_emitted_port_matches_the_port_pattern() {
        let stack = image_config(&[("PORT", "65535")], &["1", "443", "9229"]);
        let args = port_args(&stack, &strings(&["8443:443"]), false).unwrap();
        for pair in args.iter().filter(|a| a.contains(':')) {
            let (h, c) = pair.split_once(':').unwrap();
            assert!(is_valid_port(h) && is_valid_port(c), "{pair}");
        }
    }
}
