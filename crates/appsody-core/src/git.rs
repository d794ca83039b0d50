//! Read-only git queries used to label built images.

use crate::error::{AppsodyError, Result};
use crate::exec;
use std::path::Path;

const FIELD_SEP: char = '\u{1f}';
const NO_COMMITS: &str = "## No commits yet on ";
const BRANCH_PREFIX: &str = "## ";
const UPSTREAM_SEP: &str = "...";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitInfo {
    pub author: String,
    pub author_email: String,
    pub committer: String,
    pub committer_email: String,
    pub sha: String,
    pub date: String,
    pub message: String,
    /// Link to the commit on the hosting service, when the remote is known.
    pub url: String,
    /// Project directory relative to the repository top level, `/`-prefixed.
    pub context_dir: String,
    pub pushed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitInfo {
    pub branch: String,
    pub upstream: String,
    pub remote_url: String,
    pub changes_made: bool,
    pub commit: CommitInfo,
}

fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    tracing::debug!("Running git command: {}", exec::command_line("git", &args));
    let out = std::process::Command::new("git")
        .args(&args)
        .current_dir(dir)
        .output()
        .map_err(|e| AppsodyError::Git(e.to_string()))?;
    if !out.status.success() {
        return Err(AppsodyError::Git(
            String::from_utf8_lossy(&out.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim_end().to_string())
}

/// Branch, upstream and dirty flag from `git status -sb` output.
pub fn parse_status(output: &str) -> (String, String, bool) {
    let trimmed = output.trim_matches(|c| "' \r\n".contains(c));
    let lines: Vec<&str> = trimmed.lines().collect();
    let first = lines.first().map(|l| l.trim()).unwrap_or_default();
    let mut branch = String::new();
    let mut upstream = String::new();

    if let Some(rest) = first.strip_prefix(NO_COMMITS) {
        branch = rest.trim().to_string();
    } else if let Some(rest) = first.strip_prefix(BRANCH_PREFIX) {
        match rest.split_once(UPSTREAM_SEP) {
            Some((b, u)) => {
                branch = b.trim().to_string();
                upstream = u.split_whitespace().next().unwrap_or_default().to_string();
            }
            None => branch = rest.trim().to_string(),
        }
    }
    (branch, upstream, lines.len() > 1)
}

/// `origin` wins over `upstream`, which wins over whatever came first.
pub fn pick_remote(candidates: &[String]) -> Option<String> {
    let candidates: Vec<&str> = candidates
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if candidates.contains(&"origin") {
        return Some("origin".into());
    }
    if candidates.contains(&"upstream") {
        return Some("upstream".into());
    }
    candidates.first().map(|c| c.to_string())
}

/// Browsable https form of a remote URL.
pub fn https_remote(remote: &str) -> String {
    let mut url = remote.trim().to_string();
    if url.contains("git@") {
        url = url.replacen(':', "/", 1).replacen("git@", "https://", 1);
    }
    url.replacen(".git", "", 1)
}

fn parse_log(output: &str) -> Result<CommitInfo> {
    let fields: Vec<&str> = output.trim().split(FIELD_SEP).collect();
    let [author, author_email, sha, date, committer, committer_email, message] = fields[..] else {
        return Err(AppsodyError::Git(format!("unexpected git log output: {output}")));
    };
    Ok(CommitInfo {
        author: author.into(),
        author_email: author_email.into(),
        sha: sha.into(),
        date: date.into(),
        committer: committer.into(),
        committer_email: committer_email.into(),
        message: message.into(),
        ..CommitInfo::default()
    })
}

fn last_commit(dir: &Path) -> Result<CommitInfo> {
    let mut commit = parse_log(&git(
        dir,
        &["log", "-n", "1", "--pretty=format:%an%x1f%ae%x1f%H%x1f%cd%x1f%cn%x1f%ce%x1f%s"],
    )?)?;
    let toplevel = git(dir, &["rev-parse", "--show-toplevel"])?;
    let project = crate::paths::to_slash(dir);
    commit.context_dir = project.replacen(toplevel.trim(), "", 1);
    Ok(commit)
}

fn lines(output: &str) -> Vec<String> {
    output.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect()
}

/// Collect what git knows about `dir`. Partial information is returned
/// alongside the first problem encountered, so callers can still label.
pub fn info(dir: &Path) -> (GitInfo, Option<AppsodyError>) {
    let mut info = GitInfo::default();
    match git(dir, &["version"]) {
        Ok(v) if !v.is_empty() => tracing::debug!("git version: {v}"),
        Ok(_) => return (info, Some(AppsodyError::Git("git does not appear to be available".into()))),
        Err(e) => return (info, Some(e)),
    }

    let mut problems = Vec::new();
    match last_commit(dir) {
        Ok(c) => info.commit = c,
        Err(e) => problems.push(format!("Received error getting current commit: {e}")),
    }
    info.commit.pushed = true;

    let status = match git(dir, &["status", "-sb"]) {
        Ok(s) => s,
        Err(e) => return (info, Some(e)),
    };
    let (branch, upstream, changes) = parse_status(&status);
    info.branch = branch;
    info.upstream = upstream;
    info.changes_made = changes;

    if !info.commit.sha.is_empty() {
        if let Ok(out) = git(dir, &["branch", "-r", "--contains", &info.commit.sha]) {
            let remotes = lines(&out);
            if info.upstream.is_empty() {
                if let Some(r) = pick_remote(&remotes) {
                    tracing::debug!("Successfully retrieved upstream via git branch --contains");
                    info.upstream = r;
                }
            } else {
                info.commit.pushed = remotes.contains(&info.upstream);
            }
        }
    }

    if info.upstream.is_empty() {
        info.commit.pushed = false;
        match git(dir, &["remote"]) {
            Ok(out) => info.upstream = pick_remote(&lines(&out)).unwrap_or_default(),
            Err(e) => return (info, Some(e)),
        }
    }

    if info.upstream.is_empty() {
        problems.push("Unable to determine origin to compute repository URL".into());
    } else {
        let remote_name = info.upstream.split('/').next().unwrap_or_default().to_string();
        let key = format!("remote.{remote_name}.url");
        match git(dir, &["config", "--local", &key]) {
            Ok(url) => info.remote_url = https_remote(&url),
            Err(e) => problems.push(format!("Could not construct repository URL {e}")),
        }
    }

    if !info.remote_url.is_empty() {
        let base = info.remote_url.split(".git").next().unwrap_or_default();
        info.commit.url = format!("{base}/commit/{}", info.commit.sha);
    }

    let err = (!problems.is_empty()).then(|| AppsodyError::Git(problems.join(". ")));
    (info, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_with_upstream_and_changes() {
        let (branch, upstream, changes) =
            parse_status("## main...origin/main [ahead 1]\n M src/app.js\n");
        assert_eq!(branch, "main");
        assert_eq!(upstream, "origin/main");
        assert!(changes);
    }

    #[test]
    fn status_without_upstream_or_commits() {
        assert_eq!(
            parse_status("## feature"),
            ("feature".to_string(), String::new(), false)
        );
        assert_eq!(
            parse_status("## No commits yet on master"),
            ("master".to_string(), String::new(), false)
        );
    }

    #[test]
    fn remote_preference() {
        let r = |v: &[&str]| pick_remote(&v.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        assert_eq!(r(&["fork", "upstream", "origin"]).as_deref(), Some("origin"));
        assert_eq!(r(&["fork", "upstream"]).as_deref(), Some("upstream"));
        assert_eq!(r(&["fork"]).as_deref(), Some("fork"));
        assert_eq!(r(&[]), None);
    }

    #[test]
    fn ssh_remote_becomes_https() {
        assert_eq!(
            https_remote("git@github.com:appsody/stacks.git"),
            "https://github.com/appsody/stacks"
        );
        assert_eq!(
            https_remote("https://github.com/appsody/appsody.git\n"),
            "https://github.com/appsody/appsody"
        );
    }

    #[test]
    fn log_fields() {
        let out = "Jo\u{1f}jo@example.com\u{1f}abc123\u{1f}Mon Jan 6\u{1f}Jo\u{1f}jo@example.com\u{1f}Fix: it";
        let c = parse_log(out).unwrap();
        assert_eq!(c.sha, "abc123");
        assert_eq!(c.message, "Fix: it");
        assert!(parse_log("only\u{1f}two").is_err());
    }
}
