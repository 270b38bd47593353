//! Synchronous `git` subprocess plumbing.
//!
//! Every query is a short-lived `git` invocation with captured output; a
//! non-zero exit surfaces as [`PullError::Vcs`] with the captured stderr
//! attached.

use std::{collections::BTreeMap, process::Command};

use tracing::debug;

use crate::error::PullError;

/// The read-only queries the resolution layer needs from version control.
///
/// Kept as a trait so resolution and entity accessors can be exercised
/// against canned output without a live repository.
pub trait VcsQueries {
    /// Full `git log --pretty=medium -1 <refish>` output.
    fn log_message(&self, refish: &str) -> Result<String, PullError>;

    /// The commit hash a ref points at.
    fn show_ref(&self, refish: &str) -> Result<String, PullError>;
}

#[derive(Debug, Default)]
pub struct Git;

impl Git {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, args: &[&str]) -> Result<String, PullError> {
        debug!("$ git {}", args.join(" "));
        let output = Command::new("git").args(args).output().map_err(|err| PullError::Vcs {
            command: format!("git {}", args.join(" ")),
            stderr: err.to_string(),
        })?;
        if !output.status.success() {
            return Err(PullError::Vcs {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn lines(&self, args: &[&str]) -> Result<Vec<String>, PullError> {
        Ok(self.run(args)?.lines().map(str::to_string).collect())
    }

    /// Remote-tracking branch names, trimmed, in `git branch -r` order.
    pub fn remote_branches(&self) -> Result<Vec<String>, PullError> {
        Ok(self
            .lines(&["branch", "-r"])?
            .into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    pub fn fetch(&self, remote: &str) -> Result<(), PullError> {
        self.run(&["fetch", remote]).map(|_| ())
    }

    /// Remote name -> owning user, parsed from each remote URL.
    pub fn remotes(&self) -> Result<BTreeMap<String, String>, PullError> {
        let mut remotes = BTreeMap::new();
        for line in self.lines(&["remote", "-v"])? {
            let mut fields = line.split_whitespace();
            if let (Some(name), Some(remote_url)) = (fields.next(), fields.next()) {
                remotes.insert(name.to_string(), owner_from_remote_url(remote_url));
            }
        }
        Ok(remotes)
    }

    pub fn add_remote(&self, name: &str, remote_url: &str) -> Result<(), PullError> {
        self.run(&["remote", "add", name, remote_url]).map(|_| ())
    }

    pub fn rebase(&self, onto: &str) -> Result<(), PullError> {
        self.run(&["rebase", onto]).map(|_| ())
    }

    pub fn update_submodules(&self) -> Result<(), PullError> {
        self.run(&["submodule", "update", "--init", "--recursive"]).map(|_| ())
    }
}

impl VcsQueries for Git {
    fn log_message(&self, refish: &str) -> Result<String, PullError> {
        self.run(&["log", "--pretty=medium", "-1", refish])
    }

    fn show_ref(&self, refish: &str) -> Result<String, PullError> {
        let out = self.run(&["show-ref", "-s", refish])?;
        Ok(out.lines().next().unwrap_or("").trim().to_string())
    }
}

/// Delegates to the external `ghstack` tool to check out a stacked pull
/// request by URL.
pub fn ghstack_checkout(pull_url: &str) -> Result<(), PullError> {
    debug!("$ ghstack checkout {pull_url}");
    let output = Command::new("ghstack")
        .args(["checkout", pull_url])
        .output()
        .map_err(|err| PullError::Vcs {
            command: format!("ghstack checkout {pull_url}"),
            stderr: err.to_string(),
        })?;
    if !output.status.success() {
        return Err(PullError::Vcs {
            command: format!("ghstack checkout {pull_url}"),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// The owner ("user") segment of a git remote URL, for both
/// `git@github.com:owner/repo.git` and `https://github.com/owner/repo`
/// forms. Unparseable URLs yield an empty owner.
pub fn owner_from_remote_url(remote_url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(remote_url) {
        if let Some(owner) = parsed.path_segments().and_then(|mut segments| segments.next()) {
            return owner.to_string();
        }
    }
    remote_url
        .split_once(':')
        .map(|(_, path)| path.split('/').next().unwrap_or(""))
        .unwrap_or("")
        .to_string()
}
