//! The pull-request identity object and its persisted projection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::PullError,
    ghstack,
    git::VcsQueries,
    github::{GithubClient, Repo},
};

const HUD_URL_PREFIX: &str = "https://hud.pytorch.org/pr/";

/// Identity for one stacked change, keyed by its remote-tracking ref.
///
/// Identity fields (`ref_name`, `user`, `ghstack_index`) are fixed at
/// construction. Everything else is computed at most once on first access
/// and stable thereafter: the commit message requires a `git log`, the
/// open/closed state an API round trip, the commit id a `git show-ref`.
#[derive(Debug, Clone)]
pub struct PullRequest {
    ref_name: String,
    user: String,
    ghstack_index: u32,
    pull_number: Option<String>,
    pull_message: Option<Vec<String>>,
    is_open: Option<bool>,
    commit_id: Option<String>,
}

impl PullRequest {
    /// Builds an identity from a remote-tracking ref, rejecting refs that
    /// are not of the `upstream/gh/<user>/<index>/orig` shape.
    pub fn from_ref(ref_name: &str) -> Result<Self, PullError> {
        let (user, ghstack_index) = ghstack::parse_ref(ref_name)?;
        Ok(Self {
            ref_name: ref_name.to_string(),
            user,
            ghstack_index,
            pull_number: None,
            pull_message: None,
            is_open: None,
            commit_id: None,
        })
    }

    /// Rebuilds an identity from a cache record, re-validating the ref
    /// shape and pre-filling whatever fields the snapshot carried.
    pub fn from_cached(record: CachedPull) -> Result<Self, PullError> {
        let mut pull = Self::from_ref(&record.ref_name)?;
        pull.pull_number = record.pull_number;
        pull.pull_message = record.pull_message;
        pull.is_open = record.is_open;
        Ok(pull)
    }

    /// Projects onto the persisted field subset, keeping only fields that
    /// were actually materialized.
    pub fn to_cached(&self) -> CachedPull {
        CachedPull {
            ref_name: self.ref_name.clone(),
            is_open: self.is_open,
            pull_message: self.pull_message.clone(),
            pull_number: self.pull_number.clone(),
        }
    }

    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn ghstack_index(&self) -> u32 {
        self.ghstack_index
    }

    fn ensure_message(&mut self, vcs: &dyn VcsQueries, repo: &Repo) -> Result<(), PullError> {
        if self.pull_number.is_some() && self.pull_message.is_some() {
            return Ok(());
        }
        let log = vcs.log_message(&self.ref_name)?;
        let (number, lines) = ghstack::parse_message(&log, &repo.pull_url_prefix())?;
        self.pull_number = Some(number);
        self.pull_message = Some(lines);
        Ok(())
    }

    pub fn pull_number(&mut self, vcs: &dyn VcsQueries, repo: &Repo) -> Result<&str, PullError> {
        self.ensure_message(vcs, repo)?;
        self.pull_number.as_deref().ok_or(PullError::NotGhstack)
    }

    pub fn pull_message(&mut self, vcs: &dyn VcsQueries, repo: &Repo) -> Result<&[String], PullError> {
        self.ensure_message(vcs, repo)?;
        self.pull_message.as_deref().ok_or(PullError::NotGhstack)
    }

    /// First line of the cleaned message.
    pub fn subject(&mut self, vcs: &dyn VcsQueries, repo: &Repo) -> Result<&str, PullError> {
        self.ensure_message(vcs, repo)?;
        self.pull_message
            .as_ref()
            .and_then(|lines| lines.first())
            .map(String::as_str)
            .ok_or(PullError::NotGhstack)
    }

    /// Whether the pull request is open, per the metadata endpoint. A 404
    /// or a payload without a `state` field is fatal and carries the raw
    /// payload.
    pub async fn is_open(
        &mut self,
        gh: &GithubClient,
        vcs: &dyn VcsQueries,
        repo: &Repo,
    ) -> Result<bool, PullError> {
        if let Some(open) = self.is_open {
            return Ok(open);
        }
        let number = self.pull_number(vcs, repo)?.to_string();
        let info = gh.pull_info(&number).await?;

        let what = format!("{}{number}", repo.pull_url_prefix());
        let dump = || serde_json::to_string_pretty(&info).unwrap_or_default();
        if info.get("status").and_then(Value::as_str) == Some("404") {
            return Err(PullError::UpstreamApi { what, body: dump() });
        }
        let state = info
            .get("state")
            .and_then(Value::as_str)
            .ok_or_else(|| PullError::UpstreamApi { what, body: dump() })?;

        let open = state == "open";
        self.is_open = Some(open);
        Ok(open)
    }

    pub fn commit_id(&mut self, vcs: &dyn VcsQueries) -> Result<&str, PullError> {
        if self.commit_id.is_none() {
            self.commit_id = Some(vcs.show_ref(&self.ref_name)?);
        }
        self.commit_id.as_deref().ok_or(PullError::NotGhstack)
    }

    pub fn url(&mut self, vcs: &dyn VcsQueries, repo: &Repo) -> Result<String, PullError> {
        let number = self.pull_number(vcs, repo)?;
        Ok(format!("{}{number}", repo.pull_url_prefix()))
    }

    pub fn hud_url(&mut self, vcs: &dyn VcsQueries, repo: &Repo) -> Result<String, PullError> {
        let number = self.pull_number(vcs, repo)?;
        Ok(format!("{HUD_URL_PREFIX}{number}"))
    }

    pub fn commit_url(&mut self, vcs: &dyn VcsQueries, repo: &Repo) -> Result<String, PullError> {
        let commit_id = self.commit_id(vcs)?;
        Ok(format!("{}{commit_id}", repo.commit_url_prefix()))
    }

    /// Browse URL for the branch itself: the ref with its remote segment
    /// dropped, under the repository's tree view.
    pub fn ref_url(&self, repo: &Repo) -> String {
        let branch = self
            .ref_name
            .split_once('/')
            .map(|(_, rest)| rest)
            .unwrap_or(&self.ref_name);
        format!("{}{branch}", repo.tree_url_prefix())
    }
}

/// The on-disk projection of a [`PullRequest`]: the expensive, stable
/// fields worth persisting. Cheap derivations are recomputed every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPull {
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_open: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_message: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_number: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::VcsQueries;

    /// Fails every query; asserts that cached fields are served without
    /// touching version control.
    struct NoVcs;

    impl VcsQueries for NoVcs {
        fn log_message(&self, refish: &str) -> Result<String, PullError> {
            Err(PullError::Vcs {
                command: format!("git log {refish}"),
                stderr: "not available in this test".to_string(),
            })
        }

        fn show_ref(&self, refish: &str) -> Result<String, PullError> {
            Err(PullError::Vcs {
                command: format!("git show-ref {refish}"),
                stderr: "not available in this test".to_string(),
            })
        }
    }

    fn repo() -> Repo {
        Repo::parse("pytorch/pytorch").unwrap()
    }

    fn cached(ref_name: &str, number: &str, subject: &str, is_open: Option<bool>) -> CachedPull {
        CachedPull {
            ref_name: ref_name.to_string(),
            is_open,
            pull_message: Some(vec![subject.to_string()]),
            pull_number: Some(number.to_string()),
        }
    }

    #[test]
    fn from_ref_derives_user_and_index() {
        let pull = PullRequest::from_ref("upstream/gh/alice/3/orig").unwrap();
        assert_eq!(pull.user(), "alice");
        assert_eq!(pull.ghstack_index(), 3);
    }

    #[test]
    fn from_cached_rejects_malformed_refs() {
        let record = cached("origin/feature", "123456", "subject", None);
        assert!(matches!(
            PullRequest::from_cached(record),
            Err(PullError::RefShape(_))
        ));
    }

    #[test]
    fn cached_fields_round_trip() {
        let record = cached("upstream/gh/alice/3/orig", "123456", "Fix the thing", Some(true));
        let mut pull = PullRequest::from_cached(record).unwrap();

        // Served from the snapshot, no VCS involved.
        assert_eq!(pull.pull_number(&NoVcs, &repo()).unwrap(), "123456");
        assert_eq!(pull.subject(&NoVcs, &repo()).unwrap(), "Fix the thing");

        let back = pull.to_cached();
        assert_eq!(back.pull_number.as_deref(), Some("123456"));
        assert_eq!(back.is_open, Some(true));
        assert_eq!(back.pull_message.unwrap()[0], "Fix the thing");
    }

    #[test]
    fn unmaterialized_fields_are_not_projected() {
        let pull = PullRequest::from_ref("upstream/gh/alice/3/orig").unwrap();
        let record = pull.to_cached();
        assert!(record.pull_number.is_none());
        assert!(record.pull_message.is_none());
        assert!(record.is_open.is_none());

        let json = serde_json::to_value(&record).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["ref"]);
    }

    #[test]
    fn url_derivations() {
        let record = cached("upstream/gh/alice/3/orig", "123456", "Subject", None);
        let mut pull = PullRequest::from_cached(record).unwrap();
        let repo = repo();

        assert_eq!(
            pull.url(&NoVcs, &repo).unwrap(),
            "https://github.com/pytorch/pytorch/pull/123456"
        );
        assert_eq!(pull.hud_url(&NoVcs, &repo).unwrap(), "https://hud.pytorch.org/pr/123456");
        assert_eq!(
            pull.ref_url(&repo),
            "https://github.com/pytorch/pytorch/tree/gh/alice/3/orig"
        );
    }
}
