//! GitHub-facing surface: repository identity, URL derivations, and the
//! small set of endpoints the tool reads.
//!
//! Responses are kept as raw [`serde_json::Value`] so fatal paths can dump
//! the exact payload for diagnosis instead of a deserializer message.

use std::{process::Command, time::Duration};

use anyhow::Result;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde_json::Value;

use crate::error::PullError;

pub const API_ROOT: &str = "https://api.github.com";

const ACCEPT_HEADER: (&str, &str) = ("Accept", "application/vnd.github+json");
const API_VERSION_HEADER: (&str, &str) = ("X-GitHub-Api-Version", "2022-11-28");

/// Environment variables consulted for a token, in order, before falling
/// back to the `gh` CLI.
const TOKEN_VARS: [&str; 3] = ["STACKMAN_GITHUB_TOKEN", "GITHUB_TOKEN", "GH_TOKEN"];

/// A GitHub repository in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    owner: String,
    name: String,
}

impl Repo {
    pub fn parse(repo: &str) -> Result<Self> {
        let parts: Vec<&str> = repo.split('/').collect();
        match parts.as_slice() {
            [owner, name] if !owner.is_empty() && !name.is_empty() => Ok(Self {
                owner: (*owner).to_string(),
                name: (*name).to_string(),
            }),
            _ => anyhow::bail!("repository must be in 'owner/name' form, got: '{repo}'"),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn ssh_url(&self) -> String {
        format!("git@github.com:{}/{}.git", self.owner, self.name)
    }

    pub fn pull_url_prefix(&self) -> String {
        format!("https://github.com/{}/{}/pull/", self.owner, self.name)
    }

    pub fn tree_url_prefix(&self) -> String {
        format!("https://github.com/{}/{}/tree/", self.owner, self.name)
    }

    pub fn commit_url_prefix(&self) -> String {
        format!("https://github.com/{}/{}/commit/", self.owner, self.name)
    }

    /// Path prefix of workflow-run links on the checks page.
    pub fn run_href_prefix(&self) -> String {
        format!("/{}/{}/actions/runs/", self.owner, self.name)
    }

    pub fn checks_url(&self, pull_number: &str) -> String {
        format!("{}{}/checks", self.pull_url_prefix(), pull_number)
    }
}

/// Resolves a bearer token from the environment, then from `gh auth token`.
///
/// Returns `None` when neither yields one; unauthenticated requests work
/// but are rate-limited much sooner.
pub fn resolve_token() -> Option<String> {
    for name in TOKEN_VARS {
        if let Ok(token) = std::env::var(name) {
            if !token.is_empty() {
                return Some(token);
            }
        }
    }

    let output = Command::new("gh").args(["auth", "token"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let token = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!token.is_empty()).then_some(token)
}

/// Warns when [`resolve_token`] came up empty.
pub fn warn_if_unauthenticated(token: &Option<String>) {
    if token.is_none() {
        tracing::warn!(
            "no GitHub token found in {TOKEN_VARS:?} or `gh auth token`; \
             unauthenticated requests are rate-limited much sooner"
        );
    }
}

/// Client for the endpoints the tool reads: pull-request metadata, workflow
/// job listings, raw job logs, and the checks HTML page.
pub struct GithubClient {
    http: ClientWithMiddleware,
    token: Option<String>,
    repo: Repo,
}

impl GithubClient {
    pub fn new(repo: Repo, token: Option<String>) -> Self {
        let base = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(100), Duration::from_secs(5))
            .build_with_max_retries(3);
        let http = ClientBuilder::new(base)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self { http, token, repo }
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    fn api_get(&self, path: &str) -> reqwest_middleware::RequestBuilder {
        let mut request = self
            .http
            .get(format!("{API_ROOT}/repos/{}/{path}", self.repo.full_name()))
            .header(ACCEPT_HEADER.0, ACCEPT_HEADER.1)
            .header(API_VERSION_HEADER.0, API_VERSION_HEADER.1);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn fetch_text(
        &self,
        request: reqwest_middleware::RequestBuilder,
        url: &str,
    ) -> Result<String, PullError> {
        let response = request.send().await.map_err(|err| PullError::Http {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        response.text().await.map_err(|err| PullError::Http {
            url: url.to_string(),
            reason: err.to_string(),
        })
    }

    async fn fetch_json(&self, path: &str) -> Result<Value, PullError> {
        let url = format!("{API_ROOT}/repos/{}/{path}", self.repo.full_name());
        let body = self.fetch_text(self.api_get(path), &url).await?;
        serde_json::from_str(&body).map_err(|_| PullError::UpstreamApi { what: url, body })
    }

    /// Pull-request metadata. The payload is returned raw; callers check
    /// `state` and the `status: "404"` error shape themselves.
    pub async fn pull_info(&self, pull_number: &str) -> Result<Value, PullError> {
        self.fetch_json(&format!("pulls/{pull_number}")).await
    }

    /// First page of a workflow run's jobs (up to 100 entries).
    pub async fn run_jobs(&self, run_id: &str) -> Result<Value, PullError> {
        self.fetch_json(&format!("actions/runs/{run_id}/jobs?per_page=100")).await
    }

    /// Raw log text for one job.
    pub async fn job_log(&self, job_id: u64) -> Result<String, PullError> {
        let path = format!("actions/jobs/{job_id}/logs");
        let url = format!("{API_ROOT}/repos/{}/{path}", self.repo.full_name());
        self.fetch_text(self.api_get(&path), &url).await
    }

    /// The pull request's checks page as HTML. Served from the website,
    /// not the API, so no API headers are attached.
    pub async fn checks_page(&self, pull_number: &str) -> Result<String, PullError> {
        let url = self.repo.checks_url(pull_number);
        self.fetch_text(self.http.get(&url), &url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_parse_accepts_owner_name() {
        let repo = Repo::parse("pytorch/pytorch").unwrap();
        assert_eq!(repo.full_name(), "pytorch/pytorch");
        assert_eq!(repo.owner(), "pytorch");
    }

    #[test]
    fn repo_parse_rejects_other_shapes() {
        for bad in ["pytorch", "a/b/c", "/repo", "owner/", ""] {
            assert!(Repo::parse(bad).is_err(), "expected rejection for '{bad}'");
        }
    }

    #[test]
    fn url_derivations() {
        let repo = Repo::parse("pytorch/pytorch").unwrap();
        assert_eq!(
            repo.checks_url("123456"),
            "https://github.com/pytorch/pytorch/pull/123456/checks"
        );
        assert_eq!(repo.run_href_prefix(), "/pytorch/pytorch/actions/runs/");
        assert_eq!(repo.ssh_url(), "git@github.com:pytorch/pytorch.git");
    }
}
