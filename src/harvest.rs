//! Harvests reproduction commands for a pull request's failing CI jobs.
//!
//! The pipeline: scrape the checks page for workflow-run links, poll each
//! run's job listing until the jobs settle (bounded by the caller's wait
//! budget), pull the raw logs of failed jobs, and lift the exact
//! reproduction command out of each log. Scraping the checks page is
//! best-effort by nature; anchors that don't look like run links simply
//! contribute nothing.

use std::{future::Future, sync::LazyLock, time::Duration};

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{error::PullError, github::{GithubClient, Repo}};

/// Log line announcing that the next line is a reproduction command.
const COMMAND_MARKER: &str = "To execute this test, run the following from the base repo dir";

/// Fixed sleep between job-list re-fetches while jobs are still running.
const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Job listings are read first-page-only; a full page means the run may
/// have more jobs than we saw.
const JOBS_PAGE_SIZE: usize = 100;

/// A reproduction command starts at the first token that is either an
/// environment assignment or the `python` interpreter; leading shell
/// scaffolding (`cd repo &&`, prompts) is dropped.
static COMMAND_LEAD_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Z_]+=.*|python)$").expect("Failed to compile command token pattern")
});

/// The workflow groupings recognized on the checks page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Inductor,
    Pull,
    Trunk,
}

impl Segment {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "inductor" => Some(Segment::Inductor),
            "pull" => Some(Segment::Pull),
            "trunk" => Some(Segment::Trunk),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Inductor => "inductor",
            Segment::Pull => "pull",
            Segment::Trunk => "trunk",
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work within a workflow run.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,
    pub conclusion: Option<String>,
}

impl Job {
    pub fn is_pending(&self) -> bool {
        self.conclusion.as_deref().is_none_or(str::is_empty)
    }

    pub fn is_failure(&self) -> bool {
        self.conclusion.as_deref() == Some("failure")
    }
}

/// Discovers `(segment, run id)` pairs from the checks page HTML: anchors
/// with non-empty text whose href is exactly the run-listing prefix plus a
/// numeric id, classified by the first descendant span naming a known
/// segment. Order follows the page; duplicates are preserved.
pub fn discover_runs(html: &str, repo: &Repo) -> Vec<(Segment, String)> {
    let document = Html::parse_document(html);
    let anchors = Selector::parse("a[href]").expect("Failed to parse anchor selector");
    let spans = Selector::parse("span").expect("Failed to parse span selector");
    let prefix = repo.run_href_prefix();

    let mut runs = Vec::new();
    for anchor in document.select(&anchors) {
        if anchor.text().collect::<String>().is_empty() {
            continue;
        }
        let Some(run_id) = anchor
            .value()
            .attr("href")
            .and_then(|href| href.strip_prefix(prefix.as_str()))
            .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        else {
            continue;
        };
        for span in anchor.select(&spans) {
            let label = span.text().collect::<String>();
            if let Some(segment) = Segment::from_label(label.trim()) {
                runs.push((segment, run_id.to_string()));
                break;
            }
        }
    }
    runs
}

/// Pulls the job array out of a listing payload. A payload without a
/// `jobs` field is a fatal upstream error carrying the raw payload.
pub fn parse_jobs(payload: &Value, run_id: &str) -> Result<Vec<Job>, PullError> {
    let jobs = payload
        .get("jobs")
        .and_then(Value::as_array)
        .ok_or_else(|| PullError::UpstreamApi {
            what: format!("job listing for run {run_id}"),
            body: serde_json::to_string_pretty(payload).unwrap_or_default(),
        })?;

    Ok(jobs
        .iter()
        .map(|job| Job {
            id: job.get("id").and_then(Value::as_u64).unwrap_or_default(),
            conclusion: job
                .get("conclusion")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
        .collect())
}

/// Fetches a run's jobs, re-fetching on the poll interval while any job is
/// pending, until the wait budget is exhausted. A zero budget returns the
/// first listing as-is.
pub async fn poll_jobs<F, Fut>(
    segment: Segment,
    run_id: &str,
    mut fetch: F,
    wait: Duration,
) -> Result<Vec<Job>, PullError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, PullError>>,
{
    let started = tokio::time::Instant::now();
    loop {
        info!("loading jobs for run {run_id}, segment={segment}");
        let payload = fetch().await?;
        let jobs = parse_jobs(&payload, run_id)?;
        if jobs.len() >= JOBS_PAGE_SIZE {
            warn!("run {run_id} returned {JOBS_PAGE_SIZE} jobs; listing may be incomplete");
        }

        let pending = jobs.iter().filter(|job| job.is_pending()).count();
        if pending > 0 {
            info!("{pending} job{} not finished", if pending == 1 { "" } else { "s" });
        }
        if pending == 0 || wait.is_zero() || started.elapsed() >= wait {
            return Ok(jobs);
        }

        info!("waiting {} seconds", POLL_INTERVAL.as_secs());
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Lifts the reproduction command out of a job log: the line after the
/// first marker line, stripped of leading tokens up to the first
/// environment assignment or `python`. Logs without the marker (or with
/// nothing usable after it) contribute nothing.
pub fn extract_command(log: &str) -> Option<String> {
    let mut lines = log.lines();
    lines.find(|line| line.contains(COMMAND_MARKER))?;
    let mut words: Vec<&str> = lines.next()?.split_whitespace().collect();

    while let Some(first) = words.first() {
        if COMMAND_LEAD_TOKEN.is_match(first) {
            break;
        }
        words.remove(0);
    }
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// Collapses commands that differ only in their leading environment
/// assignments. The group key is everything after the first `"python "`;
/// within a group the most recently produced command wins, except that a
/// strictly shorter candidate never replaces the one already stored.
pub fn dedupe_commands(commands: Vec<(String, u64)>) -> Vec<(String, u64)> {
    let mut keys: Vec<String> = Vec::new();
    let mut kept: Vec<(String, u64)> = Vec::new();

    for (command, job_id) in commands {
        let key = command
            .split_once("python ")
            .map(|(_, after)| after.to_string())
            .unwrap_or_default();
        match keys.iter().position(|k| *k == key) {
            Some(index) => {
                if command.len() < kept[index].0.len() {
                    debug!("dropping '{command}' in favor of '{}'", kept[index].0);
                    continue;
                }
                kept[index] = (command, job_id);
            }
            None => {
                keys.push(key);
                kept.push((command, job_id));
            }
        }
    }
    kept
}

/// Drives the full pipeline for one pull request.
pub struct Harvester<'a> {
    gh: &'a GithubClient,
    wait: Duration,
    all_env_combos: bool,
    sort: bool,
}

impl<'a> Harvester<'a> {
    pub fn new(gh: &'a GithubClient, wait: Duration, all_env_combos: bool, sort: bool) -> Self {
        Self { gh, wait, all_env_combos, sort }
    }

    /// `(command, job id)` pairs for every failing job of the pull
    /// request, deduplicated and ordered per the harvester's settings.
    pub async fn failing_commands(&self, pull_number: &str) -> Result<Vec<(String, u64)>, PullError> {
        if pull_number.is_empty() || !pull_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(PullError::BadPullNumber(pull_number.to_string()));
        }

        let html = self.gh.checks_page(pull_number).await?;
        let runs = discover_runs(&html, self.gh.repo());
        if runs.is_empty() {
            info!("no workflow runs found on the checks page for #{pull_number}");
        }

        let mut commands = Vec::new();
        for (segment, run_id) in &runs {
            let jobs = poll_jobs(*segment, run_id, || self.gh.run_jobs(run_id), self.wait).await?;
            let failed: Vec<&Job> = jobs.iter().filter(|job| job.is_failure()).collect();
            info!("run {run_id}: {} jobs, {} failed", jobs.len(), failed.len());

            for job in failed {
                let log = self.gh.job_log(job.id).await?;
                if let Some(command) = extract_command(&log) {
                    commands.push((command, job.id));
                }
            }
        }

        let mut commands = if self.all_env_combos {
            commands
        } else {
            dedupe_commands(commands)
        };
        if self.sort {
            commands.sort();
        }
        Ok(commands)
    }
}
