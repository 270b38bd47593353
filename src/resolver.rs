//! Turns a free-form query into exactly one pull request.
//!
//! Strategies, first applicable wins:
//! 1. `#<number>`: exact pull-number lookup across every user's entries.
//! 2. `:/<text>`: substring match against subjects in the acting user's
//!    list; the *last* match wins (the most recently listed branch).
//! 3. anything else is treated as a commit-ish: its ghstack message is
//!    extracted and the recovered number looked up; failing that, a bare
//!    numeric query is tried as a pull number; failing that, the query
//!    text falls back to the subject search of strategy 2.
//!
//! An empty query means `HEAD`. Entries that cannot produce a number or
//! subject are skipped from lookups rather than aborting them.

use tracing::debug;

use crate::{
    cache::PullMap,
    error::PullError,
    ghstack,
    git::VcsQueries,
    github::Repo,
    pull::PullRequest,
};

const NO_SUCH_PULL: &str = "no such pull request (rerun with --fetch --rewrite-cache if you know it exists)";

pub fn resolve<'a>(
    query: &str,
    pulls: &'a mut PullMap,
    user: &str,
    vcs: &dyn VcsQueries,
    repo: &Repo,
) -> Result<&'a mut PullRequest, PullError> {
    let query = if query.is_empty() { "HEAD" } else { query };

    let slot = if let Some(number) = query.strip_prefix('#') {
        find_by_number(pulls, number, vcs, repo)
            .ok_or_else(|| PullError::NotFound(NO_SUCH_PULL.to_string()))?
    } else if let Some(needle) = query.strip_prefix(":/") {
        find_by_search(pulls, user, needle, vcs, repo)?
    } else {
        resolve_refish(query, pulls, user, vcs, repo)?
    };

    entry(pulls, slot)
}

fn resolve_refish(
    query: &str,
    pulls: &mut PullMap,
    user: &str,
    vcs: &dyn VcsQueries,
    repo: &Repo,
) -> Result<(String, usize), PullError> {
    let extracted = vcs
        .log_message(query)
        .and_then(|log| ghstack::parse_message(&log, &repo.pull_url_prefix()));
    match extracted {
        Ok((number, _)) => {
            if let Some(slot) = find_by_number(pulls, &number, vcs, repo) {
                return Ok(slot);
            }
            debug!("'{query}' resolves to pull request #{number}, which is not in the cache");
        }
        Err(reason) => debug!("'{query}' is not a ghstack commit: {reason}"),
    }

    if !query.is_empty() && query.chars().all(|c| c.is_ascii_digit()) {
        if let Some(slot) = find_by_number(pulls, query, vcs, repo) {
            return Ok(slot);
        }
    }

    find_by_search(pulls, user, query, vcs, repo)
}

/// Exact pull-number lookup across all users. Later entries shadow
/// earlier ones with the same number, matching the listing order bias of
/// the subject search. Entries that cannot produce a number are skipped.
fn find_by_number(
    pulls: &mut PullMap,
    number: &str,
    vcs: &dyn VcsQueries,
    repo: &Repo,
) -> Option<(String, usize)> {
    let mut found = None;
    for (user, list) in pulls.iter_mut() {
        for (index, pull) in list.iter_mut().enumerate() {
            let pull_number = pull.pull_number(vcs, repo).map(str::to_string);
            match pull_number {
                Ok(n) if n == number => found = Some((user.clone(), index)),
                Ok(_) => {}
                Err(reason) => debug!("skipping {}: {reason}", pull.ref_name()),
            }
        }
    }
    found
}

/// Case-sensitive substring match on subject over the acting user's list;
/// the last match in list order wins.
fn find_by_search(
    pulls: &mut PullMap,
    user: &str,
    needle: &str,
    vcs: &dyn VcsQueries,
    repo: &Repo,
) -> Result<(String, usize), PullError> {
    let not_found = || PullError::NotFound(format!("can't find any commits matching '{needle}'"));

    let list = pulls.get_mut(user).ok_or_else(not_found)?;
    let mut found = None;
    for (index, pull) in list.iter_mut().enumerate() {
        let subject = pull.subject(vcs, repo).map(str::to_string);
        match subject {
            Ok(subject) if subject.contains(needle) => found = Some(index),
            Ok(_) => {}
            Err(reason) => debug!("skipping {}: {reason}", pull.ref_name()),
        }
    }
    found.map(|index| (user.to_string(), index)).ok_or_else(not_found)
}

fn entry(pulls: &mut PullMap, (user, index): (String, usize)) -> Result<&mut PullRequest, PullError> {
    pulls
        .get_mut(&user)
        .and_then(|list| list.get_mut(index))
        .ok_or_else(|| PullError::NotFound(NO_SUCH_PULL.to_string()))
}
