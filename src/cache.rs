//! The on-disk snapshot of known pull requests.
//!
//! Maps user name to an ordered list of pull-request identities, in the
//! order the remote branches were listed. Expensive, stable fields
//! (message text, open/closed state) are persisted; cheap derivations are
//! recomputed every run. The file is read once at process start and
//! written once at process end, with no locking: concurrent invocations
//! race and the last writer wins.

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::{
    error::PullError,
    git::Git,
    pull::{CachedPull, PullRequest},
};

pub type PullMap = BTreeMap<String, Vec<PullRequest>>;

/// A remote branch that did not yield a usable identity during rebuild,
/// with the reason it was excluded.
#[derive(Debug)]
pub struct SkippedRef {
    pub ref_name: String,
    pub reason: PullError,
}

pub struct PullCache {
    path: PathBuf,
    pulls: Option<PullMap>,
}

impl PullCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path, pulls: None }
    }

    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("stackman")
            .join("stackman.json")
    }

    /// Restores the snapshot if the file exists and holds a non-empty
    /// object. Records whose ref no longer parses are skipped, not fatal.
    /// Returns whether a snapshot was restored.
    pub fn load(&mut self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read cache file {}", self.path.display()))?;
        let records: BTreeMap<String, Vec<CachedPull>> = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse cache file {}", self.path.display()))?;
        if records.is_empty() {
            return Ok(false);
        }

        let mut pulls = PullMap::new();
        for (user, cached) in records {
            let mut list = Vec::with_capacity(cached.len());
            for record in cached {
                match PullRequest::from_cached(record) {
                    Ok(pull) => list.push(pull),
                    Err(reason) => debug!("dropping cached record: {reason}"),
                }
            }
            pulls.insert(user, list);
        }
        self.pulls = Some(pulls);
        Ok(true)
    }

    /// Writes the snapshot back, projecting each entity onto the persisted
    /// field subset. A cache that was never materialized this run writes
    /// nothing.
    pub fn save(&self) -> Result<()> {
        let Some(pulls) = &self.pulls else {
            return Ok(());
        };
        let records: BTreeMap<&str, Vec<CachedPull>> = pulls
            .iter()
            .map(|(user, list)| (user.as_str(), list.iter().map(PullRequest::to_cached).collect()))
            .collect();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(&records)?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("failed to write cache file {}", self.path.display()))?;
        Ok(())
    }

    /// The pull map, rebuilding it from the remote branch listing if no
    /// snapshot was loaded.
    pub fn pulls(&mut self, git: &Git, user: &str, all_users: bool) -> Result<&mut PullMap, PullError> {
        if self.pulls.is_none() {
            let branches = git.remote_branches()?;
            let (pulls, skipped) = build_from_branches(branches, user, all_users);
            for skip in &skipped {
                debug!("skipping branch '{}': {}", skip.ref_name, skip.reason);
            }
            self.pulls = Some(pulls);
        }
        Ok(self.pulls.as_mut().expect("pulls just materialized"))
    }
}

/// Builds the user -> pulls map from a remote branch listing, partitioning
/// into accepted identities and skipped entries with reasons. Branches
/// owned by other users are skipped unless `all_users` is set.
pub fn build_from_branches(
    branches: Vec<String>,
    user: &str,
    all_users: bool,
) -> (PullMap, Vec<SkippedRef>) {
    let mut pulls = PullMap::new();
    let mut skipped = Vec::new();

    for branch in branches {
        match PullRequest::from_ref(&branch) {
            Ok(pull) if all_users || pull.user() == user => {
                pulls.entry(pull.user().to_string()).or_default().push(pull);
            }
            Ok(pull) => skipped.push(SkippedRef {
                ref_name: branch,
                reason: PullError::NotFound(format!("belongs to user '{}'", pull.user())),
            }),
            Err(reason) => skipped.push(SkippedRef { ref_name: branch, reason }),
        }
    }

    (pulls, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branches() -> Vec<String> {
        vec![
            "upstream/main".to_string(),
            "upstream/gh/alice/1/orig".to_string(),
            "upstream/gh/alice/1/head".to_string(),
            "upstream/gh/bob/4/orig".to_string(),
            "upstream/gh/alice/2/orig".to_string(),
        ]
    }

    #[test]
    fn rebuild_keeps_only_the_acting_users_orig_branches() {
        let (pulls, skipped) = build_from_branches(branches(), "alice", false);

        let alice = &pulls["alice"];
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].ref_name(), "upstream/gh/alice/1/orig");
        assert_eq!(alice[1].ref_name(), "upstream/gh/alice/2/orig");

        // main and the /head branch fail shape parsing; bob's branch is
        // excluded for ownership.
        assert_eq!(skipped.len(), 3);
        assert!(skipped.iter().any(|s| s.ref_name == "upstream/gh/bob/4/orig"));
    }

    #[test]
    fn rebuild_with_all_users_keeps_every_owner() {
        let (pulls, skipped) = build_from_branches(branches(), "alice", true);
        assert_eq!(pulls["alice"].len(), 2);
        assert_eq!(pulls["bob"].len(), 1);
        assert_eq!(skipped.len(), 2);
        assert!(
            skipped
                .iter()
                .all(|s| matches!(s.reason, PullError::RefShape(_)))
        );
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let mut cache = PullCache::new(path.clone());
        let (pulls, _) = build_from_branches(branches(), "alice", true);
        cache.pulls = Some(pulls);
        cache.save().unwrap();

        let mut reloaded = PullCache::new(path);
        assert!(reloaded.load().unwrap());
        let pulls = reloaded.pulls.as_ref().unwrap();
        assert_eq!(pulls["alice"].len(), 2);
        assert_eq!(pulls["bob"].len(), 1);
        assert_eq!(pulls["alice"][0].ref_name(), "upstream/gh/alice/1/orig");
    }

    #[test]
    fn save_without_materialized_pulls_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = PullCache::new(path.clone());
        cache.save().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn load_ignores_unknown_keys_and_empty_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        std::fs::write(&path, "{}").unwrap();
        let mut cache = PullCache::new(path.clone());
        assert!(!cache.load().unwrap());

        std::fs::write(
            &path,
            r#"{"alice": [{"ref": "upstream/gh/alice/1/orig", "pull_number": "123456",
                           "stale_field": true}]}"#,
        )
        .unwrap();
        let mut cache = PullCache::new(path);
        assert!(cache.load().unwrap());
        assert_eq!(cache.pulls.unwrap()["alice"].len(), 1);
    }

    #[test]
    fn load_drops_records_with_malformed_refs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(
            &path,
            r#"{"alice": [{"ref": "no-longer-a-ghstack-ref"},
                          {"ref": "upstream/gh/alice/1/orig"}]}"#,
        )
        .unwrap();

        let mut cache = PullCache::new(path);
        assert!(cache.load().unwrap());
        assert_eq!(cache.pulls.unwrap()["alice"].len(), 1);
    }
}
