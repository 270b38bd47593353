//! Stackman: manage ghstack-style stacked pull requests.
//!
//! Maps local `upstream/gh/<user>/<n>/orig` references to their GitHub
//! pull requests, resolves free-form queries (pull number, subject search,
//! or commit-ish) to a single pull request backed by an on-disk cache, and
//! harvests exact reproduction commands for a pull request's failing CI
//! jobs into an executable script.

pub mod cache;
pub mod cli;
pub mod error;
pub mod ghstack;
pub mod git;
pub mod github;
pub mod harvest;
pub mod pull;
pub mod resolver;
pub mod script;

pub use cache::{PullCache, PullMap};
pub use cli::Cli;
pub use error::PullError;
pub use git::{Git, VcsQueries};
pub use github::{GithubClient, Repo};
pub use harvest::Harvester;
pub use pull::PullRequest;
