//! Command-line surface.
//!
//! The first positional argument defaults to the `list` subcommand: plain
//! search words (`stackman my fix`) list matching pull requests without
//! spelling out `list`.

use std::{ffi::OsString, path::PathBuf};

use clap::{Args, Parser, Subcommand};

const BUILD_INFO: &str = env!("STACKMAN_BUILD_INFO");

const SUBCOMMANDS: [&str; 8] = [
    "list", "errors", "checkout", "url", "commit-url", "hud-url", "ref", "ref-url",
];
const PASSTHROUGH_FLAGS: [&str; 4] = ["-h", "--help", "-V", "--version"];

#[derive(Debug, Parser)]
#[command(name = "stackman")]
#[command(
    about = "Manage ghstack pull requests and collect reproduction commands for their failing CI jobs"
)]
#[command(version = BUILD_INFO)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Run `git fetch upstream` first
    #[arg(short = 'f', long, global = true)]
    pub fetch: bool,

    /// Neither load nor write the pull-request cache
    #[arg(short = 'i', long, global = true)]
    pub ignore_cache: bool,

    /// Rebuild the pull-request cache from scratch and write it back
    #[arg(short = 'w', long, global = true)]
    pub rewrite_cache: bool,

    /// Act as this GitHub user instead of inferring one from git remotes
    #[arg(short = 'u', long, global = true)]
    pub user: Option<String>,

    /// GitHub repository the stack targets
    #[arg(long, global = true, default_value = "pytorch/pytorch")]
    pub repo: String,

    /// Verbose diagnostics; errors propagate with full detail
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List pull requests
    List(ListArgs),
    /// Collect reproduction commands for failing CI jobs into a script
    Errors(ErrorsArgs),
    /// Check out a pull request with `ghstack checkout`
    Checkout(CheckoutArgs),
    /// Show the pull request URL
    Url(UrlArgs),
    /// Show the GitHub URL of the pull request's commit
    CommitUrl(UrlArgs),
    /// Show the HUD URL of the pull request
    HudUrl(UrlArgs),
    /// Show the git ref of the pull request
    Ref(PullArg),
    /// Show the GitHub URL of the pull request's branch
    RefUrl(UrlArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Words to match in pull-request subjects
    pub search: Vec<String>,

    /// List every user's pull requests
    #[arg(short = 'a', long)]
    pub all: bool,

    /// Also show closed pull requests
    #[arg(short = 'c', long)]
    pub closed: bool,

    /// Reverse the listing order
    #[arg(short = 'r', long)]
    pub reverse: bool,

    /// Sort alphabetically by subject instead of by pull number
    #[arg(short = 's', long)]
    pub sort: bool,
}

#[derive(Debug, Args)]
pub struct ErrorsArgs {
    /// A commit, pull number (starts with #), or search term (starts with :/)
    pub pull: Option<String>,

    /// Keep every environment-variable combination of each failing test
    #[arg(short = 'a', long)]
    pub all_env_combos: bool,

    /// Text to insert before the test commands
    #[arg(short = 'b', long, default_value = "")]
    pub before: String,

    /// Output file
    #[arg(short = 'o', long, default_value = "unit-test-failures.sh")]
    pub output: PathBuf,

    /// Write to the terminal instead of a script file
    #[arg(short = 'O', long)]
    pub output_to_terminal: bool,

    /// Python interpreter (or bin directory) to put on the script's PATH
    #[arg(short = 'p', long)]
    pub python: Option<PathBuf>,

    /// Put the directory of the python found on PATH into the script
    #[arg(short = 'P', long)]
    pub python_default: bool,

    /// Sort commands alphabetically
    #[arg(short = 's', long)]
    pub sort: bool,

    /// Total seconds to wait for pending jobs, 0 means none
    #[arg(short = 't', long = "wait", value_name = "SECONDS", default_value_t = 0)]
    pub wait: u64,
}

#[derive(Debug, Args)]
pub struct CheckoutArgs {
    /// A commit, pull number (starts with #), or search term (starts with :/)
    pub pull: Option<String>,

    /// Also rebase against the given git ref
    #[arg(short = 'R', long, value_name = "REF")]
    pub rebase_against: Option<String>,

    /// Also rebase against upstream/main
    #[arg(short = 'm', long)]
    pub rebase_main: bool,

    /// Also rebase against upstream/viable/strict
    #[arg(short = 'r', long)]
    pub rebase_strict: bool,
}

#[derive(Debug, Args)]
pub struct UrlArgs {
    /// A commit, pull number (starts with #), or search term (starts with :/)
    pub pull: Option<String>,

    /// Open the URL in the browser
    #[arg(short = 'o', long)]
    pub open: bool,
}

#[derive(Debug, Args)]
pub struct PullArg {
    /// A commit, pull number (starts with #), or search term (starts with :/)
    pub pull: Option<String>,
}

impl Cli {
    /// Parses `std::env::args_os()` with the implicit-`list` default.
    pub fn parse_compat() -> Self {
        Self::parse_from(normalize_argv(std::env::args_os().collect()))
    }

    /// The query argument of the active subcommand, for error reporting.
    pub fn query(&self) -> Option<String> {
        match &self.command {
            Some(Command::List(args)) if !args.search.is_empty() => Some(args.search.join(" ")),
            Some(Command::List(_)) => None,
            Some(Command::Errors(args)) => args.pull.clone(),
            Some(Command::Checkout(args)) => args.pull.clone(),
            Some(
                Command::Url(args)
                | Command::CommitUrl(args)
                | Command::HudUrl(args)
                | Command::RefUrl(args),
            ) => args.pull.clone(),
            Some(Command::Ref(args)) => args.pull.clone(),
            None => None,
        }
    }
}

/// Inserts `list` ahead of the first argument when it names neither a
/// subcommand nor a help/version flag.
pub fn normalize_argv(mut argv: Vec<OsString>) -> Vec<OsString> {
    let implicit_list = argv
        .get(1)
        .and_then(|arg| arg.to_str())
        .is_some_and(|first| !SUBCOMMANDS.contains(&first) && !PASSTHROUGH_FLAGS.contains(&first));
    if implicit_list {
        argv.insert(1, "list".into());
    }
    argv
}
