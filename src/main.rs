use std::{process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use tracing::debug;

use stackman::{
    cache::PullCache,
    cli::{Cli, CheckoutArgs, Command, ErrorsArgs, ListArgs, PullArg, UrlArgs},
    error::PullError,
    git::{self, Git},
    github::{self, GithubClient, Repo},
    harvest::Harvester,
    resolver,
    script::{self, ScriptOptions},
};

const CONFLICT_HELP: &str = "\
After resolving any conflicts, type:

    git rebase --continue
    git submodule update --init --recursive";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_compat();
    init_tracing(cli.debug);

    let debug_mode = cli.debug;
    let query = cli.query();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if debug_mode {
                eprintln!("{error:?}");
            } else {
                let mut message = format!("ERROR: {error}");
                if let Some(query) = query.filter(|q| !q.is_empty() && !message.contains(q.as_str())) {
                    message = format!("{message} for {query}");
                }
                eprintln!("{message}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "stackman=debug" } else { "stackman=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let Cli {
        command,
        fetch,
        ignore_cache,
        rewrite_cache,
        user: user_flag,
        repo,
        debug: _,
    } = cli;

    let repo = Repo::parse(&repo)?;
    let git = Git::new();

    let user = match user_flag {
        Some(user) => user,
        None => acting_user(&git, &repo)?,
    };
    if fetch {
        git.fetch("upstream")?;
    }

    let mut cache = PullCache::new(PullCache::default_path());
    if !(ignore_cache || rewrite_cache) {
        cache.load()?;
    }

    let token = github::resolve_token();
    github::warn_if_unauthenticated(&token);
    let gh = GithubClient::new(repo.clone(), token);

    let command = command.unwrap_or(Command::List(ListArgs {
        search: Vec::new(),
        all: false,
        closed: false,
        reverse: false,
        sort: false,
    }));

    match command {
        Command::List(args) => handle_list(args, &mut cache, &git, &gh, &repo, &user).await?,
        Command::Errors(args) => handle_errors(args, &mut cache, &git, &gh, &repo, &user).await?,
        Command::Checkout(args) => handle_checkout(args, &mut cache, &git, &repo, &user)?,
        Command::Url(args) => handle_url(args, UrlTarget::Pull, &mut cache, &git, &repo, &user)?,
        Command::CommitUrl(args) => {
            handle_url(args, UrlTarget::Commit, &mut cache, &git, &repo, &user)?
        }
        Command::HudUrl(args) => handle_url(args, UrlTarget::Hud, &mut cache, &git, &repo, &user)?,
        Command::RefUrl(args) => {
            handle_url(args, UrlTarget::Branch, &mut cache, &git, &repo, &user)?
        }
        Command::Ref(args) => handle_ref(args, &mut cache, &git, &repo, &user)?,
    }

    if !ignore_cache {
        cache.save()?;
    }
    Ok(())
}

/// Infers the acting GitHub user from the git remotes: the sole remote's
/// owner, or origin's owner when several remotes exist. Adds the missing
/// `upstream` remote as a side effect, since every ref this tool reads
/// lives there.
fn acting_user(git: &Git, repo: &Repo) -> Result<String, PullError> {
    let mut remotes = git.remotes()?;
    if !remotes.contains_key("upstream") {
        git.add_remote("upstream", &repo.ssh_url())?;
        remotes.insert("upstream".to_string(), repo.owner().to_string());
    }

    let no_user = || {
        PullError::NotFound("cannot infer a GitHub user from git remotes; pass --user".to_string())
    };
    if remotes.len() == 1 {
        return remotes.into_values().next().ok_or_else(no_user);
    }
    remotes.remove("origin").ok_or_else(no_user)
}

fn pull_row(
    pull: &mut stackman::PullRequest,
    git: &Git,
    repo: &Repo,
) -> Result<(String, String), PullError> {
    Ok((
        pull.pull_number(git, repo)?.to_string(),
        pull.subject(git, repo)?.to_string(),
    ))
}

async fn handle_list(
    args: ListArgs,
    cache: &mut PullCache,
    git: &Git,
    gh: &GithubClient,
    repo: &Repo,
    user: &str,
) -> Result<()> {
    let joined = args.search.join(" ");
    let search = joined.strip_prefix(":/").unwrap_or(&joined);

    let pulls = cache.pulls(git, user, args.all)?;
    let users: Vec<String> = if args.all {
        pulls.keys().cloned().collect()
    } else {
        vec![user.to_string()]
    };

    for listed_user in users {
        let Some(list) = pulls.get_mut(&listed_user) else {
            continue;
        };

        let mut rows: Vec<(String, String)> = Vec::new();
        for pull in list.iter_mut() {
            let row = pull_row(pull, git, repo);
            let (number, subject) = match row {
                Ok(row) => row,
                Err(reason) => {
                    debug!("skipping {}: {reason}", pull.ref_name());
                    continue;
                }
            };
            if !subject.contains(search) {
                continue;
            }
            if !args.closed {
                match pull.is_open(gh, git, repo).await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(reason) => {
                        debug!("skipping {}: {reason}", pull.ref_name());
                        continue;
                    }
                }
            }
            rows.push((number, subject));
        }

        if args.sort {
            rows.sort_by(|a, b| a.1.cmp(&b.1));
        } else {
            rows.sort_by(|a, b| a.0.cmp(&b.0));
        }
        if args.reverse {
            rows.reverse();
        }

        for (number, subject) in rows {
            if args.all {
                println!("{listed_user}: #{number}: {subject}");
            } else {
                println!("#{number}: {subject}");
            }
        }
    }
    Ok(())
}

async fn handle_errors(
    args: ErrorsArgs,
    cache: &mut PullCache,
    git: &Git,
    gh: &GithubClient,
    repo: &Repo,
    user: &str,
) -> Result<()> {
    let query = args.pull.clone().unwrap_or_default();
    let pulls = cache.pulls(git, user, false)?;
    let pull = resolver::resolve(&query, pulls, user, git, repo)?;
    let number = pull.pull_number(git, repo)?.to_string();
    let url = pull.url(git, repo)?;

    let harvester = Harvester::new(
        gh,
        Duration::from_secs(args.wait),
        args.all_env_combos,
        args.sort,
    );
    let commands = harvester.failing_commands(&number).await?;

    if args.output_to_terminal {
        eprintln!("Reading {url}");
        script::render_commands(&mut std::io::stdout().lock(), &commands)?;
    } else {
        eprintln!("Writing {} for {url}", args.output.display());
        let python_path = args
            .python
            .clone()
            .or_else(|| args.python_default.then(script::default_python_dir).flatten());
        let options = ScriptOptions {
            before: (!args.before.is_empty()).then(|| args.before.clone()),
            python_path,
        };
        script::write_script(&args.output, &url, &options, &commands)?;
    }
    Ok(())
}

fn handle_checkout(
    args: CheckoutArgs,
    cache: &mut PullCache,
    git: &Git,
    repo: &Repo,
    user: &str,
) -> Result<()> {
    let exclusive = [args.rebase_against.is_some(), args.rebase_main, args.rebase_strict];
    if exclusive.iter().filter(|set| **set).count() > 1 {
        anyhow::bail!("at most one of --rebase-against, --rebase-main, --rebase-strict can be set");
    }

    let query = args.pull.clone().unwrap_or_default();
    let pulls = cache.pulls(git, user, false)?;
    let pull = resolver::resolve(&query, pulls, user, git, repo)?;
    let url = pull.url(git, repo)?;

    git::ghstack_checkout(&url)?;

    let target = args
        .rebase_against
        .clone()
        .or_else(|| args.rebase_main.then(|| "upstream/main".to_string()))
        .or_else(|| args.rebase_strict.then(|| "upstream/viable/strict".to_string()));
    if let Some(target) = target {
        if let Err(reason) = git.rebase(&target) {
            debug!("rebase failed: {reason}");
            anyhow::bail!("rebase against {target} stopped on conflicts\n\n{CONFLICT_HELP}");
        }
        git.update_submodules()?;
    }
    Ok(())
}

enum UrlTarget {
    Pull,
    Commit,
    Hud,
    Branch,
}

fn handle_url(
    args: UrlArgs,
    target: UrlTarget,
    cache: &mut PullCache,
    git: &Git,
    repo: &Repo,
    user: &str,
) -> Result<()> {
    let query = args.pull.clone().unwrap_or_default();
    let pulls = cache.pulls(git, user, false)?;
    let pull = resolver::resolve(&query, pulls, user, git, repo)?;

    let value = match target {
        UrlTarget::Pull => pull.url(git, repo)?,
        UrlTarget::Commit => pull.commit_url(git, repo)?,
        UrlTarget::Hud => pull.hud_url(git, repo)?,
        UrlTarget::Branch => pull.ref_url(repo),
    };
    println!("{value}");

    if args.open {
        webbrowser::open(&value).with_context(|| format!("failed to open {value}"))?;
    }
    Ok(())
}

fn handle_ref(
    args: PullArg,
    cache: &mut PullCache,
    git: &Git,
    repo: &Repo,
    user: &str,
) -> Result<()> {
    let query = args.pull.clone().unwrap_or_default();
    let pulls = cache.pulls(git, user, false)?;
    let pull = resolver::resolve(&query, pulls, user, git, repo)?;
    println!("{}", pull.ref_name());
    Ok(())
}
