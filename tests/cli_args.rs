//! Argument-surface tests: subcommand defaulting, flag parsing, and the
//! query extraction used for error reporting.

use std::ffi::OsString;

use clap::Parser;
use stackman::cli::{Cli, Command, normalize_argv};

fn parse(args: &[&str]) -> Cli {
    let argv: Vec<OsString> = args.iter().map(OsString::from).collect();
    Cli::parse_from(normalize_argv(argv))
}

#[test]
fn bare_invocation_has_no_subcommand() {
    let cli = parse(&["stackman"]);
    assert!(cli.command.is_none());
    assert_eq!(cli.repo, "pytorch/pytorch");
    assert!(!cli.fetch);
}

#[test]
fn unknown_first_argument_becomes_a_list_search() {
    let cli = parse(&["stackman", "dataloader", "fix"]);
    match cli.command {
        Some(Command::List(args)) => assert_eq!(args.search, ["dataloader", "fix"]),
        other => panic!("expected implicit list, got {other:?}"),
    }
}

#[test]
fn leading_flags_also_default_to_list() {
    let cli = parse(&["stackman", "--fetch", "dataloader"]);
    assert!(cli.fetch);
    match cli.command {
        Some(Command::List(args)) => assert_eq!(args.search, ["dataloader"]),
        other => panic!("expected implicit list, got {other:?}"),
    }
}

#[test]
fn explicit_subcommands_are_not_rewritten() {
    let cli = parse(&["stackman", "errors", "#123456", "--wait", "300", "--sort"]);
    match cli.command {
        Some(Command::Errors(args)) => {
            assert_eq!(args.pull.as_deref(), Some("#123456"));
            assert_eq!(args.wait, 300);
            assert!(args.sort);
            assert!(!args.all_env_combos);
            assert_eq!(args.output.to_str(), Some("unit-test-failures.sh"));
        }
        other => panic!("expected errors, got {other:?}"),
    }
}

#[test]
fn errors_distinguishes_terminal_and_script_output() {
    let cli = parse(&["stackman", "errors", "-O"]);
    match cli.command {
        Some(Command::Errors(args)) => {
            assert!(args.output_to_terminal);
            assert!(args.pull.is_none());
        }
        other => panic!("expected errors, got {other:?}"),
    }
}

#[test]
fn global_flags_parse_after_the_subcommand() {
    let cli = parse(&[
        "stackman",
        "list",
        "--all",
        "--closed",
        "--ignore-cache",
        "--user",
        "alice",
        "--repo",
        "pytorch/vision",
    ]);
    assert!(cli.ignore_cache);
    assert_eq!(cli.user.as_deref(), Some("alice"));
    assert_eq!(cli.repo, "pytorch/vision");
    match cli.command {
        Some(Command::List(args)) => {
            assert!(args.all);
            assert!(args.closed);
        }
        other => panic!("expected list, got {other:?}"),
    }
}

#[test]
fn checkout_rebase_flags() {
    let cli = parse(&["stackman", "checkout", ":/fix a", "--rebase-main"]);
    match cli.command {
        Some(Command::Checkout(args)) => {
            assert_eq!(args.pull.as_deref(), Some(":/fix a"));
            assert!(args.rebase_main);
            assert!(!args.rebase_strict);
            assert!(args.rebase_against.is_none());
        }
        other => panic!("expected checkout, got {other:?}"),
    }
}

#[test]
fn url_family_accepts_open() {
    let cli = parse(&["stackman", "commit-url", "HEAD~1", "--open"]);
    match &cli.command {
        Some(Command::CommitUrl(args)) => {
            assert_eq!(args.pull.as_deref(), Some("HEAD~1"));
            assert!(args.open);
        }
        other => panic!("expected commit-url, got {other:?}"),
    }
    assert_eq!(cli.query().as_deref(), Some("HEAD~1"));
}

#[test]
fn query_reports_the_positional_argument() {
    assert_eq!(parse(&["stackman", "errors", "#123456"]).query().as_deref(), Some("#123456"));
    assert_eq!(parse(&["stackman", "my", "search"]).query().as_deref(), Some("my search"));
    assert_eq!(parse(&["stackman", "ref"]).query(), None);
    assert_eq!(parse(&["stackman"]).query(), None);
}
