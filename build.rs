//! Embeds a human-readable version string for `--version`.
//!
//! Prefers `git describe --tags --always --dirty`; when no tags exist (or
//! git is unavailable) falls back to a pseudo-version built from the
//! Cargo.toml version, a timestamp, and the short commit hash.

use std::process::Command;

use chrono::Utc;

fn main() {
    ["src", "build.rs", "Cargo.toml"]
        .iter()
        .for_each(|path| println!("cargo:rerun-if-changed={path}"));

    println!("cargo:rustc-env=STACKMAN_BUILD_INFO={}", build_info());
}

fn git_command(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn git_version() -> String {
    git_command(&["describe", "--tags", "--always", "--dirty"])
        .filter(|desc| desc.contains('v') || desc.contains("-g"))
        .unwrap_or_else(pseudo_version)
}

/// v{version}-{timestamp}-{commit}[+dirty]
fn pseudo_version() -> String {
    let commit = git_command(&["rev-parse", "--short=12", "HEAD"])
        .unwrap_or_else(|| "unknown".to_string());
    let dirty = git_command(&["status", "--porcelain"]).is_some_and(|s| !s.is_empty());
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix = if dirty { "+dirty" } else { "" };

    format!("v{}-{timestamp}-{commit}{suffix}", env!("CARGO_PKG_VERSION"))
}

fn build_info() -> String {
    format!("{} ({})", env!("CARGO_PKG_VERSION"), git_version())
}
