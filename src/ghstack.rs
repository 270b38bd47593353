//! Parsing of ghstack-managed references and rewritten commit messages.
//!
//! ghstack names the remote-tracking branch for each commit in a stack
//! `upstream/gh/<user>/<index>/orig` and rewrites the commit message with a
//! stable `Pull Request resolved:` URL plus a `ghstack-source-id:` marker.
//! Both conventions are parsed here and nowhere else.

use tracing::warn;

use crate::error::PullError;

const REMOTE: &str = "upstream";
const GH_SEGMENT: &str = "gh";
const ORIG_SEGMENT: &str = "orig";

const PULL_REQUEST_RESOLVED: &str = "Pull Request resolved:";
const GHSTACK_SOURCE: &str = "ghstack-source-id:";

/// `git log --pretty=medium` indents the message body by four spaces.
const BODY_INDENT: &str = "    ";

/// Expected digit count for current pull numbers. Purely advisory: numbers
/// outside this range log a warning but are accepted.
const EXPECTED_DIGITS: std::ops::RangeInclusive<usize> = 6..=7;

/// Splits a remote-tracking ref of the shape
/// `upstream/gh/<user>/<index>/orig` into `(user, index)`.
///
/// Anything else, including refs with the wrong remote, a non-numeric
/// index, or a branch other than `orig`, is rejected.
pub fn parse_ref(ref_name: &str) -> Result<(String, u32), PullError> {
    let parts: Vec<&str> = ref_name.split('/').collect();
    if let [remote, gh, user, index, branch] = parts.as_slice() {
        if *remote == REMOTE && *gh == GH_SEGMENT && *branch == ORIG_SEGMENT {
            if let Ok(index) = index.parse::<u32>() {
                return Ok(((*user).to_string(), index));
            }
        }
    }
    Err(PullError::RefShape(ref_name.to_string()))
}

/// Recovers `(pull_number, message_lines)` from raw `git log
/// --pretty=medium -1` output.
///
/// Only body lines (four-space indented) are considered. Exactly one line
/// must carry the resolved-PR marker; the body is truncated ahead of the
/// source-id marker and stripped of trailing blanks. The pull number is
/// the numeric suffix of the resolved URL after `pull_url_prefix`.
pub fn parse_message(log: &str, pull_url_prefix: &str) -> Result<(String, Vec<String>), PullError> {
    let mut lines: Vec<String> = log
        .lines()
        .filter_map(|line| line.strip_prefix(BODY_INDENT))
        .map(str::to_string)
        .collect();

    let urls: Vec<String> = lines
        .iter()
        .filter_map(|line| line.split_once(PULL_REQUEST_RESOLVED))
        .map(|(_, rest)| rest.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect();
    let url = match urls.as_slice() {
        [] => return Err(PullError::NotGhstack),
        [url] => url,
        _ => return Err(PullError::MalformedGhstack),
    };

    if let Some(end) = lines.iter().position(|line| line.starts_with(GHSTACK_SOURCE)) {
        lines.truncate(end);
    }
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }

    let number = url
        .strip_prefix(pull_url_prefix)
        .map(str::trim)
        .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        .ok_or(PullError::NotGhstack)?;
    if !EXPECTED_DIGITS.contains(&number.len()) {
        warn!("pull number '{number}' has an unexpected digit count");
    }

    Ok((number.to_string(), lines))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "https://github.com/pytorch/pytorch/pull/";

    #[test]
    fn parse_ref_accepts_orig_branches() {
        let (user, index) = parse_ref("upstream/gh/alice/17/orig").unwrap();
        assert_eq!(user, "alice");
        assert_eq!(index, 17);
    }

    #[test]
    fn parse_ref_rejects_other_shapes() {
        let bad = [
            "upstream/gh/alice/17/head",
            "upstream/gh/alice/17",
            "upstream/gh/alice/17/orig/extra",
            "origin/gh/alice/17/orig",
            "upstream/stack/alice/17/orig",
            "upstream/gh/alice/seventeen/orig",
            "upstream/gh/alice/-1/orig",
            "main",
            "",
        ];
        for ref_name in bad {
            match parse_ref(ref_name) {
                Err(PullError::RefShape(name)) => assert_eq!(name, ref_name),
                other => panic!("expected RefShape for '{ref_name}', got {other:?}"),
            }
        }
    }

    fn log_with_body(body: &[&str]) -> String {
        let mut out = String::from(
            "commit 0123456789abcdef0123456789abcdef01234567\n\
             Author: Alice <alice@example.com>\n\
             Date:   Mon Mar 3 12:00:00 2025 -0800\n\n",
        );
        // git indents every body line with four spaces, blank lines included.
        for line in body {
            out.push_str("    ");
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    #[test]
    fn parse_message_extracts_number_and_cleaned_body() {
        let log = log_with_body(&[
            "Fix flaky dataloader test",
            "",
            "Some details.",
            "",
            "Pull Request resolved: https://github.com/pytorch/pytorch/pull/123456",
            "ghstack-source-id: deadbeef",
        ]);
        let (number, lines) = parse_message(&log, PREFIX).unwrap();
        assert_eq!(number, "123456");
        assert_eq!(
            lines,
            vec![
                "Fix flaky dataloader test".to_string(),
                "".to_string(),
                "Some details.".to_string(),
                "".to_string(),
                "Pull Request resolved: https://github.com/pytorch/pytorch/pull/123456".to_string(),
            ]
        );
    }

    #[test]
    fn parse_message_requires_exactly_one_resolved_marker() {
        let none = log_with_body(&["Just a plain commit"]);
        assert!(matches!(parse_message(&none, PREFIX), Err(PullError::NotGhstack)));

        let two = log_with_body(&[
            "Pull Request resolved: https://github.com/pytorch/pytorch/pull/123456",
            "Pull Request resolved: https://github.com/pytorch/pytorch/pull/654321",
        ]);
        assert!(matches!(parse_message(&two, PREFIX), Err(PullError::MalformedGhstack)));
    }

    #[test]
    fn parse_message_rejects_foreign_pull_urls() {
        let log = log_with_body(&[
            "Subject",
            "Pull Request resolved: https://github.com/other/repo/pull/123456",
            "ghstack-source-id: deadbeef",
        ]);
        assert!(matches!(parse_message(&log, PREFIX), Err(PullError::NotGhstack)));
    }

    #[test]
    fn parse_message_trims_trailing_blanks_without_source_id() {
        let log = log_with_body(&[
            "Subject",
            "Pull Request resolved: https://github.com/pytorch/pytorch/pull/1234567",
            "",
        ]);
        let (number, lines) = parse_message(&log, PREFIX).unwrap();
        assert_eq!(number, "1234567");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Subject");
    }

    #[test]
    fn parse_message_accepts_unusual_digit_counts() {
        let log = log_with_body(&[
            "Subject",
            "Pull Request resolved: https://github.com/pytorch/pytorch/pull/42",
        ]);
        let (number, _) = parse_message(&log, PREFIX).unwrap();
        assert_eq!(number, "42");
    }
}
