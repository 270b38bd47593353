use thiserror::Error;

/// Domain errors raised while mapping git references to pull requests or
/// harvesting CI failures.
///
/// During bulk listing these are recorded per entry and the entry is
/// skipped; when raised for the one pull request the user asked for, they
/// propagate to the top-level handler, which prints a one-line
/// `ERROR: <message>` and exits non-zero.
#[derive(Debug, Error)]
pub enum PullError {
    #[error("do not understand git reference '{0}'")]
    RefShape(String),

    #[error("not a ghstack pull request")]
    NotGhstack,

    #[error("malformed ghstack pull request")]
    MalformedGhstack,

    #[error("invalid pull number '{0}'")]
    BadPullNumber(String),

    #[error("{0}")]
    NotFound(String),

    #[error("unexpected response from {what}\n{body}")]
    UpstreamApi { what: String, body: String },

    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("`{command}` failed: {stderr}")]
    Vcs { command: String, stderr: String },
}
