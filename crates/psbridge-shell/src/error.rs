//! Error taxonomy for the shell bridge.
//!
//! Three severities, three fates: a [`TransportError`] condemns the session,
//! a [`ParseError`] wastes one command but leaves the session healthy, and an
//! [`ExecutionError`] is the remote command's own structured failure.

use std::time::Duration;

use psbridge_core::ExecutionError;
use thiserror::Error;

/// Stream-level failure talking to the shell child process.
///
/// Any transport error means the framing protocol can no longer be trusted;
/// the owning session must be discarded.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn shell process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("timed out after {0:?} waiting for the end-of-output marker")]
    Timeout(Duration),

    #[error("shell output stream closed unexpectedly")]
    StreamClosed,

    #[error("malformed end-of-output marker line: {0:?}")]
    Framing(String),

    #[error("shell stream i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shell output arrived intact but matched no recognized grammar.
///
/// Line numbers are 1-based within the captured output.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line_num}: {detail}")]
pub struct ParseError {
    pub line_num: usize,
    pub detail: String,
}

impl ParseError {
    pub fn new(line_num: usize, detail: impl Into<String>) -> Self {
        Self {
            line_num,
            detail: detail.into(),
        }
    }
}

/// Everything a session operation can fail with.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Fatal to the session: the process or its stream is gone or desynced.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The command ran but produced output we could not make sense of.
    #[error("unparseable shell output: {0}")]
    Parse(#[from] ParseError),

    /// The remote command itself reported failure.
    #[error("remote command failed: {0}")]
    Execution(#[from] ExecutionError),
}

impl ShellError {
    /// Whether the session that produced this error must be discarded.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShellError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_is_fatal() {
        let transport = ShellError::from(TransportError::StreamClosed);
        let parse = ShellError::from(ParseError::new(3, "bad layout"));
        let exec = ShellError::from(ExecutionError {
            message: "m".into(),
            category: "c".into(),
            id: "i".into(),
        });
        assert!(transport.is_fatal());
        assert!(!parse.is_fatal());
        assert!(!exec.is_fatal());
    }

    #[test]
    fn parse_error_display() {
        let err = ParseError::new(7, "expected a 'key : value' line");
        assert_eq!(err.to_string(), "line 7: expected a 'key : value' line");
    }
}
