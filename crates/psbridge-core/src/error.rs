//! Structured error reported by the remote shell for a failed command.

use serde::Serialize;
use thiserror::Error;

/// A remote command failed and the shell's error text was parsed into
/// structured form. Fully recoverable: the session that produced it stays
/// usable and the caller decides how to render or retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct ExecutionError {
    /// Human-readable failure description, concatenated from the leading
    /// message lines of the error text.
    pub message: String,
    /// Category information (`CategoryInfo` property).
    pub category: String,
    /// Fully-qualified error id (`FullyQualifiedErrorId` property).
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_message() {
        let err = ExecutionError {
            message: "Cannot validate argument on parameter 'foo'.".into(),
            category: "InvalidArgument".into(),
            id: "ParameterArgumentValidationError,AddDataCenter".into(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot validate argument on parameter 'foo'."
        );
    }

    #[test]
    fn serializes_all_three_fields() {
        let err = ExecutionError {
            message: "m".into(),
            category: "c".into(),
            id: "i".into(),
        };
        let json = serde_json::to_string(&err).expect("serialize");
        assert_eq!(json, r#"{"message":"m","category":"c","id":"i"}"#);
    }
}
