//! Error types for the download-session core.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::SessionId;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A required external binary is absent at its expected location.
    #[error("{component} was not found at: {}", .path.display())]
    ComponentMissing {
        component: &'static str,
        path: PathBuf,
    },

    /// The OS refused to launch the process.
    #[error("failed to spawn {program}: {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external tool ran but exited unsuccessfully.
    #[error("tool exited with {}: {stderr}", describe_exit(.exit_code))]
    ToolExitFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Tool output was not the single-line JSON we asked for.
    #[error("Parse error: {0}")]
    ParseFailure(String),

    #[error("session {0} was canceled")]
    Canceled(SessionId),

    #[error("session {0} is already registered")]
    DuplicateSession(SessionId),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn component_missing(component: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::ComponentMissing {
            component,
            path: path.into(),
        }
    }

    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailure {
            program: program.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Short category used by the metadata boundary (`Parse error` / `tool error`).
    pub fn category(&self) -> &'static str {
        match self {
            Self::ParseFailure(_) => "Parse error",
            Self::ComponentMissing { .. } => "Missing component",
            Self::Canceled(_) => "Canceled",
            _ => "tool error",
        }
    }

    /// Detail text shown next to [`Error::category`].
    pub fn details(&self) -> String {
        match self {
            Self::ParseFailure(details) => details.clone(),
            Self::ToolExitFailure { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "no exit code".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_missing_names_path() {
        let err = Error::component_missing("yt-dlp", "/opt/app/bin/yt-dlp");
        assert_eq!(err.to_string(), "yt-dlp was not found at: /opt/app/bin/yt-dlp");
    }

    #[test]
    fn categories() {
        assert_eq!(Error::ParseFailure("eof".into()).category(), "Parse error");
        let exit = Error::ToolExitFailure {
            exit_code: Some(1),
            stderr: "ERROR: Unsupported URL".into(),
        };
        assert_eq!(exit.category(), "tool error");
        assert_eq!(exit.details(), "ERROR: Unsupported URL");
    }
}
