use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Classified failure of a face swap invocation.
#[derive(Error, Debug)]
pub enum SwapError {
    #[error("face swap tool not found at path: {}", .0.display())]
    ToolNotInstalled(PathBuf),
    #[error("source image not found: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("target image not found: {}", .0.display())]
    TargetMissing(PathBuf),
    #[error("face swap processing timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("face swap tool dependencies are not installed (found {marker:?}); check the tool's runtime environment")]
    DependenciesMissing { marker: String, stderr: String },
    #[error("face swap execution failed: {stderr}")]
    ExecutionFailed { stderr: String },
    #[error("processing completed but output file not found at expected locations. Stderr: {}", stderr_or_none(.stderr))]
    OutputNotFound {
        searched: Vec<PathBuf>,
        stderr: String,
    },
    #[error("face swap service error: {0}")]
    UnknownFailure(String),
}

/// Fieldless mirror of [`SwapError`] for callers that map failures to a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapErrorKind {
    ToolNotInstalled,
    SourceMissing,
    TargetMissing,
    Timeout,
    DependenciesMissing,
    ExecutionFailed,
    OutputNotFound,
    UnknownFailure,
}

impl SwapError {
    pub fn kind(&self) -> SwapErrorKind {
        match self {
            Self::ToolNotInstalled(_) => SwapErrorKind::ToolNotInstalled,
            Self::SourceMissing(_) => SwapErrorKind::SourceMissing,
            Self::TargetMissing(_) => SwapErrorKind::TargetMissing,
            Self::Timeout { .. } => SwapErrorKind::Timeout,
            Self::DependenciesMissing { .. } => SwapErrorKind::DependenciesMissing,
            Self::ExecutionFailed { .. } => SwapErrorKind::ExecutionFailed,
            Self::OutputNotFound { .. } => SwapErrorKind::OutputNotFound,
            Self::UnknownFailure(_) => SwapErrorKind::UnknownFailure,
        }
    }

    /// Diagnostic output captured from the tool, when the failure carries any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::DependenciesMissing { stderr, .. }
            | Self::ExecutionFailed { stderr }
            | Self::OutputNotFound { stderr, .. } => Some(stderr.as_str()),
            _ => None,
        }
    }
}

impl SwapErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolNotInstalled => "tool_not_installed",
            Self::SourceMissing => "source_missing",
            Self::TargetMissing => "target_missing",
            Self::Timeout => "timeout",
            Self::DependenciesMissing => "dependencies_missing",
            Self::ExecutionFailed => "execution_failed",
            Self::OutputNotFound => "output_not_found",
            Self::UnknownFailure => "unknown_failure",
        }
    }

    /// The caller supplied a bad input rather than the service failing.
    pub fn is_client_error(self) -> bool {
        matches!(self, Self::SourceMissing | Self::TargetMissing)
    }

    /// Only a timeout is worth a single retry; everything else needs a fix first.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Needs an operator to repair the installation.
    pub fn needs_operator(self) -> bool {
        matches!(self, Self::ToolNotInstalled | Self::DependenciesMissing)
    }
}

fn stderr_or_none(stderr: &str) -> &str {
    if stderr.trim().is_empty() {
        "None"
    } else {
        stderr
    }
}
