//! Availability probe for health checks and startup diagnostics.
//!
//! Runs `run --help` against the tool. Any output at all is taken as proof
//! that the interpreter and entrypoint loaded; the probe never fails, every
//! problem collapses to "unavailable" and is logged.

use crate::config::ToolConfig;
use crate::diagnostics::DependencyMarkerDetector;
use crate::fs;
use crate::runner::{CommandRunner, CommandSpec, RunError, TokioCommandRunner};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of the help invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// A precondition failed, the tool was not run.
    Skipped,
    /// Exited successfully and printed something.
    Responded {
        stdout_bytes: usize,
        stderr_bytes: usize,
    },
    /// Exited successfully without printing anything.
    Silent,
    /// Exited with a failure status.
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
    TimedOut {
        timeout_ms: u64,
    },
    SpawnFailed {
        message: String,
    },
}

/// Step-by-step result of an availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityReport {
    pub installation_dir: PathBuf,
    pub installation_present: bool,
    pub script_path: PathBuf,
    pub script_present: bool,
    pub probe: ProbeOutcome,
    pub available: bool,
}

pub struct AvailabilityProbe<R = TokioCommandRunner> {
    config: Arc<ToolConfig>,
    runner: R,
    detector: DependencyMarkerDetector,
}

impl AvailabilityProbe<TokioCommandRunner> {
    pub fn new(config: Arc<ToolConfig>) -> Self {
        Self::with_runner(config, TokioCommandRunner)
    }
}

impl<R: CommandRunner> AvailabilityProbe<R> {
    pub fn with_runner(config: Arc<ToolConfig>, runner: R) -> Self {
        let detector = DependencyMarkerDetector::from_config(&config);
        Self {
            config,
            runner,
            detector,
        }
    }

    /// Whether the tool is installed and responsive. Never fails.
    pub async fn check_availability(&self) -> bool {
        self.diagnose().await.available
    }

    pub async fn diagnose(&self) -> AvailabilityReport {
        let installation_dir = self.config.installation_dir.clone();
        let script_path = self.config.script_path();

        let mut report = AvailabilityReport {
            installation_present: fs::path_exists(&installation_dir).await,
            installation_dir,
            script_present: false,
            script_path,
            probe: ProbeOutcome::Skipped,
            available: false,
        };

        if !report.installation_present {
            tracing::error!(path = %report.installation_dir.display(), "face swap tool path does not exist");
            return report;
        }

        report.script_present = fs::path_exists(&report.script_path).await;
        if !report.script_present {
            tracing::error!(path = %report.script_path.display(), "face swap tool script not found");
            return report;
        }

        report.probe = self.run_probe(&report.script_path).await;
        report.available = matches!(report.probe, ProbeOutcome::Responded { .. });
        tracing::info!(available = report.available, "face swap tool availability checked");
        report
    }

    async fn run_probe(&self, script_path: &std::path::Path) -> ProbeOutcome {
        let spec = CommandSpec {
            program: self.config.interpreter.clone(),
            args: vec![
                script_path.to_string_lossy().into_owned(),
                "run".to_string(),
                "--help".to_string(),
            ],
            cwd: self.config.installation_dir.clone(),
            timeout: self.config.probe_timeout(),
        };
        tracing::info!(command = %spec.display_line(), "probing face swap tool");

        match self.runner.run(&spec).await {
            Ok(output) if output.success() => {
                tracing::info!(
                    stdout = %output.stdout.trim_end(),
                    stderr = %output.stderr.trim_end(),
                    "probe finished"
                );
                if output.has_output() {
                    ProbeOutcome::Responded {
                        stdout_bytes: output.stdout.len(),
                        stderr_bytes: output.stderr.len(),
                    }
                } else {
                    tracing::warn!("probe produced no output");
                    ProbeOutcome::Silent
                }
            }
            Ok(output) => {
                self.log_failure_hint(&output.stderr);
                tracing::error!(
                    exit_code = ?output.status_code,
                    stdout = %output.stdout.trim_end(),
                    stderr = %output.stderr.trim_end(),
                    "probe failed"
                );
                ProbeOutcome::Failed {
                    exit_code: output.status_code,
                    stderr: output.stderr,
                }
            }
            Err(RunError::TimedOut {
                timeout, stderr, ..
            }) => {
                self.log_failure_hint(&stderr);
                tracing::error!(timeout_ms = timeout.as_millis() as u64, "probe timed out");
                ProbeOutcome::TimedOut {
                    timeout_ms: timeout.as_millis() as u64,
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "probe could not run");
                ProbeOutcome::SpawnFailed {
                    message: err.to_string(),
                }
            }
        }
    }

    fn log_failure_hint(&self, stderr: &str) {
        if let Some(marker) = self.detector.find(stderr) {
            tracing::error!(
                marker,
                "face swap tool dependencies are not installed; check the tool's runtime environment"
            );
        }
    }
}
