//! Invocation orchestrator: one external tool run per swap request.

use crate::config::ToolConfig;
use crate::diagnostics::DependencyMarkerDetector;
use crate::error::SwapError;
use crate::fs;
use crate::recovery::{self, RecoveryContext, RecoveryStrategy};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec, RunError, TokioCommandRunner};
use crate::types::{output_file_name, SwapRequest, SwapResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runs the external face swap tool and recovers its output.
///
/// Holds no per-request state, so a single instance can serve concurrent
/// requests. Concurrency is not limited here; callers that need to bound
/// GPU/CPU contention must throttle themselves.
pub struct Orchestrator<R = TokioCommandRunner> {
    config: Arc<ToolConfig>,
    runner: R,
    detector: DependencyMarkerDetector,
    strategies: Vec<Box<dyn RecoveryStrategy>>,
}

impl Orchestrator<TokioCommandRunner> {
    pub fn new(config: Arc<ToolConfig>) -> Self {
        Self::with_runner(config, TokioCommandRunner)
    }
}

impl<R: CommandRunner> Orchestrator<R> {
    pub fn with_runner(config: Arc<ToolConfig>, runner: R) -> Self {
        let detector = DependencyMarkerDetector::from_config(&config);
        Self {
            config,
            runner,
            detector,
            strategies: recovery::default_strategies(),
        }
    }

    /// Replace the alternate-location search, e.g. for a different tool release.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn RecoveryStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_detector(mut self, detector: DependencyMarkerDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Swap the face from `source` onto `target`.
    pub async fn swap_faces(
        &self,
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
    ) -> Result<SwapResult, SwapError> {
        let request = SwapRequest::new(source.as_ref(), target.as_ref());
        self.swap(&request).await
    }

    pub async fn swap(&self, request: &SwapRequest) -> Result<SwapResult, SwapError> {
        let result = self.run_swap(request).await;
        match &result {
            Ok(swap) => tracing::info!(output = %swap.output_path.display(), "face swap complete"),
            Err(err) => tracing::error!(kind = err.kind().as_str(), error = %err, "face swap failed"),
        }
        result
    }

    async fn run_swap(&self, request: &SwapRequest) -> Result<SwapResult, SwapError> {
        self.check_preconditions(request).await?;

        let output_path = self.prepare_output_path(&request.target_image_path).await?;
        let spec = self.build_command(request, &output_path).await?;

        tracing::info!(
            command = %spec.display_line(),
            cwd = %spec.cwd.display(),
            timeout_ms = self.config.command_timeout_ms,
            "executing face swap tool"
        );

        let output = match self.runner.run(&spec).await {
            Ok(output) if output.success() => output,
            Ok(output) => return Err(self.classify_exit(&spec, &output)),
            Err(err) => return Err(self.classify_run_error(err)),
        };

        tracing::info!(
            duration_ms = output.duration.as_millis() as u64,
            stdout = %output.stdout.trim_end(),
            "face swap tool exited"
        );
        if !output.stderr.trim().is_empty() {
            tracing::warn!(stderr = %output.stderr.trim_end(), "face swap tool wrote to stderr");
        }

        self.recover_output(&request.target_image_path, &output_path, &output.stderr)
            .await
    }

    async fn check_preconditions(&self, request: &SwapRequest) -> Result<(), SwapError> {
        if !fs::path_exists(&self.config.installation_dir).await {
            return Err(SwapError::ToolNotInstalled(self.config.installation_dir.clone()));
        }
        if !fs::path_exists(&request.source_image_path).await {
            return Err(SwapError::SourceMissing(request.source_image_path.clone()));
        }
        if !fs::path_exists(&request.target_image_path).await {
            return Err(SwapError::TargetMissing(request.target_image_path.clone()));
        }
        Ok(())
    }

    /// `results_dir/result-<millis><target ext>`, with `results_dir` absolute.
    async fn prepare_output_path(&self, target: &Path) -> Result<PathBuf, SwapError> {
        let results_dir = fs::ensure_dir(&self.config.results_dir)
            .await
            .map_err(|err| {
                SwapError::UnknownFailure(format!(
                    "cannot prepare results directory {}: {err}",
                    self.config.results_dir.display()
                ))
            })?;
        let millis = chrono::Utc::now().timestamp_millis();
        Ok(results_dir.join(output_file_name(target, millis)))
    }

    async fn build_command(
        &self,
        request: &SwapRequest,
        output_path: &Path,
    ) -> Result<CommandSpec, SwapError> {
        let source = resolve(&request.source_image_path).await?;
        let target = resolve(&request.target_image_path).await?;

        let args = vec![
            self.config.script_path().to_string_lossy().into_owned(),
            "headless-run".to_string(),
            "--source".to_string(),
            source.to_string_lossy().into_owned(),
            "--target".to_string(),
            target.to_string_lossy().into_owned(),
            "-o".to_string(),
            output_path.to_string_lossy().into_owned(),
            "--output-image-quality".to_string(),
            self.config.output_quality.to_string(),
            "--face-swapper-model".to_string(),
            self.config.default_model.clone(),
        ];

        Ok(CommandSpec {
            program: self.config.interpreter.clone(),
            args,
            cwd: self.config.installation_dir.clone(),
            timeout: self.config.command_timeout(),
        })
    }

    /// The tool ran to completion but reported failure.
    fn classify_exit(&self, spec: &CommandSpec, output: &CommandOutput) -> SwapError {
        let message = match output.status_code {
            Some(code) => format!("{} exited with status {code}", spec.program),
            None => format!("{} was terminated by a signal", spec.program),
        };
        self.classify_stderr(&output.stderr, message)
    }

    fn classify_run_error(&self, err: RunError) -> SwapError {
        match err {
            RunError::TimedOut { timeout, .. } => SwapError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            other => self.classify_stderr("", other.to_string()),
        }
    }

    fn classify_stderr(&self, stderr: &str, message: String) -> SwapError {
        if let Some(marker) = self.detector.find(stderr) {
            return SwapError::DependenciesMissing {
                marker: marker.to_string(),
                stderr: stderr.to_string(),
            };
        }
        if !stderr.is_empty() {
            return SwapError::ExecutionFailed {
                stderr: stderr.to_string(),
            };
        }
        SwapError::UnknownFailure(message)
    }

    async fn recover_output(
        &self,
        target: &Path,
        output_path: &Path,
        stderr: &str,
    ) -> Result<SwapResult, SwapError> {
        if recovery::wait_for_output(output_path, self.config.grace_period()).await {
            return Ok(SwapResult {
                output_path: output_path.to_path_buf(),
            });
        }

        let ctx = RecoveryContext {
            config: &self.config,
            target_path: target,
            output_path,
        };
        let mut searched = vec![output_path.to_path_buf()];

        for strategy in &self.strategies {
            let Some(candidate) = strategy.candidate(&ctx) else {
                continue;
            };
            if !fs::path_exists(&candidate).await {
                searched.push(candidate);
                continue;
            }

            tracing::warn!(
                strategy = strategy.name(),
                found = %candidate.display(),
                action = ?strategy.action(),
                "output not at requested path; recovering"
            );
            recovery::apply(strategy.action(), &candidate, output_path)
                .await
                .map_err(|err| {
                    SwapError::UnknownFailure(format!(
                        "failed to recover output from {}: {err}",
                        candidate.display()
                    ))
                })?;
            return Ok(SwapResult {
                output_path: output_path.to_path_buf(),
            });
        }

        Err(SwapError::OutputNotFound {
            searched,
            stderr: stderr.to_string(),
        })
    }
}

async fn resolve(path: &Path) -> Result<PathBuf, SwapError> {
    fs::resolve_existing(path).await.map_err(|err| {
        SwapError::UnknownFailure(format!("cannot resolve {}: {err}", path.display()))
    })
}
