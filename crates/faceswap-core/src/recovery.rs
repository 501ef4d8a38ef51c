//! Locating the tool's output when it is not where it was asked to go.
//!
//! The external tool does not always honour `-o`: some versions reuse the
//! target's file name, others write into their own `output/` directory, and
//! the final write may land shortly after the process exits. Each known
//! placement is a [`RecoveryStrategy`]; the orchestrator tries them in order.

use crate::config::ToolConfig;
use crate::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// Interval between existence checks while waiting for the output.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What to do with a file found by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Copy into place; the candidate may be a file the caller still owns.
    Copy,
    /// Move into place; the candidate belongs to the tool.
    Move,
}

/// Inputs a strategy may use to derive its candidate path.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryContext<'a> {
    pub config: &'a ToolConfig,
    pub target_path: &'a Path,
    pub output_path: &'a Path,
}

/// One alternate location where the tool's output may have been written.
pub trait RecoveryStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Where to look, or `None` if the strategy does not apply.
    fn candidate(&self, ctx: &RecoveryContext<'_>) -> Option<PathBuf>;

    fn action(&self) -> RecoveryAction;
}

/// `results_dir/<target file name>`: the tool reused the target's name.
#[derive(Debug, Default, Clone, Copy)]
pub struct TargetNameInResultsDir;

impl RecoveryStrategy for TargetNameInResultsDir {
    fn name(&self) -> &'static str {
        "target-name-in-results-dir"
    }

    fn candidate(&self, ctx: &RecoveryContext<'_>) -> Option<PathBuf> {
        let results_dir = ctx.output_path.parent()?;
        Some(results_dir.join(ctx.target_path.file_name()?))
    }

    fn action(&self) -> RecoveryAction {
        RecoveryAction::Copy
    }
}

/// `installation_dir/output/<output file name>`: the tool's default output directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolOutputDir;

impl RecoveryStrategy for ToolOutputDir {
    fn name(&self) -> &'static str {
        "tool-output-dir"
    }

    fn candidate(&self, ctx: &RecoveryContext<'_>) -> Option<PathBuf> {
        Some(ctx.config.tool_output_dir().join(ctx.output_path.file_name()?))
    }

    fn action(&self) -> RecoveryAction {
        RecoveryAction::Move
    }
}

/// Strategies for the current tool release, in search order.
pub fn default_strategies() -> Vec<Box<dyn RecoveryStrategy>> {
    vec![Box::new(TargetNameInResultsDir), Box::new(ToolOutputDir)]
}

/// Poll for `path` until it exists or `grace` has elapsed.
///
/// A heuristic for tools that flush their output asynchronously after
/// exiting; it does not guarantee the file is complete.
pub async fn wait_for_output(path: &Path, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        if fs::path_exists(path).await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

/// Bring `found` to `output_path` according to `action`.
pub async fn apply(action: RecoveryAction, found: &Path, output_path: &Path) -> io::Result<()> {
    match action {
        RecoveryAction::Copy => fs::copy_file(found, output_path).await,
        RecoveryAction::Move => fs::move_file(found, output_path).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_at(installation: &Path) -> ToolConfig {
        ToolConfig {
            installation_dir: installation.to_path_buf(),
            ..ToolConfig::default()
        }
    }

    #[test]
    fn test_target_name_candidate() {
        let config = config_at(Path::new("/opt/ff"));
        let ctx = RecoveryContext {
            config: &config,
            target_path: Path::new("/srv/uploads/targetImage-1-2.jpg"),
            output_path: Path::new("/srv/results/result-99.jpg"),
        };
        assert_eq!(
            TargetNameInResultsDir.candidate(&ctx),
            Some(PathBuf::from("/srv/results/targetImage-1-2.jpg"))
        );
        assert_eq!(TargetNameInResultsDir.action(), RecoveryAction::Copy);
    }

    #[test]
    fn test_tool_output_dir_candidate() {
        let config = config_at(Path::new("/opt/ff"));
        let ctx = RecoveryContext {
            config: &config,
            target_path: Path::new("/srv/uploads/t.png"),
            output_path: Path::new("/srv/results/result-99.png"),
        };
        assert_eq!(
            ToolOutputDir.candidate(&ctx),
            Some(PathBuf::from("/opt/ff/output/result-99.png"))
        );
        assert_eq!(ToolOutputDir.action(), RecoveryAction::Move);
    }

    #[test]
    fn test_default_order() {
        let names: Vec<_> = default_strategies().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["target-name-in-results-dir", "tool-output-dir"]);
    }

    #[tokio::test]
    async fn test_wait_returns_early_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result-1.png");
        std::fs::write(&path, b"x").unwrap();

        let start = std::time::Instant::now();
        assert!(wait_for_output(&path, Duration::from_secs(5)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_wait_sees_late_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result-2.png");
        let writer_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            tokio::fs::write(writer_path, b"late").await.unwrap();
        });

        assert!(wait_for_output(&path, Duration::from_secs(3)).await);
    }

    #[tokio::test]
    async fn test_wait_gives_up_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.png");

        let start = std::time::Instant::now();
        assert!(!wait_for_output(&path, Duration::from_millis(250)).await);
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_apply_copy_keeps_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let found = dir.path().join("t.png");
        let out = dir.path().join("result-3.png");
        std::fs::write(&found, b"img").unwrap();

        apply(RecoveryAction::Copy, &found, &out).await.unwrap();

        assert!(found.exists());
        assert_eq!(std::fs::read(&out).unwrap(), b"img");
    }
}
