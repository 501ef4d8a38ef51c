use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A pair of input images handed to the orchestrator.
///
/// Both files are read by the external tool; the orchestrator never
/// deletes or modifies them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    /// Image providing the face.
    pub source_image_path: PathBuf,
    /// Image whose face is replaced. Its extension decides the output format.
    pub target_image_path: PathBuf,
}

impl SwapRequest {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source_image_path: source.into(),
            target_image_path: target.into(),
        }
    }
}

/// Location of a generated composite image.
///
/// The caller owns the file from here on (serving, deleting, archiving).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapResult {
    pub output_path: PathBuf,
}

impl SwapResult {
    pub fn path(&self) -> &Path {
        &self.output_path
    }

    /// File name of the output, as served under the results route.
    pub fn file_name(&self) -> Option<&str> {
        self.output_path.file_name().and_then(|n| n.to_str())
    }
}

/// Extension of `path` including the leading dot, case preserved.
///
/// Returns an empty string when the path has no extension.
pub fn extension_with_dot(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Output file name for an invocation started at `timestamp_millis`.
pub fn output_file_name(target: &Path, timestamp_millis: i64) -> String {
    format!("result-{timestamp_millis}{}", extension_with_dot(target))
}
