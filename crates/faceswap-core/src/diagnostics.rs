//! Detection of missing-dependency reports in the tool's stderr.
//!
//! The external tool does not distinguish a broken runtime from any other
//! failure in its exit status, so the orchestrator falls back to scanning
//! its diagnostic output. The marker list is data, not code, so it can
//! follow the tool across versions.

use crate::config::ToolConfig;

/// Dependency-missing marker detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyMarkerDetector {
    markers: Vec<String>,
}

impl DependencyMarkerDetector {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(Into::into)
                .filter(|m: &String| !m.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &ToolConfig) -> Self {
        Self::new(config.dependency_markers.iter().cloned())
    }

    /// First marker found in `stderr`, if any.
    pub fn find<'a>(&'a self, stderr: &str) -> Option<&'a str> {
        self.markers
            .iter()
            .map(String::as_str)
            .find(|marker| stderr.contains(marker))
    }

    pub fn detects(&self, stderr: &str) -> bool {
        self.find(stderr).is_some()
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl Default for DependencyMarkerDetector {
    fn default() -> Self {
        Self::from_config(&ToolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACEBACK: &str = "Traceback (most recent call last):\n  File \"facefusion.py\", line 3, in <module>\n    from facefusion import core\nModuleNotFoundError: No module named 'onnxruntime'\n";

    #[test]
    fn test_default_detects_module_not_found() {
        let detector = DependencyMarkerDetector::default();
        assert!(detector.detects(TRACEBACK));
        assert_eq!(detector.find(TRACEBACK), Some("ModuleNotFoundError"));
    }

    #[test]
    fn test_plain_failure_not_detected() {
        let detector = DependencyMarkerDetector::default();
        assert!(!detector.detects("error: no face detected in source image"));
        assert!(!detector.detects(""));
    }

    #[test]
    fn test_custom_markers() {
        let detector = DependencyMarkerDetector::new(["ImportError", "libcudart.so"]);
        assert!(detector.detects("OSError: libcudart.so.12: cannot open shared object file"));
        assert!(!detector.detects(TRACEBACK));
    }

    #[test]
    fn test_empty_markers_ignored() {
        let detector = DependencyMarkerDetector::new(["", "ImportError"]);
        assert_eq!(detector.markers().len(), 1);
        assert!(!detector.detects("anything"));
    }
}
