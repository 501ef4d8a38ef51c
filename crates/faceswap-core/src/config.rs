use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_INSTALLATION_DIR: &str = "/opt/facefusion";
const DEFAULT_SCRIPT_NAME: &str = "facefusion.py";
const DEFAULT_INTERPRETER: &str = "python";
const DEFAULT_MODEL: &str = "inswapper_128_fp16";
const DEFAULT_OUTPUT_QUALITY: u8 = 80;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_RESULTS_DIR: &str = "results";
const DEFAULT_GRACE_PERIOD_MS: u64 = 2_000;
const DEFAULT_DEPENDENCY_MARKER: &str = "ModuleNotFoundError";

/// Upper bound for the availability probe, regardless of the command timeout.
pub const PROBE_TIMEOUT_CAP: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
    #[error("output quality must be within 0..=100, got {0}")]
    QualityOutOfRange(u8),
    #[error("command timeout must be greater than zero")]
    ZeroTimeout,
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// External tool configuration.
///
/// Built once at process start and shared read-only (typically behind an
/// `Arc`) by the orchestrator and the availability probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Directory the tool is installed in; also the working directory of every run.
    pub installation_dir: PathBuf,
    /// Entrypoint script. Defaults to `facefusion.py` inside the installation directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,
    /// Program used to run the entrypoint script.
    pub interpreter: String,
    /// Value passed to `--face-swapper-model`.
    pub default_model: String,
    /// Value passed to `--output-image-quality` (0..=100).
    pub output_quality: u8,
    /// Hard limit for a swap invocation.
    pub command_timeout_ms: u64,
    /// Directory receiving `result-*` files.
    pub results_dir: PathBuf,
    /// Longest wait for the expected output to appear after the tool exits.
    pub grace_period_ms: u64,
    /// Substrings in the tool's stderr that indicate a missing runtime dependency.
    pub dependency_markers: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            installation_dir: PathBuf::from(DEFAULT_INSTALLATION_DIR),
            script_path: None,
            interpreter: DEFAULT_INTERPRETER.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            output_quality: DEFAULT_OUTPUT_QUALITY,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            dependency_markers: vec![DEFAULT_DEPENDENCY_MARKER.to_string()],
        }
    }
}

impl ToolConfig {
    /// Load configuration from `FACEFUSION_*` / `FACESWAP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup, with defaults for
    /// anything the lookup does not provide.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            installation_dir: lookup("FACEFUSION_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.installation_dir),
            script_path: lookup("FACEFUSION_SCRIPT_PATH").map(PathBuf::from),
            interpreter: lookup("FACEFUSION_PYTHON").unwrap_or(defaults.interpreter),
            default_model: lookup("FACEFUSION_DEFAULT_MODEL").unwrap_or(defaults.default_model),
            output_quality: parse_or(&lookup, "FACEFUSION_OUTPUT_QUALITY", defaults.output_quality)?,
            command_timeout_ms: parse_or(
                &lookup,
                "FACEFUSION_COMMAND_TIMEOUT",
                defaults.command_timeout_ms,
            )?,
            results_dir: lookup("FACESWAP_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.results_dir),
            grace_period_ms: parse_or(&lookup, "FACESWAP_GRACE_PERIOD_MS", defaults.grace_period_ms)?,
            dependency_markers: lookup("FACESWAP_DEPENDENCY_MARKERS")
                .map(|v| split_list(&v))
                .unwrap_or(defaults.dependency_markers),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; absent keys take their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_quality > 100 {
            return Err(ConfigError::QualityOutOfRange(self.output_quality));
        }
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Entrypoint script, falling back to `facefusion.py` in the installation directory.
    pub fn script_path(&self) -> PathBuf {
        self.script_path
            .clone()
            .unwrap_or_else(|| self.installation_dir.join(DEFAULT_SCRIPT_NAME))
    }

    /// Directory the tool writes to when it ignores the requested output path.
    pub fn tool_output_dir(&self) -> PathBuf {
        self.installation_dir.join("output")
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Timeout for the availability probe: the command timeout, capped at 30s.
    pub fn probe_timeout(&self) -> Duration {
        self.command_timeout().min(PROBE_TIMEOUT_CAP)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
