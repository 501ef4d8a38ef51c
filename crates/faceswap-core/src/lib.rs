//! faceswap-core: orchestration of an external face-swapping tool.
//!
//! Builds the tool invocation, runs it as a subprocess with a bounded
//! timeout, recovers its output from known alternate locations and
//! classifies failures into a fixed error taxonomy.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fs;
pub mod orchestrator;
pub mod probe;
pub mod recovery;
pub mod runner;
pub mod types;

pub use config::{ConfigError, ToolConfig};
pub use diagnostics::DependencyMarkerDetector;
pub use error::{SwapError, SwapErrorKind};
pub use orchestrator::Orchestrator;
pub use probe::{AvailabilityProbe, AvailabilityReport, ProbeOutcome};
pub use recovery::{RecoveryAction, RecoveryStrategy};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, RunError, TokioCommandRunner};
pub use types::{SwapRequest, SwapResult};
