//! Common building blocks for kindling: errors, the process runner, the
//! readiness poller, platform configuration and the external tool wrappers

#![deny(missing_docs)]

pub mod config;
pub mod epoch;
pub mod error;
pub mod poll;
pub mod runner;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tools;

pub use config::PlatformConfig;
pub use epoch::EpochTag;
pub use error::Error;
pub use poll::{PollConfig, PollOutcome};
pub use runner::{
    Applied, CommandErrorKind, CommandOutput, CommandRunner, CommandSpec, ProcessRunner,
};
pub use tools::Toolbox;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Environment name used when none is given
pub const DEFAULT_ENVIRONMENT: &str = "local";

/// File name of the kind cluster config inside a manifest root
pub const KIND_CONFIG_FILE: &str = "kind-config.yaml";

/// Directory of base manifests inside a manifest root
pub const BASE_DIR: &str = "base";

/// Directory of per-component overlays inside a manifest root
pub const OVERLAYS_DIR: &str = "overlays";
