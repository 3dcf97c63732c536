//! CLI commands

use std::sync::Arc;

use clap::Args;
use kindling_cluster::Cluster;
use kindling_common::{PlatformConfig, ProcessRunner, DEFAULT_ENVIRONMENT};

use crate::Result;

pub mod create;
pub mod delete;
pub mod delete_all;
pub mod info;
pub mod update;

/// Which environment a command acts on
#[derive(Args, Debug)]
pub struct EnvironmentArgs {
    /// Environment name; also the kind cluster name and namespace
    #[arg(default_value = DEFAULT_ENVIRONMENT)]
    pub environment: String,
}

/// Build the cluster entity over real processes
pub(crate) fn cluster(args: &EnvironmentArgs, config: &PlatformConfig) -> Result<Cluster> {
    Ok(Cluster::from_config(
        &args.environment,
        config,
        Arc::new(ProcessRunner),
    )?)
}
