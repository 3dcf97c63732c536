//! Update command - re-apply configuration to an existing environment

use kindling_common::PlatformConfig;
use tracing::info;

use super::{cluster, EnvironmentArgs};
use crate::Result;

pub async fn run(args: EnvironmentArgs, config: &PlatformConfig) -> Result<()> {
    let mut cluster = cluster(&args, config)?;
    cluster.update().await?;
    info!(cluster = %cluster.name(), state = %cluster.state(), "Environment updated");
    Ok(())
}
