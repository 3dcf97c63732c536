//! Create command - bring an environment up, or converge it if it exists

use kindling_common::PlatformConfig;
use tracing::info;

use super::{cluster, EnvironmentArgs};
use crate::Result;

pub async fn run(args: EnvironmentArgs, config: &PlatformConfig) -> Result<()> {
    let mut cluster = cluster(&args, config)?;
    cluster.create().await?;
    info!(cluster = %cluster.name(), state = %cluster.state(), "Environment is ready");
    Ok(())
}
