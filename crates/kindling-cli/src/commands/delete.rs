//! Delete command - remove an environment's kind cluster

use kindling_common::PlatformConfig;

use super::{cluster, EnvironmentArgs};
use crate::Result;

pub async fn run(args: EnvironmentArgs, config: &PlatformConfig) -> Result<()> {
    cluster(&args, config)?.delete().await?;
    Ok(())
}
