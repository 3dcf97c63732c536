//! Info command - print nodes and UI credentials for a ready environment

use std::io::Write;

use kindling_common::PlatformConfig;

use super::{cluster, EnvironmentArgs};
use crate::Result;

pub async fn run(args: EnvironmentArgs, config: &PlatformConfig) -> Result<()> {
    let info = cluster(&args, config)?.info().await?;
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "{info}")?;
    stdout.flush()?;
    Ok(())
}
