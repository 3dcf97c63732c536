//! Delete-all command - remove every kind cluster kindling manages
//!
//! A cluster counts as managed when it has a manifest tree under
//! `<root_dir>/k8s`; anything else kind knows about is left running.

use std::sync::Arc;

use kindling_cluster::delete_all_managed;
use kindling_common::{PlatformConfig, ProcessRunner, Toolbox};
use tracing::info;

use crate::Result;

pub async fn run(config: &PlatformConfig) -> Result<()> {
    let tools = Toolbox::new(Arc::new(ProcessRunner));
    let deleted = delete_all_managed(&tools, &config.manifests_dir()).await?;
    if deleted.is_empty() {
        info!("No kindling clusters to delete");
    } else {
        info!(count = deleted.len(), clusters = %deleted.join(", "), "Deleted clusters");
    }
    Ok(())
}
