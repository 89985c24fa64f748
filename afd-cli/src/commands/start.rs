//! The `start` command: run the supervisor until it is shut down.

use afd::config::{AfdConfig, AFD_CONFIG_NAME};
use afd::logging::init_logging;
use afd::paths::WorkDir;
use afd::supervisor::Supervisor;
use tracing::info;

use crate::error::CliError;

pub async fn run(work_dir: WorkDir, foreground: bool) -> Result<(), CliError> {
    work_dir.ensure_layout()?;

    // The daemon log must be up before anything else can fail loudly.
    let _guard =
        init_logging(&work_dir.log_dir(), foreground).map_err(CliError::LoggingInit)?;

    let config = AfdConfig::load_from(&work_dir.root().join("etc").join(AFD_CONFIG_NAME))?;

    info!(
        version = afd::VERSION,
        root = %work_dir.root().display(),
        "starting instance"
    );

    let mut supervisor = Supervisor::start(work_dir, config).await?;
    supervisor.run().await?;

    info!("instance stopped");
    Ok(())
}
