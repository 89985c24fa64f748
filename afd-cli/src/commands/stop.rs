//! The `stop` command: full shutdown of a running instance.

use afd::control::{self, Command, ControlError};
use afd::paths::{self, WorkDir};

use crate::error::CliError;

pub async fn run(work_dir: &WorkDir) -> Result<(), CliError> {
    let fifo = work_dir.fifo_file(paths::AFD_CMD_FIFO);
    match control::send_command(&fifo, &Command::ShutdownAll).await {
        Ok(()) => {
            println!("Shutdown signalled.");
            Ok(())
        }
        Err(ControlError::NoReader(_)) => Err(CliError::NotRunning),
        Err(ControlError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(CliError::NotRunning)
        }
        Err(err) => Err(err.into()),
    }
}
