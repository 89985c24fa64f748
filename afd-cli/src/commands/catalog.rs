//! The `catalog` command: dump the identifier catalogue.

use std::io::Write;

use afd::catalog::IdCatalog;
use afd::paths::{self, WorkDir};

use crate::error::CliError;

pub fn run(work_dir: &WorkDir, filter: Option<&str>) -> Result<(), CliError> {
    let catalog = IdCatalog::open_existing(work_dir.root().join(paths::DC_LIST_FILE))?;
    let mut out = std::io::stdout().lock();
    catalog.print(&mut out, filter)?;
    out.flush()?;
    Ok(())
}
