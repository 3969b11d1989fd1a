//! Command implementations for the CLI.

mod check;
mod descriptors;
mod init;
mod watch;

use std::io::{self, Write};

use anyhow::Result;

pub use check::cmd_check;
pub use descriptors::cmd_descriptors;
pub use init::cmd_init;
pub use watch::{WatchArgs, cmd_watch};

/// Print to stdout and flush, so piped output arrives line by line.
pub(crate) fn write_output(content: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(content.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
