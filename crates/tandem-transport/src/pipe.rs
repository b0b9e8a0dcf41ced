use std::ffi::OsStr;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::{Result, TransportError};

/// Spawn `program` with `args` and connect to its stdin/stdout.
///
/// The child's stderr is inherited so its diagnostics reach the terminal.
/// The child is killed when the returned handle is dropped.
pub fn spawn<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<(Child, Connection)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| TransportError::Spawn {
        program: program.to_string_lossy().into_owned(),
        source,
    })?;

    let stdin = child.stdin.take().ok_or(TransportError::MissingPipe("stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or(TransportError::MissingPipe("stdout"))?;

    info!(program = %program.to_string_lossy(), pid = ?child.id(), "spawned remote peer");
    debug!("connected to child stdio");
    Ok((child, Connection::new(stdout, stdin, "child-process")))
}
