//! Administrative commands: version query, database reload, liveness.

use dscan_proto::{Command, LineReader, write_command};
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::transport::Connection;

/// Sends `cmd` on a fresh connection and returns a reader for the replies.
fn request(endpoint: &Endpoint, cmd: &Command<'_>) -> Result<LineReader<Connection>> {
    let mut conn = endpoint.connect()?;
    write_command(&mut conn, cmd)?;
    debug!(%endpoint, command = cmd.name(), "sent");
    Ok(LineReader::new(conn))
}

/// Asks for the daemon and signature database version. Returns every reply
/// line in order.
pub fn version(endpoint: &Endpoint) -> Result<Vec<String>> {
    let mut reader = request(endpoint, &Command::Version)?;
    let mut lines = Vec::new();
    while let Some(line) = reader.read_record()? {
        lines.push(String::from_utf8_lossy(line).into_owned());
    }
    Ok(lines)
}

/// Asks the daemon to reload its signature database.
///
/// Succeeds only if the daemon acknowledges with `RELOADING`.
pub fn reload(endpoint: &Endpoint) -> Result<()> {
    let mut reader = request(endpoint, &Command::Reload)?;
    let reply = reader
        .read_record()?
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .unwrap_or_default();
    if reply.starts_with("RELOADING") {
        Ok(())
    } else {
        Err(Error::ReloadRefused(reply))
    }
}

/// Checks that the daemon is alive.
pub fn ping(endpoint: &Endpoint) -> Result<()> {
    let mut reader = request(endpoint, &Command::Ping)?;
    let reply = reader
        .read_record()?
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .unwrap_or_default();
    if reply == "PONG" {
        Ok(())
    } else {
        Err(Error::UnexpectedReply(reply))
    }
}
