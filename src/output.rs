//! Forwarding of launched programs' output into the log.
use std::{
    io::{BufRead, BufReader, Read},
    thread,
};

use strum_macros::{AsRefStr, Display};
use tracing::{debug, info, warn};

use crate::config::SlotId;

/// Which captured stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Drains `reader` on a background thread, emitting each line under the
/// `toggled::output` target. Lines that are not UTF-8 are logged lossily; the pipe is
/// drained to EOF so the child never blocks on it or gets SIGPIPE.
pub fn forward_output<R>(slot: SlotId, stream: OutputStream, reader: R) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    info!(target: "toggled::output", slot, stream = stream.as_ref(), "{line}");
                }
                Err(err) => {
                    warn!("Slot {slot} {stream} read failed: {err}");
                    break;
                }
            }
        }
        debug!("Slot {slot} {stream} closed");
    })
}
