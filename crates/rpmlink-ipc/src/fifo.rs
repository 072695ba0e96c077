//! Named-pipe connectors.
//!
//! Both ends create the FIFO if it does not exist yet. Opening the read end never
//! waits for a writer. Opening the write end without a reader fails with `ENXIO`,
//! which is reported as "no peer" rather than as an error.

use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::net::unix::pipe;
use tracing::info;

use crate::channel::Connector;

/// Create a FIFO at `path` with mode 0666 unless something already exists there.
pub fn ensure_fifo(path: &Path) -> io::Result<()> {
    match mkfifo(path, Mode::from_bits_truncate(0o666)) {
        Ok(()) => {
            info!(path = %path.display(), "created named pipe");
            Ok(())
        }
        Err(Errno::EEXIST) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Read end of a named pipe.
#[derive(Debug, Clone)]
pub struct FifoReader {
    path: PathBuf,
}

impl FifoReader {
    /// Reader for the FIFO at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the FIFO.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Connector for FifoReader {
    type Stream = pipe::Receiver;

    fn connect(&mut self) -> io::Result<Option<pipe::Receiver>> {
        ensure_fifo(&self.path)?;
        pipe::OpenOptions::new().open_receiver(&self.path).map(Some)
    }
}

/// Write end of a named pipe.
#[derive(Debug, Clone)]
pub struct FifoWriter {
    path: PathBuf,
}

impl FifoWriter {
    /// Writer for the FIFO at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the FIFO.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Connector for FifoWriter {
    type Stream = pipe::Sender;

    fn connect(&mut self) -> io::Result<Option<pipe::Sender>> {
        ensure_fifo(&self.path)?;
        match pipe::OpenOptions::new().open_sender(&self.path) {
            Ok(sender) => Ok(Some(sender)),
            Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
