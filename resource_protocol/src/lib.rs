//! The read/write contracts consumed by connection plugins and the BlobStore, plus adapters for
//! native subprocess stdio streams and plain files. All I/O is cooperative, built atop
//! `tokio::io::{AsyncRead, AsyncWrite}`, and yields to other tasks at every `.await`.

mod file;
mod process;

pub use file::{FileReader, FileWriter};
pub use process::{ChildStderrReader, ChildStdinWriter, ChildStdoutReader};

use async_trait::async_trait;
use bytes::Bytes;

/// A source of bytes. An empty result from `read` denotes EOF; callers should not treat a short
/// read as an error.
#[async_trait]
pub trait Reader: Send {
    async fn read(&mut self, n: usize) -> Result<Bytes, String>;
    async fn close(&mut self) -> Result<(), String>;
}

/// A sink for bytes. `write_eof` is a distinct, explicit signal from `close`: some transports
/// (a subprocess's stdin) can half-close to signal "no more input" while still wanting to read
/// the other side's output.
#[async_trait]
pub trait Writer: Send {
    async fn write(&mut self, data: Bytes) -> Result<(), String>;
    async fn write_eof(&mut self) -> Result<(), String>;
    async fn close(&mut self) -> Result<(), String>;
}
