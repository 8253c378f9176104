use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};

use crate::{Reader, Writer};

/// Wraps a subprocess's stdout for reading, e.g. an `exec` plugin draining a remote command's
/// output.
pub struct ChildStdoutReader {
    stdout: ChildStdout,
}

impl ChildStdoutReader {
    pub fn new(stdout: ChildStdout) -> ChildStdoutReader {
        ChildStdoutReader { stdout }
    }
}

#[async_trait]
impl Reader for ChildStdoutReader {
    async fn read(&mut self, n: usize) -> Result<Bytes, String> {
        let mut buf = BytesMut::zeroed(n);
        let read = self
            .stdout
            .read(&mut buf)
            .await
            .map_err(|err| format!("reading child stdout: {err}"))?;
        buf.truncate(read);
        Ok(buf.freeze())
    }

    async fn close(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Wraps a subprocess's stderr for reading. Identical shape to `ChildStdoutReader`; kept as a
/// separate type since `tokio::process::ChildStderr` and `ChildStdout` are distinct types.
pub struct ChildStderrReader {
    stderr: ChildStderr,
}

impl ChildStderrReader {
    pub fn new(stderr: ChildStderr) -> ChildStderrReader {
        ChildStderrReader { stderr }
    }
}

#[async_trait]
impl Reader for ChildStderrReader {
    async fn read(&mut self, n: usize) -> Result<Bytes, String> {
        let mut buf = BytesMut::zeroed(n);
        let read = self
            .stderr
            .read(&mut buf)
            .await
            .map_err(|err| format!("reading child stderr: {err}"))?;
        buf.truncate(read);
        Ok(buf.freeze())
    }

    async fn close(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Wraps a subprocess's stdin for writing. `write_eof` drops the handle, closing the pipe's
/// write half so the child observes EOF on its stdin without the parent having to wait for the
/// child to exit first.
pub struct ChildStdinWriter {
    stdin: Option<ChildStdin>,
}

impl ChildStdinWriter {
    pub fn new(stdin: ChildStdin) -> ChildStdinWriter {
        ChildStdinWriter {
            stdin: Some(stdin),
        }
    }
}

#[async_trait]
impl Writer for ChildStdinWriter {
    async fn write(&mut self, data: Bytes) -> Result<(), String> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| "write after eof on child stdin".to_string())?;
        stdin
            .write_all(&data)
            .await
            .map_err(|err| format!("writing child stdin: {err}"))
    }

    async fn write_eof(&mut self) -> Result<(), String> {
        self.stdin = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), String> {
        self.stdin = None;
        Ok(())
    }
}
