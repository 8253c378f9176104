use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{Reader, Writer};

/// Wraps a plain `tokio::fs::File` opened for reading.
pub struct FileReader {
    file: File,
}

impl FileReader {
    pub fn new(file: File) -> FileReader {
        FileReader { file }
    }
}

#[async_trait]
impl Reader for FileReader {
    async fn read(&mut self, n: usize) -> Result<Bytes, String> {
        let mut buf = BytesMut::zeroed(n);
        let read = self
            .file
            .read(&mut buf)
            .await
            .map_err(|err| format!("reading file: {err}"))?;
        buf.truncate(read);
        Ok(buf.freeze())
    }

    async fn close(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Wraps a plain `tokio::fs::File` opened for writing. `write_eof` is a no-op: a file has no
/// half-close concept, only `close`.
pub struct FileWriter {
    file: File,
}

impl FileWriter {
    pub fn new(file: File) -> FileWriter {
        FileWriter { file }
    }
}

#[async_trait]
impl Writer for FileWriter {
    async fn write(&mut self, data: Bytes) -> Result<(), String> {
        self.file
            .write_all(&data)
            .await
            .map_err(|err| format!("writing file: {err}"))
    }

    async fn write_eof(&mut self) -> Result<(), String> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), String> {
        self.file
            .flush()
            .await
            .map_err(|err| format!("flushing file: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload");

        let file = File::create(&path).await.unwrap();
        let mut writer = FileWriter::new(file);
        writer.write(Bytes::from_static(b"hello")).await.unwrap();
        writer.close().await.unwrap();

        let file = File::open(&path).await.unwrap();
        let mut reader = FileReader::new(file);
        let chunk = reader.read(1024).await.unwrap();
        assert_eq!(&chunk[..], b"hello");

        let eof = reader.read(1024).await.unwrap();
        assert!(eof.is_empty());
    }
}
