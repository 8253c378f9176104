use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use message_model::{CoreError, PluginKind, Value};
use resource_protocol::{ChildStderrReader, ChildStdinWriter, ChildStdoutReader, Reader, Writer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::registry::{ConnectionDescriptor, OptionSpec};
use crate::traits::{Connection, Process};

/// Subprocess exec on the controller host. The reference connection plugin: runs every command
/// through `sh -c` (or `cmd` not supported; `ansible_shell=powershell` is rejected rather than
/// silently mishandled, since this plugin only ever executes on the controller's own OS).
pub struct LocalConnection {
    shell: String,
}

impl LocalConnection {
    pub fn new(shell: impl Into<String>) -> LocalConnection {
        LocalConnection { shell: shell.into() }
    }
}

struct LocalProcess {
    child: Child,
    stdin: Option<ChildStdinWriter>,
    stdout: ChildStdoutReader,
    stderr: ChildStderrReader,
}

#[async_trait]
impl Process for LocalProcess {
    fn stdin(&mut self) -> Option<&mut dyn Writer> {
        self.stdin.as_mut().map(|w| w as &mut dyn Writer)
    }

    fn stdout(&mut self) -> &mut dyn Reader {
        &mut self.stdout
    }

    fn stderr(&mut self) -> &mut dyn Reader {
        &mut self.stderr
    }

    async fn wait_for_exit(&mut self) -> Result<i32, String> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|err| format!("waiting for local child: {err}"))?;
        Ok(status.code().unwrap_or(-1))
    }
}

impl LocalConnection {
    fn spawn(&self, cmd: &str) -> Result<Child, CoreError> {
        if self.shell == "powershell" {
            return Err(CoreError::TransportError(
                "local connection does not support ansible_shell=powershell".to_string(),
            ));
        }
        Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| CoreError::TransportError(format!("spawning local command: {err}")))
    }
}

#[async_trait]
impl Connection for LocalConnection {
    /// A subprocess is spawned fresh per command; there's no persistent handle to open.
    async fn connect(&self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn exec_command(
        &self,
        cmd: &str,
        stdin: Option<Box<dyn Reader>>,
    ) -> Result<(Vec<u8>, Vec<u8>, i32), CoreError> {
        let mut child = self.spawn(cmd)?;
        let mut child_stdin = child.stdin.take().expect("stdin was piped");
        let mut child_stdout = child.stdout.take().expect("stdout was piped");
        let mut child_stderr = child.stderr.take().expect("stderr was piped");

        // Stdin is written, and stdout/stderr drained, concurrently: writing all of stdin first
        // would deadlock against a command whose output fills its pipe buffer before it has
        // consumed its input.
        let write_stdin = async move {
            if let Some(mut reader) = stdin {
                loop {
                    let chunk = reader
                        .read(64 * 1024)
                        .await
                        .map_err(CoreError::TransportError)?;
                    if chunk.is_empty() {
                        break;
                    }
                    child_stdin.write_all(&chunk).await.map_err(|err| {
                        CoreError::TransportError(format!("writing child stdin: {err}"))
                    })?;
                }
            }
            drop(child_stdin);
            Ok::<(), CoreError>(())
        };
        let read_stdout = async {
            let mut buf = Vec::new();
            child_stdout
                .read_to_end(&mut buf)
                .await
                .map_err(|err| CoreError::TransportError(format!("reading child stdout: {err}")))?;
            Ok::<Vec<u8>, CoreError>(buf)
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            child_stderr
                .read_to_end(&mut buf)
                .await
                .map_err(|err| CoreError::TransportError(format!("reading child stderr: {err}")))?;
            Ok::<Vec<u8>, CoreError>(buf)
        };

        let (stdin_result, stdout, stderr) =
            tokio::join!(write_stdin, read_stdout, read_stderr);
        stdin_result?;
        let stdout = stdout?;
        let stderr = stderr?;

        let status = child
            .wait()
            .await
            .map_err(|err| CoreError::TransportError(format!("waiting for local child: {err}")))?;

        Ok((stdout, stderr, status.code().unwrap_or(-1)))
    }

    async fn streaming_exec_command(&self, cmd: &str) -> Result<Box<dyn Process>, CoreError> {
        let mut child = self.spawn(cmd)?;
        let stdin = child.stdin.take().map(ChildStdinWriter::new);
        let stdout = ChildStdoutReader::new(child.stdout.take().expect("stdout was piped"));
        let stderr = ChildStderrReader::new(child.stderr.take().expect("stderr was piped"));
        Ok(Box::new(LocalProcess {
            child,
            stdin,
            stdout,
            stderr,
        }))
    }

    async fn put_file(&self, mut reader: Box<dyn Reader>, dst_path: &str) -> Result<(), CoreError> {
        let mut file = tokio::fs::File::create(dst_path)
            .await
            .map_err(|err| CoreError::TransportError(format!("creating {dst_path}: {err}")))?;
        loop {
            let chunk = reader.read(64 * 1024).await.map_err(CoreError::TransportError)?;
            if chunk.is_empty() {
                break;
            }
            file.write_all(&chunk)
                .await
                .map_err(|err| CoreError::TransportError(format!("writing {dst_path}: {err}")))?;
        }
        Ok(())
    }

    async fn fetch_file(&self, src_path: &str, mut writer: Box<dyn Writer>) -> Result<(), CoreError> {
        let mut file = tokio::fs::File::open(src_path)
            .await
            .map_err(|err| CoreError::TransportError(format!("opening {src_path}: {err}")))?;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = file
                .read(&mut buf)
                .await
                .map_err(|err| CoreError::TransportError(format!("reading {src_path}: {err}")))?;
            if read == 0 {
                break;
            }
            writer
                .write(bytes::Bytes::copy_from_slice(&buf[..read]))
                .await
                .map_err(CoreError::TransportError)?;
        }
        writer.close().await.map_err(CoreError::TransportError)?;
        Ok(())
    }
}

const OPTIONS: &[OptionSpec] = &[OptionSpec {
    name: "shell",
    preferences: &["ansible_shell"],
    required: false,
}];

fn construct(options: &BTreeMap<String, Value>) -> Result<Arc<dyn Connection>, CoreError> {
    let shell = options
        .get("shell")
        .and_then(Value::as_str)
        .unwrap_or("sh")
        .to_string();
    Ok(Arc::new(LocalConnection::new(shell)))
}

pub(crate) fn descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor {
        short_name: "local",
        fq_name: "builtin.connection.local",
        uses: &[PluginKind::Become],
        options: OPTIONS,
        construct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_command_runs_and_captures_output() {
        let conn = LocalConnection::new("sh");
        let (stdout, stderr, rc) = conn.exec_command("echo hi", None).await.unwrap();
        assert_eq!(stdout, b"hi\n");
        assert_eq!(stderr, b"");
        assert_eq!(rc, 0);
    }

    #[tokio::test]
    async fn exec_command_reports_nonzero_exit() {
        let conn = LocalConnection::new("sh");
        let (_stdout, _stderr, rc) = conn.exec_command("exit 7", None).await.unwrap();
        assert_eq!(rc, 7);
    }

    #[tokio::test]
    async fn powershell_shell_is_rejected() {
        let conn = LocalConnection::new("powershell");
        let err = conn.exec_command("echo hi", None).await.unwrap_err();
        assert!(matches!(err, CoreError::TransportError(_)));
    }
}
