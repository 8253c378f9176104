use std::fmt;

/// Spans the error taxonomy used across the controller/worker boundary. Lower-level crates
/// (`blob_store`, `resource_protocol`) return `Result<T, String>` the way the teacher's
/// lower-level crates do, converting to `CoreError` at the boundary where a caller needs to
/// distinguish failure kinds.
#[derive(Debug)]
pub enum CoreError {
    /// Missing required option, bad plugin name. Fails at setup, non-zero exit.
    ValidationError(String),
    /// An action returned `failed: true`. Returned as a TaskResult; the caller decides.
    TaskFailure(String),
    /// Connection open or I/O failure. Captured by the dispatch loop, becomes a failing
    /// TaskResult.
    TransportError(String),
    /// A BlobStore producer raised. Recorded to `error/<key>`, surfaced to all waiters.
    GenerationFailure(String),
    /// Worker crash or queue corruption. The worker process dies; the pool observes this on
    /// child-process exit.
    Fatal(String),
    /// A plugin cannot satisfy a TTY request. Surfaced as a TaskFailure to the action.
    TtyNotSupported,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::ValidationError(msg) => write!(f, "validation error: {msg}"),
            CoreError::TaskFailure(msg) => write!(f, "task failure: {msg}"),
            CoreError::TransportError(msg) => write!(f, "transport error: {msg}"),
            CoreError::GenerationFailure(msg) => write!(f, "generation failure: {msg}"),
            CoreError::Fatal(msg) => write!(f, "fatal error: {msg}"),
            CoreError::TtyNotSupported => write!(f, "plugin does not support a tty"),
        }
    }
}

impl std::error::Error for CoreError {}

impl CoreError {
    /// The message a `TaskFailedResult` should carry for this error. All errors inside a
    /// worker's dispatch are captured and converted this way; they never escape the worker
    /// process.
    pub fn to_task_failure_message(&self) -> String {
        self.to_string()
    }
}

impl From<String> for CoreError {
    fn from(msg: String) -> Self {
        CoreError::Fatal(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_by_kind() {
        assert_eq!(
            CoreError::ValidationError("bad option".to_string()).to_string(),
            "validation error: bad option"
        );
        assert_eq!(
            CoreError::TtyNotSupported.to_string(),
            "plugin does not support a tty"
        );
    }
}
