//! Frozen value types exchanged between the controller and worker processes, plus the framed
//! wire codec used to move them across a process boundary.
//!
//! A receiver determines required handling by matching on the `BaseTask` variant tag, never by
//! structural inspection of the payload.

mod codec;
mod error;
mod options;
mod resource;
mod task;
mod value;

pub use codec::{read_framed, write_framed, FrameError};
pub use error::CoreError;
pub use options::{PluginKind, TaskOptions};
pub use resource::Resource;
pub use task::{BaseTask, ShutdownStatus, TaskId};
pub use value::Value;
