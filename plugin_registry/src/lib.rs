//! Name → implementation resolution for action / connection / become / content plugins.
//!
//! Dynamic subclass enumeration from the original source is replaced with an explicit
//! compile-time registration table: each builtin plugin module contributes a descriptor (name,
//! constructor, declared option preferences, `uses`) to a `once_cell`-backed static registry.
//! Name resolution is then a table lookup, never reflection.

mod actions;
mod connections;
mod content;
mod registry;
mod traits;

pub use registry::{
    build_task_options, get_action, get_become, get_connection, run_content_descriptor,
    ActionDescriptor, BecomeDescriptor, ConnectionDescriptor, ContentDescriptorEntry, OptionSpec,
    ACTION_REGISTRY, BECOME_REGISTRY, CONNECTION_REGISTRY, CONTENT_REGISTRY,
};
pub use traits::{ActionPlugin, Become, Connection, ContentDescriptor, Process, TaskContext};

pub use actions::{FetchPayloadAction, RawAction};
pub use connections::LocalConnection;
pub use content::StaticPayload;
