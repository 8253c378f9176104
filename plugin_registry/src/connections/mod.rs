mod local;

use crate::registry::ConnectionDescriptor;

pub use local::LocalConnection;

/// The one place a real manifest-driven registry would enumerate its connection plugins. Only
/// `local` is provided as a reference implementation; SSH and WSMan are specified only through
/// the `Connection` trait contract.
pub(crate) fn builtin_connections() -> Vec<ConnectionDescriptor> {
    vec![local::descriptor()]
}
