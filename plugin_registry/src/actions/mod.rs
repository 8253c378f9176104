mod fetch_payload;
mod raw;

use crate::registry::ActionDescriptor;

pub use fetch_payload::FetchPayloadAction;
pub use raw::RawAction;

/// The one place a real manifest-driven registry would enumerate its action plugins. `raw` and
/// `fetch_payload` are the reference implementations, sufficient to exercise the dispatch
/// pipeline (including the sub-request relay path) end to end.
pub(crate) fn builtin_actions() -> Vec<ActionDescriptor> {
    vec![raw::descriptor(), fetch_payload::descriptor()]
}
