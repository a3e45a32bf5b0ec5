//! Root crate for the flowforge workspace.
//!
//! Re-exports the member crates so integration tests and the server binary
//! have a single dependency to pull in.

pub use flowforge_orchestration as orchestration;
pub use flowforge_queue as queue;
pub use flowforge_shared as shared;
