pub mod store;
pub mod trace;

pub use store::{StateError, StateStore};
pub use trace::{content_hash, TraceWriter};
