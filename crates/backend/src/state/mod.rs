mod store;
mod workflows;

pub use store::{StateError, StateStore};
pub(in crate::state) use store::Result;
