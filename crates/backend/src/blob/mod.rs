mod keys;
mod store;

pub use keys::DocumentPrefix;
pub use store::{BlobError, BlobStore, PresignedUrl, StoreUri};
pub(in crate::blob) use store::Result;
