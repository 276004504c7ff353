mod connection;
mod records;
mod schema;

pub(in crate::db) use connection::Result;
pub use connection::{DbError, IndexDb};
pub use records::{IndexRecord, NewIndexRecord, merge_hits};
