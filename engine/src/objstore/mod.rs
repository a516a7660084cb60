//! Object storage for published artifacts

pub mod b2;
pub mod store;

pub use b2::{B2Client, B2Options};
pub use store::{ListPage, ObjectInfo, ObjectStore, PurgeReport};
