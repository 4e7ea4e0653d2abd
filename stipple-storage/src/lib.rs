//! Object storage plumbing for stipple.
//!
//! A [`Bucket`] pairs a bucket name with an [`object_store::ObjectStore`]
//! client. On top of it this crate provides directory-tree mirroring in both
//! directions ([`mirror_down`], [`mirror_up`]), single-object puts, and the
//! naming rules for blobs the service writes.

mod bucket;
mod error;
pub mod keys;
mod mirror;
mod store;

pub use bucket::{BlobRef, Bucket};
pub use error::{Result, StorageError};
pub use mirror::{mirror_down, mirror_up, MirrorReport};
pub use object_store::path::Path as ObjectPath;
pub use store::{Backend, StoreConfig};

/// Public base URL of Google Cloud Storage objects.
pub const GCS_PUBLIC_URL_BASE: &str = "https://storage.googleapis.com";
