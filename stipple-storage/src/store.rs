use std::path::PathBuf;
use std::sync::Arc;

use object_store::{gcp::GoogleCloudStorageBuilder, local::LocalFileSystem, memory::InMemory};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Bucket, Result, StorageError};

/// Which object store implementation backs a bucket.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Google Cloud Storage, credentials from the `GOOGLE_*` environment.
    #[default]
    Gcs,
    /// A directory on local disk, one subdirectory per bucket.
    Local,
    /// Process memory. Contents vanish on exit.
    Memory,
}

serde_plain::derive_display_from_serialize!(Backend);
serde_plain::derive_fromstr_from_deserialize!(Backend);

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: Backend,
    pub bucket: String,
    /// Root directory for [`Backend::Local`].
    pub root: PathBuf,
}

impl StoreConfig {
    pub fn new(backend: Backend, bucket: impl Into<String>) -> Self {
        Self {
            backend,
            bucket: bucket.into(),
            root: PathBuf::from("./blob-store"),
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn build(&self) -> Result<Bucket> {
        if self.bucket.is_empty() || self.bucket.contains('/') {
            return Err(StorageError::Config(format!(
                "bucket name {:?} must be non-empty and contain no '/'",
                self.bucket
            )));
        }

        let bucket = match self.backend {
            Backend::Gcs => {
                let store = GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(&self.bucket)
                    .build()?;
                Bucket::new(&self.bucket, Arc::new(store))
            }
            Backend::Local => {
                let dir = self.root.join(&self.bucket);
                std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
                let store = LocalFileSystem::new_with_prefix(&dir)?;
                Bucket::new(&self.bucket, Arc::new(store))
                    .without_content_types()
            }
            Backend::Memory => Bucket::new(&self.bucket, Arc::new(InMemory::new())),
        };
        info!(backend = %self.backend, bucket = %self.bucket, "object store ready");
        Ok(bucket)
    }
}
