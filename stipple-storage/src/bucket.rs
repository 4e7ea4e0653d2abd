use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use object_store::{
    path::Path as ObjectPath, Attribute, Attributes, ObjectStore, PutMode, PutOptions, PutPayload,
};
use tracing::debug;

use crate::{Result, StorageError};

/// Upper bound on suffixed candidates tried by [`Bucket::put_object_unique`].
const MAX_UNIQUE_ATTEMPTS: usize = 64;

/// Identifier of one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobRef {
    pub bucket: String,
    pub key: String,
}

impl BlobRef {
    /// URL of the object under a public `base`, e.g.
    /// `https://storage.googleapis.com/<bucket>/<key>`. Assumes the bucket
    /// is publicly readable.
    pub fn public_url(&self, base: &str) -> String {
        format!("{}/{}/{}", base.trim_end_matches('/'), self.bucket, self.key)
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// A named bucket and the client used to reach it.
#[derive(Clone)]
pub struct Bucket {
    name: String,
    store: Arc<dyn ObjectStore>,
    content_types: bool,
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("store", &self.store.to_string())
            .finish()
    }
}

impl Bucket {
    pub fn new(name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            name: name.into(),
            store,
            content_types: true,
        }
    }

    /// Skip object attributes on puts, for stores that reject them
    /// (the local filesystem store).
    pub fn without_content_types(mut self) -> Self {
        self.content_types = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn blob(&self, key: &ObjectPath) -> BlobRef {
        BlobRef {
            bucket: self.name.clone(),
            key: key.to_string(),
        }
    }

    /// Reads a whole object into memory.
    pub async fn get_object(&self, key: &ObjectPath) -> Result<Bytes> {
        Ok(self.store.get(key).await?.bytes().await?)
    }

    /// Writes one object, replacing any existing object at `key`.
    pub async fn put_object(
        &self,
        key: &ObjectPath,
        bytes: impl Into<PutPayload>,
        content_type: &str,
    ) -> Result<BlobRef> {
        let opts = self.put_options(PutMode::Overwrite, content_type);
        self.store.put_opts(key, bytes.into(), opts).await?;
        debug!(bucket = %self.name, key = %key, "stored object");
        Ok(self.blob(key))
    }

    /// Writes `prefix/stem.ext` without replacing an existing object. When
    /// that key is taken the stem gets a numeric suffix (`stem_1.ext`,
    /// `stem_2.ext`, ...). Returns the key actually written.
    pub async fn put_object_unique(
        &self,
        prefix: &ObjectPath,
        stem: &str,
        ext: &str,
        bytes: impl Into<PutPayload>,
        content_type: &str,
    ) -> Result<BlobRef> {
        let payload = bytes.into();
        for attempt in 0..MAX_UNIQUE_ATTEMPTS {
            let name = match attempt {
                0 => format!("{stem}.{ext}"),
                n => format!("{stem}_{n}.{ext}"),
            };
            let key = prefix.child(name.as_str());
            let opts = self.put_options(PutMode::Create, content_type);
            match self.store.put_opts(&key, payload.clone(), opts).await {
                Ok(_) => {
                    debug!(bucket = %self.name, key = %key, "stored object");
                    return Ok(self.blob(&key));
                }
                Err(object_store::Error::AlreadyExists { .. }) => {
                    debug!(bucket = %self.name, key = %key, "key taken, trying next suffix");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::KeyExhausted {
            stem: stem.to_string(),
            attempts: MAX_UNIQUE_ATTEMPTS,
        })
    }

    fn put_options(&self, mode: PutMode, content_type: &str) -> PutOptions {
        let mut attributes = Attributes::new();
        if self.content_types {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        PutOptions {
            mode,
            attributes,
            ..Default::default()
        }
    }
}
