//! Directory-tree copies between local disk and a bucket.
//!
//! Both directions preserve paths relative to the mirrored root. Every
//! object is transferred on every call (no checksum comparison), existing
//! files are overwritten, and the first failure aborts the whole operation.

use std::path::{Component, Path, PathBuf};

use futures::TryStreamExt;
use object_store::{path::Path as ObjectPath, ObjectMeta, PutPayload};
use percent_encoding::percent_decode_str;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{Bucket, Result, StorageError};

/// What a mirror call moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorReport {
    pub objects: usize,
    pub bytes: u64,
}

impl MirrorReport {
    fn record(&mut self, len: usize) {
        self.objects += 1;
        self.bytes += len as u64;
    }
}

/// Downloads every object under `remote_prefix` to
/// `local_dir/<path relative to the prefix>`.
///
/// The prefix matches whole path segments, so `models/sd` does not pick up
/// `models/sd-old/...`.
pub async fn mirror_down(
    bucket: &Bucket,
    remote_prefix: &str,
    local_dir: &Path,
) -> Result<MirrorReport> {
    let prefix = ObjectPath::from(remote_prefix);
    let objects: Vec<ObjectMeta> = bucket.store().list(Some(&prefix)).try_collect().await?;

    let mut report = MirrorReport::default();
    for meta in objects {
        let Some(local_path) = local_target(local_dir, &meta.location, &prefix)? else {
            warn!(key = %meta.location, "skipping object stored at the prefix itself");
            continue;
        };
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }

        let bytes = bucket.get_object(&meta.location).await?;
        fs::write(&local_path, &bytes)
            .await
            .map_err(|e| StorageError::io(&local_path, e))?;
        debug!(key = %meta.location, path = %local_path.display(), bytes = bytes.len(), "downloaded");
        report.record(bytes.len());
    }

    info!(
        bucket = bucket.name(),
        prefix = remote_prefix,
        dir = %local_dir.display(),
        objects = report.objects,
        bytes = report.bytes,
        "mirrored bucket prefix to local directory"
    );
    Ok(report)
}

/// Uploads every regular file under `local_dir` to
/// `remote_prefix/<path relative to local_dir>`. Symlinks are followed;
/// directories are not stored as objects.
pub async fn mirror_up(
    local_dir: &Path,
    bucket: &Bucket,
    remote_prefix: &str,
) -> Result<MirrorReport> {
    let prefix = ObjectPath::from(remote_prefix);

    let mut report = MirrorReport::default();
    for entry in WalkDir::new(local_dir).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(local_dir)
            .map_err(|_| StorageError::InvalidKey(entry.path().display().to_string()))?;
        let key = remote_key(&prefix, relative)?;

        let bytes = fs::read(entry.path())
            .await
            .map_err(|e| StorageError::io(entry.path(), e))?;
        let len = bytes.len();
        bucket.store().put(&key, PutPayload::from(bytes)).await?;
        debug!(path = %entry.path().display(), key = %key, bytes = len, "uploaded");
        report.record(len);
    }

    info!(
        bucket = bucket.name(),
        prefix = remote_prefix,
        dir = %local_dir.display(),
        objects = report.objects,
        bytes = report.bytes,
        "mirrored local directory to bucket prefix"
    );
    Ok(report)
}

/// Local destination of `location`, or `None` when the object sits exactly
/// at the prefix and has no relative path.
fn local_target(
    local_dir: &Path,
    location: &ObjectPath,
    prefix: &ObjectPath,
) -> Result<Option<PathBuf>> {
    let parts = location
        .prefix_match(prefix)
        .ok_or_else(|| StorageError::InvalidKey(location.to_string()))?;

    // Keys hold percent-encoded segments; files on disk carry the plain names.
    let parts = parts
        .map(|part| {
            percent_decode_str(part.as_ref())
                .decode_utf8()
                .map(|decoded| decoded.into_owned())
                .map_err(|_| StorageError::InvalidKey(location.to_string()))
        })
        .collect::<Result<Vec<String>>>()?;
    if parts.iter().all(|part| part.is_empty()) {
        return Ok(None);
    }

    let mut path = local_dir.to_path_buf();
    for part in &parts {
        if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
            return Err(StorageError::InvalidKey(location.to_string()));
        }
        path.push(part);
    }
    Ok(Some(path))
}

fn remote_key(prefix: &ObjectPath, relative: &Path) -> Result<ObjectPath> {
    let mut key = prefix.clone();
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return Err(StorageError::InvalidKey(relative.display().to_string()));
        };
        let part = part
            .to_str()
            .ok_or_else(|| StorageError::InvalidKey(relative.display().to_string()))?;
        key = key.child(part);
    }
    Ok(key)
}
