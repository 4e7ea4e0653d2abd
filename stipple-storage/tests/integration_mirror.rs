//! Mirror integration tests against the in-memory object store.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use object_store::memory::InMemory;
use stipple_storage::{mirror_down, mirror_up, Bucket, ObjectPath};
use tempfile::tempdir;
use walkdir::WalkDir;

fn memory_bucket() -> Bucket {
    Bucket::new("cloud-assignment-staz", Arc::new(InMemory::new()))
}

/// Relative path -> contents for every regular file under `root`.
fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap();
            (
                rel.to_string_lossy().replace('\\', "/"),
                std::fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

fn write(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn model_tree(root: &Path) {
    write(root, "model_index.json", br#"{"_class_name":"StableDiffusionPipeline"}"#);
    write(root, "scheduler/scheduler_config.json", b"{}");
    write(root, "tokenizer/tokenizer.json", b"{\"model\":{}}");
    write(root, "unet/diffusion_pytorch_model.safetensors", &[0u8, 1, 2, 3, 255]);
    write(root, "vae/nested/deeper/weights.bin", &vec![7u8; 4096]);
}

#[tokio::test]
async fn test_mirror_round_trip_is_byte_identical() {
    let bucket = memory_bucket();
    let source = tempdir().unwrap();
    model_tree(source.path());
    std::fs::create_dir_all(source.path().join("empty/dir")).unwrap();

    let up = mirror_up(source.path(), &bucket, "models/stable-diffusion-small")
        .await
        .unwrap();
    assert_eq!(up.objects, 5);

    let dest = tempdir().unwrap();
    let down = mirror_down(&bucket, "models/stable-diffusion-small", dest.path())
        .await
        .unwrap();

    assert_eq!(down, up);
    assert_eq!(snapshot(dest.path()), snapshot(source.path()));
    assert!(!dest.path().join("empty").exists());
}

#[tokio::test]
async fn test_mirror_round_trip_keeps_escaped_file_names() {
    let bucket = memory_bucket();
    let source = tempdir().unwrap();
    for name in ["50%.txt", "weights[0].bin", "a#b.json", "x~y", "sub dir/what?.txt"] {
        write(source.path(), name, name.as_bytes());
    }

    mirror_up(source.path(), &bucket, "models/sd").await.unwrap();
    let dest = tempdir().unwrap();
    mirror_down(&bucket, "models/sd", dest.path()).await.unwrap();

    assert_eq!(snapshot(dest.path()), snapshot(source.path()));
    assert_eq!(std::fs::read(dest.path().join("50%.txt")).unwrap(), b"50%.txt");
}

#[tokio::test]
async fn test_mirror_up_uses_prefix_relative_keys() {
    let bucket = memory_bucket();
    let source = tempdir().unwrap();
    write(source.path(), "unet/config.json", b"{}");

    mirror_up(source.path(), &bucket, "models/sd").await.unwrap();

    let bytes = bucket
        .get_object(&ObjectPath::from("models/sd/unet/config.json"))
        .await
        .unwrap();
    assert_eq!(bytes.as_ref(), b"{}");
}

#[tokio::test]
async fn test_mirror_down_twice_is_idempotent() {
    let bucket = memory_bucket();
    let source = tempdir().unwrap();
    model_tree(source.path());
    mirror_up(source.path(), &bucket, "models/sd").await.unwrap();

    let dest = tempdir().unwrap();
    mirror_down(&bucket, "models/sd", dest.path()).await.unwrap();
    let first = snapshot(dest.path());
    mirror_down(&bucket, "models/sd", dest.path()).await.unwrap();

    assert_eq!(snapshot(dest.path()), first);
}

#[tokio::test]
async fn test_mirror_down_overwrites_local_files() {
    let bucket = memory_bucket();
    let source = tempdir().unwrap();
    write(source.path(), "vae/config.json", b"remote");
    mirror_up(source.path(), &bucket, "models/sd").await.unwrap();

    let dest = tempdir().unwrap();
    write(dest.path(), "vae/config.json", b"stale local contents");
    mirror_down(&bucket, "models/sd", dest.path()).await.unwrap();

    assert_eq!(std::fs::read(dest.path().join("vae/config.json")).unwrap(), b"remote");
}

#[tokio::test]
async fn test_mirror_down_matches_whole_segments() {
    let bucket = memory_bucket();
    let source = tempdir().unwrap();
    write(source.path(), "a.json", b"wanted");
    mirror_up(source.path(), &bucket, "models/sd").await.unwrap();
    mirror_up(source.path(), &bucket, "models/sd-old").await.unwrap();

    let dest = tempdir().unwrap();
    let report = mirror_down(&bucket, "models/sd", dest.path()).await.unwrap();

    assert_eq!(report.objects, 1);
    assert_eq!(snapshot(dest.path()).len(), 1);
}

#[tokio::test]
async fn test_mirror_down_of_missing_prefix_is_empty() {
    let bucket = memory_bucket();
    let dest = tempdir().unwrap();

    let report = mirror_down(&bucket, "models/nothing-here", dest.path())
        .await
        .unwrap();

    assert_eq!(report.objects, 0);
    assert!(snapshot(dest.path()).is_empty());
}

#[tokio::test]
async fn test_mirror_up_of_missing_directory_fails() {
    let bucket = memory_bucket();
    let missing = tempdir().unwrap().path().join("does-not-exist");

    assert!(mirror_up(&missing, &bucket, "models/sd").await.is_err());
}
