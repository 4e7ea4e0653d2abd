//! Publish integration tests
//!
//! Covers the upload half of `stipple publish`; the hub download needs
//! network access and is not exercised here.

use stipple_server::publish::upload_staged;
use stipple_storage::{mirror_down, Backend, ObjectPath, StoreConfig};
use tempfile::tempdir;

const STAGED_FILES: &[(&str, &str)] = &[
    ("model_index.json", "{}"),
    ("unet/config.json", "{\"sample_size\":64}"),
    ("unet/diffusion_pytorch_model.safetensors", "not really weights"),
];

fn stage(root: &std::path::Path) {
    for (rel, contents) in STAGED_FILES {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
}

#[tokio::test]
async fn test_upload_staged_mirrors_under_models_prefix_and_cleans_up() {
    let bucket = StoreConfig::new(Backend::Memory, "cloud-assignment-staz")
        .build()
        .unwrap();
    let workdir = tempdir().unwrap();
    let staging = workdir.path().join("model_cache");
    stage(&staging);

    let report = upload_staged(&staging, &bucket, "stable-diffusion-small", false)
        .await
        .unwrap();

    assert_eq!(report.objects, 3);
    assert!(!staging.exists());
    let config = bucket
        .get_object(&ObjectPath::from(
            "models/stable-diffusion-small/unet/config.json",
        ))
        .await
        .unwrap();
    assert_eq!(config.as_ref(), b"{\"sample_size\":64}");
}

#[tokio::test]
async fn test_published_model_mirrors_back_down() {
    let bucket = StoreConfig::new(Backend::Memory, "cloud-assignment-staz")
        .build()
        .unwrap();
    let workdir = tempdir().unwrap();
    let staging = workdir.path().join("model_cache");
    stage(&staging);

    upload_staged(&staging, &bucket, "stable-diffusion-small", true)
        .await
        .unwrap();
    assert!(staging.exists());

    let model_dir = workdir.path().join("stable-diffusion-model");
    let report = mirror_down(&bucket, "models/stable-diffusion-small", &model_dir)
        .await
        .unwrap();

    assert_eq!(report.objects, 3);
    assert_eq!(
        std::fs::read(model_dir.join("model_index.json")).unwrap(),
        b"{}"
    );
}
