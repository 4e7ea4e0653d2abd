//! One-time setup: copy a model from the Hugging Face hub into the bucket.

use std::path::Path;

use anyhow::{bail, Context, Result};
use hf_hub::{
    api::tokio::{Api, ApiRepo},
    Repo, RepoType,
};
use stipple_storage::{keys::model_prefix, mirror_up, Bucket, MirrorReport};
use tokio::fs;
use tracing::{debug, info};

use crate::cli::PublishArgs;

/// Top-level directories of a diffusers pipeline the backend reads.
const PIPELINE_COMPONENTS: &[&str] = &["scheduler", "text_encoder", "tokenizer", "unet", "vae"];

/// Weight formats the backend cannot load.
const SKIPPED_EXTENSIONS: &[&str] = &["bin", "ckpt", "h5", "msgpack", "onnx", "onnx_data", "pb"];

pub async fn run(args: PublishArgs) -> Result<()> {
    let bucket = args
        .store
        .store_config()
        .build()
        .context("failed to open bucket")?;
    let report = publish_model(&args, &bucket).await?;
    info!(
        objects = report.objects,
        bytes = report.bytes,
        "Model is now available at {}/{}",
        bucket.name(),
        model_prefix(&args.store.model_name)
    );
    Ok(())
}

/// Snapshots `args.repo` into the staging directory, then uploads it.
pub async fn publish_model(args: &PublishArgs, bucket: &Bucket) -> Result<MirrorReport> {
    let api = Api::new().context("failed to create hf hub API")?;
    let repo = match &args.revision {
        Some(revision) => api.repo(Repo::with_revision(
            args.repo.clone(),
            RepoType::Model,
            revision.clone(),
        )),
        None => api.model(args.repo.clone()),
    };

    info!(repo = %args.repo, "Downloading model");
    let info = repo
        .info()
        .await
        .with_context(|| format!("failed to list files of {}", args.repo))?;
    let files: Vec<&str> = info
        .siblings
        .iter()
        .map(|sibling| sibling.rfilename.as_str())
        .filter(|name| args.all_files || is_pipeline_file(name))
        .collect();
    if files.is_empty() {
        bail!("{} has no diffusers pipeline files", args.repo);
    }

    stage_files(&repo, &files, &args.staging_dir).await?;
    upload_staged(
        &args.staging_dir,
        bucket,
        &args.store.model_name,
        args.keep_local,
    )
    .await
}

async fn stage_files(repo: &ApiRepo, files: &[&str], staging_dir: &Path) -> Result<()> {
    for name in files {
        let cached = repo
            .get(name)
            .await
            .with_context(|| format!("failed to download {name}"))?;
        let dest = staging_dir.join(name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::copy(&cached, &dest)
            .await
            .with_context(|| format!("failed to stage {name}"))?;
        debug!(file = name, "staged");
    }
    info!(files = files.len(), dir = %staging_dir.display(), "Model downloaded");
    Ok(())
}

/// Uploads the staging directory to `models/<model_name>` and removes it
/// unless `keep_local` is set.
pub async fn upload_staged(
    staging_dir: &Path,
    bucket: &Bucket,
    model_name: &str,
    keep_local: bool,
) -> Result<MirrorReport> {
    let prefix = model_prefix(model_name);
    info!(bucket = bucket.name(), %prefix, "Uploading model");
    let report = mirror_up(staging_dir, bucket, &prefix)
        .await
        .with_context(|| format!("failed to upload model to {}/{prefix}", bucket.name()))?;

    if !keep_local {
        info!(dir = %staging_dir.display(), "Cleaning up local files");
        fs::remove_dir_all(staging_dir)
            .await
            .with_context(|| format!("failed to remove {}", staging_dir.display()))?;
    }
    Ok(report)
}

/// Whether a repository file belongs to the diffusers pipeline the backend
/// loads.
pub fn is_pipeline_file(name: &str) -> bool {
    if name == "model_index.json" {
        return true;
    }
    let Some((component, rest)) = name.split_once('/') else {
        return false;
    };
    if !PIPELINE_COMPONENTS.contains(&component) || rest.contains(".fp16.") {
        return false;
    }
    let extension = rest.rsplit_once('.').map_or("", |(_, ext)| ext);
    !SKIPPED_EXTENSIONS.contains(&extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_pipeline_components() {
        assert!(is_pipeline_file("model_index.json"));
        assert!(is_pipeline_file("scheduler/scheduler_config.json"));
        assert!(is_pipeline_file("tokenizer/vocab.json"));
        assert!(is_pipeline_file("text_encoder/model.safetensors"));
        assert!(is_pipeline_file("unet/diffusion_pytorch_model.safetensors"));
    }

    #[test]
    fn drops_other_files_and_formats() {
        assert!(!is_pipeline_file("README.md"));
        assert!(!is_pipeline_file(".gitattributes"));
        assert!(!is_pipeline_file("safety_checker/model.safetensors"));
        assert!(!is_pipeline_file("unet/diffusion_pytorch_model.bin"));
        assert!(!is_pipeline_file("vae/diffusion_pytorch_model.fp16.safetensors"));
        assert!(!is_pipeline_file("text_encoder/flax_model.msgpack"));
    }
}
