use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use stipple_core::StableDiffusionVersion;
use stipple_storage::{Backend, StoreConfig, GCS_PUBLIC_URL_BASE};

#[derive(Parser, Debug)]
#[command(author, version, about = "Stipple image generation server")]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download the model from the bucket and serve generation requests
    Serve(ServeArgs),
    /// Fetch a model from the Hugging Face hub and upload it to the bucket
    Publish(PublishArgs),
}

/// Where blobs live.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Bucket holding models and generated images
    #[arg(long, env = "STIPPLE_BUCKET", default_value = "cloud-assignment-staz")]
    pub bucket: String,

    /// Model directory name under `models/` in the bucket
    #[arg(long, env = "STIPPLE_MODEL_NAME", default_value = "stable-diffusion-small")]
    pub model_name: String,

    /// Object store backend: gcs, local or memory
    #[arg(long, env = "STIPPLE_STORE", default_value = "gcs")]
    pub store: Backend,

    /// Root directory of the local backend
    #[arg(long, env = "STIPPLE_STORE_ROOT", default_value = "./blob-store")]
    pub store_root: PathBuf,
}

impl StoreArgs {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.store, &self.bucket).with_root(&self.store_root)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Host address to bind the server to
    #[arg(long, env = "STIPPLE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the server to
    #[arg(long, env = "STIPPLE_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Local directory the model is mirrored into
    #[arg(long, env = "STIPPLE_MODEL_DIR", default_value = "./stable-diffusion-model")]
    pub model_dir: PathBuf,

    /// Use CPU instead of GPU
    #[arg(long)]
    pub cpu: bool,

    /// Stable Diffusion version (v1-5, v2-1); detected from the model name if unset
    #[arg(long)]
    pub sd_version: Option<StableDiffusionVersion>,

    /// Seconds a request may wait for the model before failing
    #[arg(long, env = "STIPPLE_QUEUE_TIMEOUT_SECS", default_value_t = 300)]
    pub queue_timeout_secs: u64,

    /// Use the model directory as is instead of mirroring it from the bucket
    #[arg(long)]
    pub skip_download: bool,

    /// Base of the public URLs returned for generated images
    #[arg(long, env = "STIPPLE_PUBLIC_URL_BASE", default_value = GCS_PUBLIC_URL_BASE)]
    pub public_url_base: String,
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Hugging Face model repository
    #[arg(long, default_value = "OFA-Sys/small-stable-diffusion-v0")]
    pub repo: String,

    /// Repository revision (branch, tag or commit)
    #[arg(long)]
    pub revision: Option<String>,

    /// Local staging directory for the snapshot
    #[arg(long, default_value = "./model_cache")]
    pub staging_dir: PathBuf,

    /// Keep the staging directory after uploading
    #[arg(long)]
    pub keep_local: bool,

    /// Upload every file of the repository, not only the pipeline components
    #[arg(long)]
    pub all_files: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["stipple", "serve"]).unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.store.bucket, "cloud-assignment-staz");
        assert_eq!(args.store.model_name, "stable-diffusion-small");
        assert_eq!(args.store.store, Backend::Gcs);
        assert_eq!(args.port, 8000);
        assert_eq!(args.queue_timeout_secs, 300);
        assert_eq!(args.public_url_base, "https://storage.googleapis.com");
        assert!(args.sd_version.is_none());
    }

    #[test]
    fn serve_overrides() {
        let cli = Cli::try_parse_from([
            "stipple",
            "-v",
            "serve",
            "--store",
            "local",
            "--bucket",
            "images",
            "--sd-version",
            "v2-1",
            "--cpu",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.store.store, Backend::Local);
        assert_eq!(args.sd_version, Some(StableDiffusionVersion::V2_1));
        assert!(args.cpu);
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(Cli::try_parse_from(["stipple", "serve", "--store", "s3"]).is_err());
    }

    #[test]
    fn publish_defaults() {
        let cli = Cli::try_parse_from(["stipple", "publish"]).unwrap();
        let Commands::Publish(args) = cli.command else {
            panic!("expected publish");
        };
        assert_eq!(args.repo, "OFA-Sys/small-stable-diffusion-v0");
        assert_eq!(args.staging_dir, PathBuf::from("./model_cache"));
        assert!(!args.keep_local);
    }
}
