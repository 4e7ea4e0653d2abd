use std::future::Future;
use std::path::Path;

use anyhow::Result;
use hf_hub::api::tokio::Api;

use crate::{DeviceMap, ModelLike, ModelVariant};

pub trait Loader {
    type Model: ModelLike;

    /// Loads weights from `model_dir`. `api` is used for files the local
    /// directory does not carry.
    fn load(
        variant: ModelVariant,
        model_dir: &Path,
        api: Api,
        device_map: DeviceMap,
    ) -> impl Future<Output = Result<Self::Model>>
    where
        Self: Sized;
}
