use std::path::Path;

use anyhow::Result;
use hf_hub::api::tokio::Api;
use tracing::info;

use crate::{DeviceMap, Loader, ModelLike, StableDiffusionLoader, StableDiffusionVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    StableDiffusion(StableDiffusionVersion),
}

impl ModelVariant {
    /// Detect model variant from model name
    pub fn from_name(model_name: &str) -> Self {
        let name_upper = model_name.to_uppercase().replace(['_', '.'], "-");

        if name_upper.contains("2-1") || name_upper.contains("V2") {
            ModelVariant::StableDiffusion(StableDiffusionVersion::V2_1)
        } else {
            // Default to 1.5. The UNet layout and sampler come from the
            // model directory's own configs, so distilled 1.5 checkpoints load too.
            ModelVariant::StableDiffusion(StableDiffusionVersion::V1_5)
        }
    }
}

/// Load the model stored in `model_dir`.
///
/// `version` overrides the variant detected from `model_name`.
pub async fn load_model(
    model_name: &str,
    version: Option<StableDiffusionVersion>,
    model_dir: &Path,
    api: Api,
    device_map: DeviceMap,
) -> Result<Box<dyn ModelLike>> {
    let variant = match version {
        Some(version) => ModelVariant::StableDiffusion(version),
        None => ModelVariant::from_name(model_name),
    };

    info!(
        model = model_name,
        dir = %model_dir.display(),
        ?variant,
        "loading model"
    );

    match variant {
        ModelVariant::StableDiffusion(_) => {
            let model = StableDiffusionLoader::load(variant, model_dir, api, device_map).await?;
            Ok(Box::new(model))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_v2_names() {
        assert_eq!(
            ModelVariant::from_name("stable-diffusion-2-1-base"),
            ModelVariant::StableDiffusion(StableDiffusionVersion::V2_1)
        );
        assert_eq!(
            ModelVariant::from_name("sd_2.1"),
            ModelVariant::StableDiffusion(StableDiffusionVersion::V2_1)
        );
    }

    #[test]
    fn defaults_to_v1_5() {
        assert_eq!(
            ModelVariant::from_name("stable-diffusion-small"),
            ModelVariant::StableDiffusion(StableDiffusionVersion::V1_5)
        );
        assert_eq!(
            ModelVariant::from_name("stable-diffusion-v1-5"),
            ModelVariant::StableDiffusion(StableDiffusionVersion::V1_5)
        );
    }
}
