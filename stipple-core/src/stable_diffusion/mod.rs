mod diffusers;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::Module;
use candle_transformers::models::stable_diffusion::{
    self,
    clip::ClipTextTransformer,
    schedulers::{Scheduler, SchedulerConfig},
    unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use self::diffusers::{
    read_component_config, SchedulerConfigFile, TextEncoderConfigFile, UNetConfigFile,
};

use crate::{
    select_best_device, tensor_to_image, DeviceMap, GenerationRequest, Loader, ModelLike,
    ModelVariant,
};

/// Latent scaling factor of the SD 1.x/2.x autoencoder.
const VAE_SCALE: f64 = 0.18215;
/// Latent channels when the model directory has no `unet/config.json`.
const UNET_IN_CHANNELS: usize = 4;
const DEFAULT_GUIDANCE: f64 = 7.5;
/// Used when the model directory has no `tokenizer/tokenizer.json`.
const FALLBACK_TOKENIZER_REPO: &str = "openai/clip-vit-base-patch32";

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StableDiffusionVersion {
    #[serde(rename = "v1-5")]
    V1_5,
    #[serde(rename = "v2-1")]
    V2_1,
}

serde_plain::derive_display_from_serialize!(StableDiffusionVersion);
serde_plain::derive_fromstr_from_deserialize!(StableDiffusionVersion);

impl StableDiffusionVersion {
    fn config(&self, height: Option<usize>, width: Option<usize>) -> StableDiffusionConfig {
        match self {
            Self::V1_5 => StableDiffusionConfig::v1_5(None, height, width),
            Self::V2_1 => StableDiffusionConfig::v2_1(None, height, width),
        }
    }

    /// Width and depth of the stock CLIP text encoder.
    fn text_encoder_shape(&self) -> (usize, usize) {
        match self {
            Self::V1_5 => (768, 12),
            Self::V2_1 => (1024, 23),
        }
    }
}

pub struct StableDiffusionModel {
    version: StableDiffusionVersion,
    device: Device,
    dtype: DType,
    width: usize,
    height: usize,
    latent_channels: usize,
    /// Sampler from `scheduler/scheduler_config.json`, when shipped.
    scheduler: Option<Box<dyn SchedulerConfig>>,
    tokenizer: Tokenizer,
    pad_id: u32,
    max_tokens: usize,
    text_model: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

impl StableDiffusionModel {
    fn encode_prompt(&self, prompt: &str) -> Result<Tensor> {
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        tokens.truncate(self.max_tokens);
        tokens.resize(self.max_tokens, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }

    /// Prompt embeddings, preceded by the empty-prompt embeddings when
    /// classifier-free guidance is on.
    fn text_embeddings(&self, prompt: &str, use_guidance: bool) -> Result<Tensor> {
        let cond = self.encode_prompt(prompt)?;
        let embeddings = if use_guidance {
            let uncond = self.encode_prompt("")?;
            Tensor::cat(&[uncond, cond], 0)?
        } else {
            cond
        };
        Ok(embeddings.to_dtype(self.dtype)?)
    }
}

impl ModelLike for StableDiffusionModel {
    fn run(&mut self, request: GenerationRequest) -> Result<DynamicImage> {
        validate_request(&request)?;
        let height = request.height.unwrap_or(self.height);
        let width = request.width.unwrap_or(self.width);
        let guidance = request.guidance.unwrap_or(DEFAULT_GUIDANCE);
        let use_guidance = guidance > 1.0;

        // Optionally set seed for reproducibility.
        if let Some(seed) = request.seed {
            self.device.set_seed(seed)?;
        }

        let text_embeddings = self.text_embeddings(&request.prompt, use_guidance)?;

        let mut scheduler = match &self.scheduler {
            Some(sampler) => sampler.build(request.steps)?,
            None => self.version.config(None, None).build_scheduler(request.steps)?,
        };
        let timesteps = scheduler.timesteps().to_vec();
        let latents = Tensor::randn(
            0f32,
            1f32,
            (1, self.latent_channels, height / 8, width / 8),
            &self.device,
        )?;
        let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;

        for (index, &timestep) in timesteps.iter().enumerate() {
            let input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let input = scheduler.scale_model_input(input, timestep)?;
            let noise_pred = self.unet.forward(&input, timestep as f64, &text_embeddings)?;
            let noise_pred = if use_guidance {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&chunks[0], &chunks[1]);
                (uncond + ((text - uncond)? * guidance)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            debug!(step = index + 1, steps = timesteps.len(), "denoising step done");
        }

        let decoded = self.vae.decode(&(latents / VAE_SCALE)?)?;
        let img = ((decoded / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let img = (img.clamp(0f32, 1.)? * 255.)?.to_dtype(DType::U8)?.i(0)?;
        tensor_to_image(&img)
    }
}

fn validate_request(request: &GenerationRequest) -> Result<()> {
    if request.steps == 0 {
        bail!("at least one inference step is required");
    }
    for dim in [request.width, request.height].into_iter().flatten() {
        if dim == 0 || dim % 8 != 0 {
            bail!("image dimensions must be positive multiples of 8, got {dim}");
        }
    }
    Ok(())
}

/// Path of `<model_dir>/<component>/<file>`, which must already exist.
fn component_file(model_dir: &Path, component: &str, file: &str) -> Result<PathBuf> {
    let path = model_dir.join(component).join(file);
    if !path.is_file() {
        bail!(
            "missing {component}/{file} in {}, the model directory is incomplete",
            model_dir.display()
        );
    }
    Ok(path)
}

pub struct StableDiffusionLoader;

impl Loader for StableDiffusionLoader {
    type Model = StableDiffusionModel;

    async fn load(
        variant: ModelVariant,
        model_dir: &Path,
        api: Api,
        device_map: DeviceMap,
    ) -> Result<Self::Model> {
        let ModelVariant::StableDiffusion(version) = variant;

        // Configure device.
        let device = select_best_device(device_map).context("failed to set up device")?;
        let dtype = if device.is_cuda() {
            DType::F16
        } else {
            DType::F32
        };
        let config = version.config(None, None);

        // --- Component configs shipped next to the weights ---
        let unet_file: Option<UNetConfigFile> =
            read_component_config(model_dir, "unet", "config.json")?;
        let unet_layout = unet_file.as_ref().map(UNetConfigFile::layout).transpose()?;
        let scheduler = read_component_config::<SchedulerConfigFile>(
            model_dir,
            "scheduler",
            "scheduler_config.json",
        )?
        .map(|file| {
            info!(class = %file.class_name, "using the model's scheduler config");
            file.sampler()
        });
        if let Some(text_encoder) = read_component_config::<TextEncoderConfigFile>(
            model_dir,
            "text_encoder",
            "config.json",
        )? {
            text_encoder.check(version)?;
        }
        let native_size = unet_file.as_ref().and_then(UNetConfigFile::native_size);
        let (width, height) = match native_size {
            Some(size) => (size, size),
            None => (config.width, config.height),
        };
        let latent_channels = unet_file.as_ref().map_or(UNET_IN_CHANNELS, |f| f.in_channels);

        let clip_weights = component_file(model_dir, "text_encoder", "model.safetensors")?;
        let unet_weights =
            component_file(model_dir, "unet", "diffusion_pytorch_model.safetensors")?;
        let vae_weights = component_file(model_dir, "vae", "diffusion_pytorch_model.safetensors")?;

        // --- Tokenizer, from the model directory when it ships one ---
        let local_tokenizer = model_dir.join("tokenizer").join("tokenizer.json");
        let tokenizer_file = if local_tokenizer.is_file() {
            local_tokenizer
        } else {
            info!(repo = FALLBACK_TOKENIZER_REPO, "fetching CLIP tokenizer from the hub");
            api.model(FALLBACK_TOKENIZER_REPO.to_string())
                .get("tokenizer.json")
                .await
                .context("failed to get CLIP tokenizer")?
        };
        let tokenizer = Tokenizer::from_file(&tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;
        let pad_token = config.clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = tokenizer
            .token_to_id(pad_token)
            .with_context(|| format!("tokenizer has no {pad_token:?} token"))?;

        // --- Text encoder, UNet and autoencoder ---
        let text_model =
            stable_diffusion::build_clip_transformer(&config.clip, clip_weights, &device, DType::F32)
                .context("failed to load CLIP text encoder")?;
        let use_flash_attn = cfg!(feature = "flash-attn");
        let unet = match (unet_file.as_ref(), unet_layout) {
            (Some(file), Some(layout)) => {
                let vb = unsafe {
                    candle_nn::VarBuilder::from_mmaped_safetensors(&[&unet_weights], dtype, &device)?
                };
                UNet2DConditionModel::new(
                    vb,
                    file.in_channels,
                    file.out_channels,
                    use_flash_attn,
                    layout,
                )
            }
            _ => config.build_unet(&unet_weights, &device, UNET_IN_CHANNELS, use_flash_attn, dtype),
        }
        .context("failed to load UNet")?;
        let vae = config
            .build_vae(vae_weights, &device, dtype)
            .context("failed to load autoencoder")?;

        info!(%version, ?device, ?dtype, width, height, "stable diffusion model loaded");

        Ok(StableDiffusionModel {
            version,
            device,
            dtype,
            width,
            height,
            latent_channels,
            scheduler,
            tokenizer,
            pad_id,
            max_tokens: config.clip.max_position_embeddings,
            text_model,
            unet,
            vae,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_round_trips_through_strings() {
        assert_eq!("v1-5".parse::<StableDiffusionVersion>().unwrap(), StableDiffusionVersion::V1_5);
        assert_eq!(StableDiffusionVersion::V2_1.to_string(), "v2-1");
        assert!("xl".parse::<StableDiffusionVersion>().is_err());
    }

    #[test]
    fn rejects_zero_steps_and_odd_sizes() {
        let mut request = GenerationRequest::new("a red fox", 0);
        assert!(validate_request(&request).is_err());

        request.steps = 10;
        assert!(validate_request(&request).is_ok());

        request.width = Some(500);
        assert!(validate_request(&request).is_err());

        request.width = Some(512);
        request.height = Some(0);
        assert!(validate_request(&request).is_err());
    }

    #[test]
    fn component_file_reports_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        let err = component_file(dir.path(), "unet", "diffusion_pytorch_model.safetensors")
            .unwrap_err();
        assert!(err.to_string().contains("unet/diffusion_pytorch_model.safetensors"));

        std::fs::create_dir_all(dir.path().join("vae")).unwrap();
        std::fs::write(dir.path().join("vae/config.json"), b"{}").unwrap();
        assert!(component_file(dir.path(), "vae", "config.json").is_ok());
    }
}
