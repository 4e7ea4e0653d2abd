//! Component configs shipped in a diffusers-layout model directory.

use std::path::Path;

use anyhow::{bail, Context, Result};
use candle_transformers::models::stable_diffusion::{
    ddim::DDIMSchedulerConfig,
    euler_ancestral_discrete::EulerAncestralDiscreteSchedulerConfig,
    schedulers::{self, SchedulerConfig},
    unet_2d::{BlockConfig, UNet2DConditionModelConfig},
};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};

use super::StableDiffusionVersion;

const MID_BLOCK: &str = "UNetMidBlock2DCrossAttn";

/// Reads `<model_dir>/<component>/<file>`, or `None` when the directory
/// does not ship it.
pub(super) fn read_component_config<T: DeserializeOwned>(
    model_dir: &Path,
    component: &str,
    file: &str,
) -> Result<Option<T>> {
    let path = model_dir.join(component).join(file);
    if !path.is_file() {
        debug!(path = %path.display(), "no component config, using built-in defaults");
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {component}/{file}"))?;
    Ok(Some(config))
}

/// A value given once for every block or once per block.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(super) enum PerBlock {
    Same(usize),
    Each(Vec<usize>),
}

impl PerBlock {
    fn resolve(&self, blocks: usize, field: &str) -> Result<Vec<usize>> {
        match self {
            Self::Same(value) => Ok(vec![*value; blocks]),
            Self::Each(values) if values.len() == blocks => Ok(values.clone()),
            Self::Each(values) => bail!(
                "unet/config.json: {field} lists {} values for {blocks} blocks",
                values.len()
            ),
        }
    }
}

/// `unet/config.json`.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct UNetConfigFile {
    #[serde(default = "default_latent_channels")]
    pub in_channels: usize,
    #[serde(default = "default_latent_channels")]
    pub out_channels: usize,
    pub sample_size: Option<usize>,
    pub block_out_channels: Vec<usize>,
    pub down_block_types: Vec<String>,
    pub up_block_types: Vec<String>,
    #[serde(default = "default_mid_block")]
    pub mid_block_type: Option<String>,
    pub layers_per_block: usize,
    pub attention_head_dim: PerBlock,
    pub num_attention_heads: Option<PerBlock>,
    pub transformer_layers_per_block: Option<PerBlock>,
    pub cross_attention_dim: usize,
    #[serde(default)]
    pub use_linear_projection: bool,
    #[serde(default)]
    pub center_input_sample: bool,
    #[serde(default = "default_true")]
    pub flip_sin_to_cos: bool,
    #[serde(default)]
    pub freq_shift: f64,
    #[serde(default = "default_one")]
    pub downsample_padding: usize,
    #[serde(default = "default_one_f64")]
    pub mid_block_scale_factor: f64,
    #[serde(default = "default_norm_groups")]
    pub norm_num_groups: usize,
    #[serde(default = "default_norm_eps")]
    pub norm_eps: f64,
}

impl UNetConfigFile {
    /// The candle UNet layout described by this file.
    ///
    /// Only layouts candle's UNet can build are accepted: mirrored down and
    /// up blocks of plain or cross-attention type around a cross-attention
    /// mid block.
    pub fn layout(&self) -> Result<UNet2DConditionModelConfig> {
        let blocks = self.block_out_channels.len();
        if blocks == 0 {
            bail!("unet/config.json lists no blocks");
        }
        if self.down_block_types.len() != blocks || self.up_block_types.len() != blocks {
            bail!(
                "unet/config.json: {} output widths, {} down blocks and {} up blocks",
                blocks,
                self.down_block_types.len(),
                self.up_block_types.len()
            );
        }
        if self.mid_block_type.as_deref() != Some(MID_BLOCK) {
            bail!(
                "unsupported UNet layout: mid block {:?}, only {MID_BLOCK} can be loaded",
                self.mid_block_type
            );
        }

        // Newer configs name the head count explicitly; older ones store it
        // in `attention_head_dim`.
        let heads = self
            .num_attention_heads
            .as_ref()
            .unwrap_or(&self.attention_head_dim)
            .resolve(blocks, "attention heads")?;
        let transformer_layers = match &self.transformer_layers_per_block {
            Some(layers) => layers.resolve(blocks, "transformer_layers_per_block")?,
            None => vec![1; blocks],
        };

        let mut layout = Vec::with_capacity(blocks);
        let pairs = self.down_block_types.iter().zip(self.up_block_types.iter().rev());
        for (depth, (down, up)) in pairs.enumerate() {
            let use_cross_attn = match (down.as_str(), up.as_str()) {
                ("CrossAttnDownBlock2D", "CrossAttnUpBlock2D") => Some(transformer_layers[depth]),
                ("DownBlock2D", "UpBlock2D") => None,
                _ => bail!("unsupported UNet layout: {down} paired with {up} at depth {depth}"),
            };
            layout.push(BlockConfig {
                out_channels: self.block_out_channels[depth],
                use_cross_attn,
                attention_head_dim: heads[depth],
            });
        }

        Ok(UNet2DConditionModelConfig {
            center_input_sample: self.center_input_sample,
            flip_sin_to_cos: self.flip_sin_to_cos,
            freq_shift: self.freq_shift,
            blocks: layout,
            layers_per_block: self.layers_per_block,
            downsample_padding: self.downsample_padding,
            mid_block_scale_factor: self.mid_block_scale_factor,
            norm_num_groups: self.norm_num_groups,
            norm_eps: self.norm_eps,
            cross_attention_dim: self.cross_attention_dim,
            sliced_attention_size: None,
            use_linear_projection: self.use_linear_projection,
        })
    }

    /// Native output size in pixels (latent size times the VAE factor).
    pub fn native_size(&self) -> Option<usize> {
        self.sample_size.map(|size| size * 8)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BetaSchedule {
    Linear,
    ScaledLinear,
    SquaredcosCapV2,
}

impl From<BetaSchedule> for schedulers::BetaSchedule {
    fn from(value: BetaSchedule) -> Self {
        match value {
            BetaSchedule::Linear => Self::Linear,
            BetaSchedule::ScaledLinear => Self::ScaledLinear,
            BetaSchedule::SquaredcosCapV2 => Self::SquaredcosCapV2,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum PredictionType {
    Epsilon,
    VPrediction,
    Sample,
}

impl From<PredictionType> for schedulers::PredictionType {
    fn from(value: PredictionType) -> Self {
        match value {
            PredictionType::Epsilon => Self::Epsilon,
            PredictionType::VPrediction => Self::VPrediction,
            PredictionType::Sample => Self::Sample,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TimestepSpacing {
    Leading,
    Linspace,
    Trailing,
}

impl From<TimestepSpacing> for schedulers::TimestepSpacing {
    fn from(value: TimestepSpacing) -> Self {
        match value {
            TimestepSpacing::Leading => Self::Leading,
            TimestepSpacing::Linspace => Self::Linspace,
            TimestepSpacing::Trailing => Self::Trailing,
        }
    }
}

/// `scheduler/scheduler_config.json`.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct SchedulerConfigFile {
    #[serde(rename = "_class_name")]
    pub class_name: String,
    #[serde(default = "default_beta_start")]
    beta_start: f64,
    #[serde(default = "default_beta_end")]
    beta_end: f64,
    #[serde(default = "default_beta_schedule")]
    beta_schedule: BetaSchedule,
    #[serde(default = "default_train_timesteps")]
    num_train_timesteps: usize,
    #[serde(default = "default_prediction_type")]
    prediction_type: PredictionType,
    #[serde(default)]
    steps_offset: usize,
    #[serde(default = "default_timestep_spacing")]
    timestep_spacing: TimestepSpacing,
}

impl SchedulerConfigFile {
    /// Sampler with this file's noise schedule. Euler ancestral configs get
    /// that sampler; every other class is sampled with DDIM.
    pub fn sampler(&self) -> Box<dyn SchedulerConfig> {
        match self.class_name.as_str() {
            "EulerAncestralDiscreteScheduler" => Box::new(EulerAncestralDiscreteSchedulerConfig {
                beta_start: self.beta_start,
                beta_end: self.beta_end,
                beta_schedule: self.beta_schedule.into(),
                steps_offset: self.steps_offset,
                prediction_type: self.prediction_type.into(),
                train_timesteps: self.num_train_timesteps,
                timestep_spacing: self.timestep_spacing.into(),
            }),
            class => {
                if class != "DDIMScheduler" {
                    warn!(class, "no matching sampler, using DDIM with the same noise schedule");
                }
                Box::new(DDIMSchedulerConfig {
                    beta_start: self.beta_start,
                    beta_end: self.beta_end,
                    beta_schedule: self.beta_schedule.into(),
                    steps_offset: self.steps_offset,
                    prediction_type: self.prediction_type.into(),
                    train_timesteps: self.num_train_timesteps,
                    timestep_spacing: self.timestep_spacing.into(),
                    ..Default::default()
                })
            }
        }
    }
}

/// `text_encoder/config.json`, reduced to the fields that fix the shape.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct TextEncoderConfigFile {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
}

impl TextEncoderConfigFile {
    /// The CLIP encoder is built from the version's stock config, so the
    /// shipped one has to agree with it.
    pub fn check(&self, version: StableDiffusionVersion) -> Result<()> {
        let (hidden_size, layers) = version.text_encoder_shape();
        if self.hidden_size != hidden_size || self.num_hidden_layers != layers {
            bail!(
                "unsupported text encoder: {} layers of width {}, {version} expects {layers} of width {hidden_size}",
                self.num_hidden_layers,
                self.hidden_size
            );
        }
        Ok(())
    }
}

fn default_latent_channels() -> usize {
    4
}

fn default_mid_block() -> Option<String> {
    Some(MID_BLOCK.to_string())
}

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

fn default_one_f64() -> f64 {
    1.0
}

fn default_norm_groups() -> usize {
    32
}

fn default_norm_eps() -> f64 {
    1e-5
}

fn default_beta_start() -> f64 {
    0.00085
}

fn default_beta_end() -> f64 {
    0.012
}

fn default_beta_schedule() -> BetaSchedule {
    BetaSchedule::ScaledLinear
}

fn default_train_timesteps() -> usize {
    1000
}

fn default_prediction_type() -> PredictionType {
    PredictionType::Epsilon
}

fn default_timestep_spacing() -> TimestepSpacing {
    TimestepSpacing::Leading
}
