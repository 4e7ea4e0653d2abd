#[cfg(feature = "accelerate")]
extern crate accelerate_src;
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod device_map;
pub mod loader;
mod loader_factory;
mod util;

mod stable_diffusion;

pub use device_map::*;
use image::DynamicImage;
pub use loader::*;
pub use loader_factory::*;
use serde::{Deserialize, Serialize};
pub use stable_diffusion::{StableDiffusionLoader, StableDiffusionModel, StableDiffusionVersion};
pub use util::{encode_png, select_best_device, tensor_to_image};

/// One call into a generation backend.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, PartialOrd)]
pub struct GenerationRequest {
    pub prompt: String,
    pub steps: usize,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub guidance: Option<f64>,
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, steps: usize) -> Self {
        Self {
            prompt: prompt.into(),
            steps,
            width: None,
            height: None,
            guidance: None,
            seed: None,
        }
    }
}

/// A loaded text-to-image model: `generate(prompt, steps) -> image`.
///
/// Implementations hold mutable inference state and are driven by one
/// caller at a time.
pub trait ModelLike: Send {
    fn run(&mut self, request: GenerationRequest) -> anyhow::Result<DynamicImage>;
}
