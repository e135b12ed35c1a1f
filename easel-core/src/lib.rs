#[cfg(feature = "accelerate")]
extern crate accelerate_src;

#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod device_map;
pub mod error;
pub mod generator;
pub mod handle;
pub mod inference;
pub mod loader;
mod loader_factory;
pub mod request;
pub mod scheduler;
mod util;

mod stable_diffusion;

use candle_core::Device;
use image::DynamicImage;

pub use device_map::*;
pub use error::{Error, ErrorKind, Result};
pub use generator::Generator;
pub use handle::ModelHandle;
pub use inference::Inference;
pub use loader::*;
pub use loader_factory::*;
pub use request::{GenerationRequest, GenerationResult};
pub use scheduler::{
    make_scheduler, make_scheduler_by_name, SamplingStrategy, SchedulerConfig, SchedulerKind,
};
pub use stable_diffusion::{
    StableDiffusionLoader, StableDiffusionModel, StableDiffusionVersion, WeightFiles,
};
pub use util::{decode_reference_image, encode_jpeg_base64, image_to_tensor, tensor_to_image};
pub(crate) use util::select_best_device;

/// Everything the pipeline receives for one generation.
pub struct PipelineCall<'a> {
    pub prompt: &'a str,
    pub negative_prompt: Option<&'a str>,
    pub guidance_scale: f64,
    pub num_inference_steps: usize,
    pub image: &'a DynamicImage,
    pub width: usize,
    pub height: usize,
    pub strength: f64,
    pub generator: Option<Generator>,
    pub strategy: &'a SamplingStrategy,
}

/// An image-to-image diffusion pipeline with weights already resident on
/// [`Img2ImgPipeline::device`].
pub trait Img2ImgPipeline: Send {
    fn device(&self) -> &Device;

    /// The model's base noise-schedule configuration.
    fn scheduler_config(&self) -> &SchedulerConfig;

    fn supports(&self, _kind: SchedulerKind) -> bool {
        true
    }

    fn generate(&mut self, call: PipelineCall<'_>) -> anyhow::Result<DynamicImage>;
}
