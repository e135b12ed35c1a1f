use std::path::PathBuf;

use anyhow::{Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::Module;
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use hf_hub::{api::tokio::Api, Repo, RepoType};
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

mod sampling;

use crate::{
    image_to_tensor, select_best_device, tensor_to_image, Img2ImgPipeline, LoadOptions, Loader,
    ModelVariant, PipelineCall, SchedulerConfig, SchedulerKind,
};

const VAE_SCALE: f64 = 0.18215;
const EOS_TOKEN: &str = "<|endoftext|>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StableDiffusionVersion {
    V1_5,
    V2_1,
}

impl StableDiffusionVersion {
    fn config(self, sliced_attention_size: Option<usize>) -> StableDiffusionConfig {
        match self {
            Self::V1_5 => StableDiffusionConfig::v1_5(sliced_attention_size, None, None),
            Self::V2_1 => StableDiffusionConfig::v2_1(sliced_attention_size, None, None),
        }
    }
}

/// Local paths of every file a Stable Diffusion checkpoint needs.
#[derive(Debug, Clone)]
pub struct WeightFiles {
    pub tokenizer: PathBuf,
    pub text_encoder: PathBuf,
    pub unet: PathBuf,
    pub vae: PathBuf,
    pub scheduler_config: PathBuf,
}

pub struct StableDiffusionModel {
    device: Device,
    dtype: DType,
    scheduler_config: SchedulerConfig,
    tokenizer: Tokenizer,
    pad_id: u32,
    eos_id: u32,
    max_tokens: usize,
    text_model: ClipTextTransformer,
    vae: AutoEncoderKL,
    unet: UNet2DConditionModel,
}

impl StableDiffusionModel {
    fn encode_text(&self, text: &str) -> Result<Tensor> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        if tokens.len() > self.max_tokens {
            warn!(
                tokens = tokens.len(),
                max = self.max_tokens,
                "prompt is longer than the text encoder context, truncating"
            );
        }
        let tokens = fit_to_context(tokens, self.max_tokens, self.eos_id, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }
}

/// Truncates or pads token ids to exactly `max_tokens`. A truncated sequence
/// still ends with the end-of-text token.
fn fit_to_context(mut tokens: Vec<u32>, max_tokens: usize, eos_id: u32, pad_id: u32) -> Vec<u32> {
    if tokens.len() > max_tokens {
        tokens.truncate(max_tokens);
        if let Some(last) = tokens.last_mut() {
            *last = eos_id;
        }
    }
    tokens.resize(max_tokens, pad_id);
    tokens
}

impl Img2ImgPipeline for StableDiffusionModel {
    fn device(&self) -> &Device {
        &self.device
    }

    fn scheduler_config(&self) -> &SchedulerConfig {
        &self.scheduler_config
    }

    fn supports(&self, kind: SchedulerKind) -> bool {
        sampling::supports(kind)
    }

    fn generate(&mut self, call: PipelineCall<'_>) -> Result<DynamicImage> {
        let PipelineCall {
            prompt,
            negative_prompt,
            guidance_scale,
            num_inference_steps,
            image,
            width,
            height,
            strength,
            mut generator,
            strategy,
        } = call;

        let mut scheduler = sampling::build_scheduler(strategy, num_inference_steps)?;
        if let Some(generator) = &generator {
            generator.seed_device(&self.device)?;
        }

        // --- Text conditioning, unconditional first when guiding ---
        let use_guidance = guidance_scale > 1.0;
        let cond = self.encode_text(prompt)?;
        let text_embeddings = if use_guidance {
            let uncond = self.encode_text(negative_prompt.unwrap_or(""))?;
            Tensor::cat(&[uncond, cond], 0)?
        } else {
            cond
        };
        let text_embeddings = text_embeddings.to_dtype(self.dtype)?;

        // --- Encode the reference image into the latent space ---
        let init_image = image_to_tensor(image, width, height)?
            .to_device(&self.device)?
            .to_dtype(self.dtype)?;
        let latents = (self.vae.encode(&init_image)?.sample()? * VAE_SCALE)?;

        // --- Noise the latents up to the strength-dependent start step ---
        let timesteps = scheduler.timesteps().to_vec();
        let t_start = num_inference_steps - (num_inference_steps as f64 * strength) as usize;
        let mut latents = if t_start < timesteps.len() {
            let noise = match generator.as_mut() {
                Some(generator) => generator
                    .randn(latents.dims(), &self.device)?
                    .to_dtype(latents.dtype())?,
                None => latents.randn_like(0.0, 1.0)?,
            };
            scheduler.add_noise(&latents, noise, timesteps[t_start])?
        } else {
            latents
        };
        debug!(t_start, total = timesteps.len(), %strategy, "denoising");

        for &timestep in timesteps.iter().skip(t_start) {
            let latent_model_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;
            let noise_pred =
                self.unet
                    .forward(&latent_model_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if use_guidance {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&chunks[0], &chunks[1]);
                (uncond + ((text - uncond)? * guidance_scale)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
        }

        // --- Decode and convert to 8-bit RGB ---
        let decoded = self.vae.decode(&(&latents / VAE_SCALE)?)?;
        let img = ((decoded.to_dtype(DType::F32)? / 2.)? + 0.5)?
            .to_device(&Device::Cpu)?
            .clamp(0f32, 1f32)?;
        let img = (img * 255.)?.to_dtype(DType::U8)?;
        tensor_to_image(&img.i(0)?)
    }
}

pub struct StableDiffusionLoader;

impl StableDiffusionLoader {
    /// Resolves every weight file through the hub cache, downloading what is
    /// missing.
    pub async fn fetch(api: &Api, options: &LoadOptions) -> Result<WeightFiles> {
        let repo = match &options.revision {
            Some(revision) => api.repo(Repo::with_revision(
                options.model_id.clone(),
                RepoType::Model,
                revision.clone(),
            )),
            None => api.model(options.model_id.clone()),
        };
        let suffix = if options.use_f16 {
            "fp16.safetensors"
        } else {
            "safetensors"
        };

        let unet = repo
            .get(&format!("unet/diffusion_pytorch_model.{suffix}"))
            .await
            .context("failed to get UNet weights")?;
        let vae = repo
            .get(&format!("vae/diffusion_pytorch_model.{suffix}"))
            .await
            .context("failed to get VAE weights")?;
        let text_encoder = repo
            .get(&format!("text_encoder/model.{suffix}"))
            .await
            .context("failed to get text encoder weights")?;
        let scheduler_config = repo
            .get("scheduler/scheduler_config.json")
            .await
            .context("failed to get scheduler config")?;
        let tokenizer = api
            .model(options.tokenizer_id.clone())
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;

        Ok(WeightFiles {
            tokenizer,
            text_encoder,
            unet,
            vae,
            scheduler_config,
        })
    }
}

impl Loader for StableDiffusionLoader {
    type Model = StableDiffusionModel;

    async fn load(variant: ModelVariant, api: Api, options: LoadOptions) -> Result<Self::Model> {
        let ModelVariant::StableDiffusion(version) = variant;

        // Configure device.
        let device = select_best_device(options.device_map).context("failed to set up device")?;
        let dtype = if options.use_f16 && !device.is_cpu() {
            DType::F16
        } else {
            DType::F32
        };
        let sd_config = version.config(options.sliced_attention_size);
        let files = Self::fetch(&api, &options).await?;

        // --- Scheduler config and tokenizer ---
        let scheduler_json = tokio::fs::read_to_string(&files.scheduler_config)
            .await
            .context("failed to read scheduler config")?;
        let scheduler_config =
            SchedulerConfig::from_json(&scheduler_json).context("failed to parse scheduler config")?;
        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;
        let pad_token = sd_config.clip.pad_with.as_deref().unwrap_or(EOS_TOKEN);
        let pad_id = tokenizer
            .token_to_id(pad_token)
            .with_context(|| format!("tokenizer has no pad token {pad_token:?}"))?;
        let eos_id = tokenizer
            .token_to_id(EOS_TOKEN)
            .with_context(|| format!("tokenizer has no end-of-text token {EOS_TOKEN:?}"))?;

        // --- Networks, built directly on the target device ---
        info!(?version, ?device, ?dtype, "building text encoder");
        let text_model = stable_diffusion::build_clip_transformer(
            &sd_config.clip,
            &files.text_encoder,
            &device,
            DType::F32,
        )
        .context("failed to load CLIP text encoder")?;
        info!("building VAE");
        let vae = sd_config
            .build_vae(&files.vae, &device, dtype)
            .context("failed to load VAE")?;
        info!("building UNet");
        let unet = sd_config
            .build_unet(&files.unet, &device, 4, cfg!(feature = "flash-attn"), dtype)
            .context("failed to load UNet")?;

        Ok(StableDiffusionModel {
            device,
            dtype,
            scheduler_config,
            tokenizer,
            pad_id,
            eos_id,
            max_tokens: sd_config.clip.max_position_embeddings,
            text_model,
            vae,
            unet,
        })
    }
}
