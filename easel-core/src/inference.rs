//! Request orchestration: validate, select the strategy, call the pipeline
//! once, encode the image.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    decode_reference_image, encode_jpeg_base64, make_scheduler,
    request::{NO_INIT_IMAGE_MESSAGE, NO_PROMPT_MESSAGE},
    Error, GenerationRequest, GenerationResult, Generator, ModelHandle, PipelineCall, Result,
    SchedulerKind,
};

/// Entry point for img2img requests against one loaded model.
#[derive(Debug, Clone)]
pub struct Inference {
    handle: Arc<ModelHandle>,
}

impl Inference {
    pub fn new(handle: ModelHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    pub fn from_shared(handle: Arc<ModelHandle>) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    /// Runs one request.
    ///
    /// A missing prompt or reference image is answered with a message result.
    /// Everything else that goes wrong is an [`Error`].
    pub fn infer(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let Some(prompt) = request.prompt_text() else {
            return Ok(GenerationResult::message(NO_PROMPT_MESSAGE));
        };
        let Some(encoded_image) = request.reference_image_data() else {
            return Ok(GenerationResult::message(NO_INIT_IMAGE_MESSAGE));
        };
        request.validate()?;
        let kind: SchedulerKind = request.scheduler.parse()?;

        let image =
            decode_reference_image(encoded_image).map_err(|source| Error::ImageDecode { source })?;
        let generator = request.seed.map(Generator::manual_seed);

        debug!(
            %kind,
            width = request.width,
            height = request.height,
            steps = request.steps,
            guidance_scale = request.guidance_scale,
            strength = request.prompt_strength,
            seed = ?request.seed,
            "running img2img"
        );

        let output = self.handle.with_pipeline(|pipeline| {
            if !pipeline.supports(kind) {
                return Err(Error::UnsupportedScheduler(kind));
            }
            let strategy = make_scheduler(kind, pipeline.scheduler_config());
            pipeline
                .generate(PipelineCall {
                    prompt,
                    negative_prompt: request.negative_prompt.as_deref(),
                    guidance_scale: request.guidance_scale,
                    num_inference_steps: request.steps,
                    image: &image,
                    width: request.width,
                    height: request.height,
                    strength: request.prompt_strength,
                    generator,
                    strategy: &strategy,
                })
                .map_err(|source| Error::Pipeline { source })
        })?;

        let image_base64 =
            encode_jpeg_base64(&output).map_err(|source| Error::ImageEncode { source })?;
        info!(
            width = output.width(),
            height = output.height(),
            bytes = image_base64.len(),
            "img2img finished"
        );
        Ok(GenerationResult::Image { image_base64 })
    }
}
