use anyhow::{anyhow, Result};
use tracing::info;

use crate::{
    Error, Inference, LoadOptions, Loader, ModelHandle, StableDiffusionLoader,
    StableDiffusionVersion,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    StableDiffusion(StableDiffusionVersion),
}

impl ModelVariant {
    /// Detect model variant from a hub model id. Only the 1.x family and 2.1
    /// share the UNet layouts the backend builds; anything else (SDXL, 2.0, 3.x)
    /// is refused before downloading.
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        // Inpainting checkpoints take a 9-channel UNet input, which img2img does not feed.
        if ["INPAINTING", "UNCLIP", "XL"]
            .iter()
            .any(|tag| name_upper.contains(tag))
        {
            return None;
        }
        if name_upper.contains("STABLE-DIFFUSION-V1") {
            Some(ModelVariant::StableDiffusion(StableDiffusionVersion::V1_5))
        } else if name_upper.contains("STABLE-DIFFUSION-2-1") {
            Some(ModelVariant::StableDiffusion(StableDiffusionVersion::V2_1))
        } else {
            None
        }
    }
}

fn detect(options: &LoadOptions) -> Result<ModelVariant> {
    ModelVariant::from_name(&options.model_id)
        .ok_or_else(|| anyhow!("Unsupported model: {}", options.model_id))
}

/// Load a model based on its name, automatically detecting the appropriate loader
pub async fn load_model(options: LoadOptions) -> Result<ModelHandle> {
    let variant = detect(&options)?;
    info!(model = %options.model_id, ?variant, "loading model");

    let api = options.api()?;
    match variant {
        ModelVariant::StableDiffusion(_) => {
            let model = StableDiffusionLoader::load(variant, api, options).await?;
            Ok(ModelHandle::new(model))
        }
    }
}

/// Fetch every file the model needs into the local hub cache without
/// building it.
pub async fn download_model(options: LoadOptions) -> Result<()> {
    let variant = detect(&options)?;
    info!(model = %options.model_id, ?variant, "downloading weights");

    let api = options.api()?;
    match variant {
        ModelVariant::StableDiffusion(_) => {
            StableDiffusionLoader::fetch(&api, &options).await?;
        }
    }
    Ok(())
}

/// Process start-up: reads the auth token from the environment and loads the
/// default model. Failures are not retried.
pub async fn init() -> crate::Result<Inference> {
    load_model(LoadOptions::from_env())
        .await
        .map(Inference::new)
        .map_err(|source| Error::Init { source })
}
