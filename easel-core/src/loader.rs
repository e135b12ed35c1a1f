use std::future::Future;

use anyhow::Result;
use hf_hub::api::tokio::{Api, ApiBuilder};
use loader_factory::ModelVariant;

use crate::{loader_factory, DeviceMap, Img2ImgPipeline};

/// Environment variable holding the Hugging Face token used to fetch weights.
pub const AUTH_TOKEN_ENV: &str = "HF_AUTH_TOKEN";
pub const DEFAULT_MODEL_ID: &str = "stable-diffusion-v1-5/stable-diffusion-v1-5";
pub const DEFAULT_TOKENIZER_ID: &str = "openai/clip-vit-base-patch32";

pub trait Loader {
    type Model: Img2ImgPipeline;

    fn load(
        variant: ModelVariant,
        api: Api,
        options: LoadOptions,
    ) -> impl Future<Output = Result<Self::Model>>
    where
        Self: Sized;
}

/// How and where to load a model.
#[derive(Clone)]
pub struct LoadOptions {
    /// Hub repository holding the `unet/`, `vae/`, `text_encoder/` and
    /// `scheduler/` folders.
    pub model_id: String,
    pub revision: Option<String>,
    /// Hub repository holding `tokenizer.json`.
    pub tokenizer_id: String,
    pub device_map: DeviceMap,
    /// Fetch the `.fp16` weight files and run in half precision on
    /// accelerators.
    pub use_f16: bool,
    pub sliced_attention_size: Option<usize>,
    pub auth_token: Option<String>,
    pub progress: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: None,
            tokenizer_id: DEFAULT_TOKENIZER_ID.to_string(),
            device_map: DeviceMap::default(),
            use_f16: true,
            sliced_attention_size: None,
            auth_token: None,
            progress: false,
        }
    }
}

impl LoadOptions {
    /// Defaults plus the auth token from [`AUTH_TOKEN_ENV`], if set.
    pub fn from_env() -> Self {
        Self {
            auth_token: std::env::var(AUTH_TOKEN_ENV).ok().filter(|t| !t.is_empty()),
            ..Default::default()
        }
    }

    pub fn api(&self) -> Result<Api> {
        Ok(ApiBuilder::new()
            .with_token(self.auth_token.clone())
            .with_progress(self.progress)
            .build()?)
    }
}

impl std::fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOptions")
            .field("model_id", &self.model_id)
            .field("revision", &self.revision)
            .field("tokenizer_id", &self.tokenizer_id)
            .field("device_map", &self.device_map)
            .field("use_f16", &self.use_f16)
            .field("sliced_attention_size", &self.sliced_attention_size)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("progress", &self.progress)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_the_token() {
        let options = LoadOptions {
            auth_token: Some("hf_secret".into()),
            ..Default::default()
        };
        let printed = format!("{options:?}");
        assert!(!printed.contains("hf_secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn defaults_target_sd15_on_the_first_accelerator() {
        let options = LoadOptions::default();
        assert_eq!(options.model_id, DEFAULT_MODEL_ID);
        assert_eq!(options.device_map, DeviceMap::Ordinal(0));
        assert!(options.use_f16);
        assert!(options.auth_token.is_none());
    }
}
