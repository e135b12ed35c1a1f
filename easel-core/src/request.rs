use serde::{Deserialize, Serialize};

use crate::{Error, Result, SchedulerKind};

pub const NO_PROMPT_MESSAGE: &str = "No prompt was provided";
pub const NO_INIT_IMAGE_MESSAGE: &str = "No init image was provided";

/// Named parameters of one img2img call.
///
/// Every field except the prompt and the reference image has a default, so a
/// mapping with just those two keys is a complete request.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_dimension")]
    pub height: usize,
    #[serde(default = "default_dimension")]
    pub width: usize,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_scheduler")]
    pub scheduler: String,
    /// Base64 image data, optionally as a `data:` URL.
    #[serde(default, alias = "init_image")]
    pub reference_image: Option<String>,
    #[serde(default = "default_prompt_strength")]
    pub prompt_strength: f64,
}

fn default_dimension() -> usize {
    512
}

fn default_steps() -> usize {
    20
}

fn default_guidance_scale() -> f64 {
    7.0
}

fn default_scheduler() -> String {
    SchedulerKind::default().to_string()
}

fn default_prompt_strength() -> f64 {
    0.7
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            prompt: None,
            negative_prompt: None,
            height: default_dimension(),
            width: default_dimension(),
            steps: default_steps(),
            guidance_scale: default_guidance_scale(),
            seed: None,
            scheduler: default_scheduler(),
            reference_image: None,
            prompt_strength: default_prompt_strength(),
        }
    }
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, reference_image: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            reference_image: Some(reference_image.into()),
            ..Default::default()
        }
    }

    pub(crate) fn prompt_text(&self) -> Option<&str> {
        self.prompt.as_deref().filter(|p| !p.is_empty())
    }

    pub(crate) fn reference_image_data(&self) -> Option<&str> {
        self.reference_image.as_deref().filter(|i| !i.is_empty())
    }

    /// Numeric checks applied before any decoding or model work.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value % 8 != 0 {
                return Err(Error::invalid_request(format!(
                    "{name} must be a positive multiple of 8, got {value}"
                )));
            }
        }
        if self.steps == 0 {
            return Err(Error::invalid_request("steps must be at least 1"));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale <= 0.0 {
            return Err(Error::invalid_request(format!(
                "guidance_scale must be positive, got {}",
                self.guidance_scale
            )));
        }
        if !(0.0..=1.0).contains(&self.prompt_strength) {
            return Err(Error::invalid_request(format!(
                "prompt_strength must be within [0, 1], got {}",
                self.prompt_strength
            )));
        }
        Ok(())
    }
}

/// Output mapping: exactly one of `image_base64` or `message`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum GenerationResult {
    Image { image_base64: String },
    Message { message: String },
}

impl GenerationResult {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    pub fn image_base64(&self) -> Option<&str> {
        match self {
            Self::Image { image_base64 } => Some(image_base64),
            Self::Message { .. } => None,
        }
    }
}
