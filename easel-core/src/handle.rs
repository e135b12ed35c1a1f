use std::sync::Mutex;

use candle_core::Device;
use tracing::{info, warn};

use crate::{Img2ImgPipeline, SchedulerConfig};

/// The one loaded model shared by every request.
///
/// Device and base scheduler configuration are captured when the handle is
/// built and never change afterwards. Pipeline calls are serialized.
///
/// A panic inside [`Img2ImgPipeline::generate`] does not take the handle down:
/// the pipeline keeps no state between calls, so the next request reuses it.
pub struct ModelHandle {
    pipeline: Mutex<Box<dyn Img2ImgPipeline>>,
    device: Device,
    scheduler_config: SchedulerConfig,
}

impl ModelHandle {
    pub fn new<P: Img2ImgPipeline + 'static>(pipeline: P) -> Self {
        let device = pipeline.device().clone();
        let scheduler_config = pipeline.scheduler_config().clone();
        info!(?device, "model resident and ready");
        Self {
            pipeline: Mutex::new(Box::new(pipeline)),
            device,
            scheduler_config,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_accelerated(&self) -> bool {
        !self.device.is_cpu()
    }

    pub fn scheduler_config(&self) -> &SchedulerConfig {
        &self.scheduler_config
    }

    pub(crate) fn with_pipeline<R>(&self, f: impl FnOnce(&mut dyn Img2ImgPipeline) -> R) -> R {
        let mut guard = self.pipeline.lock().unwrap_or_else(|poisoned| {
            warn!("a previous generation panicked, reusing the pipeline");
            self.pipeline.clear_poison();
            poisoned.into_inner()
        });
        f(guard.as_mut())
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("device", &self.device)
            .field("scheduler_config", &self.scheduler_config)
            .finish_non_exhaustive()
    }
}
