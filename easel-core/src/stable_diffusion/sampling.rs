//! Maps a [`SamplingStrategy`] onto the samplers candle ships.

use anyhow::{bail, Result};
use candle_transformers::models::stable_diffusion::{
    ddim::DDIMSchedulerConfig,
    euler_ancestral_discrete::EulerAncestralDiscreteSchedulerConfig,
    schedulers::{self, Scheduler, SchedulerConfig as _},
};

use crate::scheduler::{BetaSchedule, PredictionType, TimestepSpacing};
use crate::{SamplingStrategy, SchedulerKind};

pub(super) fn supports(kind: SchedulerKind) -> bool {
    matches!(kind, SchedulerKind::Ddim | SchedulerKind::EulerAncestral)
}

pub(super) fn build_scheduler(strategy: &SamplingStrategy, steps: usize) -> Result<Box<dyn Scheduler>> {
    let scheduler = match strategy {
        SamplingStrategy::Ddim(ddim) => {
            let config = &ddim.config;
            DDIMSchedulerConfig {
                beta_start: config.beta_start,
                beta_end: config.beta_end,
                beta_schedule: beta_schedule(config.beta_schedule),
                eta: ddim.eta,
                steps_offset: config.steps_offset,
                prediction_type: prediction_type(config.prediction_type),
                train_timesteps: config.num_train_timesteps,
                timestep_spacing: timestep_spacing(config.timestep_spacing),
                ..Default::default()
            }
            .build(steps)?
        }
        SamplingStrategy::EulerAncestral(euler) => {
            let config = &euler.config;
            EulerAncestralDiscreteSchedulerConfig {
                beta_start: config.beta_start,
                beta_end: config.beta_end,
                beta_schedule: beta_schedule(config.beta_schedule),
                steps_offset: config.steps_offset,
                prediction_type: prediction_type(config.prediction_type),
                train_timesteps: config.num_train_timesteps,
                timestep_spacing: timestep_spacing(config.timestep_spacing),
                ..Default::default()
            }
            .build(steps)?
        }
        other => bail!("the candle backend has no {} sampler", other.kind()),
    };
    Ok(scheduler)
}

fn beta_schedule(schedule: BetaSchedule) -> schedulers::BetaSchedule {
    match schedule {
        BetaSchedule::Linear => schedulers::BetaSchedule::Linear,
        BetaSchedule::ScaledLinear => schedulers::BetaSchedule::ScaledLinear,
        BetaSchedule::SquaredcosCapV2 => schedulers::BetaSchedule::SquaredcosCapV2,
    }
}

fn prediction_type(prediction: PredictionType) -> schedulers::PredictionType {
    match prediction {
        PredictionType::Epsilon => schedulers::PredictionType::Epsilon,
        PredictionType::VPrediction => schedulers::PredictionType::VPrediction,
        PredictionType::Sample => schedulers::PredictionType::Sample,
    }
}

fn timestep_spacing(spacing: TimestepSpacing) -> schedulers::TimestepSpacing {
    match spacing {
        TimestepSpacing::Leading => schedulers::TimestepSpacing::Leading,
        TimestepSpacing::Linspace => schedulers::TimestepSpacing::Linspace,
        TimestepSpacing::Trailing => schedulers::TimestepSpacing::Trailing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{make_scheduler, SchedulerConfig};

    #[test]
    fn supported_strategies_build_the_requested_step_count() {
        let base = SchedulerConfig::default();
        for kind in [SchedulerKind::Ddim, SchedulerKind::EulerAncestral] {
            assert!(supports(kind));
            let scheduler = build_scheduler(&make_scheduler(kind, &base), 20).unwrap();
            assert_eq!(scheduler.timesteps().len(), 20, "{kind}");
        }
    }

    #[test]
    fn other_strategies_are_reported_unsupported() {
        let base = SchedulerConfig::default();
        for kind in SchedulerKind::ALL {
            if supports(kind) {
                continue;
            }
            assert!(build_scheduler(&make_scheduler(kind, &base), 20).is_err(), "{kind}");
        }
    }
}
