//! Sampling-strategy selection.
//!
//! A request names one of six strategies. [`make_scheduler`] turns that name
//! and the model's base [`SchedulerConfig`] into a [`SamplingStrategy`] value
//! which is handed to the pipeline for a single generation. The update rules
//! themselves live in the pipeline backend.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The closed set of strategy names accepted on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchedulerKind {
    #[serde(rename = "PNDM")]
    Pndm,
    #[serde(rename = "KLMS")]
    Klms,
    #[serde(rename = "DDIM")]
    Ddim,
    #[serde(rename = "K_EULER")]
    Euler,
    #[default]
    #[serde(rename = "K_EULER_ANCESTRAL")]
    EulerAncestral,
    #[serde(rename = "DPMSolverMultistep")]
    DpmSolverMultistep,
}

serde_plain::derive_display_from_serialize!(SchedulerKind);

impl SchedulerKind {
    pub const ALL: [SchedulerKind; 6] = [
        Self::Pndm,
        Self::Klms,
        Self::Ddim,
        Self::Euler,
        Self::EulerAncestral,
        Self::DpmSolverMultistep,
    ];

    /// Class name written into the strategy's configuration, in the same
    /// convention as `scheduler_config.json`.
    pub fn class_name(self) -> &'static str {
        match self {
            Self::Pndm => "PNDMScheduler",
            Self::Klms => "LMSDiscreteScheduler",
            Self::Ddim => "DDIMScheduler",
            Self::Euler => "EulerDiscreteScheduler",
            Self::EulerAncestral => "EulerAncestralDiscreteScheduler",
            Self::DpmSolverMultistep => "DPMSolverMultistepScheduler",
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        serde_plain::from_str(name).map_err(|_| Error::UnknownScheduler(name.to_owned()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaSchedule {
    Linear,
    #[default]
    ScaledLinear,
    SquaredcosCapV2,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    #[default]
    Epsilon,
    VPrediction,
    Sample,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestepSpacing {
    #[default]
    Leading,
    Linspace,
    Trailing,
}

/// Base noise-schedule configuration of a loaded model.
///
/// Deserializes from a repository's `scheduler/scheduler_config.json`; keys
/// that are missing fall back to the Stable Diffusion 1.x values and unknown
/// keys are ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(rename = "_class_name", skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub num_train_timesteps: usize,
    pub beta_start: f64,
    pub beta_end: f64,
    pub beta_schedule: BetaSchedule,
    pub prediction_type: PredictionType,
    pub steps_offset: usize,
    pub timestep_spacing: TimestepSpacing,
    pub set_alpha_to_one: bool,
    pub clip_sample: bool,
    pub skip_prk_steps: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            class_name: None,
            num_train_timesteps: 1000,
            beta_start: 0.00085,
            beta_end: 0.012,
            beta_schedule: BetaSchedule::ScaledLinear,
            prediction_type: PredictionType::Epsilon,
            steps_offset: 1,
            timestep_spacing: TimestepSpacing::Leading,
            set_alpha_to_one: false,
            clip_sample: false,
            skip_prk_steps: true,
        }
    }
}

impl SchedulerConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    fn relabel(&self, kind: SchedulerKind) -> Self {
        Self {
            class_name: Some(kind.class_name().to_owned()),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PndmScheduler {
    pub config: SchedulerConfig,
    pub skip_prk_steps: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LmsDiscreteScheduler {
    pub config: SchedulerConfig,
    pub use_karras_sigmas: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DdimScheduler {
    pub config: SchedulerConfig,
    pub eta: f64,
    pub clip_sample: bool,
    pub set_alpha_to_one: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SigmaInterpolation {
    #[default]
    Linear,
    LogLinear,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EulerDiscreteScheduler {
    pub config: SchedulerConfig,
    pub use_karras_sigmas: bool,
    pub interpolation: SigmaInterpolation,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EulerAncestralDiscreteScheduler {
    pub config: SchedulerConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DpmSolverAlgorithm {
    DpmSolver,
    #[default]
    DpmSolverPlusPlus,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DpmSolverMultistepScheduler {
    pub config: SchedulerConfig,
    pub solver_order: usize,
    pub algorithm: DpmSolverAlgorithm,
    pub lower_order_final: bool,
}

/// A configured sampling strategy, built per request.
#[derive(Clone, Debug, PartialEq)]
pub enum SamplingStrategy {
    Pndm(PndmScheduler),
    Klms(LmsDiscreteScheduler),
    Ddim(DdimScheduler),
    Euler(EulerDiscreteScheduler),
    EulerAncestral(EulerAncestralDiscreteScheduler),
    DpmSolverMultistep(DpmSolverMultistepScheduler),
}

impl SamplingStrategy {
    pub fn kind(&self) -> SchedulerKind {
        match self {
            Self::Pndm(_) => SchedulerKind::Pndm,
            Self::Klms(_) => SchedulerKind::Klms,
            Self::Ddim(_) => SchedulerKind::Ddim,
            Self::Euler(_) => SchedulerKind::Euler,
            Self::EulerAncestral(_) => SchedulerKind::EulerAncestral,
            Self::DpmSolverMultistep(_) => SchedulerKind::DpmSolverMultistep,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        match self {
            Self::Pndm(s) => &s.config,
            Self::Klms(s) => &s.config,
            Self::Ddim(s) => &s.config,
            Self::Euler(s) => &s.config,
            Self::EulerAncestral(s) => &s.config,
            Self::DpmSolverMultistep(s) => &s.config,
        }
    }
}

impl fmt::Display for SamplingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().class_name())
    }
}

/// Builds a fresh strategy of `kind` from the model's base configuration.
pub fn make_scheduler(kind: SchedulerKind, config: &SchedulerConfig) -> SamplingStrategy {
    let derived = config.relabel(kind);
    match kind {
        SchedulerKind::Pndm => SamplingStrategy::Pndm(PndmScheduler {
            skip_prk_steps: config.skip_prk_steps,
            config: derived,
        }),
        SchedulerKind::Klms => SamplingStrategy::Klms(LmsDiscreteScheduler {
            config: derived,
            use_karras_sigmas: false,
        }),
        SchedulerKind::Ddim => SamplingStrategy::Ddim(DdimScheduler {
            eta: 0.0,
            clip_sample: config.clip_sample,
            set_alpha_to_one: config.set_alpha_to_one,
            config: derived,
        }),
        SchedulerKind::Euler => SamplingStrategy::Euler(EulerDiscreteScheduler {
            config: derived,
            use_karras_sigmas: false,
            interpolation: SigmaInterpolation::Linear,
        }),
        SchedulerKind::EulerAncestral => {
            SamplingStrategy::EulerAncestral(EulerAncestralDiscreteScheduler { config: derived })
        }
        SchedulerKind::DpmSolverMultistep => {
            SamplingStrategy::DpmSolverMultistep(DpmSolverMultistepScheduler {
                config: derived,
                solver_order: 2,
                algorithm: DpmSolverAlgorithm::DpmSolverPlusPlus,
                lower_order_final: true,
            })
        }
    }
}

pub fn make_scheduler_by_name(name: &str, config: &SchedulerConfig) -> Result<SamplingStrategy> {
    Ok(make_scheduler(name.parse()?, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SD15_SCHEDULER_JSON: &str = r#"{
        "_class_name": "PNDMScheduler",
        "_diffusers_version": "0.6.0",
        "beta_end": 0.012,
        "beta_schedule": "scaled_linear",
        "beta_start": 0.00085,
        "num_train_timesteps": 1000,
        "set_alpha_to_one": false,
        "skip_prk_steps": true,
        "steps_offset": 1,
        "trained_betas": null,
        "clip_sample": false
    }"#;

    #[test]
    fn names_round_trip() {
        let names = [
            "PNDM",
            "KLMS",
            "DDIM",
            "K_EULER",
            "K_EULER_ANCESTRAL",
            "DPMSolverMultistep",
        ];
        for (name, kind) in names.iter().zip(SchedulerKind::ALL) {
            assert_eq!(name.parse::<SchedulerKind>().unwrap(), kind);
            assert_eq!(kind.to_string(), *name);
        }
        assert_eq!(SchedulerKind::default().to_string(), "K_EULER_ANCESTRAL");
    }

    #[test]
    fn unknown_name_is_an_error() {
        for name in ["", "k_euler", "EULER", "LMS"] {
            match name.parse::<SchedulerKind>() {
                Err(Error::UnknownScheduler(got)) => assert_eq!(got, name),
                other => panic!("expected UnknownScheduler for {name:?}, got {other:?}"),
            }
        }
        assert!(make_scheduler_by_name("nope", &SchedulerConfig::default()).is_err());
    }

    #[test]
    fn every_kind_builds_a_distinct_strategy() {
        let base = SchedulerConfig {
            beta_start: 0.001,
            prediction_type: PredictionType::VPrediction,
            ..Default::default()
        };
        for kind in SchedulerKind::ALL {
            let strategy = make_scheduler(kind, &base);
            assert_eq!(strategy.kind(), kind);
            assert_ne!(strategy.config(), &base);
            assert_eq!(strategy.config().class_name.as_deref(), Some(kind.class_name()));
            assert_eq!(strategy.config().beta_start, 0.001);
            assert_eq!(strategy.config().prediction_type, PredictionType::VPrediction);
        }
        assert!(base.class_name.is_none());
    }

    #[test]
    fn variant_parameters_follow_the_base_config() {
        let base = SchedulerConfig {
            clip_sample: true,
            skip_prk_steps: false,
            ..Default::default()
        };
        match make_scheduler(SchedulerKind::Ddim, &base) {
            SamplingStrategy::Ddim(ddim) => {
                assert!(ddim.clip_sample);
                assert_eq!(ddim.eta, 0.0);
            }
            other => panic!("unexpected strategy {other}"),
        }
        match make_scheduler(SchedulerKind::Pndm, &base) {
            SamplingStrategy::Pndm(pndm) => assert!(!pndm.skip_prk_steps),
            other => panic!("unexpected strategy {other}"),
        }
        match make_scheduler(SchedulerKind::DpmSolverMultistep, &base) {
            SamplingStrategy::DpmSolverMultistep(dpm) => {
                assert_eq!(dpm.solver_order, 2);
                assert_eq!(dpm.algorithm, DpmSolverAlgorithm::DpmSolverPlusPlus);
            }
            other => panic!("unexpected strategy {other}"),
        }
    }

    #[test]
    fn parses_repository_scheduler_config() {
        let config = SchedulerConfig::from_json(SD15_SCHEDULER_JSON).unwrap();
        assert_eq!(config.class_name.as_deref(), Some("PNDMScheduler"));
        assert_eq!(config.num_train_timesteps, 1000);
        assert_eq!(config.beta_schedule, BetaSchedule::ScaledLinear);
        assert_eq!(config.prediction_type, PredictionType::Epsilon);
        assert_eq!(config.timestep_spacing, TimestepSpacing::Leading);
        assert!(config.skip_prk_steps);
    }

    #[test]
    fn v_prediction_config_parses() {
        let config = SchedulerConfig::from_json(
            r#"{"prediction_type": "v_prediction", "beta_schedule": "squaredcos_cap_v2"}"#,
        )
        .unwrap();
        assert_eq!(config.prediction_type, PredictionType::VPrediction);
        assert_eq!(config.beta_schedule, BetaSchedule::SquaredcosCapV2);
        assert_eq!(config.beta_end, 0.012);
    }
}
