//! # Exploration Schedules
//!
//! The exploration value is epsilon for epsilon-greedy agents and the noise
//! scale for agents with Gaussian action noise. It starts at `initial` and
//! decays monotonically toward `floor`, never going below it.
//!
//! ```rust
//! use cares_rl::exploration::{Decay, ExplorationConfig, ExplorationSchedule};
//!
//! let config = ExplorationConfig {
//!     initial: 1.0,
//!     floor: 0.1,
//!     decay: Decay::Linear { step: 0.5 },
//!     ..ExplorationConfig::default()
//! };
//! let mut schedule = ExplorationSchedule::new(config).unwrap();
//! assert_eq!(schedule.advance(), 0.5);
//! assert_eq!(schedule.advance(), 0.1);
//! assert_eq!(schedule.advance(), 0.1);
//! ```

use serde::{Serialize, Deserialize};

use crate::error::{Result, RlError};

/// How each decay step shrinks the exploration value
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Decay {
    /// `value - step`
    Linear { step: f32 },
    /// `value * factor`, with `factor` in (0, 1]
    Exponential { factor: f32 },
}

/// When the trainer applies a decay step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DecayCadence {
    #[default]
    PerEpisode,
    PerStep,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExplorationConfig {
    pub initial: f32,
    pub floor: f32,
    pub decay: Decay,
    pub cadence: DecayCadence,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        ExplorationConfig {
            initial: 1.0,
            floor: 0.05,
            decay: Decay::Exponential { factor: 0.995 },
            cadence: DecayCadence::PerEpisode,
        }
    }
}

impl ExplorationConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.floor.is_finite() || self.floor < 0.0 {
            return Err(RlError::invalid_parameter("exploration.floor", "must be finite and non-negative"));
        }
        if !self.initial.is_finite() || self.initial < self.floor {
            return Err(RlError::invalid_parameter("exploration.initial", "must be finite and at least the floor"));
        }
        match self.decay {
            Decay::Linear { step } if !(step >= 0.0 && step.is_finite()) => {
                Err(RlError::invalid_parameter("exploration.decay", "linear step must be finite and non-negative"))
            }
            Decay::Exponential { factor } if !(factor > 0.0 && factor <= 1.0) => {
                Err(RlError::invalid_parameter("exploration.decay", "exponential factor must lie in (0, 1]"))
            }
            _ => Ok(()),
        }
    }
}

/// Running exploration value driven by an [`ExplorationConfig`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExplorationSchedule {
    config: ExplorationConfig,
    value: f32,
    steps: usize,
}

impl ExplorationSchedule {
    pub fn new(config: ExplorationConfig) -> Result<Self> {
        config.validate()?;
        Ok(ExplorationSchedule {
            value: config.initial,
            config,
            steps: 0,
        })
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn floor(&self) -> f32 {
        self.config.floor
    }

    pub fn cadence(&self) -> DecayCadence {
        self.config.cadence
    }

    /// Number of decay steps applied so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Apply one decay step and return the new value.
    pub fn advance(&mut self) -> f32 {
        let next = match self.config.decay {
            Decay::Linear { step } => self.value - step,
            Decay::Exponential { factor } => self.value * factor,
        };
        self.value = next.max(self.config.floor).min(self.value);
        self.steps += 1;
        self.value
    }

    /// Jump to an externally stored value, e.g. after restoring a checkpoint.
    ///
    /// The value is clamped into `[floor, initial]`.
    pub fn resume_at(&mut self, value: f32) {
        self.value = value.max(self.config.floor).min(self.config.initial);
    }

    pub fn reset(&mut self) {
        self.value = self.config.initial;
        self.steps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_decay_hits_floor() {
        let mut schedule = ExplorationSchedule::new(ExplorationConfig {
            initial: 1.0,
            floor: 0.2,
            decay: Decay::Exponential { factor: 0.5 },
            cadence: DecayCadence::PerStep,
        })
        .unwrap();
        assert_eq!(schedule.advance(), 0.5);
        assert_eq!(schedule.advance(), 0.25);
        assert_eq!(schedule.advance(), 0.2);
        assert_eq!(schedule.steps(), 3);
        assert_eq!(schedule.cadence(), DecayCadence::PerStep);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let bad_factor = ExplorationConfig {
            decay: Decay::Exponential { factor: 1.5 },
            ..ExplorationConfig::default()
        };
        assert!(ExplorationSchedule::new(bad_factor).is_err());

        let floor_above_initial = ExplorationConfig {
            initial: 0.1,
            floor: 0.5,
            ..ExplorationConfig::default()
        };
        assert!(ExplorationSchedule::new(floor_above_initial).is_err());
    }

    #[test]
    fn test_resume_and_reset() {
        let mut schedule = ExplorationSchedule::new(ExplorationConfig::default()).unwrap();
        schedule.resume_at(0.0);
        assert_eq!(schedule.value(), schedule.floor());
        schedule.reset();
        assert_eq!(schedule.value(), 1.0);
    }
}
