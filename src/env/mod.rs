//! # Environments
//!
//! The interaction protocol agents are trained against: `reset` starts an
//! episode and returns the first observation, `step` advances it until the
//! episode ends by termination (`done`) or truncation (`truncated`).
//!
//! [`ProtocolGuard`] wraps any environment and turns contract violations into
//! [`RlError::EnvironmentProtocol`](crate::error::RlError::EnvironmentProtocol).
//! [`LineWorld`] and [`PointMass`] are small deterministic environments for
//! tests and demos.

pub mod guard;
pub mod toy;

use std::fmt::Debug;

use ndarray::Array1;
use serde::{Serialize, Deserialize};

use crate::error::Result;

pub use guard::ProtocolGuard;
pub use toy::{LineWorld, PointMass};

/// Shape of observations or actions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Space {
    /// `n` discrete choices, indexed `0..n`
    Discrete { n: usize },
    /// `dim` real values, each within `[low, high]`
    Continuous { dim: usize, low: f32, high: f32 },
}

impl Space {
    /// Width of a flat vector encoding one element (one-hot for discrete spaces)
    pub fn flat_dim(&self) -> usize {
        match self {
            Space::Discrete { n } => *n,
            Space::Continuous { dim, .. } => *dim,
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, Space::Discrete { .. })
    }
}

/// Outcome of one environment step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub observation: Array1<f32>,
    pub reward: f32,
    /// Episode reached a terminal state
    pub done: bool,
    /// Episode was cut short without reaching a terminal state
    pub truncated: bool,
    /// Free-form diagnostics
    pub info: serde_json::Value,
}

impl Step {
    pub fn is_last(&self) -> bool {
        self.done || self.truncated
    }
}

/// An episodic environment
pub trait Environment {
    type Action: Clone + Debug;

    fn observation_space(&self) -> Space;

    fn action_space(&self) -> Space;

    /// Start a new episode and return its first observation.
    fn reset(&mut self) -> Result<Array1<f32>>;

    fn step(&mut self, action: &Self::Action) -> Result<Step>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_dim() {
        assert_eq!(Space::Discrete { n: 3 }.flat_dim(), 3);
        assert_eq!(Space::Continuous { dim: 2, low: -1.0, high: 1.0 }.flat_dim(), 2);
        assert!(Space::Discrete { n: 3 }.is_discrete());
    }
}
