use ndarray::{arr1, Array1};
use serde_json::json;

use crate::error::{Result, RlError};
use super::{Environment, Space, Step};

/// One-dimensional corridor.
///
/// The agent starts in cell 0 and moves left (action 0) or right (action 1).
/// Reaching the last cell gives reward 1 and ends the episode; every other
/// step gives 0. Episodes are truncated after `max_steps` steps.
/// Observations are one-hot encodings of the current cell.
#[derive(Clone, Debug)]
pub struct LineWorld {
    cells: usize,
    max_steps: usize,
    position: usize,
    steps: usize,
}

impl LineWorld {
    pub const CELLS: usize = 5;
    pub const MAX_STEPS: usize = 20;

    pub fn new() -> Self {
        LineWorld {
            cells: Self::CELLS,
            max_steps: Self::MAX_STEPS,
            position: 0,
            steps: 0,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn observation(&self) -> Array1<f32> {
        let mut obs = Array1::zeros(self.cells);
        obs[self.position] = 1.0;
        obs
    }
}

impl Default for LineWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for LineWorld {
    type Action = usize;

    fn observation_space(&self) -> Space {
        Space::Continuous { dim: self.cells, low: 0.0, high: 1.0 }
    }

    fn action_space(&self) -> Space {
        Space::Discrete { n: 2 }
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        self.position = 0;
        self.steps = 0;
        Ok(self.observation())
    }

    fn step(&mut self, action: &usize) -> Result<Step> {
        match *action {
            0 => self.position = self.position.saturating_sub(1),
            1 => self.position = (self.position + 1).min(self.cells - 1),
            other => {
                return Err(RlError::InvalidAction { action: other, num_actions: 2 });
            }
        }
        self.steps += 1;

        let done = self.position == self.cells - 1;
        Ok(Step {
            observation: self.observation(),
            reward: if done { 1.0 } else { 0.0 },
            done,
            truncated: !done && self.steps >= self.max_steps,
            info: json!({ "position": self.position, "steps": self.steps }),
        })
    }
}

/// Point mass on a line pushed by a bounded continuous force.
///
/// `x' = clamp(x + 0.1 * a, -2, 2)` with `a` in `[-1, 1]`; the reward is
/// `-|x'|`. There is no terminal state; episodes are truncated after
/// `max_steps` steps.
#[derive(Clone, Debug)]
pub struct PointMass {
    start: f32,
    max_steps: usize,
    position: f32,
    steps: usize,
}

impl PointMass {
    const LIMIT: f32 = 2.0;
    const GAIN: f32 = 0.1;

    pub fn new(start: f32) -> Self {
        let start = start.clamp(-Self::LIMIT, Self::LIMIT);
        PointMass {
            start,
            max_steps: 50,
            position: start,
            steps: 0,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn position(&self) -> f32 {
        self.position
    }
}

impl Default for PointMass {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Environment for PointMass {
    type Action = Array1<f32>;

    fn observation_space(&self) -> Space {
        Space::Continuous { dim: 1, low: -Self::LIMIT, high: Self::LIMIT }
    }

    fn action_space(&self) -> Space {
        Space::Continuous { dim: 1, low: -1.0, high: 1.0 }
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        self.position = self.start;
        self.steps = 0;
        Ok(arr1(&[self.position]))
    }

    fn step(&mut self, action: &Array1<f32>) -> Result<Step> {
        if action.len() != 1 {
            return Err(RlError::shape_mismatch(
                "action of length 1".to_string(),
                format!("action of length {}", action.len()),
            ));
        }
        let force = action[0].clamp(-1.0, 1.0);
        self.position = (self.position + Self::GAIN * force).clamp(-Self::LIMIT, Self::LIMIT);
        self.steps += 1;

        Ok(Step {
            observation: arr1(&[self.position]),
            reward: -self.position.abs(),
            done: false,
            truncated: self.steps >= self.max_steps,
            info: json!({ "position": self.position }),
        })
    }
}
