use ndarray::Array1;

use crate::error::{Result, RlError};
use super::{Environment, Space, Step};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    NeedsReset,
    Running,
    Ended,
}

/// Enforces the reset/step contract of the wrapped environment.
///
/// Violations reported as `EnvironmentProtocol`:
/// - `step` before the first `reset`
/// - `step` after an episode ended without a new `reset`
/// - observations whose width differs from the observation space
/// - non-finite observations or rewards
#[derive(Clone, Debug)]
pub struct ProtocolGuard<E> {
    inner: E,
    phase: Phase,
    observation_dim: usize,
    episode_steps: usize,
}

impl<E: Environment> ProtocolGuard<E> {
    pub fn new(inner: E) -> Self {
        let observation_dim = inner.observation_space().flat_dim();
        ProtocolGuard {
            inner,
            phase: Phase::NeedsReset,
            observation_dim,
            episode_steps: 0,
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn into_inner(self) -> E {
        self.inner
    }

    /// Steps taken in the current episode
    pub fn episode_steps(&self) -> usize {
        self.episode_steps
    }

    pub fn episode_running(&self) -> bool {
        self.phase == Phase::Running
    }

    fn check_observation(&self, observation: &Array1<f32>) -> Result<()> {
        if observation.len() != self.observation_dim {
            return Err(RlError::EnvironmentProtocol(format!(
                "observation width {} does not match observation space width {}",
                observation.len(),
                self.observation_dim
            )));
        }
        if observation.iter().any(|v| !v.is_finite()) {
            return Err(RlError::EnvironmentProtocol("non-finite observation".to_string()));
        }
        Ok(())
    }
}

impl<E: Environment> Environment for ProtocolGuard<E> {
    type Action = E::Action;

    fn observation_space(&self) -> Space {
        self.inner.observation_space()
    }

    fn action_space(&self) -> Space {
        self.inner.action_space()
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        self.phase = Phase::NeedsReset;
        let observation = self.inner.reset()?;
        self.check_observation(&observation)?;
        self.phase = Phase::Running;
        self.episode_steps = 0;
        Ok(observation)
    }

    fn step(&mut self, action: &E::Action) -> Result<Step> {
        match self.phase {
            Phase::NeedsReset => {
                return Err(RlError::EnvironmentProtocol("step called before reset".to_string()));
            }
            Phase::Ended => {
                return Err(RlError::EnvironmentProtocol(
                    "step called after the episode ended without reset".to_string(),
                ));
            }
            Phase::Running => {}
        }

        let step = self.inner.step(action)?;
        self.check_observation(&step.observation)?;
        if !step.reward.is_finite() {
            return Err(RlError::EnvironmentProtocol(format!("non-finite reward {}", step.reward)));
        }

        self.episode_steps += 1;
        if step.is_last() {
            self.phase = Phase::Ended;
        }
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LineWorld;

    #[test]
    fn test_step_before_reset() {
        let mut env = ProtocolGuard::new(LineWorld::new());
        let err = env.step(&1).unwrap_err();
        assert!(matches!(err, RlError::EnvironmentProtocol(_)));
    }

    #[test]
    fn test_step_after_done() {
        let mut env = ProtocolGuard::new(LineWorld::new());
        env.reset().unwrap();
        let mut last = env.step(&1).unwrap();
        while !last.is_last() {
            last = env.step(&1).unwrap();
        }
        assert!(last.done);
        assert!(!env.episode_running());
        assert!(matches!(env.step(&1), Err(RlError::EnvironmentProtocol(_))));

        env.reset().unwrap();
        assert!(env.step(&0).is_ok());
        assert_eq!(env.episode_steps(), 1);
    }
}
