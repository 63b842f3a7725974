//! # Reinforcement Learning Agents Module
//!
//! Every agent implements [`Agent`]: it selects actions, stores observed
//! transitions in the replay memory it owns, and runs learning steps on
//! sampled mini-batches.
//!
//! ## Available Agents
//!
//! - **DqnAgent**: Deep Q-Network for discrete actions
//!   - Plain or dueling Q-network
//!   - Optional Double DQN targets
//!   - Epsilon-greedy exploration
//!   - Periodic hard target sync by default
//! - **DdpgAgent**: Deep Deterministic Policy Gradient for continuous actions
//!   - Tanh actor scaled to the action bounds
//!   - Gaussian exploration noise
//!   - Soft target sync every learn call by default
//! - **Td3Agent**: Twin Delayed DDPG
//!   - Twin critics with clipped double-Q targets
//!   - Clipped smoothing noise on target actions
//!   - Actor and target updates every `policy_delay` learn calls
//!
//! ## Learning Outcomes
//!
//! `learn()` returns [`LearnOutcome::Skipped`] while the replay memory holds
//! fewer transitions than one batch. Training loops must treat this warm-up
//! sentinel as a no-op.
//!
//! ## Example Usage
//!
//! ```rust
//! use cares_rl::agent::{Agent, DqnAgentBuilder, LearnOutcome};
//! use cares_rl::replay_buffer::Transition;
//! use ndarray::array;
//!
//! let mut agent = DqnAgentBuilder::new(2, 2)
//!     .hidden_sizes(&[8])
//!     .batch_size(2)
//!     .seed(7)
//!     .build()
//!     .unwrap();
//!
//! assert!(matches!(agent.learn().unwrap(), LearnOutcome::Skipped));
//!
//! let action = agent.select_action(array![0.0, 1.0].view(), true).unwrap();
//! agent.observe(Transition::new(array![0.0, 1.0], action, 1.0, array![1.0, 0.0], true)).unwrap();
//! ```

pub mod ddpg;
pub mod dqn;
pub mod td3;

use ndarray::ArrayView1;
use serde::{Serialize, Deserialize};

use crate::checkpoint::Checkpoint;
use crate::error::{Result, RlError};
use crate::replay_buffer::Transition;

pub use ddpg::{ActionBounds, DdpgAgent, DdpgAgentBuilder};
pub use dqn::{DqnAgent, DqnAgentBuilder};
pub use td3::{Td3Agent, Td3AgentBuilder};

/// Losses of one update
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LossReport {
    /// Q-network or critic loss
    pub loss: f32,
    /// Actor loss, for actor-critic agents
    pub actor_loss: Option<f32>,
}

/// Result of a learn call
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LearnOutcome {
    /// Not enough stored transitions for a batch yet
    Skipped,
    Updated(LossReport),
}

impl LearnOutcome {
    pub fn loss(&self) -> Option<f32> {
        match self {
            LearnOutcome::Skipped => None,
            LearnOutcome::Updated(report) => Some(report.loss),
        }
    }
}

/// How target networks follow their live networks
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum TargetSync {
    /// Exact copy every `period` learn calls
    Hard { period: usize },
    /// Polyak averaging with `tau` after every learn call
    Soft { tau: f32 },
}

impl TargetSync {
    pub fn validate(&self) -> Result<()> {
        match *self {
            TargetSync::Hard { period } if period == 0 => {
                Err(RlError::invalid_parameter("target_sync.period", "must be greater than 0"))
            }
            TargetSync::Soft { tau } if !(tau > 0.0 && tau <= 1.0) => {
                Err(RlError::invalid_parameter("target_sync.tau", "must lie in (0, 1]"))
            }
            _ => Ok(()),
        }
    }

    /// Whether targets are synchronized after the `learn_calls`-th update
    pub fn is_due(&self, learn_calls: usize) -> bool {
        match *self {
            TargetSync::Hard { period } => period > 0 && learn_calls % period == 0,
            TargetSync::Soft { .. } => true,
        }
    }
}

/// Contract shared by every agent
pub trait Agent {
    type Action: Clone;

    /// Choose an action for `observation`.
    ///
    /// With `explore == false` the choice is greedy and consumes no randomness.
    fn select_action(&mut self, observation: ArrayView1<f32>, explore: bool) -> Result<Self::Action>;

    /// Uniformly random valid action, used during warm-up
    fn random_action(&mut self) -> Self::Action;

    /// Validate a transition and store it in replay memory.
    fn observe(&mut self, transition: Transition<Self::Action>) -> Result<()>;

    /// One learning step on a sampled mini-batch.
    fn learn(&mut self) -> Result<LearnOutcome>;

    fn exploration(&self) -> f32;

    fn set_exploration(&mut self, value: f32);

    fn learn_calls(&self) -> usize;

    /// Snapshot of networks, exploration and learn counter
    fn checkpoint(&self) -> Checkpoint;

    /// Restore state captured by [`Agent::checkpoint`].
    ///
    /// Every network is validated before any is overwritten.
    fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()>;
}

pub(crate) fn check_observation(observation: &ArrayView1<f32>, expected: usize) -> Result<()> {
    if observation.len() != expected {
        return Err(RlError::shape_mismatch(
            format!("observation of length {}", expected),
            format!("observation of length {}", observation.len()),
        ));
    }
    Ok(())
}

pub(crate) fn check_finite_loss(loss: f32, what: &str) -> Result<()> {
    if !loss.is_finite() {
        return Err(RlError::NumericInstability(format!("{} is {}", what, loss)));
    }
    Ok(())
}
