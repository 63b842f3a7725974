//! # Training Configuration
//!
//! [`TrainingConfig`] gathers every recognized option of a training run. It
//! round-trips through JSON and builds agents sized for an environment.
//!
//! ```rust
//! use cares_rl::config::TrainingConfig;
//!
//! let config: TrainingConfig = serde_json::from_str(r#"{ "gamma": 0.9, "batch_size": 16 }"#).unwrap();
//! assert_eq!(config.batch_size, 16);
//! assert_eq!(config.replay_capacity, TrainingConfig::default().replay_capacity);
//! config.validate().unwrap();
//! ```

use std::fs;
use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::agent::{DdpgAgentBuilder, DqnAgentBuilder, TargetSync, Td3AgentBuilder};
use crate::env::Space;
use crate::error::{Result, RlError};
use crate::exploration::ExplorationConfig;
use crate::loss::LossKind;
use crate::network::Architecture;
use crate::replay_buffer::PriorityConfig;

/// Options of one training run. Missing JSON fields take their default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Q-network or critic learning rate
    pub learning_rate: f32,
    /// Actor learning rate for actor-critic agents
    pub actor_learning_rate: f32,
    /// Discount factor in [0, 1)
    pub gamma: f32,
    pub replay_capacity: usize,
    pub batch_size: usize,
    pub hidden_sizes: Vec<usize>,
    pub architecture: Architecture,
    pub double_dqn: bool,
    pub loss: LossKind,
    /// Prioritized replay when set, uniform otherwise
    pub prioritized_replay: Option<PriorityConfig>,
    pub exploration: ExplorationConfig,
    /// Overrides the agent family's default: hard every 100 learn calls for
    /// DQN, soft with tau 0.005 for DDPG and TD3
    pub target_sync: Option<TargetSync>,
    /// TD3 learn calls per actor and target update
    pub policy_delay: usize,
    pub max_episodes: usize,
    pub max_steps_per_episode: usize,
    /// Environment steps between learning phases
    pub learn_every: usize,
    /// Learn calls per learning phase
    pub gradient_steps: usize,
    /// Global steps acting uniformly at random before the policy is used
    pub warmup_steps: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            learning_rate: 1e-3,
            actor_learning_rate: 1e-4,
            gamma: 0.99,
            replay_capacity: 10_000,
            batch_size: 32,
            hidden_sizes: vec![64, 64],
            architecture: Architecture::Plain,
            double_dqn: false,
            loss: LossKind::Mse,
            prioritized_replay: None,
            exploration: ExplorationConfig::default(),
            target_sync: None,
            policy_delay: 2,
            max_episodes: 500,
            max_steps_per_episode: 1_000,
            learn_every: 1,
            gradient_steps: 1,
            warmup_steps: 0,
            seed: 0,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(RlError::invalid_parameter("learning_rate", "must be positive"));
        }
        if !(self.actor_learning_rate > 0.0 && self.actor_learning_rate.is_finite()) {
            return Err(RlError::invalid_parameter("actor_learning_rate", "must be positive"));
        }
        if !(self.gamma >= 0.0 && self.gamma < 1.0) {
            return Err(RlError::invalid_parameter("gamma", "must lie in [0, 1)"));
        }
        if self.replay_capacity == 0 {
            return Err(RlError::invalid_parameter("replay_capacity", "must be greater than 0"));
        }
        if self.batch_size == 0 || self.batch_size > self.replay_capacity {
            return Err(RlError::invalid_parameter("batch_size", "must be in 1..=replay_capacity"));
        }
        if self.max_episodes == 0 {
            return Err(RlError::invalid_parameter("max_episodes", "must be greater than 0"));
        }
        if self.max_steps_per_episode == 0 {
            return Err(RlError::invalid_parameter("max_steps_per_episode", "must be greater than 0"));
        }
        if self.learn_every == 0 {
            return Err(RlError::invalid_parameter("learn_every", "must be greater than 0"));
        }
        if self.policy_delay == 0 {
            return Err(RlError::invalid_parameter("policy_delay", "must be greater than 0"));
        }
        self.exploration.validate()?;
        match self.target_sync {
            Some(sync) => sync.validate(),
            None => Ok(()),
        }
    }

    /// Load a configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let config: TrainingConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    /// DQN builder sized for the given spaces with this configuration applied
    pub fn dqn_builder(&self, observation_space: &Space, action_space: &Space) -> Result<DqnAgentBuilder> {
        let mut builder = DqnAgentBuilder::for_spaces(observation_space, action_space)?
            .hidden_sizes(&self.hidden_sizes)
            .architecture(self.architecture)
            .learning_rate(self.learning_rate)
            .gamma(self.gamma)
            .epsilon(self.exploration.initial)
            .batch_size(self.batch_size)
            .replay_capacity(self.replay_capacity)
            .loss(self.loss)
            .use_double_dqn(self.double_dqn)
            .seed(self.seed);
        if let Some(sync) = self.target_sync {
            builder = builder.target_sync(sync);
        }
        if let Some(priority) = self.prioritized_replay {
            builder = builder.prioritized(priority);
        }
        Ok(builder)
    }

    /// DDPG builder sized for the given spaces with this configuration applied
    pub fn ddpg_builder(&self, observation_space: &Space, action_space: &Space) -> Result<DdpgAgentBuilder> {
        let mut builder = DdpgAgentBuilder::for_spaces(observation_space, action_space)?
            .hidden_sizes(&self.hidden_sizes)
            .critic_lr(self.learning_rate)
            .actor_lr(self.actor_learning_rate)
            .gamma(self.gamma)
            .noise_scale(self.exploration.initial)
            .batch_size(self.batch_size)
            .replay_capacity(self.replay_capacity)
            .loss(self.loss)
            .seed(self.seed);
        if let Some(sync) = self.target_sync {
            builder = builder.target_sync(sync);
        }
        if let Some(priority) = self.prioritized_replay {
            builder = builder.prioritized(priority);
        }
        Ok(builder)
    }

    /// TD3 builder sized for the given spaces with this configuration applied
    pub fn td3_builder(&self, observation_space: &Space, action_space: &Space) -> Result<Td3AgentBuilder> {
        let mut builder = Td3AgentBuilder::for_spaces(observation_space, action_space)?
            .hidden_sizes(&self.hidden_sizes)
            .critic_lr(self.learning_rate)
            .actor_lr(self.actor_learning_rate)
            .gamma(self.gamma)
            .noise_scale(self.exploration.initial)
            .policy_delay(self.policy_delay)
            .batch_size(self.batch_size)
            .replay_capacity(self.replay_capacity)
            .loss(self.loss)
            .seed(self.seed);
        if let Some(sync) = self.target_sync {
            builder = builder.target_sync(sync);
        }
        if let Some(priority) = self.prioritized_replay {
            builder = builder.prioritized(priority);
        }
        Ok(builder)
    }
}
