//! # cares_rl - Composable Reinforcement Learning Training Core
//!
//! cares_rl provides interchangeable agents that learn control policies by
//! interacting with an environment, backed by small neural-network function
//! approximators built on `ndarray`. Every agent shares one interaction
//! protocol, one experience-replay mechanism and one network-update
//! discipline: loss, optimizer step, then target-network synchronization.
//!
//! ## Key Features
//!
//! - **Agents**: DQN (plain or dueling Q-network, optional Double DQN), DDPG and TD3
//! - **Replay**: bounded uniform ring buffer and sum-tree prioritized replay
//! - **Networks**: dense MLPs and dueling networks with SGD or Adam
//! - **Training**: episode loop with warm-up, exploration schedules,
//!   cooperative cancellation and pluggable metrics sinks
//! - **Safety**: shape-checked inputs and atomic, finiteness-checked updates
//! - **Reproducibility**: every source of randomness is a seeded `StdRng`
//!
//! ## Quick Start
//!
//! ```rust
//! use cares_rl::agent::DqnAgentBuilder;
//! use cares_rl::config::TrainingConfig;
//! use cares_rl::env::LineWorld;
//! use cares_rl::trainer::{MemorySink, Trainer};
//!
//! let config = TrainingConfig {
//!     max_episodes: 5,
//!     batch_size: 8,
//!     hidden_sizes: vec![16],
//!     ..TrainingConfig::default()
//! };
//!
//! let env = LineWorld::new();
//! let agent = DqnAgentBuilder::new(5, 2)
//!     .hidden_sizes(&config.hidden_sizes)
//!     .batch_size(config.batch_size)
//!     .seed(config.seed)
//!     .build()
//!     .unwrap();
//!
//! let mut trainer = Trainer::new(env, agent, config).unwrap();
//! let mut sink = MemorySink::new();
//! trainer.run(&mut sink).unwrap();
//! assert_eq!(sink.len(), 5);
//! ```
//!
//! ## Module Organization
//!
//! - [`activations`] - Activation functions (ReLU, Tanh, Linear, ...)
//! - [`agent`] - The `Agent` trait, DQN, DDPG and TD3
//! - [`checkpoint`] - Bincode checkpoints of agent networks and counters
//! - [`config`] - JSON training configuration
//! - [`env`] - Environment trait, spaces, protocol guard and toy environments
//! - [`error`] - Error types and result handling
//! - [`exploration`] - Exploration decay schedules
//! - [`layers`] - Dense layers and weight initialization
//! - [`loss`] - Regression losses
//! - [`network`] - Network trait, MLP, dueling network, parameter sets
//! - [`optimizer`] - SGD, Adam and gradient clipping
//! - [`replay_buffer`] - Experience replay
//! - [`trainer`] - Training loop and metrics sinks

pub mod activations;
pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod env;
pub mod error;
pub mod exploration;
pub mod layers;
pub mod loss;
pub mod network;
pub mod optimizer;
pub mod replay_buffer;
pub mod trainer;

#[cfg(test)]
mod tests;
