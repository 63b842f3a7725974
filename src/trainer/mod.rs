//! # Training Loop
//!
//! [`Trainer`] drives one agent against one environment:
//!
//! 1. reset the environment (through a [`ProtocolGuard`])
//! 2. act, step, store the transition, and every `learn_every` steps run
//!    `gradient_steps` learn calls
//! 3. stop the episode on termination, truncation or `max_steps_per_episode`
//! 4. emit an [`EpisodeRecord`] and decay exploration
//!
//! The trainer moves `Idle -> Running -> Terminal`. A fatal error moves it to
//! `Aborted` and is returned to the caller; records already emitted stay with
//! the sink. A [`StopHandle`] can end the run from another thread between
//! steps. An episode cut short this way is still counted and recorded, with
//! [`EpisodeRecord::interrupted`] set.

pub mod metrics;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::Array1;
use tracing::{debug, info, warn};

use crate::agent::{Agent, LearnOutcome};
use crate::checkpoint::Checkpoint;
use crate::config::TrainingConfig;
use crate::env::{Environment, ProtocolGuard};
use crate::error::{Result, RlError};
use crate::exploration::{DecayCadence, ExplorationSchedule};
use crate::replay_buffer::Transition;

pub use metrics::{EpisodeRecord, JsonLinesSink, LogSink, MemorySink, MetricsSink};

#[derive(Clone, Debug, PartialEq)]
pub enum TrainerState {
    Idle,
    Running { episode: usize },
    /// `max_episodes` reached or stopped through the handle
    Terminal,
    Aborted { reason: String },
}

/// Cooperative cancellation flag shared with other threads
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        StopHandle::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Totals of a finished `run`. `episodes` includes an interrupted last episode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainingSummary {
    pub episodes: usize,
    pub total_steps: usize,
    pub stopped: bool,
}

pub struct Trainer<E: Environment, G> {
    env: ProtocolGuard<E>,
    agent: G,
    config: TrainingConfig,
    schedule: ExplorationSchedule,
    state: TrainerState,
    total_steps: usize,
    episodes: usize,
    stop: StopHandle,
}

impl<E, G> Trainer<E, G>
where
    E: Environment,
    G: Agent<Action = E::Action>,
{
    pub fn new(env: E, mut agent: G, config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        let schedule = ExplorationSchedule::new(config.exploration)?;
        agent.set_exploration(schedule.value());
        Ok(Trainer {
            env: ProtocolGuard::new(env),
            agent,
            config,
            schedule,
            state: TrainerState::Idle,
            total_steps: 0,
            episodes: 0,
            stop: StopHandle::new(),
        })
    }

    /// Share an existing handle, e.g. one also held by the environment.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    pub fn agent(&self) -> &G {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut G {
        &mut self.agent
    }

    pub fn env(&self) -> &E {
        self.env.inner()
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn episodes_completed(&self) -> usize {
        self.episodes
    }

    pub fn into_agent(self) -> G {
        self.agent
    }

    /// Train until `max_episodes` episodes have completed or the stop handle fires.
    pub fn run(&mut self, sink: &mut dyn MetricsSink) -> Result<TrainingSummary> {
        self.train_episodes(self.config.max_episodes.saturating_sub(self.episodes), sink)
    }

    /// Train for at most `count` more episodes, never beyond `max_episodes`.
    pub fn train_episodes(&mut self, count: usize, sink: &mut dyn MetricsSink) -> Result<TrainingSummary> {
        if let TrainerState::Aborted { reason } = &self.state {
            return Err(RlError::invalid_parameter(
                "trainer".to_string(),
                format!("run was aborted: {}", reason),
            ));
        }

        let last = (self.episodes + count).min(self.config.max_episodes);
        while self.episodes < last && !self.stop.is_stopped() {
            self.state = TrainerState::Running { episode: self.episodes };
            let outcome = self.run_episode().and_then(|record| sink.record(&record));
            if let Err(e) = outcome {
                warn!(episode = self.episodes, error = %e, "training aborted");
                self.state = TrainerState::Aborted { reason: e.to_string() };
                return Err(e);
            }
        }

        let stopped = self.stop.is_stopped();
        self.state = if stopped || self.episodes >= self.config.max_episodes {
            TrainerState::Terminal
        } else {
            TrainerState::Idle
        };
        if stopped {
            info!(episodes = self.episodes, steps = self.total_steps, "training stopped");
        }
        Ok(TrainingSummary {
            episodes: self.episodes,
            total_steps: self.total_steps,
            stopped,
        })
    }

    fn run_episode(&mut self) -> Result<EpisodeRecord> {
        let episode = self.episodes;
        let exploration = self.agent.exploration();
        let mut observation = self.env.reset()?;
        let mut total_reward = 0.0;
        let mut steps = 0;
        let mut loss = None;
        let mut ended = false;

        while steps < self.config.max_steps_per_episode && !self.stop.is_stopped() {
            let action = if self.total_steps < self.config.warmup_steps {
                self.agent.random_action()
            } else {
                self.agent.select_action(observation.view(), true)?
            };

            let step = self.env.step(&action)?;
            let next_observation = step.observation.clone();
            self.agent.observe(Transition::new(
                observation,
                action,
                step.reward,
                next_observation.clone(),
                step.done,
            ))?;

            self.total_steps += 1;
            steps += 1;
            total_reward += step.reward;

            if self.total_steps % self.config.learn_every == 0 {
                for _ in 0..self.config.gradient_steps {
                    if let LearnOutcome::Updated(report) = self.agent.learn()? {
                        loss = Some(report.loss);
                    }
                }
            }

            if self.schedule.cadence() == DecayCadence::PerStep {
                self.decay_exploration();
            }

            observation = next_observation;
            if step.is_last() {
                ended = true;
                break;
            }
        }
        let interrupted = !ended && steps < self.config.max_steps_per_episode;

        self.episodes += 1;
        if self.schedule.cadence() == DecayCadence::PerEpisode {
            self.decay_exploration();
        }

        let record = EpisodeRecord {
            episode,
            total_reward,
            steps,
            exploration,
            loss,
            interrupted,
        };
        debug!(
            episode,
            reward = total_reward,
            steps,
            exploration,
            interrupted,
            "episode complete"
        );
        Ok(record)
    }

    fn decay_exploration(&mut self) {
        let value = self.schedule.advance();
        self.agent.set_exploration(value);
    }

    /// Run `episodes` greedy episodes without storing transitions or learning.
    ///
    /// Returns the total reward of each episode.
    pub fn evaluate(&mut self, episodes: usize) -> Result<Vec<f32>> {
        let mut returns = Vec::with_capacity(episodes);
        for _ in 0..episodes {
            let mut observation: Array1<f32> = self.env.reset()?;
            let mut total_reward = 0.0;
            for _ in 0..self.config.max_steps_per_episode {
                let action = self.agent.select_action(observation.view(), false)?;
                let step = self.env.step(&action)?;
                total_reward += step.reward;
                if step.is_last() {
                    break;
                }
                observation = step.observation;
            }
            returns.push(total_reward);
        }
        Ok(returns)
    }

    /// Agent snapshot with the trainer's counters
    pub fn checkpoint(&self) -> Checkpoint {
        let mut checkpoint = self.agent.checkpoint();
        checkpoint.step = self.total_steps;
        checkpoint.episode = self.episodes;
        checkpoint
    }

    /// Resume from a snapshot taken with [`Trainer::checkpoint`].
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.agent.restore(checkpoint)?;
        self.total_steps = checkpoint.step;
        self.episodes = checkpoint.episode;
        self.schedule.resume_at(checkpoint.exploration);
        self.agent.set_exploration(self.schedule.value());
        self.state = TrainerState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::DqnAgentBuilder;
    use crate::env::{LineWorld, Space, Step};

    fn config() -> TrainingConfig {
        TrainingConfig {
            max_episodes: 3,
            max_steps_per_episode: 10,
            batch_size: 4,
            replay_capacity: 100,
            hidden_sizes: vec![8],
            ..TrainingConfig::default()
        }
    }

    fn trainer() -> Trainer<LineWorld, crate::agent::DqnAgent> {
        let agent = DqnAgentBuilder::new(5, 2).hidden_sizes(&[8]).batch_size(4).seed(3).build().unwrap();
        Trainer::new(LineWorld::new(), agent, config()).unwrap()
    }

    #[test]
    fn test_run_reaches_terminal() {
        let mut trainer = trainer();
        assert_eq!(trainer.state(), &TrainerState::Idle);
        let mut sink = MemorySink::new();
        let summary = trainer.run(&mut sink).unwrap();

        assert_eq!(summary.episodes, 3);
        assert!(!summary.stopped);
        assert_eq!(trainer.state(), &TrainerState::Terminal);
        assert_eq!(sink.len(), 3);
        assert!(sink.records().iter().all(|r| r.steps <= 10));
        assert_eq!(summary.total_steps, sink.records().iter().map(|r| r.steps).sum::<usize>());
    }

    #[test]
    fn test_exploration_decays_per_episode() {
        let mut trainer = trainer();
        let mut sink = MemorySink::new();
        trainer.run(&mut sink).unwrap();
        let values: Vec<f32> = sink.records().iter().map(|r| r.exploration).collect();
        assert_eq!(values[0], 1.0);
        assert!(values.windows(2).all(|w| w[1] <= w[0]));
        assert!(trainer.agent().exploration() < 1.0);
    }

    #[test]
    fn test_stop_before_run() {
        let mut trainer = trainer();
        trainer.stop_handle().stop();
        let mut sink = MemorySink::new();
        let summary = trainer.run(&mut sink).unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.episodes, 0);
        assert!(sink.is_empty());
        assert_eq!(trainer.state(), &TrainerState::Terminal);
    }

    /// Never terminates; fires the stop handle on its `stop_at`-th step
    struct StoppingEnv {
        stop: StopHandle,
        stop_at: usize,
        steps: usize,
    }

    impl Environment for StoppingEnv {
        type Action = usize;

        fn observation_space(&self) -> Space {
            Space::Continuous { dim: 5, low: 0.0, high: 1.0 }
        }

        fn action_space(&self) -> Space {
            Space::Discrete { n: 2 }
        }

        fn reset(&mut self) -> Result<Array1<f32>> {
            Ok(Array1::zeros(5))
        }

        fn step(&mut self, _action: &usize) -> Result<Step> {
            self.steps += 1;
            if self.steps == self.stop_at {
                self.stop.stop();
            }
            Ok(Step {
                observation: Array1::zeros(5),
                reward: 1.0,
                done: false,
                truncated: false,
                info: serde_json::Value::Null,
            })
        }
    }

    #[test]
    fn test_stop_mid_episode_marks_record_interrupted() {
        let stop = StopHandle::new();
        let env = StoppingEnv { stop: stop.clone(), stop_at: 13, steps: 0 };
        let agent = DqnAgentBuilder::new(5, 2).hidden_sizes(&[8]).batch_size(4).seed(3).build().unwrap();
        let mut trainer = Trainer::new(env, agent, config()).unwrap().with_stop_handle(stop);
        let mut sink = MemorySink::new();
        let summary = trainer.run(&mut sink).unwrap();

        assert!(summary.stopped);
        assert_eq!(summary.episodes, 2);
        assert_eq!(summary.total_steps, 13);
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(!records[0].interrupted);
        assert_eq!(records[0].steps, 10);
        assert!(records[1].interrupted);
        assert_eq!(records[1].steps, 3);
    }

    #[test]
    fn test_completed_episodes_are_not_interrupted() {
        let mut trainer = trainer();
        let mut sink = MemorySink::new();
        trainer.run(&mut sink).unwrap();
        assert!(sink.records().iter().all(|r| !r.interrupted));
    }
}
