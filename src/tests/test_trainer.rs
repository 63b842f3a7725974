use ndarray::{Array1, ArrayView1};
use serde_json::json;
use tempfile::tempdir;

use crate::agent::{Agent, DqnAgentBuilder, LearnOutcome, LossReport};
use crate::checkpoint::Checkpoint;
use crate::config::TrainingConfig;
use crate::env::{Environment, LineWorld, Space, Step};
use crate::error::{Result, RlError};
use crate::exploration::{Decay, DecayCadence, ExplorationConfig};
use crate::replay_buffer::Transition;
use crate::trainer::{EpisodeRecord, JsonLinesSink, MemorySink, MetricsSink, StopHandle, Trainer, TrainerState};

/// Always plays the same action and counts every call it receives.
#[derive(Debug, Default)]
struct ScriptedAgent {
    action: usize,
    exploration: f32,
    selects: usize,
    random: usize,
    observed: usize,
    learns: usize,
    fail_on_learn: Option<usize>,
}

impl ScriptedAgent {
    fn right() -> Self {
        ScriptedAgent { action: 1, ..ScriptedAgent::default() }
    }
}

impl Agent for ScriptedAgent {
    type Action = usize;

    fn select_action(&mut self, _observation: ArrayView1<f32>, _explore: bool) -> Result<usize> {
        self.selects += 1;
        Ok(self.action)
    }

    fn random_action(&mut self) -> usize {
        self.random += 1;
        self.action
    }

    fn observe(&mut self, _transition: Transition<usize>) -> Result<()> {
        self.observed += 1;
        Ok(())
    }

    fn learn(&mut self) -> Result<LearnOutcome> {
        self.learns += 1;
        if self.fail_on_learn == Some(self.learns) {
            return Err(RlError::NumericInstability("loss is NaN".to_string()));
        }
        Ok(LearnOutcome::Updated(LossReport { loss: self.learns as f32, actor_loss: None }))
    }

    fn exploration(&self) -> f32 {
        self.exploration
    }

    fn set_exploration(&mut self, value: f32) {
        self.exploration = value;
    }

    fn learn_calls(&self) -> usize {
        self.learns
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            learn_calls: self.learns,
            exploration: self.exploration,
            ..Checkpoint::default()
        }
    }

    fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.learns = checkpoint.learn_calls;
        self.exploration = checkpoint.exploration;
        Ok(())
    }
}

/// Two-step episodes; the fifth step overall returns a malformed observation.
#[derive(Debug, Default)]
struct BrokenEnv {
    total_steps: usize,
    episode_steps: usize,
}

impl Environment for BrokenEnv {
    type Action = usize;

    fn observation_space(&self) -> Space {
        Space::Continuous { dim: 2, low: -1.0, high: 1.0 }
    }

    fn action_space(&self) -> Space {
        Space::Discrete { n: 2 }
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        self.episode_steps = 0;
        Ok(Array1::zeros(2))
    }

    fn step(&mut self, _action: &usize) -> Result<Step> {
        self.total_steps += 1;
        self.episode_steps += 1;
        let width = if self.total_steps == 5 { 3 } else { 2 };
        Ok(Step {
            observation: Array1::zeros(width),
            reward: 0.5,
            done: self.episode_steps == 2,
            truncated: false,
            info: json!(null),
        })
    }
}

struct StoppingSink {
    inner: MemorySink,
    handle: StopHandle,
    after: usize,
}

impl MetricsSink for StoppingSink {
    fn record(&mut self, record: &EpisodeRecord) -> Result<()> {
        self.inner.record(record)?;
        if self.inner.len() == self.after {
            self.handle.stop();
        }
        Ok(())
    }
}

fn config(max_episodes: usize) -> TrainingConfig {
    TrainingConfig {
        max_episodes,
        max_steps_per_episode: 50,
        batch_size: 1,
        replay_capacity: 10,
        hidden_sizes: vec![8],
        ..TrainingConfig::default()
    }
}

#[test]
fn test_episode_ends_on_done() {
    let mut trainer = Trainer::new(LineWorld::new(), ScriptedAgent::right(), config(3)).unwrap();
    let mut sink = MemorySink::new();
    let summary = trainer.run(&mut sink).unwrap();

    assert_eq!(summary.total_steps, 12);
    assert!(sink.records().iter().all(|r| r.steps == 4 && r.total_reward == 1.0));
    assert_eq!(sink.records().iter().map(|r| r.episode).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(trainer.agent().observed, 12);
    assert_eq!(sink.records()[2].loss, Some(12.0));
}

#[test]
fn test_max_steps_per_episode_truncates() {
    // Moving left never reaches the goal
    let agent = ScriptedAgent { action: 0, ..ScriptedAgent::default() };
    let config = TrainingConfig { max_steps_per_episode: 7, ..config(2) };
    let mut trainer = Trainer::new(LineWorld::new(), agent, config).unwrap();
    let mut sink = MemorySink::new();
    trainer.run(&mut sink).unwrap();

    assert!(sink.records().iter().all(|r| r.steps == 7 && r.total_reward == 0.0));
}

#[test]
fn test_protocol_violation_aborts_run() {
    let mut trainer = Trainer::new(BrokenEnv::default(), ScriptedAgent::right(), config(10)).unwrap();
    let mut sink = MemorySink::new();
    let err = trainer.run(&mut sink).unwrap_err();

    assert!(matches!(err, RlError::EnvironmentProtocol(_)));
    assert_eq!(sink.len(), 2);
    assert!(matches!(trainer.state(), TrainerState::Aborted { .. }));
    assert!(trainer.run(&mut sink).is_err());
    assert_eq!(sink.len(), 2);
}

#[test]
fn test_invalid_action_aborts_run() {
    let agent = ScriptedAgent { action: 2, ..ScriptedAgent::default() };
    let mut trainer = Trainer::new(LineWorld::new(), agent, config(2)).unwrap();
    let err = trainer.run(&mut MemorySink::new()).unwrap_err();
    assert!(matches!(err, RlError::InvalidAction { action: 2, num_actions: 2 }));
}

#[test]
fn test_learn_failure_keeps_emitted_records() {
    let agent = ScriptedAgent { fail_on_learn: Some(6), ..ScriptedAgent::right() };
    let mut trainer = Trainer::new(LineWorld::new(), agent, config(5)).unwrap();
    let mut sink = MemorySink::new();
    let err = trainer.run(&mut sink).unwrap_err();

    assert!(matches!(err, RlError::NumericInstability(_)));
    assert_eq!(sink.len(), 1);
    match trainer.state() {
        TrainerState::Aborted { reason } => assert!(reason.contains("NaN")),
        other => panic!("unexpected state {:?}", other),
    }
}

#[test]
fn test_stop_handle_ends_run_between_episodes() {
    let mut trainer = Trainer::new(LineWorld::new(), ScriptedAgent::right(), config(10)).unwrap();
    let mut sink = StoppingSink {
        inner: MemorySink::new(),
        handle: trainer.stop_handle(),
        after: 2,
    };
    let summary = trainer.run(&mut sink).unwrap();

    assert!(summary.stopped);
    assert_eq!(summary.episodes, 2);
    assert_eq!(sink.inner.len(), 2);
    assert_eq!(trainer.state(), &TrainerState::Terminal);
}

#[test]
fn test_warmup_uses_random_actions() {
    let config = TrainingConfig { warmup_steps: 8, ..config(3) };
    let mut trainer = Trainer::new(LineWorld::new(), ScriptedAgent::right(), config).unwrap();
    trainer.run(&mut MemorySink::new()).unwrap();

    let agent = trainer.agent();
    assert_eq!(agent.random, 8);
    assert_eq!(agent.selects, 4);
}

#[test]
fn test_learn_every_and_gradient_steps() {
    let config = TrainingConfig { learn_every: 2, gradient_steps: 3, ..config(3) };
    let mut trainer = Trainer::new(LineWorld::new(), ScriptedAgent::right(), config).unwrap();
    trainer.run(&mut MemorySink::new()).unwrap();

    // 12 steps, a learning phase every 2 steps, 3 learn calls per phase
    assert_eq!(trainer.agent().learns, 18);
}

#[test]
fn test_per_step_decay() {
    let config = TrainingConfig {
        exploration: ExplorationConfig {
            initial: 1.0,
            floor: 0.0,
            decay: Decay::Linear { step: 0.1 },
            cadence: DecayCadence::PerStep,
        },
        ..config(2)
    };
    let mut trainer = Trainer::new(LineWorld::new(), ScriptedAgent::right(), config).unwrap();
    assert_eq!(trainer.agent().exploration(), 1.0);
    let mut sink = MemorySink::new();
    trainer.run(&mut sink).unwrap();

    assert_eq!(sink.records()[0].exploration, 1.0);
    assert!((sink.records()[1].exploration - 0.6).abs() < 1e-5);
    assert!((trainer.agent().exploration() - 0.2).abs() < 1e-5);
}

#[test]
fn test_train_episodes_in_chunks() {
    let mut trainer = Trainer::new(LineWorld::new(), ScriptedAgent::right(), config(5)).unwrap();
    let mut sink = MemorySink::new();

    let summary = trainer.train_episodes(2, &mut sink).unwrap();
    assert_eq!(summary.episodes, 2);
    assert_eq!(trainer.state(), &TrainerState::Idle);

    let summary = trainer.train_episodes(10, &mut sink).unwrap();
    assert_eq!(summary.episodes, 5);
    assert_eq!(sink.len(), 5);
    assert_eq!(trainer.state(), &TrainerState::Terminal);
}

#[test]
fn test_invalid_config_rejected() {
    let config = TrainingConfig { learn_every: 0, ..config(1) };
    assert!(Trainer::new(LineWorld::new(), ScriptedAgent::right(), config).is_err());
}

#[test]
fn test_evaluate_does_not_store_or_learn() {
    let agent = DqnAgentBuilder::new(5, 2).hidden_sizes(&[8]).batch_size(1).seed(21).build().unwrap();
    let mut trainer = Trainer::new(LineWorld::new(), agent, config(2)).unwrap();
    trainer.run(&mut MemorySink::new()).unwrap();

    let stored = trainer.agent().memory().len();
    let learn_calls = trainer.agent().learn_calls();
    let first = trainer.evaluate(2).unwrap();
    let second = trainer.evaluate(2).unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert_eq!(trainer.agent().memory().len(), stored);
    assert_eq!(trainer.agent().learn_calls(), learn_calls);
}

#[test]
fn test_checkpoint_resumes_counters() {
    let mut trainer = Trainer::new(LineWorld::new(), ScriptedAgent::right(), config(3)).unwrap();
    trainer.train_episodes(2, &mut MemorySink::new()).unwrap();
    let checkpoint = trainer.checkpoint();
    assert_eq!(checkpoint.step, 8);
    assert_eq!(checkpoint.episode, 2);
    assert_eq!(checkpoint.learn_calls, 8);

    let mut resumed = Trainer::new(LineWorld::new(), ScriptedAgent::right(), config(3)).unwrap();
    resumed.restore(&checkpoint).unwrap();
    assert_eq!(resumed.total_steps(), 8);
    assert_eq!(resumed.episodes_completed(), 2);
    assert_eq!(resumed.agent().exploration(), checkpoint.exploration);

    let mut sink = MemorySink::new();
    let summary = resumed.run(&mut sink).unwrap();
    assert_eq!(summary.episodes, 3);
    assert_eq!(sink.records()[0].episode, 2);
}

#[test]
fn test_json_lines_sink_receives_every_episode() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("episodes.jsonl");
    {
        let mut sink = JsonLinesSink::create(&path).unwrap();
        let mut trainer = Trainer::new(LineWorld::new(), ScriptedAgent::right(), config(3)).unwrap();
        trainer.run(&mut sink).unwrap();
    }

    let contents = std::fs::read_to_string(&path).unwrap();
    let records: Vec<EpisodeRecord> = contents.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].steps, 4);
}
