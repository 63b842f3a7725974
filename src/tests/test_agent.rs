use ndarray::{array, Array1};
use tempfile::tempdir;

use crate::agent::{Agent, DdpgAgentBuilder, DqnAgent, DqnAgentBuilder, LearnOutcome, TargetSync};
use crate::checkpoint::Checkpoint;
use crate::env::{Environment, PointMass};
use crate::error::RlError;
use crate::network::{Architecture, Network};
use crate::optimizer::OptimizerWrapper;
use crate::replay_buffer::{Memory, PriorityConfig, Transition};

fn dqn(seed: u64) -> DqnAgent {
    DqnAgentBuilder::new(3, 2)
        .hidden_sizes(&[8])
        .optimizer(OptimizerWrapper::sgd())
        .learning_rate(0.01)
        .gamma(0.9)
        .batch_size(1)
        .seed(seed)
        .build()
        .unwrap()
}

fn state() -> Array1<f32> {
    array![0.2, -0.4, 1.0]
}

fn next_state() -> Array1<f32> {
    array![1.0, 0.5, -0.3]
}

#[test]
fn test_learn_skips_until_batch_available() {
    let mut agent = DqnAgentBuilder::new(3, 2).batch_size(4).build().unwrap();
    for i in 0..3 {
        assert_eq!(agent.learn().unwrap(), LearnOutcome::Skipped);
        agent.observe(Transition::new(state(), i % 2, 0.0, next_state(), false)).unwrap();
    }
    assert_eq!(agent.learn_calls(), 0);
    agent.observe(Transition::new(state(), 0, 0.0, next_state(), false)).unwrap();
    assert!(matches!(agent.learn().unwrap(), LearnOutcome::Updated(_)));
    assert_eq!(agent.learn_calls(), 1);
}

#[test]
fn test_terminal_target_is_reward() {
    let mut agent = dqn(1);
    let predicted = agent.q_values(state().view()).unwrap()[1];
    agent.observe(Transition::new(state(), 1, 1.0, next_state(), true)).unwrap();

    let report = match agent.learn().unwrap() {
        LearnOutcome::Updated(report) => report,
        LearnOutcome::Skipped => panic!("expected an update"),
    };
    let expected = (predicted - 1.0) * (predicted - 1.0);
    assert!((report.loss - expected).abs() < 1e-6);
}

#[test]
fn test_non_terminal_target_bootstraps() {
    let mut agent = dqn(2);
    let predicted = agent.q_values(state().view()).unwrap()[0];
    let next_q = agent.target_network().forward_one(next_state().view()).unwrap();
    let next_max = next_q.iter().fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    agent.observe(Transition::new(state(), 0, 0.5, next_state(), false)).unwrap();

    let loss = agent.learn().unwrap().loss().unwrap();
    let target = 0.5 + 0.9 * next_max;
    assert!((loss - (predicted - target).powi(2)).abs() < 1e-6);
}

#[test]
fn test_only_taken_action_moves() {
    let mut agent = DqnAgentBuilder::new(3, 2)
        .hidden_sizes(&[])
        .optimizer(OptimizerWrapper::sgd())
        .batch_size(1)
        .seed(3)
        .build()
        .unwrap();
    let before = agent.q_values(next_state().view()).unwrap();
    agent.observe(Transition::new(state(), 1, 5.0, next_state(), true)).unwrap();
    agent.learn().unwrap();
    let after = agent.q_values(next_state().view()).unwrap();

    // Without hidden layers only the weights and bias of the taken action change
    assert_eq!(before[0], after[0]);
    assert_ne!(before[1], after[1]);
}

#[test]
fn test_nan_reward_aborts_without_touching_parameters() {
    let mut agent = dqn(4);
    agent.observe(Transition::new(state(), 0, f32::NAN, next_state(), false)).unwrap();
    let before = agent.q_network().parameters();

    let err = agent.learn().unwrap_err();
    assert!(matches!(err, RlError::NumericInstability(_)));
    assert!(err.is_fatal());
    assert_eq!(agent.q_network().parameters(), before);
    assert_eq!(agent.learn_calls(), 0);
}

#[test]
fn test_hard_sync_every_period() {
    let mut agent = DqnAgentBuilder::new(3, 2)
        .hidden_sizes(&[8])
        .batch_size(2)
        .target_sync(TargetSync::Hard { period: 3 })
        .seed(5)
        .build()
        .unwrap();
    for i in 0..4 {
        agent.observe(Transition::new(state() * i as f32, i % 2, 1.0, next_state(), false)).unwrap();
    }

    agent.learn().unwrap();
    agent.learn().unwrap();
    assert_ne!(agent.target_network().parameters(), agent.q_network().parameters());
    agent.learn().unwrap();
    assert_eq!(agent.target_network().parameters(), agent.q_network().parameters());
}

#[test]
fn test_soft_sync_trails_live_network() {
    let mut agent = DqnAgentBuilder::new(3, 2)
        .hidden_sizes(&[8])
        .batch_size(2)
        .target_sync(TargetSync::Soft { tau: 0.1 })
        .seed(6)
        .build()
        .unwrap();
    for i in 0..4 {
        agent.observe(Transition::new(state() * i as f32, i % 2, 1.0, next_state(), false)).unwrap();
    }
    let initial = agent.target_network().parameters();
    agent.learn().unwrap();

    let target = agent.target_network().parameters();
    assert_ne!(target, initial);
    assert_ne!(target, agent.q_network().parameters());
}

#[test]
fn test_greedy_selection_is_deterministic_and_draws_no_randomness() {
    let mut a = dqn(7);
    let mut b = dqn(7);
    a.set_exploration(0.5);
    b.set_exploration(0.5);

    let greedy: Vec<usize> = (0..5).map(|_| a.select_action(state().view(), false).unwrap()).collect();
    assert!(greedy.windows(2).all(|w| w[0] == w[1]));

    let explored_a: Vec<usize> = (0..20).map(|_| a.select_action(state().view(), true).unwrap()).collect();
    let explored_b: Vec<usize> = (0..20).map(|_| b.select_action(state().view(), true).unwrap()).collect();
    assert_eq!(explored_a, explored_b);
}

#[test]
fn test_full_exploration_uses_every_action() {
    let mut agent = dqn(8);
    agent.set_exploration(1.0);
    let mut seen = [false; 2];
    for _ in 0..100 {
        seen[agent.select_action(state().view(), true).unwrap()] = true;
    }
    assert!(seen.iter().all(|&s| s));
}

#[test]
fn test_select_action_rejects_wrong_width() {
    let mut agent = dqn(9);
    let err = agent.select_action(array![1.0, 2.0].view(), false).unwrap_err();
    assert!(matches!(err, RlError::ShapeMismatch { .. }));
}

#[test]
fn test_double_dqn_learns() {
    let mut agent = DqnAgentBuilder::new(3, 2)
        .hidden_sizes(&[8])
        .architecture(Architecture::Dueling)
        .use_double_dqn(true)
        .batch_size(2)
        .seed(10)
        .build()
        .unwrap();
    for i in 0..2 {
        agent.observe(Transition::new(state(), i, 1.0, next_state(), i == 1)).unwrap();
    }
    let loss = agent.learn().unwrap().loss().unwrap();
    assert!(loss.is_finite());
}

#[test]
fn test_prioritized_learning_updates_priorities() {
    let mut agent = DqnAgentBuilder::new(3, 2)
        .hidden_sizes(&[8])
        .batch_size(4)
        .prioritized(PriorityConfig::default())
        .seed(11)
        .build()
        .unwrap();
    for i in 0..4 {
        agent.observe(Transition::new(state() * i as f32, i % 2, 2.0, next_state(), true)).unwrap();
    }
    agent.learn().unwrap();

    match agent.memory() {
        Memory::Prioritized(buffer) => {
            for i in 0..4 {
                let priority = buffer.priority(i).unwrap();
                assert!(priority > 1.0, "priority {} of slot {} was not raised", priority, i);
            }
        }
        Memory::Uniform(_) => panic!("expected prioritized memory"),
    }
}

#[test]
fn test_dqn_checkpoint_round_trip() {
    let mut agent = dqn(12);
    agent.set_exploration(0.3);
    agent.observe(Transition::new(state(), 1, 1.0, next_state(), true)).unwrap();
    agent.learn().unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("dqn.ckpt");
    agent.checkpoint().save(&path).unwrap();

    let mut restored = dqn(99);
    restored.restore(&Checkpoint::load(&path).unwrap()).unwrap();

    assert_eq!(restored.learn_calls(), 1);
    assert_eq!(restored.exploration(), 0.3);
    assert_eq!(
        restored.q_values(state().view()).unwrap(),
        agent.q_values(state().view()).unwrap()
    );
    assert_eq!(restored.target_network().parameters(), agent.target_network().parameters());
}

#[test]
fn test_restore_rejects_other_architecture() {
    let dueling = DqnAgentBuilder::new(3, 2).hidden_sizes(&[8]).architecture(Architecture::Dueling).build().unwrap();
    let mut plain = dqn(13);
    let before = plain.q_network().parameters();

    assert!(plain.restore(&dueling.checkpoint()).is_err());
    assert_eq!(plain.q_network().parameters(), before);
}

#[test]
fn test_ddpg_from_point_mass_spaces() {
    let env = PointMass::default();
    let mut agent = DdpgAgentBuilder::for_spaces(&env.observation_space(), &env.action_space())
        .unwrap()
        .hidden_sizes(&[16])
        .build()
        .unwrap();
    assert_eq!(agent.action_bounds(), (-1.0, 1.0));
    let action = agent.select_action(array![0.5].view(), true).unwrap();
    assert_eq!(action.len(), 1);

    assert!(DdpgAgentBuilder::for_spaces(&env.observation_space(), &crate::env::Space::Discrete { n: 2 }).is_err());
}

#[test]
fn test_ddpg_critic_fits_terminal_rewards() {
    let mut agent = DdpgAgentBuilder::new(2, 1)
        .hidden_sizes(&[16])
        .critic_lr(1e-2)
        .batch_size(8)
        .seed(14)
        .build()
        .unwrap();
    for i in 0..8 {
        let s = array![i as f32 / 8.0, 1.0 - i as f32 / 8.0];
        agent.observe(Transition::new(s.clone(), array![0.0], 1.0, s, true)).unwrap();
    }

    let first = agent.learn().unwrap().loss().unwrap();
    let mut last = first;
    for _ in 0..100 {
        last = agent.learn().unwrap().loss().unwrap();
    }
    assert!(last < first * 0.5);
}

#[test]
fn test_ddpg_checkpoint_restores_all_networks() {
    let source = DdpgAgentBuilder::new(2, 1).hidden_sizes(&[8]).seed(15).build().unwrap();
    let mut target = DdpgAgentBuilder::new(2, 1).hidden_sizes(&[8]).seed(16).build().unwrap();
    target.restore(&source.checkpoint()).unwrap();

    let obs = array![0.25, -0.5];
    assert_eq!(target.policy_action(obs.view()).unwrap(), source.policy_action(obs.view()).unwrap());
    assert_eq!(target.critic_target().parameters(), source.critic_target().parameters());
}
