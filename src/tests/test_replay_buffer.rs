use ndarray::array;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::RlError;
use crate::replay_buffer::{Memory, PriorityConfig, ReplayBuffer, Transition};

fn transition(i: usize) -> Transition<usize> {
    Transition::new(array![i as f32, -(i as f32)], i, i as f32, array![i as f32 + 1.0, 0.0], i % 3 == 0)
}

#[test]
fn test_replay_buffer_add_and_sample() {
    let mut buffer = ReplayBuffer::new(10).unwrap();
    buffer.store(transition(1));
    assert_eq!(buffer.len(), 1);

    let mut rng = StdRng::seed_from_u64(0);
    let sample = buffer.sample(1, &mut rng).unwrap();
    assert_eq!(sample[0], &transition(1));
}

#[test]
fn test_replay_buffer_evicts_oldest() {
    let mut buffer = ReplayBuffer::new(3).unwrap();
    for i in 0..5 {
        buffer.store(transition(i));
    }

    assert_eq!(buffer.len(), 3);
    assert_eq!(buffer.capacity(), 3);
    let actions: Vec<usize> = buffer.iter().map(|t| t.action).collect();
    assert_eq!(actions, vec![2, 3, 4]);
}

#[test]
fn test_zero_capacity_rejected() {
    assert!(matches!(ReplayBuffer::<usize>::new(0), Err(RlError::InvalidParameter { .. })));
}

#[test]
fn test_sample_has_no_duplicates() {
    let mut buffer = ReplayBuffer::new(64).unwrap();
    for i in 0..64 {
        buffer.store(transition(i));
    }
    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..20 {
        let mut actions: Vec<usize> = buffer.sample(32, &mut rng).unwrap().iter().map(|t| t.action).collect();
        actions.sort_unstable();
        actions.dedup();
        assert_eq!(actions.len(), 32);
    }
}

#[test]
fn test_sample_insufficient_data() {
    let mut buffer = ReplayBuffer::new(8).unwrap();
    for i in 0..3 {
        buffer.store(transition(i));
    }
    let mut rng = StdRng::seed_from_u64(1);
    let err = buffer.sample(4, &mut rng).unwrap_err();
    assert!(matches!(err, RlError::InsufficientData { required: 4, available: 3 }));
    assert!(!err.is_fatal());
}

#[test]
fn test_sampling_is_reproducible() {
    let mut buffer = ReplayBuffer::new(100).unwrap();
    for i in 0..100 {
        buffer.store(transition(i));
    }
    let draw = |seed: u64| -> Vec<usize> {
        let mut rng = StdRng::seed_from_u64(seed);
        buffer.sample(10, &mut rng).unwrap().iter().map(|t| t.action).collect()
    };
    assert_eq!(draw(5), draw(5));
    assert_ne!(draw(5), draw(6));
}

#[test]
fn test_clear() {
    let mut buffer = ReplayBuffer::new(4).unwrap();
    for i in 0..6 {
        buffer.store(transition(i));
    }
    buffer.clear();
    assert!(buffer.is_empty());
    buffer.store(transition(9));
    assert_eq!(buffer.iter().map(|t| t.action).collect::<Vec<_>>(), vec![9]);
}

#[test]
fn test_memory_batch_stacks_transitions() {
    let mut memory = Memory::uniform(10).unwrap();
    for i in 0..4 {
        memory.store(transition(i));
    }
    let mut rng = StdRng::seed_from_u64(2);
    let batch = memory.sample_batch(4, &mut rng).unwrap();

    assert_eq!(batch.len(), 4);
    assert_eq!(batch.states.dim(), (4, 2));
    assert_eq!(batch.next_states.dim(), (4, 2));
    assert!(batch.weights.is_none());
    for (row, &action) in batch.actions.iter().enumerate() {
        assert_eq!(batch.states[[row, 0]], action as f32);
        assert_eq!(batch.rewards[row], action as f32);
        let expected_done = if action % 3 == 0 { 1.0 } else { 0.0 };
        assert_eq!(batch.dones[row], expected_done);
        assert_eq!(batch.indices[row], action);
    }
}

#[test]
fn test_uniform_memory_ignores_priorities() {
    let mut memory = Memory::uniform(4).unwrap();
    memory.store(transition(0));
    assert!(memory.update_priorities(&[0], &[3.0]).is_ok());
    assert!(!memory.is_prioritized());
}

#[test]
fn test_prioritized_memory_batch_has_weights() {
    let mut memory = Memory::prioritized(16, PriorityConfig::default()).unwrap();
    for i in 0..8 {
        memory.store(transition(i));
    }
    let mut rng = StdRng::seed_from_u64(4);
    let batch = memory.sample_batch(5, &mut rng).unwrap();
    let weights = batch.weights.clone().unwrap();
    assert_eq!(weights.len(), 5);
    assert!(weights.iter().all(|&w| w > 0.0 && w <= 1.0));

    let errors = vec![0.5; 5];
    memory.update_priorities(&batch.indices, &errors).unwrap();
    assert!(memory.update_priorities(&[99], &[1.0]).is_err());
    assert!(memory.update_priorities(&[0, 1], &[1.0]).is_err());
}
