//! # Experience Replay
//!
//! Bounded stores of [`Transition`]s sampled in random mini-batches.
//!
//! - [`ReplayBuffer`]: fixed-capacity ring, O(1) insertion with oldest-first
//!   eviction, uniform sampling without replacement inside a batch
//! - [`PrioritizedReplayBuffer`]: sum-tree backed proportional sampling with
//!   importance weights
//! - [`Memory`]: the store an agent owns, either of the above
//!
//! Sampling always takes the caller's RNG so batches are reproducible from a
//! seed.
//!
//! ```rust
//! use cares_rl::replay_buffer::{ReplayBuffer, Transition};
//! use ndarray::array;
//! use rand::SeedableRng;
//!
//! let mut buffer = ReplayBuffer::new(2).unwrap();
//! for i in 0..3 {
//!     buffer.store(Transition::new(array![i as f32], 0usize, 0.0, array![i as f32 + 1.0], false));
//! }
//! assert_eq!(buffer.len(), 2);
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! assert!(buffer.sample(3, &mut rng).is_err());
//! ```

pub mod prioritized;

use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::error::{Result, RlError};

pub use prioritized::{PrioritizedReplayBuffer, PriorityConfig};

/// One environment interaction: `(state, action, reward, next_state, done)`.
///
/// `done` marks a terminal state. Episodes cut short by a step limit are
/// stored with `done == false` so that their value is still bootstrapped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition<A> {
    pub state: Array1<f32>,
    pub action: A,
    pub reward: f32,
    pub next_state: Array1<f32>,
    pub done: bool,
}

impl<A> Transition<A> {
    pub fn new(state: Array1<f32>, action: A, reward: f32, next_state: Array1<f32>, done: bool) -> Self {
        Transition {
            state,
            action,
            reward,
            next_state,
            done,
        }
    }
}

/// Fixed-capacity ring buffer of transitions.
#[derive(Clone, Debug)]
pub struct ReplayBuffer<A> {
    slots: Vec<Transition<A>>,
    capacity: usize,
    write: usize,
}

impl<A> ReplayBuffer<A> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RlError::invalid_parameter("capacity", "must be greater than 0"));
        }
        Ok(ReplayBuffer {
            slots: Vec::with_capacity(capacity),
            capacity,
            write: 0,
        })
    }

    /// Insert a transition, overwriting the oldest one when full.
    pub fn store(&mut self, transition: Transition<A>) {
        if self.slots.len() < self.capacity {
            self.slots.push(transition);
        } else {
            self.slots[self.write] = transition;
        }
        self.write = (self.write + 1) % self.capacity;
    }

    /// `batch_size` distinct storage indices drawn uniformly.
    pub fn sample_indices<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Result<Vec<usize>> {
        if batch_size > self.slots.len() {
            return Err(RlError::InsufficientData {
                required: batch_size,
                available: self.slots.len(),
            });
        }
        Ok(rand::seq::index::sample(rng, self.slots.len(), batch_size).into_vec())
    }

    /// Uniformly sample `batch_size` transitions without repeats.
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Result<Vec<&Transition<A>>> {
        let indices = self.sample_indices(batch_size, rng)?;
        Ok(indices.into_iter().map(|i| &self.slots[i]).collect())
    }

    /// Transition stored in slot `index`
    pub fn get(&self, index: usize) -> Option<&Transition<A>> {
        self.slots.get(index)
    }

    /// Iterate from the oldest to the newest transition
    pub fn iter(&self) -> impl Iterator<Item = &Transition<A>> {
        let split = if self.slots.len() < self.capacity { 0 } else { self.write };
        self.slots[split..].iter().chain(self.slots[..split].iter())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.write = 0;
    }
}

/// Transitions of one mini-batch stacked into arrays.
#[derive(Clone, Debug)]
pub struct Batch<A> {
    pub states: Array2<f32>,
    pub actions: Vec<A>,
    pub rewards: Array1<f32>,
    pub next_states: Array2<f32>,
    /// 1.0 for terminal transitions, 0.0 otherwise
    pub dones: Array1<f32>,
    /// Storage indices of the sampled transitions
    pub indices: Vec<usize>,
    /// Importance-sampling weights, present for prioritized sampling
    pub weights: Option<Array1<f32>>,
}

impl<A: Clone> Batch<A> {
    pub fn from_transitions(transitions: &[&Transition<A>], indices: Vec<usize>, weights: Option<Array1<f32>>) -> Result<Self> {
        let first = transitions
            .first()
            .ok_or_else(|| RlError::InsufficientData { required: 1, available: 0 })?;
        let state_dim = first.state.len();
        let batch_size = transitions.len();

        let mut states = Array2::zeros((batch_size, state_dim));
        let mut next_states = Array2::zeros((batch_size, state_dim));
        let mut actions = Vec::with_capacity(batch_size);
        let mut rewards = Array1::zeros(batch_size);
        let mut dones = Array1::zeros(batch_size);

        for (i, t) in transitions.iter().enumerate() {
            if t.state.len() != state_dim || t.next_state.len() != state_dim {
                return Err(RlError::shape_mismatch(
                    format!("state dimension {}", state_dim),
                    format!("{} / {}", t.state.len(), t.next_state.len()),
                ));
            }
            states.row_mut(i).assign(&t.state);
            next_states.row_mut(i).assign(&t.next_state);
            actions.push(t.action.clone());
            rewards[i] = t.reward;
            dones[i] = if t.done { 1.0 } else { 0.0 };
        }

        Ok(Batch {
            states,
            actions,
            rewards,
            next_states,
            dones,
            indices,
            weights,
        })
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Replay memory owned by an agent
#[derive(Clone, Debug)]
pub enum Memory<A> {
    Uniform(ReplayBuffer<A>),
    Prioritized(PrioritizedReplayBuffer<A>),
}

impl<A: Clone> Memory<A> {
    pub fn uniform(capacity: usize) -> Result<Self> {
        Ok(Memory::Uniform(ReplayBuffer::new(capacity)?))
    }

    pub fn prioritized(capacity: usize, config: PriorityConfig) -> Result<Self> {
        Ok(Memory::Prioritized(PrioritizedReplayBuffer::new(capacity, config)?))
    }

    pub fn store(&mut self, transition: Transition<A>) {
        match self {
            Memory::Uniform(buffer) => buffer.store(transition),
            Memory::Prioritized(buffer) => buffer.store(transition),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Memory::Uniform(buffer) => buffer.len(),
            Memory::Prioritized(buffer) => buffer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        match self {
            Memory::Uniform(buffer) => buffer.capacity(),
            Memory::Prioritized(buffer) => buffer.capacity(),
        }
    }

    pub fn is_prioritized(&self) -> bool {
        matches!(self, Memory::Prioritized(_))
    }

    /// Draw and stack a mini-batch.
    pub fn sample_batch<R: Rng + ?Sized>(&mut self, batch_size: usize, rng: &mut R) -> Result<Batch<A>> {
        match self {
            Memory::Uniform(buffer) => {
                let indices = buffer.sample_indices(batch_size, rng)?;
                let transitions: Vec<&Transition<A>> = indices.iter().map(|&i| &buffer.slots[i]).collect();
                Batch::from_transitions(&transitions, indices, None)
            }
            Memory::Prioritized(buffer) => {
                let (indices, weights) = buffer.sample_indices(batch_size, rng)?;
                let transitions: Vec<&Transition<A>> = indices
                    .iter()
                    .filter_map(|&i| buffer.get(i))
                    .collect();
                Batch::from_transitions(&transitions, indices, Some(weights))
            }
        }
    }

    /// Feed new TD errors back to a prioritized memory; no-op for uniform memory.
    pub fn update_priorities(&mut self, indices: &[usize], td_errors: &[f32]) -> Result<()> {
        match self {
            Memory::Uniform(_) => Ok(()),
            Memory::Prioritized(buffer) => buffer.update_priorities(indices, td_errors),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Memory::Uniform(buffer) => buffer.clear(),
            Memory::Prioritized(buffer) => buffer.clear(),
        }
    }
}
