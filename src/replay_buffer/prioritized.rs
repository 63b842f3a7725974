use ndarray::Array1;
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::error::{Result, RlError};
use super::Transition;

/// Prioritization hyperparameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriorityConfig {
    /// How strongly priorities skew sampling (0 = uniform)
    pub alpha: f32,
    /// Initial importance-sampling exponent
    pub beta: f32,
    /// Added to beta after every sample, capped at 1
    pub beta_increment: f32,
    /// Added to |TD error| so no transition becomes unsampleable
    pub epsilon: f32,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        PriorityConfig {
            alpha: 0.6,
            beta: 0.4,
            beta_increment: 1e-4,
            epsilon: 1e-6,
        }
    }
}

/// Binary sum tree over leaf priorities.
#[derive(Clone, Debug)]
struct SumTree {
    nodes: Vec<f64>,
    leaves: usize,
}

impl SumTree {
    fn new(capacity: usize) -> Self {
        let leaves = capacity.next_power_of_two();
        SumTree {
            nodes: vec![0.0; 2 * leaves],
            leaves,
        }
    }

    fn total(&self) -> f64 {
        self.nodes[1]
    }

    fn get(&self, leaf: usize) -> f64 {
        self.nodes[self.leaves + leaf]
    }

    fn set(&mut self, leaf: usize, value: f64) {
        let mut node = self.leaves + leaf;
        self.nodes[node] = value;
        while node > 1 {
            node /= 2;
            self.nodes[node] = self.nodes[2 * node] + self.nodes[2 * node + 1];
        }
    }

    /// Leaf whose cumulative priority range contains `mass`.
    ///
    /// Only descends into subtrees with positive mass, so a zero leaf is never returned
    /// while `total() > 0`.
    fn find(&self, mut mass: f64) -> usize {
        let mut node = 1;
        while node < self.leaves {
            let left = self.nodes[2 * node];
            let right = self.nodes[2 * node + 1];
            if (mass < left && left > 0.0) || right <= 0.0 {
                node = 2 * node;
            } else {
                mass -= left;
                node = 2 * node + 1;
            }
        }
        node - self.leaves
    }
}

/// Ring buffer with proportional prioritized sampling.
///
/// New transitions enter with the largest priority seen so far. Sampling
/// probability is `p_i^alpha / sum_k p_k^alpha`; importance weights
/// `(N * P(i))^-beta` are normalized by their batch maximum.
#[derive(Clone, Debug)]
pub struct PrioritizedReplayBuffer<A> {
    slots: Vec<Transition<A>>,
    capacity: usize,
    write: usize,
    tree: SumTree,
    max_priority: f32,
    beta: f32,
    config: PriorityConfig,
}

impl<A> PrioritizedReplayBuffer<A> {
    pub fn new(capacity: usize, config: PriorityConfig) -> Result<Self> {
        if capacity == 0 {
            return Err(RlError::invalid_parameter("capacity", "must be greater than 0"));
        }
        if !(config.alpha >= 0.0) || !(config.beta >= 0.0 && config.beta <= 1.0) {
            return Err(RlError::invalid_parameter("priority", "alpha must be >= 0 and beta in [0, 1]"));
        }
        if !(config.epsilon > 0.0) {
            return Err(RlError::invalid_parameter("priority.epsilon", "must be positive"));
        }
        Ok(PrioritizedReplayBuffer {
            slots: Vec::with_capacity(capacity),
            capacity,
            write: 0,
            tree: SumTree::new(capacity),
            max_priority: 1.0,
            beta: config.beta,
            config,
        })
    }

    pub fn store(&mut self, transition: Transition<A>) {
        let slot = self.write;
        if self.slots.len() < self.capacity {
            self.slots.push(transition);
        } else {
            self.slots[slot] = transition;
        }
        self.tree.set(slot, (self.max_priority as f64).powf(self.config.alpha as f64));
        self.write = (self.write + 1) % self.capacity;
    }

    /// Draw `batch_size` distinct indices and their importance weights.
    pub fn sample_indices<R: Rng + ?Sized>(&mut self, batch_size: usize, rng: &mut R) -> Result<(Vec<usize>, Array1<f32>)> {
        let len = self.slots.len();
        if batch_size > len {
            return Err(RlError::InsufficientData {
                required: batch_size,
                available: len,
            });
        }

        let total = self.tree.total();
        let mut indices = Vec::with_capacity(batch_size);
        let mut drawn = Vec::with_capacity(batch_size);

        // Zero each drawn leaf so the batch has no repeats, then restore
        for _ in 0..batch_size {
            let mass = rng.gen::<f64>() * self.tree.total();
            let leaf = self.tree.find(mass);
            indices.push(leaf);
            drawn.push(self.tree.get(leaf));
            self.tree.set(leaf, 0.0);
        }
        for (&leaf, &priority) in indices.iter().zip(drawn.iter()) {
            self.tree.set(leaf, priority);
        }
        let probabilities: Vec<f64> = drawn.iter().map(|&p| p / total).collect();

        let mut weights = Array1::from_iter(
            probabilities
                .iter()
                .map(|&p| ((len as f64 * p).powf(-(self.beta as f64))) as f32),
        );
        let max_weight = weights.iter().fold(0.0f32, |max, &w| max.max(w));
        if max_weight > 0.0 && max_weight.is_finite() {
            weights.mapv_inplace(|w| w / max_weight);
        }

        self.beta = (self.beta + self.config.beta_increment).min(1.0);
        Ok((indices, weights))
    }

    /// Sample transitions together with their indices and importance weights.
    pub fn sample<R: Rng + ?Sized>(&mut self, batch_size: usize, rng: &mut R) -> Result<(Vec<&Transition<A>>, Vec<usize>, Array1<f32>)> {
        let (indices, weights) = self.sample_indices(batch_size, rng)?;
        let transitions = indices.iter().map(|&i| &self.slots[i]).collect();
        Ok((transitions, indices, weights))
    }

    /// Set priorities of sampled transitions to `|td_error| + epsilon`.
    pub fn update_priorities(&mut self, indices: &[usize], td_errors: &[f32]) -> Result<()> {
        if indices.len() != td_errors.len() {
            return Err(RlError::shape_mismatch(
                format!("{} priorities", indices.len()),
                format!("{} priorities", td_errors.len()),
            ));
        }
        if let Some(bad) = td_errors.iter().find(|e| !e.is_finite()) {
            return Err(RlError::NumericInstability(format!("non-finite TD error {}", bad)));
        }
        if let Some(&idx) = indices.iter().find(|&&i| i >= self.slots.len()) {
            return Err(RlError::invalid_parameter(
                "indices".to_string(),
                format!("index {} outside buffer of length {}", idx, self.slots.len()),
            ));
        }

        for (&idx, &err) in indices.iter().zip(td_errors.iter()) {
            let priority = err.abs() + self.config.epsilon;
            self.max_priority = self.max_priority.max(priority);
            self.tree.set(idx, (priority as f64).powf(self.config.alpha as f64));
        }
        Ok(())
    }

    /// Sampling weight `p^alpha` currently assigned to slot `index`
    pub fn priority(&self, index: usize) -> Option<f32> {
        (index < self.slots.len()).then(|| self.tree.get(index) as f32)
    }

    pub fn get(&self, index: usize) -> Option<&Transition<A>> {
        self.slots.get(index)
    }

    pub fn beta(&self) -> f32 {
        self.beta
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
        self.tree = SumTree::new(self.capacity);
        self.max_priority = 1.0;
        self.beta = self.config.beta;
    }
}
