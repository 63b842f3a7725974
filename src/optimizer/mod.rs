pub mod gradient_clipper;

use ndarray::{Array1, Array2};
use serde::{Serialize, Deserialize};

pub use gradient_clipper::GradientClipper;

/// Gradient-based parameter update rule.
///
/// `slot` identifies the parameter tensor inside the owning network so that
/// stateful optimizers keep one moment estimate per tensor.
pub trait Optimizer {
    /// Called once per optimizer step, before the per-tensor updates.
    fn begin_step(&mut self) {}

    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32);
    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32);
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum OptimizerWrapper {
    SGD(SGD),
    Adam(Adam),
}

impl OptimizerWrapper {
    pub fn sgd() -> Self {
        OptimizerWrapper::SGD(SGD::new())
    }

    pub fn adam() -> Self {
        OptimizerWrapper::Adam(Adam::default())
    }
}

impl Optimizer for OptimizerWrapper {
    fn begin_step(&mut self) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.begin_step(),
            OptimizerWrapper::Adam(optimizer) => optimizer.begin_step(),
        }
    }

    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.update_weights(slot, weights, gradients, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update_weights(slot, weights, gradients, learning_rate),
        }
    }

    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.update_biases(slot, biases, gradients, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update_biases(slot, biases, gradients, learning_rate),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SGD;

impl SGD {
    pub fn new() -> SGD {
        SGD
    }
}

impl Default for SGD {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer for SGD {
    fn update_weights(&mut self, _slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        weights.zip_mut_with(gradients, |w, &g| *w -= learning_rate * g);
    }

    fn update_biases(&mut self, _slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        biases.zip_mut_with(gradients, |b, &g| *b -= learning_rate * g);
    }
}

/// Adam with one first/second moment pair per parameter slot.
///
/// Moment buffers are allocated on first use, so a fresh `Adam` can be
/// attached to any network architecture.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Adam {
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    m_weights: Vec<Option<Array2<f32>>>,
    v_weights: Vec<Option<Array2<f32>>>,
    m_biases: Vec<Option<Array1<f32>>>,
    v_biases: Vec<Option<Array1<f32>>>,
    pub t: usize,
}

impl Adam {
    pub fn new(beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Adam {
            beta1,
            beta2,
            epsilon,
            m_weights: Vec::new(),
            v_weights: Vec::new(),
            m_biases: Vec::new(),
            v_biases: Vec::new(),
            t: 0,
        }
    }

    fn bias_corrections(&self) -> (f32, f32) {
        let t = self.t.max(1) as i32;
        (1.0 - self.beta1.powi(t), 1.0 - self.beta2.powi(t))
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.9, 0.999, 1e-8)
    }
}

fn slot_entry<T>(slots: &mut Vec<Option<T>>, slot: usize, init: impl FnOnce() -> T) -> &mut T {
    if slots.len() <= slot {
        slots.resize_with(slot + 1, || None);
    }
    slots[slot].get_or_insert_with(init)
}

impl Optimizer for Adam {
    fn begin_step(&mut self) {
        self.t += 1;
    }

    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let (correction1, correction2) = self.bias_corrections();
        let dim = weights.dim();

        let m = slot_entry(&mut self.m_weights, slot, || Array2::zeros(dim));
        m.zip_mut_with(gradients, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        let m_hat = m.mapv(|x| x / correction1);

        let v = slot_entry(&mut self.v_weights, slot, || Array2::zeros(dim));
        v.zip_mut_with(gradients, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);
        let v_hat = v.mapv(|x| x / correction2);

        *weights -= &((&m_hat / (v_hat.mapv(f32::sqrt) + epsilon)) * learning_rate);
    }

    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let (correction1, correction2) = self.bias_corrections();
        let len = biases.len();

        let m = slot_entry(&mut self.m_biases, slot, || Array1::zeros(len));
        m.zip_mut_with(gradients, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        let m_hat = m.mapv(|x| x / correction1);

        let v = slot_entry(&mut self.v_biases, slot, || Array1::zeros(len));
        v.zip_mut_with(gradients, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);
        let v_hat = v.mapv(|x| x / correction2);

        *biases -= &((&m_hat / (v_hat.mapv(f32::sqrt) + epsilon)) * learning_rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sgd_update_weights() {
        let mut sgd = SGD::new();
        let mut weights = array![[1.0, 1.0], [1.0, 1.0]];
        let gradients = array![[0.1, 0.2], [0.3, 0.4]];

        sgd.update_weights(0, &mut weights, &gradients, 0.5);

        let expected = array![[0.95, 0.9], [0.85, 0.8]];
        for (w, e) in weights.iter().zip(expected.iter()) {
            assert!((w - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_adam_first_step_moves_by_learning_rate() {
        let mut adam = Adam::default();
        let mut biases = array![1.0, 1.0];
        let gradients = array![0.5, -2.0];

        adam.begin_step();
        adam.update_biases(0, &mut biases, &gradients, 0.1);

        // After bias correction the first Adam step is lr * sign(g)
        assert!((biases[0] - 0.9).abs() < 1e-4);
        assert!((biases[1] - 1.1).abs() < 1e-4);
        assert_eq!(adam.t, 1);
    }

    #[test]
    fn test_adam_keeps_separate_slots() {
        let mut adam = Adam::default();
        let mut a = array![[0.0]];
        let mut b = array![[0.0, 0.0]];

        adam.begin_step();
        adam.update_weights(0, &mut a, &array![[1.0]], 0.01);
        adam.update_weights(3, &mut b, &array![[1.0, -1.0]], 0.01);

        assert!(a[[0, 0]] < 0.0);
        assert!(b[[0, 0]] < 0.0 && b[[0, 1]] > 0.0);
    }
}
