use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::error::{Result, RlError};
use crate::optimizer::{GradientClipper, OptimizerWrapper};
use super::{Gradients, Mlp, Network, ParameterSet};

/// Dueling Q-network.
///
/// A shared ReLU trunk feeds a state-value head `V(s)` and an advantage head
/// `A(s, a)`. The streams are recombined as `Q = V + A - mean_a A`, where the
/// mean is taken over the action dimension of the batch being evaluated.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DuelingNetwork {
    trunk: Mlp,
    value: Mlp,
    advantage: Mlp,
    /// Applied once to the gradients of all three streams
    clipper: GradientClipper,
}

impl DuelingNetwork {
    /// `hidden_sizes` describes the trunk and must not be empty.
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        hidden_sizes: &[usize],
        num_actions: usize,
        optimizer: OptimizerWrapper,
        rng: &mut R,
    ) -> Result<Self> {
        let features = *hidden_sizes
            .last()
            .ok_or_else(|| RlError::invalid_parameter("hidden_sizes", "dueling trunk needs at least one hidden layer"))?;

        let mut trunk_sizes = vec![input_size];
        trunk_sizes.extend_from_slice(hidden_sizes);
        let trunk = Mlp::trunk(&trunk_sizes, optimizer.clone(), &mut *rng)?;
        let value = Mlp::new(&[features, 1], &[Activation::Linear], optimizer.clone(), &mut *rng)?;
        let advantage = Mlp::new(&[features, num_actions], &[Activation::Linear], optimizer, &mut *rng)?;

        Ok(DuelingNetwork {
            trunk,
            value,
            advantage,
            clipper: GradientClipper::None,
        })
    }

    pub fn with_clipper(mut self, clipper: GradientClipper) -> Self {
        self.clipper = clipper;
        self
    }

    /// Value `(batch, 1)` and advantage `(batch, actions)` streams for `inputs`.
    pub fn decompose(&self, inputs: ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        let features = self.trunk.forward(inputs)?;
        let value = self.value.forward(features.view())?;
        let advantage = self.advantage.forward(features.view())?;
        Ok((value, advantage))
    }

    fn combine(value: &Array2<f32>, advantage: &Array2<f32>) -> Result<Array2<f32>> {
        let mean = advantage
            .mean_axis(Axis(1))
            .ok_or_else(|| RlError::shape_mismatch("at least one action", "zero actions"))?;
        Ok(advantage - &mean.insert_axis(Axis(1)) + value)
    }

    fn layer_counts(&self) -> (usize, usize) {
        (self.trunk.layers.len(), self.value.layers.len())
    }
}

impl Network for DuelingNetwork {
    fn input_size(&self) -> usize {
        self.trunk.input_size()
    }

    fn output_size(&self) -> usize {
        self.advantage.output_size()
    }

    fn forward(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (value, advantage) = self.decompose(inputs)?;
        Self::combine(&value, &advantage)
    }

    fn forward_train(&mut self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        let features = self.trunk.forward_train(inputs)?;
        let value = self.value.forward_train(features.view())?;
        let advantage = self.advantage.forward_train(features.view())?;
        Self::combine(&value, &advantage)
    }

    fn backward(&mut self, output_grad: ArrayView2<f32>) -> Result<(Gradients, Array2<f32>)> {
        // dQ_j/dV = 1 and dQ_j/dA_k = [j == k] - 1/n
        let value_grad = output_grad.sum_axis(Axis(1)).insert_axis(Axis(1));
        let mean_grad = output_grad
            .mean_axis(Axis(1))
            .ok_or_else(|| RlError::shape_mismatch("at least one action", "zero actions"))?;
        let advantage_grad = &output_grad - &mean_grad.insert_axis(Axis(1));

        let (value_grads, value_input_grad) = self.value.backward(value_grad.view())?;
        let (advantage_grads, advantage_input_grad) = self.advantage.backward(advantage_grad.view())?;
        let feature_grad = value_input_grad + &advantage_input_grad;
        let (trunk_grads, input_grad) = self.trunk.backward(feature_grad.view())?;

        let mut gradients = trunk_grads;
        gradients.extend(value_grads);
        gradients.extend(advantage_grads);
        Ok((gradients, input_grad))
    }

    fn apply_gradients(&mut self, mut gradients: Gradients, learning_rate: f32) -> Result<()> {
        let (trunk_len, value_len) = self.layer_counts();
        let expected = trunk_len + value_len + self.advantage.layers.len();
        if gradients.len() != expected {
            return Err(RlError::shape_mismatch(
                format!("{} layer gradients", expected),
                format!("{} layer gradients", gradients.len()),
            ));
        }

        let split = trunk_len + value_len;
        self.trunk.check_gradients(&gradients[..trunk_len])?;
        self.value.check_gradients(&gradients[trunk_len..split])?;
        self.advantage.check_gradients(&gradients[split..])?;

        self.clipper.clip(&mut gradients);

        // Stage every stream first so a failure leaves all three untouched
        let trunk_step = self.trunk.stage_step(&gradients[..trunk_len], learning_rate)?;
        let value_step = self.value.stage_step(&gradients[trunk_len..split], learning_rate)?;
        let advantage_step = self.advantage.stage_step(&gradients[split..], learning_rate)?;

        self.trunk.commit(trunk_step);
        self.value.commit(value_step);
        self.advantage.commit(advantage_step);
        Ok(())
    }

    fn parameters(&self) -> ParameterSet {
        let mut params = ParameterSet::new();
        self.trunk.export_into("trunk", &mut params);
        self.value.export_into("value", &mut params);
        self.advantage.export_into("advantage", &mut params);
        params
    }

    fn set_parameters(&mut self, params: &ParameterSet) -> Result<()> {
        let (trunk_len, value_len) = self.layer_counts();
        let expected = 2 * (trunk_len + value_len + self.advantage.layers.len());
        if params.len() != expected {
            return Err(RlError::shape_mismatch(
                format!("{} tensors", expected),
                format!("{} tensors", params.len()),
            ));
        }

        let trunk_plan = self.trunk.import_plan("trunk", params)?;
        let value_plan = self.value.import_plan("value", params)?;
        let advantage_plan = self.advantage.import_plan("advantage", params)?;

        self.trunk.apply_import(trunk_plan);
        self.value.apply_import(value_plan);
        self.advantage.apply_import(advantage_plan);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn dueling() -> DuelingNetwork {
        let mut rng = StdRng::seed_from_u64(21);
        DuelingNetwork::new(3, &[8], 4, OptimizerWrapper::sgd(), &mut rng).unwrap()
    }

    #[test]
    fn test_output_shape() {
        let net = dueling();
        let q = net.forward(array![[0.1, 0.2, 0.3], [1.0, -1.0, 0.0]].view()).unwrap();
        assert_eq!(q.dim(), (2, 4));
        assert_eq!(net.output_size(), 4);
    }

    #[test]
    fn test_mean_advantage_recovers_value() {
        let net = dueling();
        let x = array![[0.5, -0.25, 2.0]];
        let q = net.forward(x.view()).unwrap();
        let (v, _) = net.decompose(x.view()).unwrap();
        let mean_q = q.row(0).sum() / 4.0;
        assert!((mean_q - v[[0, 0]]).abs() < 1e-5);
    }

    #[test]
    fn test_requires_hidden_layer() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(DuelingNetwork::new(3, &[], 2, OptimizerWrapper::sgd(), &mut rng).is_err());
    }

    #[test]
    fn test_global_norm_clip_spans_all_streams() {
        let max_norm = 0.01;
        let mut net = dueling().with_clipper(GradientClipper::ClipByGlobalNorm { max_norm });
        let before = net.parameters();

        let x = array![[0.5, -0.25, 2.0], [1.0, 1.0, -1.0]];
        net.forward_train(x.view()).unwrap();
        let (grads, _) = net.backward(array![[5.0, -3.0, 1.0, 2.0], [-4.0, 2.0, 0.5, 1.0]].view()).unwrap();
        assert!(GradientClipper::global_norm(&grads) > max_norm);
        net.apply_gradients(grads, 1.0).unwrap();

        // With SGD and lr 1 the parameter change is exactly the clipped gradient
        let after = net.parameters();
        let squared: f32 = before
            .iter()
            .map(|(name, b)| {
                let a = after.get(name).unwrap();
                a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>()
            })
            .sum();
        assert!((squared.sqrt() - max_norm).abs() < 1e-4);
    }

    #[test]
    fn test_parameter_names() {
        let params = dueling().parameters();
        let names: Vec<&str> = params.names().collect();
        assert!(names.contains(&"trunk.0.weight"));
        assert!(names.contains(&"value.0.bias"));
        assert!(names.contains(&"advantage.0.weight"));
        assert_eq!(params.len(), 6);
    }
}
