use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::error::{Result, RlError};
use crate::layers::{DenseLayer, WeightInit};
use crate::layers::dense::LayerGradients;
use crate::optimizer::{GradientClipper, Optimizer, OptimizerWrapper};
use super::{Gradients, Network, ParameterSet};

/// Initialization range for output layers, small enough that initial Q-values
/// and policy outputs start near zero.
const OUTPUT_INIT: WeightInit = WeightInit::Uniform { min: -3e-3, max: 3e-3 };

/// Updated tensors and optimizer state of one step, not yet committed
#[derive(Clone, Debug)]
pub(crate) struct StagedStep {
    tensors: Vec<(Array2<f32>, Array1<f32>)>,
    optimizer: OptimizerWrapper,
}

/// A multi-layer perceptron consisting of dense layers, an optimizer and an
/// optional gradient clipper.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Mlp {
    pub layers: Vec<DenseLayer>,
    pub optimizer: OptimizerWrapper,
    pub clipper: GradientClipper,
}

impl Mlp {
    /// Create a new network with the given layer sizes, activations, and optimizer.
    ///
    /// `layer_sizes` includes the input and output sizes, so it must hold one
    /// more entry than `activations`.
    pub fn new<R: Rng + ?Sized>(
        layer_sizes: &[usize],
        activations: &[Activation],
        optimizer: OptimizerWrapper,
        rng: &mut R,
    ) -> Result<Self> {
        Self::build(layer_sizes, activations, optimizer, Some(OUTPUT_INIT), rng)
    }

    /// ReLU feature extractor whose last layer feeds other networks, so every
    /// layer uses the activation's recommended initialization.
    pub fn trunk<R: Rng + ?Sized>(layer_sizes: &[usize], optimizer: OptimizerWrapper, rng: &mut R) -> Result<Self> {
        let activations = vec![Activation::Relu; layer_sizes.len().saturating_sub(1)];
        Self::build(layer_sizes, &activations, optimizer, None, rng)
    }

    fn build<R: Rng + ?Sized>(
        layer_sizes: &[usize],
        activations: &[Activation],
        optimizer: OptimizerWrapper,
        output_init: Option<WeightInit>,
        rng: &mut R,
    ) -> Result<Self> {
        if layer_sizes.len() < 2 {
            return Err(RlError::invalid_parameter("layer_sizes", "must have at least input and output sizes"));
        }
        if layer_sizes.len() - 1 != activations.len() {
            return Err(RlError::invalid_parameter(
                "activations",
                "number of activations must match number of layers - 1",
            ));
        }
        if layer_sizes.iter().any(|&size| size == 0) {
            return Err(RlError::invalid_parameter("layer_sizes", "every layer needs at least one unit"));
        }

        let last = activations.len() - 1;
        let layers = layer_sizes
            .windows(2)
            .zip(activations.iter())
            .enumerate()
            .map(|(i, (window, &activation))| match output_init {
                Some(init) if i == last => DenseLayer::new_with_init(window[0], window[1], activation, init, &mut *rng),
                _ => DenseLayer::new(window[0], window[1], activation, &mut *rng),
            })
            .collect::<Vec<_>>();

        Ok(Mlp {
            layers,
            optimizer,
            clipper: GradientClipper::None,
        })
    }

    /// ReLU hidden layers followed by an output layer with `output_activation`.
    pub fn with_output_activation<R: Rng + ?Sized>(
        layer_sizes: &[usize],
        output_activation: Activation,
        optimizer: OptimizerWrapper,
        rng: &mut R,
    ) -> Result<Self> {
        if layer_sizes.len() < 2 {
            return Err(RlError::invalid_parameter("layer_sizes", "must have at least input and output sizes"));
        }
        let mut activations = vec![Activation::Relu; layer_sizes.len() - 2];
        activations.push(output_activation);
        Self::new(layer_sizes, &activations, optimizer, rng)
    }

    pub fn with_clipper(mut self, clipper: GradientClipper) -> Self {
        self.clipper = clipper;
        self
    }

    fn check_input(&self, inputs: &ArrayView2<f32>) -> Result<()> {
        let expected = self.input_size();
        if inputs.ncols() != expected {
            return Err(RlError::shape_mismatch(
                format!("input width {}", expected),
                format!("input width {}", inputs.ncols()),
            ));
        }
        Ok(())
    }

    /// Verify count, shapes and finiteness of gradients before any parameter is touched.
    pub(crate) fn check_gradients(&self, gradients: &[LayerGradients]) -> Result<()> {
        if gradients.len() != self.layers.len() {
            return Err(RlError::shape_mismatch(
                format!("{} layer gradients", self.layers.len()),
                format!("{} layer gradients", gradients.len()),
            ));
        }
        for (i, (layer, g)) in self.layers.iter().zip(gradients).enumerate() {
            if g.weights.dim() != layer.weights.dim() || g.biases.dim() != layer.biases.dim() {
                return Err(RlError::shape_mismatch(
                    format!("layer {} gradients {:?}", i, layer.weights.dim()),
                    format!("{:?}", g.weights.dim()),
                ));
            }
            let finite = g.weights.iter().chain(g.biases.iter()).all(|v| v.is_finite());
            if !finite {
                return Err(RlError::NumericInstability(format!("non-finite gradient in layer {}", i)));
            }
        }
        Ok(())
    }

    /// Optimizer step computed on copies of the parameters and optimizer state.
    ///
    /// Nothing is committed; fails if any updated parameter is non-finite.
    pub(crate) fn stage_step(&self, gradients: &[LayerGradients], learning_rate: f32) -> Result<StagedStep> {
        self.check_gradients(gradients)?;

        let mut optimizer = self.optimizer.clone();
        optimizer.begin_step();
        let mut tensors = Vec::with_capacity(self.layers.len());
        for (i, (layer, g)) in self.layers.iter().zip(gradients).enumerate() {
            let mut weights = layer.weights.clone();
            let mut biases = layer.biases.clone();
            optimizer.update_weights(2 * i, &mut weights, &g.weights, learning_rate);
            optimizer.update_biases(2 * i + 1, &mut biases, &g.biases, learning_rate);
            if !weights.iter().chain(biases.iter()).all(|v| v.is_finite()) {
                return Err(RlError::NumericInstability(format!(
                    "non-finite parameters in layer {} after update",
                    i
                )));
            }
            tensors.push((weights, biases));
        }
        Ok(StagedStep { tensors, optimizer })
    }

    pub(crate) fn commit(&mut self, staged: StagedStep) {
        self.apply_import(staged.tensors);
        self.optimizer = staged.optimizer;
    }

    pub(crate) fn export_into(&self, prefix: &str, params: &mut ParameterSet) {
        for (i, layer) in self.layers.iter().enumerate() {
            params.insert_layer(prefix, i, layer);
        }
    }

    /// Shape-checked tensors for every layer, in layer order.
    pub(crate) fn import_plan(&self, prefix: &str, params: &ParameterSet) -> Result<Vec<(Array2<f32>, Array1<f32>)>> {
        self.layers
            .iter()
            .enumerate()
            .map(|(i, layer)| params.layer_tensors(prefix, i, layer))
            .collect()
    }

    pub(crate) fn apply_import(&mut self, plan: Vec<(Array2<f32>, Array1<f32>)>) {
        for (layer, (weights, biases)) in self.layers.iter_mut().zip(plan) {
            layer.weights = weights;
            layer.biases = biases;
        }
    }
}

impl Network for Mlp {
    fn input_size(&self) -> usize {
        self.layers[0].input_size()
    }

    fn output_size(&self) -> usize {
        self.layers[self.layers.len() - 1].output_size()
    }

    fn forward(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_input(&inputs)?;
        let mut current_output = inputs.to_owned();
        for layer in &self.layers {
            current_output = layer.forward(current_output.view());
        }
        Ok(current_output)
    }

    fn forward_train(&mut self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_input(&inputs)?;
        let mut current_output = inputs.to_owned();
        for layer in &mut self.layers {
            current_output = layer.forward_batch(current_output.view());
        }
        Ok(current_output)
    }

    fn backward(&mut self, output_grad: ArrayView2<f32>) -> Result<(Gradients, Array2<f32>)> {
        let mut gradients = Vec::with_capacity(self.layers.len());
        let mut current_error = output_grad.to_owned();

        for layer in self.layers.iter().rev() {
            let (layer_gradients, input_gradients) = layer.backward_batch(current_error.view())?;
            gradients.push(layer_gradients);
            current_error = input_gradients;
        }

        gradients.reverse();
        Ok((gradients, current_error))
    }

    fn apply_gradients(&mut self, mut gradients: Gradients, learning_rate: f32) -> Result<()> {
        self.check_gradients(&gradients)?;
        self.clipper.clip(&mut gradients);

        let staged = self.stage_step(&gradients, learning_rate)?;
        self.commit(staged);
        Ok(())
    }

    fn parameters(&self) -> ParameterSet {
        let mut params = ParameterSet::new();
        self.export_into("layers", &mut params);
        params
    }

    fn set_parameters(&mut self, params: &ParameterSet) -> Result<()> {
        if params.len() != 2 * self.layers.len() {
            return Err(RlError::shape_mismatch(
                format!("{} tensors", 2 * self.layers.len()),
                format!("{} tensors", params.len()),
            ));
        }
        let plan = self.import_plan("layers", params)?;
        self.apply_import(plan);
        Ok(())
    }
}
