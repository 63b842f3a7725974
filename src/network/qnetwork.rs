use ndarray::{Array2, ArrayView2};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::error::Result;
use crate::optimizer::{GradientClipper, OptimizerWrapper};
use super::{DuelingNetwork, Gradients, Mlp, Network, ParameterSet};

/// Which Q-function architecture a value-based agent is built with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Architecture {
    #[default]
    Plain,
    Dueling,
}

/// Q-function strategy selected at agent construction.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum QNetwork {
    Plain(Mlp),
    Dueling(DuelingNetwork),
}

impl QNetwork {
    /// Build a Q-network mapping `input_size` observations to `num_actions` values.
    pub fn build<R: Rng + ?Sized>(
        architecture: Architecture,
        input_size: usize,
        hidden_sizes: &[usize],
        num_actions: usize,
        optimizer: OptimizerWrapper,
        clipper: GradientClipper,
        rng: &mut R,
    ) -> Result<Self> {
        match architecture {
            Architecture::Plain => {
                let mut sizes = vec![input_size];
                sizes.extend_from_slice(hidden_sizes);
                sizes.push(num_actions);
                let mlp = Mlp::with_output_activation(&sizes, Activation::Linear, optimizer, rng)?;
                Ok(QNetwork::Plain(mlp.with_clipper(clipper)))
            }
            Architecture::Dueling => {
                let net = DuelingNetwork::new(input_size, hidden_sizes, num_actions, optimizer, rng)?;
                Ok(QNetwork::Dueling(net.with_clipper(clipper)))
            }
        }
    }

    pub fn architecture(&self) -> Architecture {
        match self {
            QNetwork::Plain(_) => Architecture::Plain,
            QNetwork::Dueling(_) => Architecture::Dueling,
        }
    }
}

impl Network for QNetwork {
    fn input_size(&self) -> usize {
        match self {
            QNetwork::Plain(net) => net.input_size(),
            QNetwork::Dueling(net) => net.input_size(),
        }
    }

    fn output_size(&self) -> usize {
        match self {
            QNetwork::Plain(net) => net.output_size(),
            QNetwork::Dueling(net) => net.output_size(),
        }
    }

    fn forward(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            QNetwork::Plain(net) => net.forward(inputs),
            QNetwork::Dueling(net) => net.forward(inputs),
        }
    }

    fn forward_train(&mut self, inputs: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            QNetwork::Plain(net) => net.forward_train(inputs),
            QNetwork::Dueling(net) => net.forward_train(inputs),
        }
    }

    fn backward(&mut self, output_grad: ArrayView2<f32>) -> Result<(Gradients, Array2<f32>)> {
        match self {
            QNetwork::Plain(net) => net.backward(output_grad),
            QNetwork::Dueling(net) => net.backward(output_grad),
        }
    }

    fn apply_gradients(&mut self, gradients: Gradients, learning_rate: f32) -> Result<()> {
        match self {
            QNetwork::Plain(net) => net.apply_gradients(gradients, learning_rate),
            QNetwork::Dueling(net) => net.apply_gradients(gradients, learning_rate),
        }
    }

    fn parameters(&self) -> ParameterSet {
        match self {
            QNetwork::Plain(net) => net.parameters(),
            QNetwork::Dueling(net) => net.parameters(),
        }
    }

    fn set_parameters(&mut self, params: &ParameterSet) -> Result<()> {
        match self {
            QNetwork::Plain(net) => net.set_parameters(params),
            QNetwork::Dueling(net) => net.set_parameters(params),
        }
    }
}
