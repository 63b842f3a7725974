//! # Function Approximators
//!
//! Every approximator used by an agent implements [`Network`]: batched
//! forward evaluation, back-propagation that also yields the gradient with
//! respect to the inputs, an optimizer step, and named parameter snapshots
//! used for target synchronization and checkpoints.
//!
//! - [`Mlp`]: plain stack of dense layers
//! - [`DuelingNetwork`]: shared trunk with value and advantage streams,
//!   `Q(s, a) = V(s) + A(s, a) - mean_a A(s, a)`
//! - [`QNetwork`]: the Q-function strategy chosen when a value-based agent is
//!   built; callers see the same contract for both variants
//!
//! Target networks are synchronized through [`Network::hard_update_from`]
//! (exact copy) or [`Network::soft_update_from`] (Polyak averaging).

pub mod dueling;
pub mod mlp;
pub mod parameters;
pub mod qnetwork;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::Result;
use crate::layers::dense::LayerGradients;

pub use dueling::DuelingNetwork;
pub use mlp::Mlp;
pub use parameters::ParameterSet;
pub use qnetwork::{Architecture, QNetwork};

/// Per-layer parameter gradients in the network's canonical layer order
pub type Gradients = Vec<LayerGradients>;

/// Contract shared by every function approximator.
pub trait Network {
    fn input_size(&self) -> usize;

    fn output_size(&self) -> usize;

    /// Pure batched evaluation; rows are samples.
    fn forward(&self, inputs: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Batched evaluation that caches what `backward` needs.
    fn forward_train(&mut self, inputs: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Back-propagate dL/d output of the last `forward_train` call.
    ///
    /// Returns the parameter gradients and dL/d input.
    fn backward(&mut self, output_grad: ArrayView2<f32>) -> Result<(Gradients, Array2<f32>)>;

    /// Optimizer step. Fails without mutating anything if a gradient is non-finite.
    fn apply_gradients(&mut self, gradients: Gradients, learning_rate: f32) -> Result<()>;

    fn parameters(&self) -> ParameterSet;

    fn set_parameters(&mut self, params: &ParameterSet) -> Result<()>;

    /// Evaluate a single observation.
    fn forward_one(&self, input: ArrayView1<f32>) -> Result<Array1<f32>> {
        let output = self.forward(input.insert_axis(Axis(0)))?;
        Ok(output.row(0).to_owned())
    }

    /// `self <- source`
    fn hard_update_from(&mut self, source: &Self) -> Result<()>
    where
        Self: Sized,
    {
        self.set_parameters(&source.parameters())
    }

    /// `self <- tau * source + (1 - tau) * self`
    fn soft_update_from(&mut self, source: &Self, tau: f32) -> Result<()>
    where
        Self: Sized,
    {
        let blended = self.parameters().blend(&source.parameters(), tau)?;
        self.set_parameters(&blended)
    }
}
