use serde::{Serialize, Deserialize};

use crate::layers::dense::LayerGradients;

/// Gradient clipping methods
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum GradientClipper {
    /// Clip every gradient element into `[min, max]`
    ClipByValue { min: f32, max: f32 },

    /// Rescale all gradients of a network so that their joint L2 norm is at most `max_norm`
    ClipByGlobalNorm { max_norm: f32 },

    /// No clipping
    #[default]
    None,
}

impl GradientClipper {
    /// Compute global norm of all gradients
    pub fn global_norm(gradients: &[LayerGradients]) -> f32 {
        gradients
            .iter()
            .map(|g| {
                g.weights.iter().map(|&x| x * x).sum::<f32>()
                    + g.biases.iter().map(|&x| x * x).sum::<f32>()
            })
            .sum::<f32>()
            .sqrt()
    }

    /// Clip a full set of layer gradients in place
    pub fn clip(&self, gradients: &mut [LayerGradients]) {
        match self {
            GradientClipper::ClipByValue { min, max } => {
                for g in gradients.iter_mut() {
                    g.weights.mapv_inplace(|x| x.max(*min).min(*max));
                    g.biases.mapv_inplace(|x| x.max(*min).min(*max));
                }
            }

            GradientClipper::ClipByGlobalNorm { max_norm } => {
                let norm = Self::global_norm(gradients);
                if norm > *max_norm && norm.is_finite() {
                    let scale = max_norm / norm;
                    for g in gradients.iter_mut() {
                        g.weights.mapv_inplace(|x| x * scale);
                        g.biases.mapv_inplace(|x| x * scale);
                    }
                }
            }

            GradientClipper::None => {}
        }
    }
}
