use ndarray::{Array2, ArrayView2};
use serde::{Serialize, Deserialize};

/// An enumeration of the possible activation functions that can be used in a dense layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum Activation {
    #[default]
    Relu,
    Linear,
    Tanh,
}

impl Activation {
    /// Apply the activation function to a batch of pre-activations in-place.
    pub fn apply_batch(&self, inputs: &mut Array2<f32>) {
        match self {
            Activation::Relu => {
                inputs.mapv_inplace(|v| v.max(0.0));
            }
            Activation::Linear => {}
            Activation::Tanh => {
                inputs.mapv_inplace(|v| v.tanh());
            }
        }
    }

    /// Derivative of the activation, evaluated at the stored pre-activations.
    pub fn derivative_batch(&self, inputs: ArrayView2<f32>) -> Array2<f32> {
        match self {
            Activation::Relu => {
                inputs.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
            }
            Activation::Linear => {
                Array2::ones(inputs.dim())
            }
            Activation::Tanh => {
                inputs.mapv(|v| {
                    let tanh_v = v.tanh();
                    1.0 - tanh_v * tanh_v
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_derivatives() {
        let x = array![[-1.0f32, 0.0, 2.0]];
        assert_eq!(Activation::Relu.derivative_batch(x.view()), array![[0.0, 0.0, 1.0]]);
        assert_eq!(Activation::Linear.derivative_batch(x.view()), array![[1.0, 1.0, 1.0]]);
        let tanh = Activation::Tanh.derivative_batch(x.view());
        assert_eq!(tanh[[0, 1]], 1.0);
        assert!((tanh[[0, 2]] - (1.0 - 2.0f32.tanh().powi(2))).abs() < 1e-6);
    }

    #[test]
    fn test_tanh_output_is_bounded() {
        let mut x = array![[-50.0f32, 0.3, 50.0]];
        Activation::Tanh.apply_batch(&mut x);
        assert!(x.iter().all(|v| (-1.0..=1.0).contains(v)));
        assert_eq!(x[[0, 0]], -1.0);
    }
}
