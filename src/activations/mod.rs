//! # Activation Functions
//!
//! Element-wise non-linearities applied by dense layers.
//!
//! - **ReLU**: `max(0, x)`, the default for hidden layers
//! - **Linear**: identity, used by Q-value and critic output layers
//! - **Tanh**: squashes to `[-1, 1]`, used by deterministic actor outputs
//!
//! ```rust
//! use cares_rl::activations::Activation;
//! use ndarray::array;
//!
//! let mut data = array![[1.0, -0.5, 0.0, 2.0]];
//! Activation::Relu.apply_batch(&mut data);
//! assert_eq!(data, array![[1.0, 0.0, 0.0, 2.0]]);
//! ```

pub mod functions;

pub use functions::Activation;
