use ndarray::{Array1, ArrayView1, Zip};
use serde::{Serialize, Deserialize};

/// Regression loss over a batch of scalar predictions.
///
/// `weights` are optional per-sample importance weights (prioritized replay);
/// `None` weighs every sample equally.
pub trait Loss {
    /// Mean loss over the batch
    fn compute(&self, predictions: ArrayView1<f32>, targets: ArrayView1<f32>, weights: Option<ArrayView1<f32>>) -> f32;

    /// Gradient of the mean loss with respect to each prediction
    fn gradient(&self, predictions: ArrayView1<f32>, targets: ArrayView1<f32>, weights: Option<ArrayView1<f32>>) -> Array1<f32>;
}

fn sample_weights(weights: Option<ArrayView1<f32>>, len: usize) -> Array1<f32> {
    match weights {
        Some(w) => w.to_owned(),
        None => Array1::ones(len),
    }
}

/// Mean Squared Error loss
#[derive(Clone, Copy, Debug, Default)]
pub struct MSE;

impl Loss for MSE {
    fn compute(&self, predictions: ArrayView1<f32>, targets: ArrayView1<f32>, weights: Option<ArrayView1<f32>>) -> f32 {
        let n = predictions.len().max(1) as f32;
        let w = sample_weights(weights, predictions.len());
        let diff = &predictions - &targets;
        (&diff * &diff * &w).sum() / n
    }

    fn gradient(&self, predictions: ArrayView1<f32>, targets: ArrayView1<f32>, weights: Option<ArrayView1<f32>>) -> Array1<f32> {
        let n = predictions.len().max(1) as f32;
        let w = sample_weights(weights, predictions.len());
        (&predictions - &targets) * &w * (2.0 / n)
    }
}

/// Huber loss (smooth L1)
#[derive(Clone, Copy, Debug)]
pub struct HuberLoss {
    pub delta: f32,
}

impl HuberLoss {
    pub fn new(delta: f32) -> Self {
        HuberLoss { delta }
    }
}

impl Loss for HuberLoss {
    fn compute(&self, predictions: ArrayView1<f32>, targets: ArrayView1<f32>, weights: Option<ArrayView1<f32>>) -> f32 {
        let n = predictions.len().max(1) as f32;
        let w = sample_weights(weights, predictions.len());
        let delta = self.delta;
        let mut total = 0.0;
        Zip::from(&predictions).and(&targets).and(&w).for_each(|&p, &t, &w| {
            let abs_x = (p - t).abs();
            let l = if abs_x <= delta {
                0.5 * abs_x * abs_x
            } else {
                delta * abs_x - 0.5 * delta * delta
            };
            total += w * l;
        });
        total / n
    }

    fn gradient(&self, predictions: ArrayView1<f32>, targets: ArrayView1<f32>, weights: Option<ArrayView1<f32>>) -> Array1<f32> {
        let n = predictions.len().max(1) as f32;
        let w = sample_weights(weights, predictions.len());
        let delta = self.delta;
        let diff = &predictions - &targets;
        diff.mapv(|x| if x.abs() <= delta { x } else { delta * x.signum() }) * &w / n
    }
}

/// Serializable choice of loss, dispatched like `OptimizerWrapper`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum LossKind {
    #[default]
    Mse,
    Huber { delta: f32 },
}

impl Loss for LossKind {
    fn compute(&self, predictions: ArrayView1<f32>, targets: ArrayView1<f32>, weights: Option<ArrayView1<f32>>) -> f32 {
        match self {
            LossKind::Mse => MSE.compute(predictions, targets, weights),
            LossKind::Huber { delta } => HuberLoss::new(*delta).compute(predictions, targets, weights),
        }
    }

    fn gradient(&self, predictions: ArrayView1<f32>, targets: ArrayView1<f32>, weights: Option<ArrayView1<f32>>) -> Array1<f32> {
        match self {
            LossKind::Mse => MSE.gradient(predictions, targets, weights),
            LossKind::Huber { delta } => HuberLoss::new(*delta).gradient(predictions, targets, weights),
        }
    }
}
