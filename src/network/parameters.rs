use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayD, Ix1, Ix2, Zip};
use serde::{Serialize, Deserialize};

use crate::error::{Result, RlError};
use crate::layers::DenseLayer;

/// Named snapshot of every trainable tensor of a network.
///
/// Names follow `<module>.<layer index>.<weight|bias>`, e.g. `advantage.0.bias`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ParameterSet {
    tensors: BTreeMap<String, ArrayD<f32>>,
}

impl ParameterSet {
    pub fn new() -> Self {
        ParameterSet::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ArrayD<f32>> {
        self.tensors.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f32>)> {
        self.tensors.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Total number of scalars across all tensors
    pub fn scalar_count(&self) -> usize {
        self.tensors.values().map(|t| t.len()).sum()
    }

    pub fn all_finite(&self) -> bool {
        self.tensors.values().all(|t| t.iter().all(|v| v.is_finite()))
    }

    /// Polyak interpolation `tau * source + (1 - tau) * self`.
    ///
    /// `tau == 1.0` returns an exact copy of `source`.
    pub fn blend(&self, source: &ParameterSet, tau: f32) -> Result<ParameterSet> {
        if !(tau > 0.0 && tau <= 1.0) {
            return Err(RlError::invalid_parameter("tau", "must lie in (0, 1]"));
        }
        self.check_same_layout(source)?;

        if tau == 1.0 {
            return Ok(source.clone());
        }

        let mut blended = self.clone();
        for (name, target) in blended.tensors.iter_mut() {
            if let Some(live) = source.tensors.get(name) {
                Zip::from(target).and(live).for_each(|t, &l| *t = tau * l + (1.0 - tau) * *t);
            }
        }
        Ok(blended)
    }

    /// Largest absolute element-wise difference, `None` when layouts differ
    pub fn max_abs_diff(&self, other: &ParameterSet) -> Option<f32> {
        self.check_same_layout(other).ok()?;
        let mut max = 0.0f32;
        for (name, a) in &self.tensors {
            let b = &other.tensors[name];
            for (x, y) in a.iter().zip(b.iter()) {
                max = max.max((x - y).abs());
            }
        }
        Some(max)
    }

    fn check_same_layout(&self, other: &ParameterSet) -> Result<()> {
        if self.tensors.len() != other.tensors.len() {
            return Err(RlError::shape_mismatch(
                format!("{} tensors", self.tensors.len()),
                format!("{} tensors", other.tensors.len()),
            ));
        }
        for (name, tensor) in &self.tensors {
            match other.tensors.get(name) {
                Some(t) if t.shape() == tensor.shape() => {}
                Some(t) => {
                    return Err(RlError::shape_mismatch(
                        format!("{} with shape {:?}", name, tensor.shape()),
                        format!("{} with shape {:?}", name, t.shape()),
                    ))
                }
                None => {
                    return Err(RlError::shape_mismatch(name.clone(), "missing tensor".to_string()))
                }
            }
        }
        Ok(())
    }

    pub(crate) fn insert_layer(&mut self, prefix: &str, index: usize, layer: &DenseLayer) {
        self.insert(format!("{}.{}.weight", prefix, index), layer.weights.clone().into_dyn());
        self.insert(format!("{}.{}.bias", prefix, index), layer.biases.clone().into_dyn());
    }

    /// Fetch and shape-check the tensors for one dense layer without mutating it.
    pub(crate) fn layer_tensors(&self, prefix: &str, index: usize, layer: &DenseLayer) -> Result<(Array2<f32>, Array1<f32>)> {
        let weight_name = format!("{}.{}.weight", prefix, index);
        let bias_name = format!("{}.{}.bias", prefix, index);

        let weights = self
            .get(&weight_name)
            .ok_or_else(|| RlError::shape_mismatch(weight_name.clone(), "missing tensor".to_string()))?
            .clone()
            .into_dimensionality::<Ix2>()
            .map_err(|e| RlError::shape_mismatch(weight_name.clone(), e.to_string()))?;
        let biases = self
            .get(&bias_name)
            .ok_or_else(|| RlError::shape_mismatch(bias_name.clone(), "missing tensor".to_string()))?
            .clone()
            .into_dimensionality::<Ix1>()
            .map_err(|e| RlError::shape_mismatch(bias_name.clone(), e.to_string()))?;

        if weights.dim() != layer.weights.dim() {
            return Err(RlError::shape_mismatch(
                format!("{} with shape {:?}", weight_name, layer.weights.dim()),
                format!("{:?}", weights.dim()),
            ));
        }
        if biases.dim() != layer.biases.dim() {
            return Err(RlError::shape_mismatch(
                format!("{} with shape {:?}", bias_name, layer.biases.dim()),
                format!("{:?}", biases.dim()),
            ));
        }
        Ok((weights, biases))
    }
}
