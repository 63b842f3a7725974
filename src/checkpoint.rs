//! # Checkpoints
//!
//! A [`Checkpoint`] holds everything needed to resume or evaluate a run:
//! counters, the current exploration value and a named [`ParameterSet`] for
//! every network an agent owns. Checkpoints are written with bincode.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::error::{Result, RlError};
use crate::network::ParameterSet;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Checkpoint {
    /// Environment steps taken by the trainer
    pub step: usize,
    /// Completed episodes
    pub episode: usize,
    /// Learn calls that updated the agent's networks
    pub learn_calls: usize,
    pub exploration: f32,
    /// Parameters keyed by network role, e.g. `q_network`, `actor_target`
    pub networks: BTreeMap<String, ParameterSet>,
}

impl Checkpoint {
    pub fn network(&self, name: &str) -> Result<&ParameterSet> {
        self.networks.get(name).ok_or_else(|| {
            RlError::shape_mismatch(format!("network '{}' in checkpoint", name), "missing".to_string())
        })
    }

    /// Save checkpoint to disk
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = bincode::serialize(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    /// Load checkpoint from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)?;
        let checkpoint = bincode::deserialize(&data)?;
        Ok(checkpoint)
    }
}
