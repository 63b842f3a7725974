use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Serialize, Deserialize};
use tracing::info;

use crate::error::Result;

/// Summary of one finished training episode
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// Zero-based episode index
    pub episode: usize,
    pub total_reward: f32,
    pub steps: usize,
    /// Exploration value used during the episode
    pub exploration: f32,
    /// Loss of the last update in the episode, if any
    pub loss: Option<f32>,
    /// The stop handle ended the episode before termination or the step limit
    #[serde(default)]
    pub interrupted: bool,
}

/// Receives episode records from the trainer; storage belongs to the sink.
pub trait MetricsSink {
    fn record(&mut self, record: &EpisodeRecord) -> Result<()>;
}

/// Keeps every record in memory
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    records: Vec<EpisodeRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn records(&self) -> &[EpisodeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Mean return of the last `window` episodes
    pub fn avg_episode_reward(&self, window: usize) -> Option<f32> {
        if self.records.is_empty() || window == 0 {
            return None;
        }
        let n = window.min(self.records.len());
        let sum: f32 = self.records.iter().rev().take(n).map(|r| r.total_reward).sum();
        Some(sum / n as f32)
    }
}

impl MetricsSink for MemorySink {
    fn record(&mut self, record: &EpisodeRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Emits each record as a tracing event
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn record(&mut self, record: &EpisodeRecord) -> Result<()> {
        info!(
            episode = record.episode,
            reward = record.total_reward,
            steps = record.steps,
            exploration = record.exploration,
            loss = ?record.loss,
            interrupted = record.interrupted,
            "episode finished"
        );
        Ok(())
    }
}

/// Writes one JSON object per line, flushed after every record.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<BufWriter<File>> {
    /// Create or truncate `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(JsonLinesSink::new(BufWriter::new(file)))
    }
}

impl<W: Write> MetricsSink for JsonLinesSink<W> {
    fn record(&mut self, record: &EpisodeRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
