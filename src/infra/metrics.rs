// ============================================================
// Layer 6 - Metrics Logger
// ============================================================
// Records one CSV row per training epoch.
//
// Columns:
//   epoch          the epoch number (1, 2, 3, ...)
//   lr             learning rate used for the epoch
//   updates        optimiser steps taken
//   train_loss     token-weighted cross entropy on the training set
//   valid_loss     token-weighted cross entropy on the validation set
//   valid_ppl      exp(valid_loss)
//   skipped_steps  steps dropped by the batch floor
//
// Output file: checkpoints/metrics.csv
//
//   epoch,lr,updates,train_loss,valid_loss,valid_ppl,skipped_steps
//   1,20.000000,1327,6.102311,5.731220,308.472103,14
//   2,20.000000,1327,5.589120,5.401817,221.803364,14
//   ...
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};
use serde::{Deserialize, Serialize};

const HEADER: &str = "epoch,lr,updates,train_loss,valid_loss,valid_ppl,skipped_steps";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:         usize,
    pub lr:            f64,
    pub updates:       usize,
    pub train_loss:    f64,
    pub valid_loss:    f64,
    pub valid_ppl:     f64,
    pub skipped_steps: usize,
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet,
    /// so repeated runs append to one log.
    pub fn new(dir: impl Into<String>) -> Result<Self> {
        let dir = PathBuf::from(dir.into());
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{:.6},{},{:.6},{:.6},{:.6},{}",
            m.epoch,
            m.lr,
            m.updates,
            m.train_loss,
            m.valid_loss,
            m.valid_ppl,
            m.skipped_steps,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, valid_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.valid_loss,
        );

        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}
