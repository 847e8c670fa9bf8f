// ============================================================
// Layer 6 - Checkpoint Manager
// ============================================================
// Saves and restores model weights using Burn's CompactRecorder.
//
// Only improving epochs are saved, so the newest weights file
// is always the best one so far:
//
//   checkpoints/
//     model_epoch_1.mpk.gz   ← weights after epoch 1
//     model_epoch_3.mpk.gz   ← epoch 2 did not improve
//     best_epoch.json        ← epoch of the best weights
//     train_config.json      ← hyperparameters + vocabulary size
//     vocab.json             ← written by the VocabStore
//     metrics.csv            ← written by the MetricsLogger
//
// The config is needed to rebuild an LstmLm of the right shape
// before its weights can be loaded.
//
// Reference: Burn Book §5 (Records and Checkpointing)
//            Rust Book §9 (Error Handling)

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::model::LstmLm;

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create a new CheckpointManager.
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<String>) -> Result<Self> {
        let dir = PathBuf::from(dir.into());
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Save model weights for `epoch` and mark them as the best.
    pub fn save_model<B: Backend>(&self, model: &LstmLm<B>, epoch: usize) -> Result<()> {
        // Without extension, the recorder adds it
        let path = self.dir.join(format!("model_epoch_{epoch}"));

        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        let best_path = self.dir.join("best_epoch.json");
        fs::write(&best_path, serde_json::to_string(&epoch)?)
            .with_context(|| "Failed to write best_epoch.json")?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Load the best saved weights into `model`.
    ///
    /// The model must have the same architecture as the saved
    /// one or loading fails.
    pub fn load_model<B: Backend>(&self, model: LstmLm<B>, device: &B::Device) -> Result<LstmLm<B>> {
        let epoch = self.best_epoch()?;
        let path  = self.dir.join(format!("model_epoch_{epoch}"));

        tracing::info!("Loading checkpoint from epoch {}", epoch);

        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!("Cannot load checkpoint '{}'. Have you trained the model first?", path.display())
            })?;

        Ok(model.load_record(record))
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join("train_config.json");
        let json = serde_json::to_string_pretty(cfg)?;

        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join("train_config.json");

        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. \
                 Make sure you have run 'train' before 'eval'.",
                path.display()
            )
        })?;

        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config in '{}'", path.display()))
    }

    /// Epoch of the best saved weights
    pub fn best_epoch(&self) -> Result<usize> {
        let path = self.dir.join("best_epoch.json");

        let s = fs::read_to_string(&path)
            .with_context(|| "Cannot find 'best_epoch.json'. Have you run 'train' first?")?;

        Ok(serde_json::from_str::<usize>(&s)?)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::{LstmLmConfig, RecurrentLm};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_config_round_trips() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path().display().to_string()).unwrap();
        let cfg  = TrainConfig { hidden_dim: 33, concat_articles: true, ..TrainConfig::default() };

        ckpt.save_config(&cfg).unwrap();
        let back = ckpt.load_config().unwrap();
        assert_eq!(back.hidden_dim, 33);
        assert!(back.concat_articles);
    }

    #[test]
    fn test_best_weights_are_restored() {
        let dir    = tempfile::tempdir().unwrap();
        let ckpt   = CheckpointManager::new(dir.path().display().to_string()).unwrap();
        let device = Default::default();
        let config = LstmLmConfig::new(12, 4, 5, 1);

        let saved: LstmLm<TestBackend> = config.init(&device);
        ckpt.save_model(&saved, 2).unwrap();
        assert_eq!(ckpt.best_epoch().unwrap(), 2);

        let fresh: LstmLm<TestBackend> = config.init(&device);
        let loaded = ckpt.load_model(fresh, &device).unwrap();

        let inputs = Tensor::<TestBackend, 2, Int>::from_ints([[1, 2], [3, 4]], &device);
        let (a, _) = saved.forward(inputs.clone(), None, saved.init_hidden(2, &device)).unwrap();
        let (b, _) = loaded.forward(inputs, None, loaded.init_hidden(2, &device)).unwrap();

        // CompactRecorder stores half precision
        let a: Vec<f32> = a.into_data().to_vec().unwrap();
        let b: Vec<f32> = b.into_data().to_vec().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-2, "{x} vs {y}");
        }
    }

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path().display().to_string()).unwrap();
        assert!(ckpt.best_epoch().is_err());
        assert!(ckpt.load_config().is_err());
    }

    #[test]
    fn test_unusable_directory_is_reported_up_front() {
        let dir  = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir");
        std::fs::write(&file, "x").unwrap();

        let err = CheckpointManager::new(file.join("ckpt").display().to_string())
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("Cannot create checkpoint directory"));
    }
}
