// ============================================================
// Layer 2 - TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Validate the configuration
//   Step 2: Build / load the vocabulary  (Layer 6 - infra)
//   Step 3: Save config for eval         (Layer 6 - infra)
//   Step 4: Run the epoch schedule       (Layer 5 - ml), which
//           loads train/valid/test lists (Layer 4 - data) once
//           the model's lookback is known
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

use crate::application::corpus::{load_corpus, FeatureMode, Sources};
use crate::data::{
    features::FeatureStrategy,
    loader::read_texts,
    scheduler::{FeatureFailurePolicy, SchedulerConfig},
    splitter::TemporalSplitter,
};
use crate::domain::traits::ChunkSource;
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::MetricsLogger,
    vocab_store::VocabStore,
};
use crate::ml::model::LstmLmConfig;
use crate::ml::trainer::{run_training, Corpora};

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run.
// Saved as train_config.json so eval can rebuild the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub train_list:       String,
    pub valid_list:       String,
    pub test_list:        Option<String>,
    pub checkpoint_dir:   String,
    /// Upper bound when building; the real size once saved
    pub vocab_size:       usize,
    pub emb_dim:          usize,
    pub hidden_dim:       usize,
    pub num_layers:       usize,
    pub dropout:          f64,
    pub lr:               f64,
    /// L2 weight decay
    pub beta:             f64,
    /// Gradient norm clip
    pub clip:             f64,
    pub epochs:           usize,
    pub batch_size:       usize,
    pub bptt:             usize,
    pub seed:             u64,
    /// Carry hidden state across document boundaries in a lane
    pub concat_articles:  bool,
    /// Reshuffle the document queue every epoch
    pub shuffle_articles: bool,
    pub min_batch_size:   usize,
    pub log_interval:     usize,
    pub features:         FeatureMode,
    pub feature_dim:      usize,
    pub on_feature_error: FeatureFailurePolicy,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_list:       "data/train.list".to_string(),
            valid_list:       "data/valid.list".to_string(),
            test_list:        None,
            checkpoint_dir:   "checkpoints".to_string(),
            vocab_size:       10_000,
            emb_dim:          200,
            hidden_dim:       200,
            num_layers:       2,
            dropout:          0.2,
            lr:               20.0,
            beta:             0.0,
            clip:             0.25,
            epochs:           40,
            batch_size:       20,
            bptt:             35,
            seed:             1111,
            concat_articles:  false,
            shuffle_articles: false,
            min_batch_size:   1,
            log_interval:     200,
            features:         FeatureMode::None,
            feature_dim:      50,
            on_feature_error: FeatureFailurePolicy::Abort,
        }
    }
}

impl TrainConfig {
    /// Feature length the model sees, 0 when features are off
    pub fn model_feature_dim(&self) -> usize {
        match self.features {
            FeatureMode::None => 0,
            _                 => self.feature_dim,
        }
    }

    pub fn model_config(&self) -> LstmLmConfig {
        LstmLmConfig::new(self.vocab_size, self.emb_dim, self.hidden_dim, self.num_layers)
            .with_feature_dim(self.model_feature_dim())
            .with_dropout(self.dropout)
    }

    /// Chunks of `bptt` targets behind the model's `lookback`
    pub fn splitter(&self, lookback: usize) -> TemporalSplitter {
        TemporalSplitter::new(lookback, self.bptt)
    }

    pub fn feature_strategy(&self) -> Option<Rc<FeatureStrategy>> {
        self.features.strategy(self.feature_dim)
    }

    /// Scheduler settings, optionally shuffling the queue once
    pub fn scheduler(&self, shuffle_seed: Option<u64>) -> SchedulerConfig {
        SchedulerConfig {
            lanes:            self.batch_size,
            discard_h:        !self.concat_articles,
            shuffle_seed,
            on_feature_error: self.on_feature_error,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(self.bptt > 0, "bptt must be positive");
        ensure!(self.num_layers > 0, "num_layers must be positive");
        ensure!(
            self.min_batch_size <= self.batch_size,
            "min_batch_size {} exceeds batch_size {}; no step could ever run",
            self.min_batch_size,
            self.batch_size
        );
        ensure!(
            self.features == FeatureMode::None || self.feature_dim > 0,
            "feature_dim must be positive when features are enabled"
        );
        Ok(())
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<()> {
        // ── Step 1: Validate ──────────────────────────────────────────────────
        self.config.validate()?;
        let mut cfg = self.config.clone();

        // ── Step 2: Build / load vocabulary ───────────────────────────────────
        // Built from the training corpus only
        let texts = read_texts(&cfg.train_list)?;
        let vocab = VocabStore::new(&cfg.checkpoint_dir).load_or_build(&texts, cfg.vocab_size)?;
        drop(texts);
        cfg.vocab_size = vocab.len();
        tracing::info!("Vocabulary size: {}", cfg.vocab_size);

        // ── Step 3: Save config for eval ──────────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir)?;
        ckpt_manager.save_config(&cfg)?;
        let metrics = MetricsLogger::new(&cfg.checkpoint_dir)?;

        // ── Step 4: Run training loop (Layer 5) ───────────────────────────────
        let strategy = cfg.feature_strategy();
        if let Some(s) = &strategy {
            tracing::info!("Appending features: {:?}", s);
        }

        let load_corpora = |splitter: TemporalSplitter| -> Result<Corpora<Box<dyn ChunkSource>>> {
            let train = load_corpus(&cfg.train_list, &vocab, splitter, strategy.as_ref())?;
            let valid = load_corpus(&cfg.valid_list, &vocab, splitter, strategy.as_ref())?;
            let test: Sources = match &cfg.test_list {
                Some(list) => load_corpus(list, &vocab, splitter, strategy.as_ref())?,
                None       => Vec::new(),
            };
            Ok(Corpora { train, valid, test })
        };
        run_training(&cfg, load_corpora, ckpt_manager, metrics)?;

        Ok(())
    }
}
