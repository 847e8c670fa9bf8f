// ============================================================
// Layer 2 - Eval Use Case
// ============================================================
// Scores a file list with a trained checkpoint:
//   1. Reload train_config.json and the saved vocabulary
//   2. Load the best weights
//   3. Rebuild the corpus with the model's splitter and features
//   4. Score it and report loss / perplexity

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::application::{corpus::load_corpus, train_use_case::TrainConfig};
use crate::data::scheduler::SchedulerConfig;
use crate::infra::{checkpoint::CheckpointManager, vocab_store::VocabStore};
use crate::ml::evaluator::Evaluator;
use crate::ml::trainer::EvalStats;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    pub eval_list:       String,
    pub checkpoint_dir:  String,
    /// Lanes to evaluate with; the training batch size when None
    pub batch_size:      Option<usize>,
    /// Carry state across documents; the training setting when None
    pub concat_articles: Option<bool>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            eval_list:       "data/test.list".to_string(),
            checkpoint_dir:  "checkpoints".to_string(),
            batch_size:      None,
            concat_articles: None,
        }
    }
}

pub struct EvalUseCase {
    config: EvalConfig,
}

impl EvalUseCase {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    /// Training schedule with this run's overrides applied
    pub fn schedule(&self, train: &TrainConfig) -> Result<SchedulerConfig> {
        let mut schedule = train.scheduler(None);
        if let Some(lanes) = self.config.batch_size {
            ensure!(lanes > 0, "batch_size must be positive");
            schedule.lanes = lanes;
        }
        if let Some(concat) = self.config.concat_articles {
            schedule.discard_h = !concat;
        }
        Ok(schedule)
    }

    pub fn execute(&self) -> Result<EvalStats> {
        let ckpt     = CheckpointManager::new(&self.config.checkpoint_dir)?;
        let train    = ckpt.load_config()?;
        let vocab    = VocabStore::new(&self.config.checkpoint_dir).load()?;
        let schedule = self.schedule(&train)?;

        let evaluator = Evaluator::from_checkpoint(&ckpt)?;

        let strategy = train.feature_strategy();
        let expected = strategy.as_ref().map_or(0, |s| s.dim());
        ensure!(
            expected == evaluator.feature_dim(),
            "saved config gives {} feature values per lane, the checkpoint expects {}",
            expected,
            evaluator.feature_dim()
        );

        let splitter = train.splitter(evaluator.lookback());
        let sources  = load_corpus(&self.config.eval_list, &vocab, splitter, strategy.as_ref())?;
        tracing::info!(
            "Scoring with {} lanes, {} state between documents",
            schedule.lanes,
            if schedule.discard_h { "discarding" } else { "carrying" }
        );

        evaluator.evaluate(&sources, &schedule)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn use_case(batch_size: Option<usize>, concat_articles: Option<bool>) -> EvalUseCase {
        EvalUseCase::new(EvalConfig { batch_size, concat_articles, ..EvalConfig::default() })
    }

    #[test]
    fn test_schedule_follows_training_by_default() {
        let train = TrainConfig { batch_size: 7, concat_articles: true, ..TrainConfig::default() };
        let sched = use_case(None, None).schedule(&train).unwrap();
        assert_eq!(sched.lanes, 7);
        assert!(!sched.discard_h);
    }

    #[test]
    fn test_state_policy_override() {
        let carry_trained   = TrainConfig { concat_articles: true, ..TrainConfig::default() };
        let discard_trained = TrainConfig::default();

        assert!(use_case(None, Some(false)).schedule(&carry_trained).unwrap().discard_h);
        assert!(!use_case(None, Some(true)).schedule(&discard_trained).unwrap().discard_h);
    }

    #[test]
    fn test_lane_override() {
        let train = TrainConfig::default();
        assert_eq!(use_case(Some(3), None).schedule(&train).unwrap().lanes, 3);
        assert!(use_case(Some(0), None).schedule(&train).is_err());
    }
}
