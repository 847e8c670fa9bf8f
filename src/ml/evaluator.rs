// ============================================================
// Layer 5 - Evaluator
// ============================================================
// Rebuilds the trained LstmLm from its checkpoint directory and
// scores corpora with it (no autodiff, dropout off).

use anyhow::Result;

use crate::data::scheduler::SchedulerConfig;
use crate::domain::traits::ChunkSource;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::model::{LstmLm, RecurrentLm};
use crate::ml::trainer::{evaluate, EvalStats};

type InferBackend = burn::backend::Wgpu;

pub struct Evaluator {
    model:  LstmLm<InferBackend>,
    device: burn::backend::wgpu::WgpuDevice,
}

impl Evaluator {
    pub fn from_checkpoint(ckpt_manager: &CheckpointManager) -> Result<Self> {
        let device    = burn::backend::wgpu::WgpuDevice::default();
        let cfg       = ckpt_manager.load_config()?;
        let model_cfg = cfg.model_config().with_dropout(0.0);

        let model: LstmLm<InferBackend> = model_cfg.init(&device);
        let model = ckpt_manager.load_model(model, &device)?;
        tracing::info!("Model loaded from checkpoint");
        Ok(Self { model, device })
    }

    /// Left context the model wants in front of every chunk
    pub fn lookback(&self) -> usize {
        self.model.lookback()
    }

    pub fn feature_dim(&self) -> usize {
        self.model.feature_dim()
    }

    pub fn evaluate<S: ChunkSource>(&self, sources: &[S], schedule: &SchedulerConfig) -> Result<EvalStats> {
        evaluate(&self.model, sources, schedule, &self.device)
    }
}
