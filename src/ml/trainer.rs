// ============================================================
// Layer 5 - Training Loop
// ============================================================
// Drives an LstmLm over the multi-stream batch pipeline.
//
// One step:
//   1. Reorganise the hidden state for the batch's mask
//   2. Forward + cross entropy on the batch's targets
//   3. Backward, clip, SGD update
//   4. Detach the returned state (truncated BPTT)
//
// Epoch schedule (run_training):
//   - corpora are split with the model's own lookback
//   - optional per-epoch reshuffle of the document queue
//   - keep the checkpoint with the best validation loss
//   - halve the learning rate whenever validation does not improve
//   - evaluate the best checkpoint on the test corpus at the end
//
// Key Burn 0.20 insight:
//   - Training uses MyBackend (Autodiff<Wgpu>) for gradients
//   - model.valid() returns the model on the inner backend (Wgpu)
//     with dropout switched off
//
// Reference: Burn Book §5
//            Zaremba et al. (2014) Recurrent Neural Network Regularization

use anyhow::{ensure, Result};
use burn::{
    module::AutodiffModule,
    optim::{
        decay::WeightDecayConfig, GradientsParams, Optimizer, SgdConfig,
    },
    grad_clipping::GradientClippingConfig,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::time::Instant;

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::StreamBatcher,
    filter::{BatchFilter, FilterReport},
    scheduler::{BatchBuilder, SchedulerConfig},
    splitter::TemporalSplitter,
};
use crate::domain::traits::ChunkSource;
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::hidden::{HiddenState, HiddenStateReorganizer};
use crate::ml::model::{LstmLm, LstmLmConfig, RecurrentLm};

type MyBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Per-epoch knobs of the update loop.
#[derive(Debug, Clone)]
pub struct EpochOptions {
    pub lr:           f64,
    /// BatchFilter floor; 1 keeps every step
    pub min_lanes:    usize,
    /// Steps between progress lines, 0 for none
    pub log_interval: usize,
}

/// Outcome of one training pass.
#[derive(Debug, Clone, Default)]
pub struct TrainStats {
    /// Token-weighted mean cross entropy
    pub loss:    f64,
    pub updates: usize,
    pub tokens:  usize,
    pub filter:  FilterReport,
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalStats {
    /// Token-weighted mean cross entropy
    pub loss:   f64,
    pub tokens: usize,
}

impl EvalStats {
    pub fn perplexity(&self) -> f64 {
        self.loss.exp()
    }
}

/// Corpora prepared by the application layer.
pub struct Corpora<S> {
    pub train: Vec<S>,
    pub valid: Vec<S>,
    pub test:  Vec<S>,
}

/// One pass over `sources`, updating `model` after every step.
pub fn train_epoch<B, S, O>(
    mut model: LstmLm<B>,
    optim:     &mut O,
    sources:   &[S],
    schedule:  &SchedulerConfig,
    opts:      &EpochOptions,
    device:    &B::Device,
) -> Result<(LstmLm<B>, TrainStats)>
where
    B: AutodiffBackend,
    S: ChunkSource,
    O: Optimizer<LstmLm<B>, B>,
{
    let builder = BatchBuilder::new(sources, schedule);
    let batcher = StreamBatcher::<B>::new(device.clone());
    let mut filter = BatchFilter::new(builder.iter(), opts.min_lanes);

    let mut hidden: Option<HiddenState<B>> = None;
    let mut loss_sum = 0.0f64;
    let mut tokens   = 0usize;
    let mut updates  = 0usize;

    let mut interval_loss   = 0.0f64;
    let mut interval_tokens = 0usize;
    let mut interval_start  = Instant::now();

    for batch in filter.by_ref() {
        let batch = batch?;

        let state   = HiddenStateReorganizer::new(&model).reorganize(hidden.take(), &batch.mask, device)?;
        let tensors = batcher.batch(&batch);
        let (loss, next) = model.forward_loss(&tensors, state)?;
        hidden = Some(next.detach());

        let n        = tensors.num_targets();
        let loss_val = loss.clone().into_scalar().elem::<f64>();
        loss_sum        += loss_val * n as f64;
        tokens          += n;
        interval_loss   += loss_val * n as f64;
        interval_tokens += n;

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(opts.lr, model, grads);
        updates += 1;

        if opts.log_interval > 0 && updates % opts.log_interval == 0 {
            let cur = interval_loss / interval_tokens.max(1) as f64;
            tracing::info!(
                "| {:5} steps | lanes {:3} | lr {:.4} | ms/batch {:6.2} | loss {:5.2} | ppl {:8.2}",
                updates,
                batch.width(),
                opts.lr,
                interval_start.elapsed().as_secs_f64() * 1000.0 / opts.log_interval as f64,
                cur,
                cur.exp(),
            );
            interval_loss   = 0.0;
            interval_tokens = 0;
            interval_start  = Instant::now();
        }
    }

    let filter = filter.report();
    let loss   = if tokens > 0 { loss_sum / tokens as f64 } else { f64::NAN };
    Ok((model, TrainStats { loss, updates, tokens, filter }))
}

/// Token-weighted cross entropy over every chunk of `sources`.
pub fn evaluate<B, S>(
    model:    &LstmLm<B>,
    sources:  &[S],
    schedule: &SchedulerConfig,
    device:   &B::Device,
) -> Result<EvalStats>
where
    B: Backend,
    S: ChunkSource,
{
    let builder     = BatchBuilder::new(sources, schedule);
    let batcher     = StreamBatcher::<B>::new(device.clone());
    let reorganizer = HiddenStateReorganizer::new(model);

    let mut hidden: Option<HiddenState<B>> = None;
    let mut loss_sum = 0.0f64;
    let mut tokens   = 0usize;

    for batch in &builder {
        let batch = batch?;

        let state        = reorganizer.reorganize(hidden.take(), &batch.mask, device)?;
        let tensors      = batcher.batch(&batch);
        let (loss, next) = model.forward_loss(&tensors, state)?;
        hidden = Some(next);

        let n = tensors.num_targets();
        loss_sum += loss.into_scalar().elem::<f64>() * n as f64;
        tokens   += n;
    }

    let loss = if tokens > 0 { loss_sum / tokens as f64 } else { f64::NAN };
    Ok(EvalStats { loss, tokens })
}

/// `load_corpora` receives the splitter matching the model and
/// returns the train / valid / test sources cut with it.
pub fn run_training<S, F>(
    cfg:          &TrainConfig,
    load_corpora: F,
    ckpt_manager: CheckpointManager,
    metrics:      MetricsLogger,
) -> Result<()>
where
    S: ChunkSource,
    F: FnOnce(TemporalSplitter) -> Result<Corpora<S>>,
{
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    train_loop::<MyBackend, S, F>(cfg, load_corpora, ckpt_manager, metrics, device)?;
    Ok(())
}

/// Full epoch schedule. Returns the test statistics of the best
/// model, or None when no test corpus was given.
pub fn train_loop<B, S, F>(
    cfg:          &TrainConfig,
    load_corpora: F,
    ckpt_manager: CheckpointManager,
    metrics:      MetricsLogger,
    device:       B::Device,
) -> Result<Option<EvalStats>>
where
    B: AutodiffBackend,
    S: ChunkSource,
    F: FnOnce(TemporalSplitter) -> Result<Corpora<S>>,
{
    // ── Build model ───────────────────────────────────────────────────────────
    let model_cfg: LstmLmConfig = cfg.model_config();
    let mut model: LstmLm<B> = model_cfg.init(&device);
    tracing::info!(
        "Model ready: {} LSTM layers, hidden_dim={}, vocab={}, lookback={}, feature_dim={}",
        cfg.num_layers,
        cfg.hidden_dim,
        cfg.vocab_size,
        model.lookback(),
        model.feature_dim()
    );

    // ── Split the corpora for this model ──────────────────────────────────────
    let corpora = load_corpora(cfg.splitter(model.lookback()))?;
    ensure!(!corpora.train.is_empty(), "training list '{}' produced no documents", cfg.train_list);

    // ── SGD with weight decay and gradient norm clipping ──────────────────────
    let weight_decay = (cfg.beta > 0.0).then(|| WeightDecayConfig::new(cfg.beta as f32));
    let mut optim = SgdConfig::new()
        .with_weight_decay(weight_decay)
        .with_gradient_clipping(Some(GradientClippingConfig::Norm(cfg.clip as f32)))
        .init::<B, LstmLm<B>>();

    let eval_schedule = cfg.scheduler(None);
    let mut lr        = cfg.lr;
    let mut best: Option<(usize, f64)> = None;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=cfg.epochs {
        let started = Instant::now();

        let seed     = cfg.shuffle_articles.then(|| cfg.seed + epoch as u64);
        let schedule = cfg.scheduler(seed);
        let opts     = EpochOptions { lr, min_lanes: cfg.min_batch_size, log_interval: cfg.log_interval };

        let (trained, stats) = train_epoch(model, &mut optim, &corpora.train, &schedule, &opts, &device)?;
        model = trained;

        // model.valid() → LstmLm<B::InnerBackend>, dropout disabled
        let valid = evaluate(&model.valid(), &corpora.valid, &eval_schedule, &device)?;

        println!("{}", "-".repeat(89));
        println!(
            "| end of epoch {:3} | time: {:5.2}s | train loss {:5.2} | valid loss {:5.2} | valid ppl {:8.2}",
            epoch,
            started.elapsed().as_secs_f64(),
            stats.loss,
            valid.loss,
            valid.perplexity(),
        );
        println!("{}", "-".repeat(89));

        metrics.log(&EpochMetrics {
            epoch,
            lr,
            updates:       stats.updates,
            train_loss:    stats.loss,
            valid_loss:    valid.loss,
            valid_ppl:     valid.perplexity(),
            skipped_steps: stats.filter.skipped_steps,
        })?;

        let improved = best.map_or(true, |(_, loss)| valid.loss < loss);
        if improved {
            ckpt_manager.save_model(&model, epoch)?;
            best = Some((epoch, valid.loss));
            tracing::info!("New best model at epoch {} (valid loss {:.4})", epoch, valid.loss);
        } else {
            lr /= 2.0;
            tracing::info!("No improvement, learning rate halved to {}", lr);
        }
    }

    tracing::info!("Training complete!");

    if corpora.test.is_empty() {
        return Ok(None);
    }

    // ── Test on the best checkpoint ───────────────────────────────────────────
    let best_model: LstmLm<B::InnerBackend> =
        ckpt_manager.load_model(model_cfg.init(&device), &device)?;
    let test = evaluate(&best_model, &corpora.test, &eval_schedule, &device)?;

    println!("{}", "=".repeat(89));
    println!(
        "| End of training | test loss {:5.2} | test ppl {:8.2}",
        test.loss,
        test.perplexity()
    );
    println!("{}", "=".repeat(89));
    Ok(Some(test))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tokenized::TokenizedDocument;
    use crate::domain::document::Document;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend   = Autodiff<NdArray>;
    type InnerBackend  = NdArray;

    fn corpus_with(lengths: &[usize], splitter: TemporalSplitter) -> Vec<TokenizedDocument> {
        lengths
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let tokens = (0..n).map(|t| ((t * 3 + i) % 10) as u32).collect();
                TokenizedDocument::new(Document::new(format!("d{i}"), tokens), splitter)
            })
            .collect()
    }

    fn corpus(lengths: &[usize]) -> Vec<TokenizedDocument> {
        corpus_with(lengths, TemporalSplitter::new(0, 4))
    }

    fn small_model<Bk: Backend>(device: &Bk::Device) -> LstmLm<Bk> {
        LstmLmConfig::new(10, 8, 8, 1).with_dropout(0.0).init(device)
    }

    fn schedule(lanes: usize) -> SchedulerConfig {
        SchedulerConfig { lanes, ..SchedulerConfig::default() }
    }

    #[test]
    fn test_train_epoch_counts_updates_and_tokens() {
        let device  = Default::default();
        let docs    = corpus(&[9, 13, 5]); // 2, 3, 1 chunks
        let model   = small_model::<TestBackend>(&device);
        let mut opt = SgdConfig::new().init::<TestBackend, LstmLm<TestBackend>>();
        let opts    = EpochOptions { lr: 0.5, min_lanes: 1, log_interval: 0 };

        let (_, stats) = train_epoch(model, &mut opt, &docs, &schedule(2), &opts, &device).unwrap();

        assert_eq!(stats.updates, 3);
        assert_eq!(stats.tokens, 6 * 4);
        assert!(stats.loss.is_finite());
        assert_eq!(stats.filter.skipped_steps, 0);
    }

    #[test]
    fn test_min_lanes_cuts_the_epoch() {
        let device  = Default::default();
        let docs    = corpus(&[5, 17]); // 1 and 4 chunks
        let model   = small_model::<TestBackend>(&device);
        let mut opt = SgdConfig::new().init::<TestBackend, LstmLm<TestBackend>>();
        let opts    = EpochOptions { lr: 0.5, min_lanes: 2, log_interval: 0 };

        let (_, stats) = train_epoch(model, &mut opt, &docs, &schedule(2), &opts, &device).unwrap();

        assert_eq!(stats.updates, 1);
        assert_eq!(stats.filter.skipped_steps, 3);
    }

    #[test]
    fn test_training_lowers_loss_on_a_repetitive_corpus() {
        let device  = Default::default();
        let docs    = corpus(&[41, 41]);
        let mut model = small_model::<TestBackend>(&device);
        let mut opt   = SgdConfig::new()
            .with_gradient_clipping(Some(GradientClippingConfig::Norm(0.25)))
            .init::<TestBackend, LstmLm<TestBackend>>();
        let opts      = EpochOptions { lr: 1.0, min_lanes: 1, log_interval: 0 };

        let before = evaluate(&model.valid(), &docs, &schedule(2), &device).unwrap();
        for _ in 0..15 {
            model = train_epoch(model, &mut opt, &docs, &schedule(2), &opts, &device).unwrap().0;
        }
        let after = evaluate(&model.valid(), &docs, &schedule(2), &device).unwrap();

        assert!(after.loss < before.loss, "{} !< {}", after.loss, before.loss);
    }

    #[test]
    fn test_evaluate_weights_by_tokens() {
        let device = Default::default();
        let docs   = corpus(&[9, 13, 5]);
        let model  = small_model::<InnerBackend>(&device);

        let stats = evaluate(&model, &docs, &schedule(2), &device).unwrap();
        assert_eq!(stats.tokens, 24);
        // An untrained model is roughly uniform over 10 words
        assert!((5.0..20.0).contains(&stats.perplexity()), "ppl {}", stats.perplexity());
    }

    #[test]
    fn test_evaluate_empty_corpus_is_nan() {
        let device = Default::default();
        let model  = small_model::<InnerBackend>(&device);
        let stats  = evaluate(&model, &Vec::<TokenizedDocument>::new(), &schedule(2), &device).unwrap();
        assert_eq!(stats.tokens, 0);
        assert!(stats.loss.is_nan());
    }

    #[test]
    fn test_train_loop_keeps_best_and_reports_test() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            checkpoint_dir: dir.path().display().to_string(),
            vocab_size:     10,
            emb_dim:        8,
            hidden_dim:     8,
            num_layers:     1,
            dropout:        0.0,
            lr:             1.0,
            epochs:         2,
            batch_size:     2,
            bptt:           4,
            log_interval:   0,
            ..TrainConfig::default()
        };
        let ckpt    = CheckpointManager::new(cfg.checkpoint_dir.clone()).unwrap();
        let metrics = MetricsLogger::new(cfg.checkpoint_dir.clone()).unwrap();

        let mut seen = None;
        let load = |splitter: TemporalSplitter| -> Result<Corpora<TokenizedDocument>> {
            seen = Some((splitter.lookback(), splitter.bptt()));
            Ok(Corpora {
                train: corpus_with(&[21, 17], splitter),
                valid: corpus_with(&[13], splitter),
                test:  corpus_with(&[9], splitter),
            })
        };

        let test = train_loop::<TestBackend, _, _>(&cfg, load, ckpt, metrics, Default::default())
            .unwrap()
            .unwrap();

        assert_eq!(seen, Some((0, 4)));
        assert_eq!(test.tokens, 8);
        assert!(dir.path().join("best_epoch.json").exists());
        let csv = std::fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn test_train_loop_rejects_an_empty_training_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            checkpoint_dir: dir.path().display().to_string(),
            vocab_size:     10,
            num_layers:     1,
            ..TrainConfig::default()
        };
        let ckpt    = CheckpointManager::new(cfg.checkpoint_dir.clone()).unwrap();
        let metrics = MetricsLogger::new(cfg.checkpoint_dir.clone()).unwrap();
        let load    = |_: TemporalSplitter| -> Result<Corpora<TokenizedDocument>> {
            Ok(Corpora { train: vec![], valid: vec![], test: vec![] })
        };

        assert!(train_loop::<TestBackend, _, _>(&cfg, load, ckpt, metrics, Default::default()).is_err());
    }
}
