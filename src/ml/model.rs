// ============================================================
// Layer 5 - Recurrent Language Model
// ============================================================
// Embedding → stacked LSTM → linear decoder.
//
// The batch pipeline only talks to the model through the
// RecurrentLm trait: how many lookback tokens it wants, what its
// initial hidden state looks like, and a forward pass that takes
// and returns a HiddenState.
//
// Shapes (time-major at the boundary, batch-first inside Burn):
//
//   inputs   [S, lanes]         S = lookback + bptt
//   features [lanes, F]         broadcast along time, concatenated
//                               to every embedded input step
//   logits   [S, lanes, vocab]
//   hidden   Node[ Node[cell, hidden] per layer ], leaves [lanes, H]
//
// Reference: Burn Book §3 (Building Blocks)
//            Hochreiter & Schmidhuber (1997) LSTM
//            Zaremba et al. (2014) Recurrent Neural Network Regularization

use anyhow::{bail, ensure, Result};
use burn::{
    nn::{
        loss::CrossEntropyLossConfig,
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        Linear, LinearConfig,
        Lstm, LstmConfig, LstmState,
    },
    prelude::*,
};

use crate::data::batcher::StreamBatch;
use crate::ml::hidden::HiddenState;

/// An LSTM carries all context in its state; chunks need no lookback
pub const LSTM_LOOKBACK: usize = 0;

/// What the batching pipeline needs from a recurrent model.
pub trait RecurrentLm<B: Backend> {
    /// Tokens of left context each chunk carries before its targets
    fn lookback(&self) -> usize;

    /// Length of the per-lane feature vector, 0 for none
    fn feature_dim(&self) -> usize;

    /// Canonical start-of-document state for `lanes` lanes
    fn init_hidden(&self, lanes: usize, device: &B::Device) -> HiddenState<B>;

    /// inputs [S, lanes] → logits [S, lanes, vocab] and the state after the last step
    fn forward(
        &self,
        inputs:   Tensor<B, 2, Int>,
        features: Option<Tensor<B, 2>>,
        hidden:   HiddenState<B>,
    ) -> Result<(Tensor<B, 3>, HiddenState<B>)>;
}

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
#[derive(Config, Debug)]
pub struct LstmLmConfig {
    pub vocab_size: usize,
    pub emb_dim:    usize,
    pub hidden_dim: usize,
    pub num_layers: usize,
    #[config(default = 0)]
    pub feature_dim: usize,
    #[config(default = 0.2)]
    pub dropout: f64,
}

impl LstmLmConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LstmLm<B> {
        assert!(self.num_layers > 0, "an LSTM language model needs at least one layer");

        let embedding = EmbeddingConfig::new(self.vocab_size, self.emb_dim).init(device);
        let layers: Vec<Lstm<B>> = (0..self.num_layers)
            .map(|l| {
                let d_input = if l == 0 { self.emb_dim + self.feature_dim } else { self.hidden_dim };
                LstmConfig::new(d_input, self.hidden_dim, true).init(device)
            })
            .collect();
        let decoder = LinearConfig::new(self.hidden_dim, self.vocab_size).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();

        LstmLm {
            embedding,
            layers,
            decoder,
            dropout,
            hidden_dim:  self.hidden_dim,
            feature_dim: self.feature_dim,
        }
    }
}

#[derive(Module, Debug)]
pub struct LstmLm<B: Backend> {
    pub embedding:   Embedding<B>,
    pub layers:      Vec<Lstm<B>>,
    pub decoder:     Linear<B>,
    pub dropout:     Dropout,
    pub hidden_dim:  usize,
    pub feature_dim: usize,
}

impl<B: Backend> LstmLm<B> {
    /// Mean cross entropy over the batch's targets.
    ///
    /// Only the last T positions are scored; the lookback prefix is
    /// context for the model, not a prediction.
    pub fn forward_loss(
        &self,
        batch:  &StreamBatch<B>,
        hidden: HiddenState<B>,
    ) -> Result<(Tensor<B, 1>, HiddenState<B>)> {
        let (logits, hidden) = self.forward(batch.inputs.clone(), batch.features.clone(), hidden)?;

        let [s, lanes, vocab] = logits.dims();
        let [t, _]            = batch.targets.dims();
        ensure!(s >= t, "model produced {s} steps for {t} targets");

        let logits  = logits.slice([s - t..s, 0..lanes, 0..vocab]).reshape([t * lanes, vocab]);
        let targets = batch.targets.clone().reshape([t * lanes]);

        let ce   = CrossEntropyLossConfig::new().init(&logits.device());
        let loss = ce.forward(logits, targets);
        Ok((loss, hidden))
    }

    fn split_layers(&self, hidden: HiddenState<B>) -> Result<Vec<LstmState<B, 2>>> {
        let HiddenState::Node(layers) = hidden else {
            bail!("LSTM hidden state must be one node per layer");
        };
        ensure!(
            layers.len() == self.layers.len(),
            "hidden state has {} layers, model has {}",
            layers.len(),
            self.layers.len()
        );

        layers
            .into_iter()
            .map(|layer| match layer {
                HiddenState::Node(pair) => match <[HiddenState<B>; 2]>::try_from(pair) {
                    Ok([HiddenState::Leaf(cell), HiddenState::Leaf(hidden)]) => {
                        Ok(LstmState::new(cell, hidden))
                    }
                    _ => bail!("LSTM layer state must be [cell, hidden] leaves"),
                },
                HiddenState::Leaf(_) => bail!("LSTM layer state must be a node"),
            })
            .collect()
    }
}

fn join_layers<B: Backend>(states: Vec<LstmState<B, 2>>) -> HiddenState<B> {
    HiddenState::Node(
        states
            .into_iter()
            .map(|s| HiddenState::Node(vec![HiddenState::Leaf(s.cell), HiddenState::Leaf(s.hidden)]))
            .collect(),
    )
}

impl<B: Backend> RecurrentLm<B> for LstmLm<B> {
    fn lookback(&self) -> usize {
        LSTM_LOOKBACK
    }

    fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    fn init_hidden(&self, lanes: usize, device: &B::Device) -> HiddenState<B> {
        join_layers(
            (0..self.layers.len())
                .map(|_| {
                    LstmState::new(
                        Tensor::zeros([lanes, self.hidden_dim], device),
                        Tensor::zeros([lanes, self.hidden_dim], device),
                    )
                })
                .collect(),
        )
    }

    fn forward(
        &self,
        inputs:   Tensor<B, 2, Int>,
        features: Option<Tensor<B, 2>>,
        hidden:   HiddenState<B>,
    ) -> Result<(Tensor<B, 3>, HiddenState<B>)> {
        let [seq_len, lanes] = inputs.dims();

        // [S, lanes] → [lanes, S, E]
        let mut x = self.dropout.forward(self.embedding.forward(inputs.swap_dims(0, 1)));

        match (features, self.feature_dim) {
            (None, 0) => {}
            (Some(f), dim) if dim > 0 => {
                ensure!(
                    f.dims() == [lanes, dim],
                    "feature tensor has shape {:?}, expected [{lanes}, {dim}]",
                    f.dims()
                );
                let f = f.unsqueeze_dim::<3>(1).expand([lanes, seq_len, dim]);
                x = Tensor::cat(vec![x, f], 2);
            }
            (Some(_), _) => bail!("batch carries features but the model was built without them"),
            (None, dim)  => bail!("model expects {dim} feature values per lane but the batch has none"),
        }

        let states = self.split_layers(hidden)?;
        let mut next = Vec::with_capacity(states.len());
        for (lstm, state) in self.layers.iter().zip(states) {
            let (out, state) = lstm.forward(x, Some(state));
            x = self.dropout.forward(out);
            next.push(state);
        }

        // [lanes, S, vocab] → [S, lanes, vocab]
        let logits = self.decoder.forward(x).swap_dims(0, 1);
        Ok((logits, join_layers(next)))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{batcher::StreamBatcher, splitter::TemporalSplitter};
    use crate::domain::batch::Batch;
    use crate::domain::lane::{LaneState, Mask, MaskEntry};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn model(feature_dim: usize) -> LstmLm<TestBackend> {
        LstmLmConfig::new(20, 8, 6, 2)
            .with_feature_dim(feature_dim)
            .with_dropout(0.0)
            .init(&Default::default())
    }

    fn ints(values: &[i32], shape: [usize; 2]) -> Tensor<TestBackend, 2, Int> {
        Tensor::<TestBackend, 1, Int>::from_ints(values, &Default::default()).reshape(shape)
    }

    #[test]
    fn test_forward_shapes() {
        let m      = model(0);
        let device = Default::default();
        let h      = m.init_hidden(3, &device);

        assert_eq!(h.leaves().len(), 4);
        assert!(h.leaves().iter().all(|l| l.dims() == [3, 6]));

        let inputs      = ints(&[1, 2, 3, 4, 5, 6, 7, 8], [4, 2]);
        let (logits, h) = m.forward(inputs, None, m.init_hidden(2, &device)).unwrap();
        assert_eq!(logits.dims(), [4, 2, 20]);
        assert_eq!(h.lanes(), Some(2));
    }

    #[test]
    fn test_state_carries_across_chunks() {
        let m      = model(0);
        let device = Default::default();
        let whole  = ints(&[1, 2, 3, 4, 5, 6, 7, 8], [4, 2]);

        let (full, _) = m.forward(whole.clone(), None, m.init_hidden(2, &device)).unwrap();

        let (_, h)      = m.forward(whole.clone().slice([0..2, 0..2]), None, m.init_hidden(2, &device)).unwrap();
        let (second, _) = m.forward(whole.slice([2..4, 0..2]), None, h).unwrap();

        let expected: Vec<f32> = full.slice([2..4, 0..2, 0..20]).into_data().to_vec().unwrap();
        let actual:   Vec<f32> = second.into_data().to_vec().unwrap();
        for (a, e) in actual.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-5, "{a} vs {e}");
        }
    }

    #[test]
    fn test_features_change_the_output() {
        let m      = model(2);
        let device = Default::default();
        let inputs = ints(&[1, 2, 3, 4], [2, 2]);
        let zeros  = Tensor::<TestBackend, 2>::zeros([2, 2], &device);
        let ones   = Tensor::<TestBackend, 2>::ones([2, 2], &device);

        let (a, _) = m.forward(inputs.clone(), Some(zeros), m.init_hidden(2, &device)).unwrap();
        let (b, _) = m.forward(inputs, Some(ones), m.init_hidden(2, &device)).unwrap();

        let a: Vec<f32> = a.into_data().to_vec().unwrap();
        let b: Vec<f32> = b.into_data().to_vec().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_features_is_an_error() {
        let m      = model(2);
        let device = Default::default();
        assert!(m.forward(ints(&[1, 2], [1, 2]), None, m.init_hidden(2, &device)).is_err());
    }

    #[test]
    fn test_foreign_hidden_state_is_rejected() {
        let m      = model(0);
        let device = Default::default();
        let flat   = HiddenState::Leaf(Tensor::<TestBackend, 2>::zeros([2, 6], &device));
        assert!(m.forward(ints(&[1, 2], [1, 2]), None, flat).is_err());
    }

    #[test]
    fn test_loss_is_finite() {
        let m      = model(0);
        let device = Default::default();
        let batch  = StreamBatch {
            inputs:   ints(&[1, 2, 3, 4], [2, 2]),
            targets:  ints(&[3, 4, 5, 6], [2, 2]),
            features: None,
        };
        let (loss, _) = m.forward_loss(&batch, m.init_hidden(2, &device)).unwrap();
        let value: f32 = loss.into_scalar().elem();
        assert!(value.is_finite() && value > 0.0);
    }

    #[test]
    fn test_only_targets_after_the_lookback_are_scored() {
        let m        = model(0);
        let device: <TestBackend as Backend>::Device = Default::default();
        let splitter = TemporalSplitter::new(2, 3);
        let batch    = Batch {
            step:      0,
            lanes:     vec![0, 1],
            states:    vec![LaneState::Restart; 2],
            documents: vec![0, 1],
            chunks:    vec![
                splitter.chunk(&[1, 2, 3, 4, 5, 6], 0).unwrap(),
                splitter.chunk(&[7, 8, 9, 10, 11, 12], 0).unwrap(),
            ],
            mask:      Mask::new(vec![], vec![0, 1], vec![MaskEntry::Restart; 2]).unwrap(),
        };
        let tensors = StreamBatcher::<TestBackend>::new(device.clone()).batch(&batch);
        assert_eq!(tensors.inputs.dims(), [5, 2]);
        assert_eq!(tensors.targets.dims(), [3, 2]);

        let (loss, _) = m.forward_loss(&tensors, m.init_hidden(2, &device)).unwrap();

        let (logits, _) = m.forward(tensors.inputs.clone(), None, m.init_hidden(2, &device)).unwrap();
        let tail        = logits.slice([2..5, 0..2, 0..20]).reshape([6, 20]);
        let expected    = CrossEntropyLossConfig::new()
            .init(&device)
            .forward(tail, tensors.targets.clone().reshape([6]));

        let loss:     f32 = loss.into_scalar().elem();
        let expected: f32 = expected.into_scalar().elem();
        assert!((loss - expected).abs() < 1e-6, "{loss} vs {expected}");
    }
}
