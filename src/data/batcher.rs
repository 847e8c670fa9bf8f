// ============================================================
// Layer 4 - Stream Batcher
// ============================================================
// Converts one scheduler Batch into device tensors.
//
// Layout is time-major, the natural shape for a recurrent model
// stepping through time:
//
//   inputs   [L+T, lanes]     Int
//   targets  [T,   lanes]     Int
//   features [lanes, dim]     Float  (only when chunks carry them)
//
// Lanes appear in the same order as the batch's mask, so lane j
// of the tensors lines up with lane j of the reorganised hidden
// state.
//
// Reference: Burn Book §4 (Batcher)

use burn::prelude::*;

use crate::domain::batch::Batch;

/// Tensors for a single scheduler step.
#[derive(Debug, Clone)]
pub struct StreamBatch<B: Backend> {
    /// Input token ids, shape [L+T, lanes]
    pub inputs: Tensor<B, 2, Int>,

    /// Target token ids, shape [T, lanes]
    pub targets: Tensor<B, 2, Int>,

    /// Per-lane feature vectors, shape [lanes, dim]
    pub features: Option<Tensor<B, 2>>,
}

impl<B: Backend> StreamBatch<B> {
    /// Number of target tokens, the weight of this step in an average
    pub fn num_targets(&self) -> usize {
        let [t, lanes] = self.targets.dims();
        t * lanes
    }
}

#[derive(Clone, Debug)]
pub struct StreamBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> StreamBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn batch(&self, batch: &Batch) -> StreamBatch<B> {
        let lanes = batch.width();

        let inputs: Vec<i32> = batch.inputs_time_major().into_iter().map(|x| x as i32).collect();
        let inputs = Tensor::<B, 1, Int>::from_ints(inputs.as_slice(), &self.device)
            .reshape([batch.input_len(), lanes]);

        let targets: Vec<i32> = batch.targets_time_major().into_iter().map(|x| x as i32).collect();
        let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), &self.device)
            .reshape([batch.target_len(), lanes]);

        let features = batch.features_lane_major().map(|(flat, dim)| {
            Tensor::<B, 1>::from_floats(flat.as_slice(), &self.device).reshape([lanes, dim])
        });

        StreamBatch { inputs, targets, features }
    }
}
