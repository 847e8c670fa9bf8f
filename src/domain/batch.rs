// ============================================================
// Layer 3 - Batch Domain Type
// ============================================================
// Everything the scheduler emits for one step: the chunks of
// the active lanes (in slot order), the lane states, and the
// continuation mask for the hidden-state reorganizer.
//
// Tensors are built from a Batch at the very edge of the
// pipeline (data::batcher); this type stays framework-free so
// the scheduler is testable without a device.
//
// Layout helpers return time-major buffers, i.e. the flat form
// of a [time, lanes] matrix:
//
//   lane0: a b c        time-major: a x  b y  c z
//   lane1: x y z

use serde::{Deserialize, Serialize};

use crate::domain::chunk::Chunk;
use crate::domain::lane::{LaneState, Mask};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Zero-based step index within the current pass
    pub step: usize,

    /// Slot id of each column
    pub lanes: Vec<usize>,

    /// RESTART or CONTINUE per column
    pub states: Vec<LaneState>,

    /// Corpus arena index of the document behind each column
    pub documents: Vec<usize>,

    /// One chunk per column
    pub chunks: Vec<Chunk>,

    /// Hidden-state instructions for this step
    pub mask: Mask,
}

impl Batch {
    /// Number of active lanes in this step
    pub fn width(&self) -> usize {
        self.chunks.len()
    }

    /// Lookback plus chunk length
    pub fn input_len(&self) -> usize {
        self.chunks.first().map_or(0, |c| c.inputs.len())
    }

    /// Chunk length (predicted positions per lane)
    pub fn target_len(&self) -> usize {
        self.chunks.first().map_or(0, |c| c.targets.len())
    }

    /// Number of predicted tokens in the batch
    pub fn target_tokens(&self) -> usize {
        self.width() * self.target_len()
    }

    /// Inputs as a flat [input_len, width] matrix
    pub fn inputs_time_major(&self) -> Vec<u32> {
        time_major(self.chunks.iter().map(|c| c.inputs.as_slice()), self.input_len())
    }

    /// Targets as a flat [target_len, width] matrix
    pub fn targets_time_major(&self) -> Vec<u32> {
        time_major(self.chunks.iter().map(|c| c.targets.as_slice()), self.target_len())
    }

    /// Feature vectors as a flat [width, feature_dim] matrix,
    /// or None when no chunk carries features.
    pub fn features_lane_major(&self) -> Option<(Vec<f32>, usize)> {
        let dim = self.chunks.first()?.features.as_ref()?.len();
        let mut flat = Vec::with_capacity(self.width() * dim);
        for chunk in &self.chunks {
            flat.extend_from_slice(chunk.features.as_deref()?);
        }
        Some((flat, dim))
    }

    /// Number of lanes starting a new document in this step
    pub fn document_starts(&self) -> usize {
        self.states.iter().filter(|s| **s == LaneState::Restart).count()
    }
}

fn time_major<'a>(columns: impl Iterator<Item = &'a [u32]> + Clone, len: usize) -> Vec<u32> {
    (0..len)
        .flat_map(|t| columns.clone().map(move |col| col[t]))
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lane::MaskEntry;

    fn two_lane_batch() -> Batch {
        let chunks = vec![
            Chunk::new(vec![1, 2, 3], vec![2, 3, 4]).with_features(vec![0.5, 0.25]),
            Chunk::new(vec![7, 8, 9], vec![8, 9, 10]).with_features(vec![1.0, 2.0]),
        ];
        Batch {
            step:      0,
            lanes:     vec![0, 1],
            states:    vec![LaneState::Restart, LaneState::Continue],
            documents: vec![0, 1],
            chunks,
            mask: Mask::new(vec![0, 1], vec![0, 1], vec![MaskEntry::Restart, MaskEntry::Continue])
                .unwrap(),
        }
    }

    #[test]
    fn test_time_major_layout() {
        let batch = two_lane_batch();
        assert_eq!(batch.inputs_time_major(),  vec![1, 7, 2, 8, 3, 9]);
        assert_eq!(batch.targets_time_major(), vec![2, 8, 3, 9, 4, 10]);
        assert_eq!(batch.target_tokens(), 6);
    }

    #[test]
    fn test_features_lane_major() {
        let batch       = two_lane_batch();
        let (flat, dim) = batch.features_lane_major().unwrap();
        assert_eq!(dim, 2);
        assert_eq!(flat, vec![0.5, 0.25, 1.0, 2.0]);
    }

    #[test]
    fn test_missing_features_gives_none() {
        let mut batch = two_lane_batch();
        batch.chunks[1].features = None;
        assert!(batch.features_lane_major().is_none());
    }

    #[test]
    fn test_document_starts() {
        assert_eq!(two_lane_batch().document_starts(), 1);
    }
}
