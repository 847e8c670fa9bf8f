// ============================================================
// Layer 3 - Chunk Domain Type
// ============================================================
// One truncated-BPTT window cut out of a document.
//
// With lookback L and chunk length T, chunk i of a token
// sequence `s` is:
//
//   inputs  = s[i*T       .. i*T + L + T]      (length L+T)
//   targets = s[i*T + L+1 .. i*T + L + T + 1]  (length T)
//
// The first L inputs are context only; input position L+k
// predicts targets[k].
//
// Example with L=1, T=3 over [a b c d e f g h]:
//   chunk 0: inputs [a b c d]  targets [c d e]
//   chunk 1: inputs [d e f g]  targets [f g h]
//
// An optional feature vector rides along when the chunk
// passed through a FeatureAppender.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Lookback context followed by the T predicting positions
    pub inputs: Vec<u32>,

    /// Next-token targets for the last T input positions
    pub targets: Vec<u32>,

    /// Side-channel features (e.g. a document embedding)
    pub features: Option<Vec<f32>>,
}

impl Chunk {
    pub fn new(inputs: Vec<u32>, targets: Vec<u32>) -> Self {
        Self { inputs, targets, features: None }
    }

    /// Attach a feature vector, leaving both windows untouched
    pub fn with_features(mut self, features: Vec<f32>) -> Self {
        self.features = Some(features);
        self
    }

    /// Number of context-only positions at the front of `inputs`
    pub fn lookback(&self) -> usize {
        self.inputs.len() - self.targets.len()
    }
}
