// ============================================================
// Layer 5 - ML / Model Layer (Burn)
// ============================================================
// Everything that runs a network lives here. The data layer
// only produces Batch values and tensors; this layer decides
// what to do with them.
//
// What's in this layer:
//
//   hidden.rs    - HiddenState tree and the reorganizer that
//                  lines it up with each batch's lanes
//                  (CONTINUE rows gathered, RESTART rows reset)
//
//   model.rs     - The RecurrentLm trait and the LSTM language
//                  model behind it:
//                  • Token embeddings (+ optional lane features)
//                  • Stacked LSTM layers
//                  • Linear decoder over the vocabulary
//
//   trainer.rs   - The training loop
//                  SGD with weight decay and clipping, truncated
//                  BPTT, best-checkpoint keeping, lr halving
//
//   evaluator.rs - Loads a checkpoint and scores a corpus
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

/// Hidden state tree and reorganizer
pub mod hidden;

/// Recurrent language model
pub mod model;

/// Training loop with validation and checkpointing
pub mod trainer;

/// Checkpoint loading and corpus scoring
pub mod evaluator;
