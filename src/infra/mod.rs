// ============================================================
// Layer 6 - Infrastructure Layer
// ============================================================
// Handles all cross-cutting concerns that don't belong in
// any specific business layer:
//
//   checkpoint.rs  - Saving and loading model weights
//                    Uses Burn's CompactRecorder to serialise
//                    model parameters to disk. Also saves/loads
//                    TrainConfig as JSON so eval can rebuild
//                    the model.
//
//   vocab_store.rs - Vocabulary persistence
//                    Builds a word-level vocabulary from the
//                    training corpus if none exists, or loads a
//                    previously saved one. Training and eval
//                    always share the same ids.
//
//   metrics.rs     - Training metrics logging
//                    Writes one CSV row per epoch (lr, losses,
//                    perplexity, skipped steps).
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Vocabulary building, saving, and loading
pub mod vocab_store;

/// Training metrics CSV logger
pub mod metrics;
