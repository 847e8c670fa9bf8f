// ============================================================
// Layer 4 - Data Pipeline
// ============================================================
// This layer handles everything from a file list on disk all
// the way to per-step tensor batches.
//
// The pipeline flows in this order:
//
//   file list
//       │
//       ▼
//   FileListLoader     → reads files, tokenises via the Vocabulary
//       │
//       ▼
//   TokenizedDocument  → one document, addressable chunk by chunk
//       │                 (TemporalSplitter cuts the BPTT windows)
//       ▼
//   FeatureAppender    → optional side-channel vector per chunk
//       │
//       ▼
//   BatchBuilder       → multiplexes documents across lanes,
//       │                 emits Batch + continuation mask
//       ▼
//   BatchFilter        → stops once too few lanes are left
//       │
//       ▼
//   StreamBatcher      → stacks a Batch into tensors
//
// Each module is responsible for exactly one step.
// This makes each step independently testable and replaceable.
//
// Reference: Burn Book §4 (Datasets and Dataloaders)
//            Rust Book §13 (Iterators and Closures)

/// Reads file lists and loads one document per file
pub mod loader;

/// Cuts token sequences into lookback + BPTT windows
pub mod splitter;

/// A document bound to its splitter
pub mod tokenized;

/// Attaches feature vectors to chunks
pub mod features;

/// Multi-lane batch scheduling
pub mod scheduler;

/// Early stop on narrow batches
pub mod filter;

/// Converts a Batch into Burn tensors
pub mod batcher;
