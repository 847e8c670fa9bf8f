// ============================================================
// Layer 3 - Domain Layer
// ============================================================
// Plain Rust structs, enums and traits describing what the
// batching pipeline moves around.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain data, lane bookkeeping and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// A tokenised document loaded from disk
pub mod document;

// One BPTT window of inputs and targets
pub mod chunk;

// Lane states, the continuation mask and reorganisation plans
pub mod lane;

// One scheduler step's worth of chunks plus its mask
pub mod batch;

// Core abstractions (traits) that other layers implement
pub mod traits;
