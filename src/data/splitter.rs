// ============================================================
// Layer 4 - Temporal Splitter
// ============================================================
// Cuts a token sequence into truncated-BPTT windows.
//
// Parameters:
//   lookback (L) → context tokens the model needs before its
//                  first prediction (0 for an LSTM)
//   bptt     (T) → predicted positions per window
//
// Window i covers inputs  s[i*T       .. i*T + L + T]
//                 targets s[i*T + L+1 .. i*T + L + T + 1]
// so consecutive windows advance by T and overlap by L inputs.
//
// Example with L=0, T=3 over [a b c d e f g h]:
//   chunk 0: inputs [a b c]  targets [b c d]
//   chunk 1: inputs [d e f]  targets [e f g]
//   (h cannot be a target of a full window → dropped)
//
// A sequence of N tokens yields floor((N - L - 1) / T) windows,
// and none when N < L + 1. Partial windows are never emitted.
//
// Reference: Rust Book §8 (Slices), §13 (Iterators)

use crate::domain::chunk::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalSplitter {
    lookback: usize,
    bptt:     usize,
}

impl TemporalSplitter {
    /// Create a new TemporalSplitter.
    ///
    /// # Panics
    /// Panics if bptt == 0, because windows would never advance
    pub fn new(lookback: usize, bptt: usize) -> Self {
        assert!(bptt > 0, "bptt ({}) must be at least 1", bptt);
        Self { lookback, bptt }
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn bptt(&self) -> usize {
        self.bptt
    }

    /// Number of full windows in a sequence of `len` tokens
    pub fn num_chunks(&self, len: usize) -> usize {
        len.saturating_sub(self.lookback + 1) / self.bptt
    }

    /// Build window `index` of `tokens`, or None past the last full one
    pub fn chunk(&self, tokens: &[u32], index: usize) -> Option<Chunk> {
        if index >= self.num_chunks(tokens.len()) {
            return None;
        }
        let start  = index * self.bptt;
        let end    = start + self.lookback + self.bptt;
        let inputs = tokens[start..end].to_vec();
        let targets = tokens[start + self.lookback + 1..end + 1].to_vec();
        Some(Chunk::new(inputs, targets))
    }

    /// Lazily iterate all windows. Calling again restarts from the top.
    pub fn split<'a>(&self, tokens: &'a [u32]) -> TemporalSplits<'a> {
        TemporalSplits { splitter: *self, tokens, next: 0 }
    }
}

/// Iterator returned by [`TemporalSplitter::split`]
#[derive(Debug, Clone)]
pub struct TemporalSplits<'a> {
    splitter: TemporalSplitter,
    tokens:   &'a [u32],
    next:     usize,
}

impl Iterator for TemporalSplits<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let chunk = self.splitter.chunk(self.tokens, self.next)?;
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.splitter.num_chunks(self.tokens.len()) - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for TemporalSplits<'_> {}
