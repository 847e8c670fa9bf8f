// ============================================================
// Layer 4 - Batch Filter
// ============================================================
// Ends a pass early once the scheduler's active width falls
// below a floor. Late in an epoch only a few long documents are
// still running, and updates on 1-2 lanes are noisy and slow.
//
// The filter stops at the first narrow batch and never resumes:
// the remaining documents are abandoned for this pass. On
// `report()` it drains what was left behind (no model work) so
// the log can say how much was skipped.
//
// Usage:
//   let mut filtered = BatchFilter::new(builder.iter(), 4);
//   for batch in filtered.by_ref() { ... }
//   let report = filtered.report();

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::batch::Batch;

/// Consumed versus skipped work for one filtered pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterReport {
    pub yielded_steps:     usize,
    pub skipped_steps:     usize,
    /// Target tokens in skipped steps
    pub skipped_tokens:    usize,
    /// Lane-steps (chunks) in skipped steps
    pub skipped_sequences: usize,
}

impl FilterReport {
    /// Steps the unfiltered pass would have produced
    pub fn available_steps(&self) -> usize {
        self.yielded_steps + self.skipped_steps
    }
}

pub struct BatchFilter<I> {
    inner:     I,
    min_lanes: usize,
    truncated: bool,
    drained:   bool,
    report:    FilterReport,
}

impl<I: Iterator<Item = Result<Batch>>> BatchFilter<I> {
    pub fn new(inner: I, min_lanes: usize) -> Self {
        Self {
            inner,
            min_lanes,
            truncated: false,
            drained:   false,
            report:    FilterReport::default(),
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn skip(&mut self, batch: &Batch) {
        self.report.skipped_steps     += 1;
        self.report.skipped_tokens    += batch.target_tokens();
        self.report.skipped_sequences += batch.width();
    }

    /// Finish the accounting and return it.
    ///
    /// After truncation this consumes the rest of the inner stream.
    /// An error met while draining is logged and stops the count.
    pub fn report(&mut self) -> FilterReport {
        if self.truncated && !self.drained {
            self.drained = true;
            while let Some(item) = self.inner.next() {
                match item {
                    Ok(batch) => self.skip(&batch),
                    Err(e) => {
                        tracing::warn!("Error in the skipped tail, stopped counting it: {:#}", e);
                        break;
                    }
                }
            }
        }

        let r = self.report;
        if r.skipped_steps > 0 {
            tracing::warn!(
                "Batch floor {} cut the pass short: skipped {} of {} steps ({} sequences, {} tokens), \
                 equal to {:.1} full-width batches",
                self.min_lanes,
                r.skipped_steps,
                r.available_steps(),
                r.skipped_sequences,
                r.skipped_tokens,
                r.skipped_sequences as f64 / self.min_lanes.max(1) as f64,
            );
        }
        r
    }
}

impl<I: Iterator<Item = Result<Batch>>> Iterator for BatchFilter<I> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Result<Batch>> {
        if self.truncated {
            return None;
        }
        match self.inner.next()? {
            Ok(batch) if batch.width() < self.min_lanes => {
                tracing::info!(
                    "Cutting pass short at step {}: only {} lanes left (floor {})",
                    batch.step,
                    batch.width(),
                    self.min_lanes
                );
                self.truncated = true;
                self.skip(&batch);
                None
            }
            Ok(batch) => {
                self.report.yielded_steps += 1;
                Some(Ok(batch))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::scheduler::{BatchBuilder, SchedulerConfig};
    use crate::data::splitter::TemporalSplitter;
    use crate::data::tokenized::TokenizedDocument;
    use crate::domain::document::Document;

    fn corpus(chunk_counts: &[usize]) -> Vec<TokenizedDocument> {
        chunk_counts
            .iter()
            .enumerate()
            .map(|(i, &k)| {
                TokenizedDocument::new(
                    Document::new(format!("d{}", i + 1), (0..(2 * k + 1) as u32).collect()),
                    TemporalSplitter::new(0, 2),
                )
            })
            .collect()
    }

    fn two_lanes() -> SchedulerConfig {
        SchedulerConfig { lanes: 2, ..SchedulerConfig::default() }
    }

    #[test]
    fn test_floor_at_width_keeps_everything() {
        let docs    = corpus(&[2, 3, 1]);
        let builder = BatchBuilder::new(&docs, &two_lanes());
        let mut f   = BatchFilter::new(builder.iter(), 2);

        assert_eq!(f.by_ref().count(), 3);
        let r = f.report();
        assert_eq!(r.yielded_steps, 3);
        assert_eq!(r.skipped_steps, 0);
        assert!(!f.is_truncated());
    }

    #[test]
    fn test_floor_above_width_yields_nothing() {
        let docs    = corpus(&[2, 3, 1]);
        let builder = BatchBuilder::new(&docs, &two_lanes());
        let mut f   = BatchFilter::new(builder.iter(), 3);

        assert_eq!(f.by_ref().count(), 0);
        let r = f.report();
        assert_eq!(r.yielded_steps, 0);
        assert_eq!(r.skipped_steps, 3);
        assert_eq!(r.available_steps(), 3);
        assert_eq!(r.skipped_sequences, 6);
        assert_eq!(r.skipped_tokens, 12);
    }

    #[test]
    fn test_stops_at_first_narrow_step_and_never_resumes() {
        // Lane 1 outlives lane 0 by 3 steps
        let docs    = corpus(&[1, 4]);
        let builder = BatchBuilder::new(&docs, &two_lanes());
        let mut f   = BatchFilter::new(builder.iter(), 2);

        let kept: Vec<Batch> = f.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(kept.len(), 1);
        assert!(f.next().is_none());

        let r = f.report();
        assert_eq!(r.skipped_steps, 3);
        // Reporting twice does not double count
        assert_eq!(f.report(), r);
    }

    #[test]
    fn test_error_in_the_skipped_tail_ends_the_count() {
        let docs    = corpus(&[1, 4]);
        let builder = BatchBuilder::new(&docs, &two_lanes());
        let batches: Vec<Batch> = builder.iter().collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 4);

        let stream = vec![
            Ok(batches[0].clone()),
            Ok(batches[1].clone()),
            Err(anyhow::anyhow!("feature extraction failed for lane 1")),
            Ok(batches[2].clone()),
        ];
        let mut f = BatchFilter::new(stream.into_iter(), 2);

        assert_eq!(f.by_ref().count(), 1);
        let r = f.report();
        assert_eq!(r.yielded_steps, 1);
        assert_eq!(r.skipped_steps, 1);
    }
}
