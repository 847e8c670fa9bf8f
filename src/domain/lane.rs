// ============================================================
// Layer 3 - Lanes and the Continuation Mask
// ============================================================
// A lane is one of B fixed slots of a batch. Each lane runs a
// small state machine while the scheduler feeds it documents:
//
//   EMPTY ──► RESTART ──► CONTINUE ──► RESTART (next document)
//                │            │
//                └────────────┴──────► DEAD   (queue exhausted)
//
// DEAD is terminal: a dead lane leaves the batch for good and
// the active width shrinks. Lanes are never added mid-run.
//
// Every emitted batch carries a Mask telling the hidden-state
// reorganizer, per active lane, whether to carry the lane's
// previous state or start from the model's initial state,
// together with the slot ids of the previous step so it can
// find where each surviving lane used to sit.
//
// Reference: Rust Book §6 (Enums and Pattern Matching)

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

/// Per-lane scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LaneState {
    /// Not yet given a document
    Empty,
    /// Emitting chunk 0 of a freshly assigned document
    Restart,
    /// Emitting a later chunk of the same document
    Continue,
    /// No documents left for this lane
    Dead,
}

/// What the reorganizer does with one active lane's hidden state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaskEntry {
    /// Keep the state this lane had after the previous step
    Continue,
    /// Replace with the model's canonical initial state
    Restart,
}

/// Continuation mask for one scheduler step.
///
/// `lanes` and `entries` are aligned with the batch columns.
/// `prev_lanes` lists the slot ids of the previous step's
/// columns, so its length is the width the incoming hidden
/// state must have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    prev_lanes: Vec<usize>,
    lanes:      Vec<usize>,
    entries:    Vec<MaskEntry>,
}

impl Mask {
    pub fn new(prev_lanes: Vec<usize>, lanes: Vec<usize>, entries: Vec<MaskEntry>) -> Result<Self> {
        ensure!(
            lanes.len() == entries.len(),
            "mask has {} lanes but {} entries",
            lanes.len(),
            entries.len()
        );
        Ok(Self { prev_lanes, lanes, entries })
    }

    /// Active width of this step
    pub fn width(&self) -> usize {
        self.lanes.len()
    }

    /// Width the hidden state must have before reorganisation
    pub fn prev_width(&self) -> usize {
        self.prev_lanes.len()
    }

    pub fn lanes(&self) -> &[usize] {
        &self.lanes
    }

    pub fn prev_lanes(&self) -> &[usize] {
        &self.prev_lanes
    }

    pub fn entries(&self) -> &[MaskEntry] {
        &self.entries
    }

    pub fn restarts(&self) -> usize {
        self.entries.iter().filter(|e| **e == MaskEntry::Restart).count()
    }

    /// Resolve the mask into a gather plan over the previous state.
    ///
    /// Fails when a CONTINUE lane did not exist in the previous
    /// step, or when surviving lanes would be reordered. Both mean
    /// the scheduler and the reorganizer are out of sync.
    pub fn plan(&self) -> Result<ReorgPlan> {
        let mut sources  = Vec::with_capacity(self.entries.len());
        let mut last_col = None;

        for (&lane, &entry) in self.lanes.iter().zip(&self.entries) {
            match entry {
                MaskEntry::Restart => sources.push(LaneSource::Initial),
                MaskEntry::Continue => {
                    let Some(col) = self.prev_lanes.iter().position(|&p| p == lane) else {
                        bail!(
                            "lane {lane} is marked CONTINUE but was not active in the previous step \
                             (previous lanes: {:?})",
                            self.prev_lanes
                        );
                    };
                    if let Some(last) = last_col {
                        ensure!(
                            col > last,
                            "lane {lane} would move from column {col} behind column {last}; \
                             surviving lanes must keep their order"
                        );
                    }
                    last_col = Some(col);
                    sources.push(LaneSource::Previous(col));
                }
            }
        }

        Ok(ReorgPlan { prev_width: self.prev_lanes.len(), sources })
    }
}

/// Where one output lane of the reorganised state comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneSource {
    /// Column of the previous hidden state
    Previous(usize),
    /// Same column of the initial hidden state
    Initial,
}

/// A validated, tensor-free description of one reorganisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgPlan {
    prev_width: usize,
    sources:    Vec<LaneSource>,
}

impl ReorgPlan {
    pub fn prev_width(&self) -> usize {
        self.prev_width
    }

    pub fn width(&self) -> usize {
        self.sources.len()
    }

    pub fn sources(&self) -> &[LaneSource] {
        &self.sources
    }

    /// Every output lane is a fresh initial state
    pub fn is_full_reset(&self) -> bool {
        self.sources.iter().all(|s| *s == LaneSource::Initial)
    }

    /// Output equals the previous state column for column
    pub fn is_identity(&self) -> bool {
        self.prev_width == self.sources.len()
            && self
                .sources
                .iter()
                .enumerate()
                .all(|(i, s)| *s == LaneSource::Previous(i))
    }

    /// Row indices into `cat([previous, initial])` producing the output
    pub fn gather_indices(&self) -> Vec<i32> {
        self.sources
            .iter()
            .enumerate()
            .map(|(j, s)| match s {
                LaneSource::Previous(col) => *col as i32,
                LaneSource::Initial       => (self.prev_width + j) as i32,
            })
            .collect()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use MaskEntry::{Continue, Restart};

    #[test]
    fn test_plan_maps_survivors_to_previous_columns() {
        // Lane 1 died, lanes 0 and 2 survive; lane 2 starts a new document
        let mask = Mask::new(vec![0, 1, 2], vec![0, 2], vec![Continue, Restart]).unwrap();
        let plan = mask.plan().unwrap();

        assert_eq!(plan.prev_width(), 3);
        assert_eq!(plan.sources(), &[LaneSource::Previous(0), LaneSource::Initial]);
        // Initial rows are appended after the 3 previous rows
        assert_eq!(plan.gather_indices(), vec![0, 4]);
    }

    #[test]
    fn test_identity_and_full_reset() {
        let same = Mask::new(vec![0, 1], vec![0, 1], vec![Continue, Continue]).unwrap();
        assert!(same.plan().unwrap().is_identity());

        let fresh = Mask::new(vec![], vec![0, 1], vec![Restart, Restart]).unwrap();
        let plan  = fresh.plan().unwrap();
        assert!(plan.is_full_reset());
        assert!(!plan.is_identity());
    }

    #[test]
    fn test_continue_without_previous_lane_is_an_error() {
        let mask = Mask::new(vec![0], vec![0, 1], vec![Continue, Continue]).unwrap();
        let err  = mask.plan().unwrap_err().to_string();
        assert!(err.contains("lane 1"));
    }

    #[test]
    fn test_reordering_survivors_is_an_error() {
        let mask = Mask::new(vec![0, 1], vec![1, 0], vec![Continue, Continue]).unwrap();
        assert!(mask.plan().is_err());
    }

    #[test]
    fn test_entries_must_match_lanes() {
        assert!(Mask::new(vec![], vec![0, 1], vec![Restart]).is_err());
    }
}
