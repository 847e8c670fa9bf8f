// ============================================================
// Layer 4 - Multi-Stream Batch Scheduler (BatchBuilder)
// ============================================================
// Multiplexes K documents over B parallel lanes, one BPTT
// chunk per lane per step.
//
// Example with B=2 and documents d1 (2 chunks), d2 (3 chunks),
// d3 (1 chunk):
//
//   step   lane 0          lane 1
//   0      d1[0] RESTART   d2[0] RESTART
//   1      d1[1] CONTINUE  d2[1] CONTINUE
//   2      d3[0] RESTART   d2[2] CONTINUE
//   3      DEAD            DEAD            → iteration ends
//
// Lanes live in a small arena and refer to documents by index
// into the corpus slice, never by reference. The queue is the
// corpus order, optionally shuffled once at construction with a
// seeded StdRng, so a fixed seed replays the same schedule.
//
// Two hidden-state policies:
//   Discard → a lane starting a new document restarts its state
//   Carry   → the new document inherits whatever state the lane
//             held (documents are concatenated per lane)
//
// Lane order is slot order. Dead lanes drop out and survivors
// keep their relative order, so the batch can only shrink.
//
// Reference: Rust Book §13 (Iterators), §17 (State Pattern)
//            rand crate documentation (SeedableRng)

use anyhow::{Context, Result};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::batch::Batch;
use crate::domain::lane::{LaneState, Mask, MaskEntry};
use crate::domain::traits::ChunkSource;

/// What happens to hidden state where a lane switches documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatePolicy {
    Discard,
    Carry,
}

impl StatePolicy {
    /// `discard_h` flag as used on the command line
    pub fn from_discard_h(discard_h: bool) -> Self {
        if discard_h { StatePolicy::Discard } else { StatePolicy::Carry }
    }
}

/// What happens when a chunk's feature extraction fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureFailurePolicy {
    /// Stop the pass with an error naming the lane and document
    Abort,
    /// Log a warning and kill the lane for the rest of the pass
    RetireLane,
}

/// Scheduler settings shared by every entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of lanes (maximum batch width)
    pub lanes: usize,

    /// Hidden-state policy at document boundaries
    pub discard_h: bool,

    /// Shuffle the document queue once with this seed
    pub shuffle_seed: Option<u64>,

    pub on_feature_error: FeatureFailurePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lanes:            20,
            discard_h:        true,
            shuffle_seed:     None,
            on_feature_error: FeatureFailurePolicy::Abort,
        }
    }
}

// ─── BatchBuilder ─────────────────────────────────────────────────────────────
/// Schedules a borrowed corpus of chunk sources over fixed lanes.
pub struct BatchBuilder<'a, S> {
    sources:          &'a [S],
    order:            Vec<usize>,
    lanes:            usize,
    policy:           StatePolicy,
    on_feature_error: FeatureFailurePolicy,
}

impl<'a, S: ChunkSource> BatchBuilder<'a, S> {
    /// # Panics
    /// Panics if `cfg.lanes == 0`
    pub fn new(sources: &'a [S], cfg: &SchedulerConfig) -> Self {
        assert!(cfg.lanes > 0, "lane count must be at least 1");

        let mut order: Vec<usize> = (0..sources.len()).collect();
        if let Some(seed) = cfg.shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }

        let usable = sources.iter().filter(|s| s.num_chunks() > 0).count();
        tracing::debug!(
            "Scheduler: {} documents ({} usable), {} lanes, {:?}",
            sources.len(),
            usable,
            cfg.lanes,
            StatePolicy::from_discard_h(cfg.discard_h),
        );

        Self {
            sources,
            order,
            lanes: cfg.lanes,
            policy: StatePolicy::from_discard_h(cfg.discard_h),
            on_feature_error: cfg.on_feature_error,
        }
    }

    /// Document indices in queue order
    pub fn queue(&self) -> &[usize] {
        &self.order
    }

    /// Total chunks over the corpus, i.e. lane-steps of a full pass
    pub fn total_chunks(&self) -> usize {
        self.sources.iter().map(|s| s.num_chunks()).sum()
    }

    /// Start a fresh pass over the queue
    pub fn iter(&self) -> Batches<'_, 'a, S> {
        Batches::new(self)
    }
}

impl<'b, 'a, S: ChunkSource> IntoIterator for &'b BatchBuilder<'a, S> {
    type Item     = Result<Batch>;
    type IntoIter = Batches<'b, 'a, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ─── Lane ─────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
struct Lane {
    slot:       usize,
    state:      LaneState,
    doc:        Option<usize>,
    next_chunk: usize,
}

impl Lane {
    fn empty(slot: usize) -> Self {
        Self { slot, state: LaneState::Empty, doc: None, next_chunk: 0 }
    }

    fn retire(&mut self) {
        self.state = LaneState::Dead;
        self.doc   = None;
    }
}

// ─── Batches ──────────────────────────────────────────────────────────────────
/// One pass of the scheduler. Yields until every lane is dead,
/// or stops after the first error.
pub struct Batches<'b, 'a, S> {
    builder:    &'b BatchBuilder<'a, S>,
    lanes:      Vec<Lane>,
    queue_pos:  usize,
    prev_lanes: Vec<usize>,
    step:       usize,
    done:       bool,
}

impl<'b, 'a, S: ChunkSource> Batches<'b, 'a, S> {
    fn new(builder: &'b BatchBuilder<'a, S>) -> Self {
        let mut it = Self {
            builder,
            lanes:      (0..builder.lanes).map(Lane::empty).collect(),
            queue_pos:  0,
            prev_lanes: Vec::new(),
            step:       0,
            done:       false,
        };

        // EMPTY → RESTART for as many lanes as there are usable documents
        for i in 0..it.lanes.len() {
            match it.pop_document() {
                Some(doc) => {
                    let lane = &mut it.lanes[i];
                    lane.doc        = Some(doc);
                    lane.next_chunk = 0;
                    lane.state      = LaneState::Restart;
                }
                None => it.lanes[i].retire(),
            }
        }

        let width = it.active_lanes();
        if width < builder.lanes {
            tracing::debug!("Only {} documents available, starting with {} lanes", width, width);
        }
        it
    }

    /// Lanes that are not dead
    pub fn active_lanes(&self) -> usize {
        self.lanes.iter().filter(|l| l.state != LaneState::Dead).count()
    }

    /// Next queued document that yields at least one chunk
    fn pop_document(&mut self) -> Option<usize> {
        while self.queue_pos < self.builder.order.len() {
            let doc = self.builder.order[self.queue_pos];
            self.queue_pos += 1;
            if self.builder.sources[doc].num_chunks() > 0 {
                return Some(doc);
            }
            tracing::debug!(
                "Skipping '{}': too short for a single chunk",
                self.builder.sources[doc].id()
            );
        }
        None
    }

    /// Move lane `i` to its next chunk, returning the document,
    /// chunk index and the state it emits with. None means the
    /// lane just died.
    fn advance(&mut self, i: usize) -> Option<(usize, usize, LaneState)> {
        let lane = &self.lanes[i];
        let doc  = lane.doc?;

        if lane.next_chunk == 0 {
            return Some((doc, 0, LaneState::Restart));
        }
        if lane.next_chunk < self.builder.sources[doc].num_chunks() {
            return Some((doc, lane.next_chunk, LaneState::Continue));
        }

        // Current document exhausted: swap in the next one or die
        match self.pop_document() {
            Some(next) => {
                let lane = &mut self.lanes[i];
                lane.doc        = Some(next);
                lane.next_chunk = 0;
                Some((next, 0, LaneState::Restart))
            }
            None => {
                self.lanes[i].retire();
                None
            }
        }
    }

    fn produce(&mut self) -> Result<Option<Batch>> {
        let mut slots     = Vec::new();
        let mut states    = Vec::new();
        let mut documents = Vec::new();
        let mut chunks    = Vec::new();

        for i in 0..self.lanes.len() {
            if self.lanes[i].state == LaneState::Dead {
                continue;
            }
            let Some((doc, index, state)) = self.advance(i) else {
                continue;
            };

            let source = &self.builder.sources[doc];
            let slot   = self.lanes[i].slot;
            let chunk  = match source.chunk(index) {
                Ok(chunk) => chunk,
                Err(e) => match self.builder.on_feature_error {
                    FeatureFailurePolicy::Abort => {
                        return Err(e).with_context(|| {
                            format!(
                                "lane {} could not produce chunk {} of '{}' at step {}",
                                slot, index, source.id(), self.step
                            )
                        });
                    }
                    FeatureFailurePolicy::RetireLane => {
                        tracing::warn!(
                            "Retiring lane {} after failure on '{}' chunk {}: {:#}",
                            slot, source.id(), index, e
                        );
                        self.lanes[i].retire();
                        continue;
                    }
                },
            };

            let lane = &mut self.lanes[i];
            lane.next_chunk = index + 1;
            lane.state      = state;

            slots.push(slot);
            states.push(state);
            documents.push(doc);
            chunks.push(chunk);
        }

        if chunks.is_empty() {
            return Ok(None);
        }

        let entries: Vec<MaskEntry> = slots
            .iter()
            .zip(&states)
            .map(|(slot, state)| match (state, self.builder.policy) {
                (LaneState::Continue, _) => MaskEntry::Continue,
                // A lane that existed last step hands its state to the next document
                (_, StatePolicy::Carry) if self.prev_lanes.contains(slot) => MaskEntry::Continue,
                _ => MaskEntry::Restart,
            })
            .collect();

        let prev_lanes = std::mem::replace(&mut self.prev_lanes, slots.clone());
        let mask       = Mask::new(prev_lanes, slots.clone(), entries)?;

        let batch = Batch { step: self.step, lanes: slots, states, documents, chunks, mask };
        self.step += 1;
        Ok(Some(batch))
    }
}

impl<S: ChunkSource> Iterator for Batches<'_, '_, S> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Result<Batch>> {
        if self.done {
            return None;
        }
        match self.produce() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                tracing::debug!("Scheduler finished after {} steps", self.step);
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
