// ============================================================
// Layer 5 - Hidden State Reorganizer
// ============================================================
// Rewrites a recurrent model's hidden state between scheduler
// steps so it lines up with the next batch's lanes.
//
// For every column j of the next batch:
//   CONTINUE → copy row `col` of the previous state (exact gather)
//   RESTART  → take row j of the model's initial state
// Previous rows that no output column asks for are dropped.
//
// Implementation: one row gather over cat([previous, initial])
//
//   previous  rows 0 .. P-1
//   initial   rows P .. P+W-1
//   output[j] = cat[ gather_indices[j] ]
//
// The state may be arbitrarily nested (an LSTM stack is
// layers × {cell, hidden}); every leaf is [lanes, dim] and the
// gather is applied leaf by leaf. A mismatch in width or shape
// between the previous and initial state aborts the run.

use anyhow::{bail, ensure, Result};
use burn::prelude::*;

use crate::domain::lane::{Mask, ReorgPlan};
use crate::ml::model::RecurrentLm;

/// Recurrent state as a tree of [lanes, dim] tensors.
#[derive(Debug, Clone)]
pub enum HiddenState<B: Backend> {
    Leaf(Tensor<B, 2>),
    Node(Vec<HiddenState<B>>),
}

impl<B: Backend> HiddenState<B> {
    /// Lane count of the first leaf, None for a leafless tree
    pub fn lanes(&self) -> Option<usize> {
        match self {
            HiddenState::Leaf(t)   => Some(t.dims()[0]),
            HiddenState::Node(cs)  => cs.iter().find_map(|c| c.lanes()),
        }
    }

    /// All leaves, depth first
    pub fn leaves(&self) -> Vec<&Tensor<B, 2>> {
        match self {
            HiddenState::Leaf(t)  => vec![t],
            HiddenState::Node(cs) => cs.iter().flat_map(|c| c.leaves()).collect(),
        }
    }

    pub fn map(self, f: &mut impl FnMut(Tensor<B, 2>) -> Tensor<B, 2>) -> Self {
        match self {
            HiddenState::Leaf(t)  => HiddenState::Leaf(f(t)),
            HiddenState::Node(cs) => HiddenState::Node(cs.into_iter().map(|c| c.map(f)).collect()),
        }
    }

    /// Cut the autodiff graph so backprop stops at this step
    pub fn detach(self) -> Self {
        self.map(&mut |t| t.detach())
    }

    fn ensure_lanes(&self, expected: usize, what: &str) -> Result<()> {
        for leaf in self.leaves() {
            let lanes = leaf.dims()[0];
            ensure!(
                lanes == expected,
                "{what} hidden state has a leaf with {lanes} lanes, expected {expected}"
            );
        }
        Ok(())
    }

    fn zip_with(
        self,
        other: Self,
        f: &mut impl FnMut(Tensor<B, 2>, Tensor<B, 2>) -> Tensor<B, 2>,
    ) -> Result<Self> {
        match (self, other) {
            (HiddenState::Leaf(a), HiddenState::Leaf(b)) => {
                let (da, db) = (a.dims()[1], b.dims()[1]);
                ensure!(da == db, "hidden state leaf has width {da} but the initial state has {db}");
                Ok(HiddenState::Leaf(f(a, b)))
            }
            (HiddenState::Node(xs), HiddenState::Node(ys)) => {
                ensure!(
                    xs.len() == ys.len(),
                    "hidden state node has {} children but the initial state has {}",
                    xs.len(),
                    ys.len()
                );
                xs.into_iter()
                    .zip(ys)
                    .map(|(x, y)| x.zip_with(y, f))
                    .collect::<Result<Vec<_>>>()
                    .map(HiddenState::Node)
            }
            _ => bail!("hidden state and initial state have different structure"),
        }
    }
}

/// Reorganise `previous` for the step described by `mask`.
///
/// `previous` is None only before the first step. `initial` must
/// already have the new step's width.
pub fn reorganize<B: Backend>(
    previous: Option<HiddenState<B>>,
    mask:     &Mask,
    initial:  HiddenState<B>,
) -> Result<HiddenState<B>> {
    let plan = mask.plan()?;
    apply_plan(previous, &plan, || initial)
}

fn apply_plan<B: Backend>(
    previous: Option<HiddenState<B>>,
    plan:     &ReorgPlan,
    initial:  impl FnOnce() -> HiddenState<B>,
) -> Result<HiddenState<B>> {
    if let Some(prev) = &previous {
        prev.ensure_lanes(plan.prev_width(), "previous")?;
    }

    if plan.is_full_reset() {
        let init = initial();
        init.ensure_lanes(plan.width(), "initial")?;
        return Ok(init);
    }

    let Some(prev) = previous else {
        bail!(
            "no hidden state to continue from, but the previous step had {} lanes",
            plan.prev_width()
        );
    };

    if plan.is_identity() {
        return Ok(prev);
    }

    let init = initial();
    init.ensure_lanes(plan.width(), "initial")?;

    let indices = plan.gather_indices();
    prev.zip_with(init, &mut |p, i| {
        let idx = Tensor::<B, 1, Int>::from_ints(indices.as_slice(), &p.device());
        Tensor::cat(vec![p, i], 0).select(0, idx)
    })
}

/// Reorganises hidden state using a model's canonical initial state.
pub struct HiddenStateReorganizer<'m, M> {
    model: &'m M,
}

impl<'m, M> HiddenStateReorganizer<'m, M> {
    pub fn new(model: &'m M) -> Self {
        Self { model }
    }

    /// The initial state is only built when some lane restarts.
    pub fn reorganize<B: Backend>(
        &self,
        previous: Option<HiddenState<B>>,
        mask:     &Mask,
        device:   &B::Device,
    ) -> Result<HiddenState<B>>
    where
        M: RecurrentLm<B>,
    {
        let plan = mask.plan()?;
        tracing::trace!(
            "Reorganising hidden state: {} → {} lanes, {} restarts",
            plan.prev_width(),
            plan.width(),
            mask.restarts()
        );
        apply_plan(previous, &plan, || self.model.init_hidden(plan.width(), device))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lane::MaskEntry::{Continue, Restart};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    /// Row r of every leaf is filled with `base + r`
    fn rows(base: f32, lanes: usize, dim: usize) -> Tensor<TestBackend, 2> {
        let data: Vec<f32> = (0..lanes)
            .flat_map(|r| std::iter::repeat(base + r as f32).take(dim))
            .collect();
        Tensor::<TestBackend, 1>::from_floats(data.as_slice(), &Default::default()).reshape([lanes, dim])
    }

    /// Two layers of {cell, hidden}
    fn lstm_like(base: f32, lanes: usize) -> HiddenState<TestBackend> {
        HiddenState::Node(
            (0..2)
                .map(|l| {
                    let b = base + 100.0 * l as f32;
                    HiddenState::Node(vec![
                        HiddenState::Leaf(rows(b, lanes, 3)),
                        HiddenState::Leaf(rows(b + 50.0, lanes, 3)),
                    ])
                })
                .collect(),
        )
    }

    fn values(t: &Tensor<TestBackend, 2>) -> Vec<f32> {
        t.clone().into_data().to_vec::<f32>().unwrap()
    }

    fn mask(prev: &[usize], lanes: &[usize], entries: &[crate::domain::lane::MaskEntry]) -> Mask {
        Mask::new(prev.to_vec(), lanes.to_vec(), entries.to_vec()).unwrap()
    }

    #[test]
    fn test_continue_rows_are_copied_exactly() {
        let prev  = lstm_like(1.0, 3);
        let init  = lstm_like(-1000.0, 3);
        let m     = mask(&[0, 1, 2], &[0, 1, 2], &[Restart, Continue, Continue]);
        let out   = reorganize(Some(prev.clone()), &m, init.clone()).unwrap();

        for ((o, p), i) in out.leaves().into_iter().zip(prev.leaves()).zip(init.leaves()) {
            let (o, p, i) = (values(o), values(p), values(i));
            // Row 0 restarted, rows 1 and 2 carried over bit for bit
            assert_eq!(o[0..3], i[0..3]);
            assert_eq!(o[3..9], p[3..9]);
        }
    }

    #[test]
    fn test_vanished_lanes_are_dropped() {
        let prev = lstm_like(1.0, 3);
        // Slot 1 died; slots 0 and 2 continue
        let m    = mask(&[0, 1, 2], &[0, 2], &[Continue, Continue]);
        let out  = reorganize(Some(prev.clone()), &m, lstm_like(0.0, 2)).unwrap();

        assert_eq!(out.lanes(), Some(2));
        let o = values(out.leaves()[0]);
        let p = values(prev.leaves()[0]);
        assert_eq!(o[0..3], p[0..3]);
        assert_eq!(o[3..6], p[6..9]);
    }

    #[test]
    fn test_full_reset_needs_no_previous_state() {
        let m   = mask(&[], &[0, 1], &[Restart, Restart]);
        let out = reorganize(None, &m, lstm_like(7.0, 2)).unwrap();
        assert_eq!(values(out.leaves()[0]), values(lstm_like(7.0, 2).leaves()[0]));
    }

    #[test]
    fn test_identity_keeps_previous_state() {
        let prev = lstm_like(3.0, 2);
        let m    = mask(&[0, 1], &[0, 1], &[Continue, Continue]);
        let out  = reorganize(Some(prev.clone()), &m, lstm_like(0.0, 2)).unwrap();
        assert_eq!(values(out.leaves()[3]), values(prev.leaves()[3]));
    }

    #[test]
    fn test_width_mismatch_is_an_error() {
        let m   = mask(&[0, 1, 2], &[0, 1], &[Continue, Continue]);
        let err = reorganize(Some(lstm_like(1.0, 2)), &m, lstm_like(0.0, 2)).unwrap_err();
        assert!(err.to_string().contains("expected 3"));
    }

    #[test]
    fn test_continue_without_previous_lane_names_the_lane() {
        let m   = Mask::new(vec![0, 1], vec![0, 5], vec![Continue, Continue]).unwrap();
        let err = reorganize(Some(lstm_like(1.0, 2)), &m, lstm_like(0.0, 2)).unwrap_err();
        assert!(err.to_string().contains("lane 5"));
    }

    #[test]
    fn test_structure_mismatch_is_an_error() {
        let m    = mask(&[0, 1], &[0, 1], &[Restart, Continue]);
        let flat = HiddenState::Leaf(rows(0.0, 2, 3));
        assert!(reorganize(Some(lstm_like(1.0, 2)), &m, flat).is_err());
    }

    #[test]
    fn test_missing_previous_state_is_an_error() {
        let m = mask(&[0, 1], &[0, 1], &[Restart, Continue]);
        assert!(reorganize(None, &m, lstm_like(0.0, 2)).is_err());
    }
}
