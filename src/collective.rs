//! Two-phase global reductions.
//!
//! In a distributed run every inner product and norm is a local partial sum
//! followed by a collective sum over the process group. Pipelined algorithms
//! split that into an *issue* phase, which posts the local partials, and a
//! *complete* phase, which blocks until the reduced value is available. All
//! values issued before the first completion travel in the same collective,
//! so a step that issues several reductions pays for a single synchronization.
//!
//! [`ReductionContext`] models exactly this with explicit [`Request`] handles.
//! The process group itself is abstracted by [`ReductionGroup`]; the crate ships
//! the single-process [`LocalGroup`].

use crate::error::{ArnoldiError, ArnoldiErrorKind};
use std::collections::BTreeMap;

/// A process group able to sum a buffer of partial values across all members.
///
/// Every member must call [`ReductionGroup::all_reduce_sum`] the same number of
/// times, in the same order, with buffers of the same length.
pub trait ReductionGroup {
    /// Replaces each entry of `values` by its sum over the group.
    fn all_reduce_sum(&self, values: &mut [f64]);

    /// Number of cooperating processes.
    fn size(&self) -> usize {
        1
    }
}

/// The trivial group of one process: the local partial is already the total.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalGroup;

impl ReductionGroup for LocalGroup {
    #[inline]
    fn all_reduce_sum(&self, _values: &mut [f64]) {}
}

/// Handle to a reduction that has been issued but not yet completed.
///
/// A request is consumed by [`ReductionContext::complete`], so each issued value
/// is read exactly once.
#[derive(Debug)]
#[must_use = "an issued reduction must be completed"]
pub struct Request {
    batch: u64,
    offset: usize,
    len: usize,
}

impl Request {
    /// Number of scalars this request will yield.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug)]
struct ReducedBatch {
    values: Vec<f64>,
    outstanding: usize,
}

/// Batches issued partial sums and reduces them lazily, one collective per batch.
#[derive(Debug)]
pub struct ReductionContext<G: ReductionGroup = LocalGroup> {
    group: G,
    open_batch: u64,
    open_values: Vec<f64>,
    open_requests: usize,
    reduced: BTreeMap<u64, ReducedBatch>,
    synchronizations: usize,
}

impl Default for ReductionContext<LocalGroup> {
    fn default() -> Self {
        Self::new(LocalGroup)
    }
}

impl<G: ReductionGroup> ReductionContext<G> {
    pub fn new(group: G) -> Self {
        Self {
            group,
            open_batch: 0,
            open_values: Vec::new(),
            open_requests: 0,
            reduced: BTreeMap::new(),
            synchronizations: 0,
        }
    }

    pub fn group(&self) -> &G {
        &self.group
    }

    /// Number of collective reductions performed so far.
    pub fn synchronizations(&self) -> usize {
        self.synchronizations
    }

    /// Posts local partial values; nothing is communicated yet.
    pub fn issue(&mut self, local: &[f64]) -> Request {
        let request = Request {
            batch: self.open_batch,
            offset: self.open_values.len(),
            len: local.len(),
        };
        self.open_values.extend_from_slice(local);
        self.open_requests += 1;
        request
    }

    /// Returns the globally reduced values of `request`.
    ///
    /// Completing a request of the open batch flushes the whole batch through one
    /// `all_reduce_sum`; later requests of the same batch are served from it.
    ///
    /// Fails if `request` was issued by another context whose batch numbering
    /// does not match this one.
    pub fn complete(&mut self, request: Request) -> Result<Vec<f64>, ArnoldiError> {
        if request.batch == self.open_batch {
            self.flush();
        }
        let foreign = || {
            ArnoldiError::from(ArnoldiErrorKind::InputError(format!(
                "reduction request of batch {} was not issued by this context",
                request.batch
            )))
        };
        let batch = self.reduced.get_mut(&request.batch).ok_or_else(foreign)?;
        let values = batch
            .values
            .get(request.offset..request.offset + request.len)
            .ok_or_else(foreign)?
            .to_vec();
        batch.outstanding = batch.outstanding.saturating_sub(1);
        if batch.outstanding == 0 {
            self.reduced.remove(&request.batch);
        }
        Ok(values)
    }

    /// Convenience for a reduction that is completed immediately.
    pub fn reduce(&mut self, local: &[f64]) -> Result<Vec<f64>, ArnoldiError> {
        let request = self.issue(local);
        self.complete(request)
    }

    fn flush(&mut self) {
        let mut values = std::mem::take(&mut self.open_values);
        self.group.all_reduce_sum(&mut values);
        self.synchronizations += 1;
        self.reduced.insert(
            self.open_batch,
            ReducedBatch {
                values,
                outstanding: self.open_requests,
            },
        );
        self.open_batch += 1;
        self.open_requests = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Pretends to be a group of `copies` processes holding identical partials.
    struct ReplicatedGroup {
        copies: usize,
        calls: Cell<usize>,
    }

    impl ReductionGroup for ReplicatedGroup {
        fn all_reduce_sum(&self, values: &mut [f64]) {
            self.calls.set(self.calls.get() + 1);
            for v in values.iter_mut() {
                *v *= self.copies as f64;
            }
        }

        fn size(&self) -> usize {
            self.copies
        }
    }

    #[test]
    fn test_batched_requests_share_one_synchronization() {
        let mut ctx = ReductionContext::new(ReplicatedGroup {
            copies: 3,
            calls: Cell::new(0),
        });
        let a = ctx.issue(&[1.0, 2.0]);
        let b = ctx.issue(&[5.0]);
        assert_eq!(ctx.synchronizations(), 0);

        assert_eq!(ctx.complete(a).unwrap(), vec![3.0, 6.0]);
        assert_eq!(ctx.complete(b).unwrap(), vec![15.0]);
        assert_eq!(ctx.synchronizations(), 1);
        assert_eq!(ctx.group().calls.get(), 1);
    }

    #[test]
    fn test_new_issues_after_flush_open_a_new_batch() {
        let mut ctx = ReductionContext::default();
        let a = ctx.issue(&[1.0]);
        assert_eq!(ctx.complete(a).unwrap(), vec![1.0]);
        let b = ctx.issue(&[2.0]);
        let c = ctx.issue(&[3.0, 4.0]);
        assert_eq!(c.len(), 2);
        assert_eq!(ctx.complete(c).unwrap(), vec![3.0, 4.0]);
        assert_eq!(ctx.complete(b).unwrap(), vec![2.0]);
        assert_eq!(ctx.synchronizations(), 2);
    }

    #[test]
    fn test_interleaved_batches() {
        let mut ctx = ReductionContext::default();
        let a = ctx.issue(&[1.0]);
        let b = ctx.issue(&[2.0]);
        assert_eq!(ctx.complete(a).unwrap(), vec![1.0]);
        // `b` belongs to the flushed batch; `c` opens a new one.
        let c = ctx.issue(&[3.0]);
        assert_eq!(ctx.complete(b).unwrap(), vec![2.0]);
        assert_eq!(ctx.synchronizations(), 1);
        assert_eq!(ctx.reduce(&[4.0]).unwrap(), vec![4.0]);
        assert_eq!(ctx.complete(c).unwrap(), vec![3.0]);
        assert_eq!(ctx.synchronizations(), 2);
    }

    #[test]
    fn test_request_from_another_context_is_rejected() {
        let mut first = ReductionContext::default();
        let mut second = ReductionContext::default();
        let a = first.issue(&[1.0]);
        assert_eq!(first.complete(a).unwrap(), vec![1.0]);

        // `b` belongs to batch 1 of `first`; `second` never issued into its
        // own batch 1.
        let b = first.issue(&[2.0]);
        let c = second.issue(&[3.0]);
        assert_eq!(second.complete(c).unwrap(), vec![3.0]);
        let err = second.complete(b).unwrap_err();
        assert!(matches!(err.kind(), ArnoldiErrorKind::InputError(_)));
    }
}
