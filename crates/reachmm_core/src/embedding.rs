//! The doubled system `d/dt [x; x̂] = [d_lower(x, x̂); d_upper(x̂, x)]`.
//!
//! Starting from `[lower; upper]` of an initial box, the first half of the
//! embedding's trajectory bounds the true reachable set from below and the
//! second half from above.

use crate::decomposition::Decomposition;
use crate::error::{ReachError, Result};
use crate::interval::IntervalBox;
use crate::traits::{Endpoint, VectorField};
use std::cell::RefCell;

/// Joint `[state; control]` buffers and decomposition workspace reused
/// across evaluations.
struct Scratch<T> {
    lo: Vec<T>,
    hi: Vec<T>,
    work: Vec<T>,
}

pub struct EmbeddingSystem<'a, T: Endpoint, D: ?Sized> {
    decomposition: &'a D,
    state_dim: usize,
    control_lo: Vec<T>,
    control_hi: Vec<T>,
    scratch: RefCell<Scratch<T>>,
}

impl<'a, T, D> EmbeddingSystem<'a, T, D>
where
    T: Endpoint,
    D: Decomposition<T> + ?Sized,
{
    /// Control bounds start at zero; see [`hold_control`](Self::hold_control).
    pub fn new(decomposition: &'a D) -> Self {
        let n = decomposition.state_dim();
        let m = decomposition.control_dim();
        Self {
            decomposition,
            state_dim: n,
            control_lo: vec![T::zero(); m],
            control_hi: vec![T::zero(); m],
            scratch: RefCell::new(Scratch {
                lo: vec![T::zero(); n + m],
                hi: vec![T::zero(); n + m],
                work: vec![T::zero(); decomposition.workspace_len()],
            }),
        }
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn control_dim(&self) -> usize {
        self.control_lo.len()
    }

    /// Fixes the control box used until the next call (zero-order hold).
    pub fn hold_control(&mut self, control: &IntervalBox<T>) -> Result<()> {
        ReachError::check_len("control bounds", self.control_dim(), control.len())?;
        self.control_lo.copy_from_slice(control.lower_slice());
        self.control_hi.copy_from_slice(control.upper_slice());
        Ok(())
    }

    /// Embedding state `[lower; upper]` of a box.
    pub fn lift(&self, state: &IntervalBox<T>) -> Result<Vec<T>> {
        ReachError::check_len("initial box", self.state_dim, state.len())?;
        let mut doubled = Vec::with_capacity(2 * self.state_dim);
        doubled.extend_from_slice(state.lower_slice());
        doubled.extend_from_slice(state.upper_slice());
        Ok(doubled)
    }

    /// Box described by an embedding state. Crossed or NaN bounds are an
    /// [`InvalidInterval`](ReachError::InvalidInterval) error.
    pub fn project(&self, doubled: &[T]) -> Result<IntervalBox<T>> {
        ReachError::check_len("embedding state", 2 * self.state_dim, doubled.len())?;
        let (lower, upper) = doubled.split_at(self.state_dim);
        IntervalBox::from_slices(lower, upper)
    }
}

impl<T, D> VectorField<T> for EmbeddingSystem<'_, T, D>
where
    T: Endpoint,
    D: Decomposition<T> + ?Sized,
{
    fn dimension(&self) -> usize {
        2 * self.state_dim
    }

    fn apply(&self, t: T, x: &[T], out: &mut [T]) {
        let n = self.state_dim;
        let mut scratch = self.scratch.borrow_mut();
        let Scratch { lo, hi, work } = &mut *scratch;
        lo[..n].copy_from_slice(&x[..n]);
        lo[n..].copy_from_slice(&self.control_lo);
        hi[..n].copy_from_slice(&x[n..]);
        hi[n..].copy_from_slice(&self.control_hi);

        let (lower, upper) = out.split_at_mut(n);
        self.decomposition.d_lower_with(t, lo, hi, lower, work);
        self.decomposition.d_upper_with(t, hi, lo, upper, work);
    }
}
