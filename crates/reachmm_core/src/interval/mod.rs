//! Array-valued intervals.
//!
//! An [`IntervalBox`] pairs two same-shaped arrays of lower and upper bounds.
//! Boxes are immutable: every operation in [`ops`] returns a fresh box, and all
//! endpoints produced by arithmetic are rounded outward so that the result
//! contains every real value the operation can take on the operand boxes.

pub mod broadcast;
pub mod ops;
pub(crate) mod rounding;

use crate::error::{ReachError, Result};
use crate::traits::{cast, Endpoint};
use ndarray::{Array1, ArrayD, IxDyn, Zip};
use std::fmt;

pub use broadcast::broadcast_shape;

/// A box `[lower, upper]` of elementwise bounds.
///
/// Invariant: `lower` and `upper` share a shape, hold no NaN, satisfy
/// `lower <= upper` everywhere, and are stored in standard (row-major) layout.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalBox<T: Endpoint = f64> {
    lower: ArrayD<T>,
    upper: ArrayD<T>,
}

impl<T: Endpoint> IntervalBox<T> {
    /// Builds a box from explicit bounds, validating the invariant.
    pub fn new(lower: ArrayD<T>, upper: ArrayD<T>) -> Result<Self> {
        if lower.shape() != upper.shape() {
            return Err(ReachError::Shape {
                lhs: lower.shape().to_vec(),
                rhs: upper.shape().to_vec(),
            });
        }
        let lower = lower.as_standard_layout().into_owned();
        let upper = upper.as_standard_layout().into_owned();
        for (index, (&l, &u)) in lower.iter().zip(upper.iter()).enumerate() {
            if l.is_nan() || u.is_nan() || l > u {
                return Err(invalid(index, l, u));
            }
        }
        Ok(Self { lower, upper })
    }

    /// One-dimensional box from bound slices.
    pub fn from_slices(lower: &[T], upper: &[T]) -> Result<Self> {
        ReachError::check_len("upper bounds", lower.len(), upper.len())?;
        Self::new(
            Array1::from(lower.to_vec()).into_dyn(),
            Array1::from(upper.to_vec()).into_dyn(),
        )
    }

    /// Zero-width box holding exact values.
    pub fn point(values: ArrayD<T>) -> Result<Self> {
        Self::new(values.clone(), values)
    }

    /// Zero-width one-dimensional box.
    pub fn point_slice(values: &[T]) -> Result<Self> {
        Self::from_slices(values, values)
    }

    /// The whole real line at every index of `shape`.
    pub fn entire(shape: &[usize]) -> Self {
        Self {
            lower: ArrayD::from_elem(IxDyn(shape), T::neg_infinity()),
            upper: ArrayD::from_elem(IxDyn(shape), T::infinity()),
        }
    }

    /// Assembles a box produced by an operation whose rounding already guarantees
    /// the invariant.
    pub(crate) fn from_parts(lower: ArrayD<T>, upper: ArrayD<T>) -> Self {
        debug_assert_eq!(lower.shape(), upper.shape());
        debug_assert!(lower.iter().zip(upper.iter()).all(|(l, u)| l <= u));
        Self { lower, upper }
    }

    pub fn lower(&self) -> &ArrayD<T> {
        &self.lower
    }

    pub fn upper(&self) -> &ArrayD<T> {
        &self.upper
    }

    /// Lower bounds in row-major order.
    pub fn lower_slice(&self) -> &[T] {
        // Standard layout is part of the invariant.
        self.lower.as_slice().unwrap_or_default()
    }

    /// Upper bounds in row-major order.
    pub fn upper_slice(&self) -> &[T] {
        self.upper.as_slice().unwrap_or_default()
    }

    pub fn into_bounds(self) -> (ArrayD<T>, ArrayD<T>) {
        (self.lower, self.upper)
    }

    pub fn shape(&self) -> &[usize] {
        self.lower.shape()
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Bounds of the element at flat (row-major) `index`.
    pub fn component(&self, index: usize) -> Option<(T, T)> {
        let lower = self.lower_slice().get(index)?;
        let upper = self.upper_slice().get(index)?;
        Some((*lower, *upper))
    }

    /// `upper - lower`, rounded up.
    pub fn width(&self) -> ArrayD<T> {
        Zip::from(&self.lower)
            .and(&self.upper)
            .map_collect(|&l, &u| rounding::sub_up(u, l))
    }

    /// Largest width over all elements; zero for an empty box.
    pub fn max_width(&self) -> T {
        self.width().iter().fold(T::zero(), |acc, &w| acc.max(w))
    }

    /// Midpoints `(lower + upper) / 2`, clamped into the box.
    pub fn midpoint(&self) -> ArrayD<T> {
        let half: T = cast(0.5);
        Zip::from(&self.lower).and(&self.upper).map_collect(|&l, &u| {
            if l.is_finite() && u.is_finite() {
                (l * half + u * half).max(l).min(u)
            } else if l.is_finite() {
                l
            } else if u.is_finite() {
                u
            } else {
                T::zero()
            }
        })
    }

    pub fn is_degenerate(&self) -> bool {
        self.lower == self.upper
    }

    /// True when every bound is finite.
    pub fn is_bounded(&self) -> bool {
        self.lower.iter().chain(self.upper.iter()).all(|v| v.is_finite())
    }

    /// Whether the concrete array lies inside the box elementwise.
    pub fn contains(&self, values: &ArrayD<T>) -> bool {
        values.shape() == self.shape()
            && Zip::from(&self.lower)
                .and(&self.upper)
                .and(values)
                .all(|&l, &u, &v| l <= v && v <= u)
    }

    /// Whether the flat slice lies inside the box.
    pub fn contains_slice(&self, values: &[T]) -> bool {
        values.len() == self.len()
            && self
                .lower_slice()
                .iter()
                .zip(self.upper_slice())
                .zip(values)
                .all(|((&l, &u), &v)| l <= v && v <= u)
    }

    /// Whether `other` is a subset of `self`.
    pub fn contains_box(&self, other: &Self) -> bool {
        other.shape() == self.shape()
            && Zip::from(&self.lower)
                .and(&self.upper)
                .and(&other.lower)
                .and(&other.upper)
                .all(|&l, &u, &ol, &ou| l <= ol && ou <= u)
    }

    /// Expands every bound outward by `eps >= 0`.
    pub fn widen(&self, eps: T) -> Result<Self> {
        if eps.is_nan() || eps < T::zero() {
            return Err(ReachError::domain("widen", format!("negative radius {eps}")));
        }
        Ok(Self::from_parts(
            self.lower.mapv(|l| rounding::sub_down(l, eps)),
            self.upper.mapv(|u| rounding::add_up(u, eps)),
        ))
    }

    /// Splits a one-dimensional box into a uniform grid of sub-boxes,
    /// `splits[i]` pieces along component `i`. Sub-boxes overlap only on shared
    /// faces and their union is the original box.
    pub fn partition(&self, splits: &[usize]) -> Result<Vec<Self>> {
        if self.lower.ndim() != 1 {
            return Err(ReachError::Shape {
                lhs: self.shape().to_vec(),
                rhs: vec![splits.len()],
            });
        }
        ReachError::check_len("partition splits", self.len(), splits.len())?;
        if splits.iter().any(|&s| s == 0) {
            return Err(ReachError::Settings(
                "every component needs at least one partition".to_string(),
            ));
        }
        if !self.is_bounded() {
            return Err(ReachError::domain(
                "partition",
                "cannot partition an unbounded box",
            ));
        }

        // Cut points per component; the outer cuts are the original bounds.
        let cuts: Vec<Vec<T>> = (0..self.len())
            .map(|i| {
                let (l, u) = (self.lower_slice()[i], self.upper_slice()[i]);
                let pieces = splits[i];
                (0..=pieces)
                    .map(|k| match k {
                        0 => l,
                        k if k == pieces => u,
                        k => {
                            let frac: T = cast(k as f64 / pieces as f64);
                            (l + (u - l) * frac).max(l).min(u)
                        }
                    })
                    .collect()
            })
            .collect();

        let total: usize = splits.iter().product();
        let mut parts = Vec::with_capacity(total);
        let mut counter = vec![0usize; splits.len()];
        for _ in 0..total {
            let lower: Vec<T> = counter.iter().enumerate().map(|(i, &k)| cuts[i][k]).collect();
            let upper: Vec<T> = counter
                .iter()
                .enumerate()
                .map(|(i, &k)| cuts[i][k + 1])
                .collect();
            parts.push(Self::from_slices(&lower, &upper)?);

            for (digit, &limit) in counter.iter_mut().zip(splits).rev() {
                *digit += 1;
                if *digit < limit {
                    break;
                }
                *digit = 0;
            }
        }
        Ok(parts)
    }
}

fn invalid<T: Endpoint>(index: usize, lower: T, upper: T) -> ReachError {
    ReachError::InvalidInterval {
        index,
        lower: lower.to_f64().unwrap_or(f64::NAN),
        upper: upper.to_f64().unwrap_or(f64::NAN),
    }
}

impl<T: Endpoint> fmt::Display for IntervalBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (l, u)) in self.lower.iter().zip(self.upper.iter()).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[{l}, {u}]")?;
        }
        write!(f, "]")
    }
}
