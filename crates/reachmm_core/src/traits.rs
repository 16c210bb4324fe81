use num_traits::{Float, FromPrimitive};
use std::fmt::{Debug, Display};

/// A trait for types that can be used as scalars in our dynamical systems.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A floating-point type usable as an interval endpoint.
///
/// On top of `Scalar`, an endpoint knows its neighbouring representable values,
/// which is all that outward rounding needs.
pub trait Endpoint: Scalar + Display + Default + Send + Sync {
    /// Smallest representable value strictly greater than `self`.
    fn next_up(self) -> Self;

    /// Largest representable value strictly less than `self`.
    fn next_down(self) -> Self;
}

/// An autonomous-in-control vector field (flow) or map.
///
/// This is what the integrators step. The embedding system is one; a plant with
/// its control input held fixed is another.
pub trait VectorField<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field (flow) or map function.
    /// x: current state
    /// t: current time
    /// out: buffer to write the result (dx/dt or x_{n+1})
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A controlled dynamical system `f(x, u, t)`.
pub trait DynamicalSystem<T: Scalar> {
    /// Dimension of the state `x`.
    fn dimension(&self) -> usize;

    /// Dimension of the control input `u`. Zero for autonomous systems.
    fn control_dimension(&self) -> usize {
        0
    }

    /// Writes `f(x, u, t)` into `out`.
    fn apply(&self, t: T, x: &[T], u: &[T], out: &mut [T]);

    /// Scratch values [`apply_with`](Self::apply_with) needs.
    fn workspace_len(&self) -> usize {
        0
    }

    /// [`apply`](Self::apply) with caller-owned scratch of at least
    /// [`workspace_len`](Self::workspace_len) values.
    fn apply_with(&self, t: T, x: &[T], u: &[T], out: &mut [T], _workspace: &mut [T]) {
        self.apply(t, x, u, out)
    }
}

/// A trait for solvers that can step a system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl VectorField<T>, t: &mut T, state: &mut [T], dt: T);
}

/// Plant with its control input frozen, seen as a plain vector field.
///
/// Used to simulate concrete closed-loop trajectories under a zero-order hold.
pub struct HeldControl<'a, S> {
    pub system: &'a S,
    pub control: &'a [f64],
}

impl<'a, S> HeldControl<'a, S> {
    pub fn new(system: &'a S, control: &'a [f64]) -> Self {
        Self { system, control }
    }
}

impl<S: DynamicalSystem<f64>> VectorField<f64> for HeldControl<'_, S> {
    fn dimension(&self) -> usize {
        self.system.dimension()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        self.system.apply(t, x, self.control, out);
    }
}

/// Converts an `f64` constant into `T`.
///
/// Every `Endpoint` is constructible from any finite `f64`; the NaN fallback only
/// exists to keep the signature infallible.
#[inline]
pub(crate) fn cast<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}
