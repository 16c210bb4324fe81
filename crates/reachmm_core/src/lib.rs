pub mod autodiff;
pub mod controller;
pub mod decomposition;
pub mod embedding;
pub mod equation_engine;
pub mod error;
pub mod interval;
pub mod interval_dual;
pub mod operand;
pub mod propagator;
pub mod solvers;
/// The `reachmm_core` crate computes guaranteed enclosures of reachable sets for
/// dynamical systems with (possibly neural-network) feedback controllers.
///
/// Key components:
/// - **Interval**: `IntervalBox`, array-valued intervals with outward-rounded,
///   broadcasting operations.
/// - **IntervalDual**: interval-valued dual numbers that bound Jacobians over whole boxes.
/// - **Operand**: explicit concrete/interval dispatch over the same operations.
/// - **Decomposition**: mixed-monotone decomposition functions, given directly or
///   derived from Jacobian signs.
/// - **Embedding / Propagator**: the doubled system and the run loop that steps it
///   under controller bounds.
/// - **Controller**: the `ControllerBoundProvider` contract plus a feed-forward network provider.
/// - **Traits**: `Scalar`, `Endpoint`, `DynamicalSystem`, `VectorField`, `Steppable`.
pub mod traits;
pub mod trajectory;

pub use error::{ReachError, Result};
pub use interval::IntervalBox;
pub use propagator::{PropagatorSettings, ReachabilityPropagator, RunStatus};
