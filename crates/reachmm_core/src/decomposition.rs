//! Decomposition functions for mixed-monotone embeddings.
//!
//! A decomposition of `f(x, u)` is a pair `d_lower(z, ẑ)`, `d_upper(ẑ, z)` over
//! the joint input `[state; control]` with `d_lower(z, z) = d_upper(z, z) = f(z)`.
//! `d_lower` is non-decreasing in its first argument and non-increasing in the
//! second; `d_upper` is the mirror image. For flows the derivative of output `i`
//! with respect to state `i` is unconstrained.

use crate::autodiff::{jacobian, Dual};
use crate::error::{ReachError, Result};
use crate::interval::IntervalBox;
use crate::interval_dual::{jacobian_bounds, IntervalDual};
use crate::traits::{DynamicalSystem, Scalar};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Monotonicity {
    Increasing,
    Decreasing,
}

/// Time window covering every time, for dynamics whose signs hold throughout.
pub const ALL_TIME: (f64, f64) = (f64::NEG_INFINITY, f64::INFINITY);

/// Whether the dynamics are a continuous-time flow or a discrete-time map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SystemKind {
    #[default]
    Flow,
    Map,
}

/// Fixed signs of `∂f_i/∂z_j` over a domain, `n` rows by `n + m` columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignStructure {
    rows: usize,
    cols: usize,
    entries: Vec<Monotonicity>,
}

impl SignStructure {
    /// `entries` is row-major. There must be at least as many columns as rows.
    pub fn new(rows: usize, cols: usize, entries: Vec<Monotonicity>) -> Result<Self> {
        ReachError::check_len("sign structure entries", rows * cols, entries.len())?;
        if cols < rows {
            return Err(ReachError::Decomposition(format!(
                "sign structure has {rows} outputs but only {cols} inputs"
            )));
        }
        Ok(Self {
            rows,
            cols,
            entries,
        })
    }

    pub fn from_rows(rows: Vec<Vec<Monotonicity>>) -> Result<Self> {
        let n = rows.len();
        let cols = rows.first().map_or(0, Vec::len);
        let mut entries = Vec::with_capacity(n * cols);
        for row in rows {
            ReachError::check_len("sign structure row", cols, row.len())?;
            entries.extend(row);
        }
        Self::new(n, cols, entries)
    }

    pub fn uniform(rows: usize, cols: usize, sign: Monotonicity) -> Result<Self> {
        Self::new(rows, cols, vec![sign; rows * cols])
    }

    /// Reads signs off a single Jacobian; zero entries count as increasing.
    pub fn from_jacobian(jac: &DMatrix<f64>) -> Result<Self> {
        let mut entries = Vec::with_capacity(jac.len());
        for i in 0..jac.nrows() {
            for j in 0..jac.ncols() {
                entries.push(if jac[(i, j)] < 0.0 {
                    Monotonicity::Decreasing
                } else {
                    Monotonicity::Increasing
                });
            }
        }
        Self::new(jac.nrows(), jac.ncols(), entries)
    }

    pub fn get(&self, output: usize, input: usize) -> Monotonicity {
        self.entries[output * self.cols + input]
    }

    pub fn state_dim(&self) -> usize {
        self.rows
    }

    pub fn control_dim(&self) -> usize {
        self.cols - self.rows
    }

    /// Derives the sign structure of `system` over `state × control` and every
    /// time in `time`.
    ///
    /// Each partial derivative is enclosed over the whole domain with
    /// [`jacobian_bounds`]. An entry whose enclosure keeps one sign gets that
    /// sign (zero counts as increasing). An entry that straddles zero, or that
    /// cannot be bounded, makes the dynamics non-decomposable. The flow
    /// diagonal is never constrained.
    pub fn infer<S>(
        system: &S,
        kind: SystemKind,
        state: &IntervalBox<f64>,
        control: Option<&IntervalBox<f64>>,
        time: (f64, f64),
    ) -> Result<Self>
    where
        S: DynamicalSystem<IntervalDual> + ?Sized,
    {
        let n = system.dimension();
        let m = system.control_dimension();
        let (lo, hi) = joint_bounds(state, control, n, m)?;
        let (jac_lo, jac_hi) = jacobian_bounds(system, time, &lo, &hi)?;
        debug!(n, m, "deriving sign structure from jacobian enclosures");

        let mut entries = Vec::with_capacity(n * (n + m));
        for i in 0..n {
            for j in 0..n + m {
                let (dl, du) = (jac_lo[(i, j)], jac_hi[(i, j)]);
                let exempt = kind == SystemKind::Flow && i == j;
                let sign = if exempt || dl >= 0.0 {
                    Monotonicity::Increasing
                } else if du <= 0.0 {
                    Monotonicity::Decreasing
                } else {
                    warn!(
                        output = i,
                        input = j,
                        lower = dl,
                        upper = du,
                        "partial derivative has no fixed sign"
                    );
                    return Err(ReachError::Decomposition(format!(
                        "non-decomposable dynamics: df{i}/dz{j} ranges over [{dl}, {du}] on the domain"
                    )));
                };
                entries.push(sign);
            }
        }
        Self::new(n, n + m, entries)
    }

    /// Sampling estimate of the sign structure. Not sound.
    ///
    /// Jacobians are evaluated with dual numbers at the sample points described
    /// by `settings`, so a partial derivative that changes sign between samples
    /// goes unnoticed. Partials within `settings.tolerance` of zero are
    /// compatible with either sign; an entry seen with both signs is an error.
    /// [`DecompositionBuilder`] never uses this; see [`infer`](Self::infer).
    pub fn estimate<S>(
        system: &S,
        kind: SystemKind,
        state: &IntervalBox<f64>,
        control: Option<&IntervalBox<f64>>,
        settings: &InferenceSettings,
    ) -> Result<Self>
    where
        S: DynamicalSystem<Dual> + ?Sized,
    {
        settings.validate()?;
        let n = system.dimension();
        let m = system.control_dimension();
        let (lo, hi) = joint_bounds(state, control, n, m)?;
        let samples = sample_points(&lo, &hi, settings);
        debug!(n, m, samples = samples.len(), "inferring sign structure");

        let mut positive = vec![false; n * (n + m)];
        let mut negative = vec![false; n * (n + m)];
        for point in &samples {
            let jac = jacobian(system, settings.time, &point[..n], &point[n..])?;
            for i in 0..n {
                for j in 0..n + m {
                    let d = jac[(i, j)];
                    if !d.is_finite() {
                        return Err(ReachError::Decomposition(format!(
                            "non-finite partial derivative df{i}/dz{j} at {point:?}"
                        )));
                    }
                    positive[i * (n + m) + j] |= d > settings.tolerance;
                    negative[i * (n + m) + j] |= d < -settings.tolerance;
                }
            }
        }

        let mut entries = Vec::with_capacity(n * (n + m));
        for i in 0..n {
            for j in 0..n + m {
                let k = i * (n + m) + j;
                let exempt = kind == SystemKind::Flow && i == j;
                if positive[k] && negative[k] && !exempt {
                    warn!(output = i, input = j, "partial derivative changes sign");
                    return Err(ReachError::Decomposition(format!(
                        "non-decomposable dynamics: df{i}/dz{j} changes sign over the domain"
                    )));
                }
                entries.push(if negative[k] && !exempt {
                    Monotonicity::Decreasing
                } else {
                    Monotonicity::Increasing
                });
            }
        }
        Self::new(n, n + m, entries)
    }
}

/// Sampling used by [`SignStructure::estimate`] and [`verify_decomposition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    /// Points per axis of the sample grid.
    pub grid_points: usize,
    /// The full grid is skipped when it would exceed this many points.
    pub max_samples: usize,
    /// Corners are only enumerated up to this many joint dimensions.
    pub max_corner_dims: usize,
    pub tolerance: f64,
    /// Step for finite-difference monotonicity checks.
    pub fd_step: f64,
    /// Time at which time-varying dynamics are sampled.
    pub time: f64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            grid_points: 3,
            max_samples: 4096,
            max_corner_dims: 10,
            tolerance: 1e-9,
            fd_step: 1e-4,
            time: 0.0,
        }
    }
}

impl InferenceSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance >= 0.0) {
            return Err(ReachError::Settings(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        if !(self.fd_step > 0.0) {
            return Err(ReachError::Settings(format!(
                "fd_step must be positive, got {}",
                self.fd_step
            )));
        }
        Ok(())
    }
}

fn joint_bounds(
    state: &IntervalBox<f64>,
    control: Option<&IntervalBox<f64>>,
    n: usize,
    m: usize,
) -> Result<(Vec<f64>, Vec<f64>)> {
    ReachError::check_len("state box", n, state.len())?;
    let mut lo = state.lower_slice().to_vec();
    let mut hi = state.upper_slice().to_vec();
    match control {
        Some(u) => {
            ReachError::check_len("control box", m, u.len())?;
            lo.extend_from_slice(u.lower_slice());
            hi.extend_from_slice(u.upper_slice());
        }
        None => ReachError::check_len("control box", m, 0)?,
    }
    Ok((lo, hi))
}

/// Corners (for small dimensions), a uniform grid when it fits in
/// `max_samples`, and always the midpoint.
fn sample_points(lo: &[f64], hi: &[f64], settings: &InferenceSettings) -> Vec<Vec<f64>> {
    let d = lo.len();
    let mut points = Vec::new();

    if d <= settings.max_corner_dims {
        for mask in 0..1usize << d {
            points.push(
                (0..d)
                    .map(|j| if (mask >> j) & 1 == 1 { hi[j] } else { lo[j] })
                    .collect(),
            );
        }
    }

    let g = settings.grid_points;
    let grid_size = u32::try_from(d)
        .ok()
        .and_then(|d| g.checked_pow(d))
        .filter(|&size| g >= 2 && size <= settings.max_samples);
    if let Some(size) = grid_size {
        for flat in 0..size {
            let mut rest = flat;
            let point = (0..d)
                .map(|j| {
                    let k = rest % g;
                    rest /= g;
                    lo[j] + (hi[j] - lo[j]) * k as f64 / (g - 1) as f64
                })
                .collect();
            points.push(point);
        }
    }

    points.push((0..d).map(|j| lo[j] + 0.5 * (hi[j] - lo[j])).collect());
    points
}

/// The `d_lower`/`d_upper` pair of a mixed-monotone embedding.
///
/// Both functions take the joint input `[state; control]`. `d_lower(t, lo, hi)`
/// bounds `f` from below when the true input lies in `[lo, hi]`; `d_upper(t, hi,
/// lo)` bounds it from above.
pub trait Decomposition<T: Scalar>: Send + Sync {
    fn state_dim(&self) -> usize;

    fn control_dim(&self) -> usize {
        0
    }

    fn d_lower(&self, t: T, lo: &[T], hi: &[T], out: &mut [T]);

    fn d_upper(&self, t: T, hi: &[T], lo: &[T], out: &mut [T]);

    /// Scratch values needed by [`d_lower_with`](Self::d_lower_with) and
    /// [`d_upper_with`](Self::d_upper_with).
    fn workspace_len(&self) -> usize {
        0
    }

    /// [`d_lower`](Self::d_lower) with caller-owned scratch of at least
    /// [`workspace_len`](Self::workspace_len) values.
    fn d_lower_with(&self, t: T, lo: &[T], hi: &[T], out: &mut [T], _workspace: &mut [T]) {
        self.d_lower(t, lo, hi, out)
    }

    fn d_upper_with(&self, t: T, hi: &[T], lo: &[T], out: &mut [T], _workspace: &mut [T]) {
        self.d_upper(t, hi, lo, out)
    }
}

/// Decomposition given directly as a pair of closures.
pub struct FnDecomposition<L, U> {
    state_dim: usize,
    control_dim: usize,
    lower: L,
    upper: U,
}

impl<L, U> FnDecomposition<L, U> {
    pub fn new(state_dim: usize, control_dim: usize, lower: L, upper: U) -> Self {
        Self {
            state_dim,
            control_dim,
            lower,
            upper,
        }
    }
}

impl<T, L, U> Decomposition<T> for FnDecomposition<L, U>
where
    T: Scalar,
    L: Fn(T, &[T], &[T], &mut [T]) + Send + Sync,
    U: Fn(T, &[T], &[T], &mut [T]) + Send + Sync,
{
    fn state_dim(&self) -> usize {
        self.state_dim
    }

    fn control_dim(&self) -> usize {
        self.control_dim
    }

    fn d_lower(&self, t: T, lo: &[T], hi: &[T], out: &mut [T]) {
        (self.lower)(t, lo, hi, out)
    }

    fn d_upper(&self, t: T, hi: &[T], lo: &[T], out: &mut [T]) {
        (self.upper)(t, hi, lo, out)
    }
}

/// Decomposition from a single function `d`, with `d_lower = d(z, ẑ)` and
/// `d_upper = d(ẑ, z)`.
pub struct SymmetricDecomposition<F> {
    state_dim: usize,
    control_dim: usize,
    d: F,
}

impl<F> SymmetricDecomposition<F> {
    pub fn new(state_dim: usize, control_dim: usize, d: F) -> Self {
        Self {
            state_dim,
            control_dim,
            d,
        }
    }
}

impl<T, F> Decomposition<T> for SymmetricDecomposition<F>
where
    T: Scalar,
    F: Fn(T, &[T], &[T], &mut [T]) + Send + Sync,
{
    fn state_dim(&self) -> usize {
        self.state_dim
    }

    fn control_dim(&self) -> usize {
        self.control_dim
    }

    fn d_lower(&self, t: T, lo: &[T], hi: &[T], out: &mut [T]) {
        (self.d)(t, lo, hi, out)
    }

    fn d_upper(&self, t: T, hi: &[T], lo: &[T], out: &mut [T]) {
        (self.d)(t, hi, lo, out)
    }
}

/// Decomposition derived from a sign structure.
///
/// Output `i` of `d_lower` evaluates `f_i` with each input taken from the lower
/// argument where `f_i` increases in it and from the upper argument where it
/// decreases; `d_upper` does the reverse.
#[derive(Debug, Clone)]
pub struct SignDecomposition<S> {
    system: S,
    signs: SignStructure,
    kind: SystemKind,
}

impl<S> SignDecomposition<S> {
    pub fn new(system: S, signs: SignStructure, kind: SystemKind) -> Result<Self>
    where
        S: DynamicalSystem<f64>,
    {
        ReachError::check_len("sign structure rows", system.dimension(), signs.state_dim())?;
        ReachError::check_len(
            "sign structure control columns",
            system.control_dimension(),
            signs.control_dim(),
        )?;
        Ok(Self {
            system,
            signs,
            kind,
        })
    }

    pub fn signs(&self) -> &SignStructure {
        &self.signs
    }

    pub fn kind(&self) -> SystemKind {
        self.kind
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    /// Scratch layout: the joint input, one output row, then the system's own
    /// workspace.
    fn scratch_len<T: Scalar>(&self) -> usize
    where
        S: DynamicalSystem<T>,
    {
        let system = <S as DynamicalSystem<T>>::workspace_len(&self.system);
        self.signs.cols + self.signs.rows + system
    }

    fn evaluate<T: Scalar>(
        &self,
        t: T,
        own: &[T],
        other: &[T],
        out: &mut [T],
        workspace: &mut [T],
    ) where
        S: DynamicalSystem<T>,
    {
        let n = self.signs.rows;
        let (z, rest) = workspace.split_at_mut(self.signs.cols);
        let (f, system_ws) = rest.split_at_mut(n);
        for (i, slot) in out.iter_mut().enumerate().take(n) {
            for (j, zj) in z.iter_mut().enumerate() {
                let use_own = (self.kind == SystemKind::Flow && i == j)
                    || self.signs.get(i, j) == Monotonicity::Increasing;
                *zj = if use_own { own[j] } else { other[j] };
            }
            self.system.apply_with(t, &z[..n], &z[n..], f, system_ws);
            *slot = f[i];
        }
    }
}

impl<T, S> Decomposition<T> for SignDecomposition<S>
where
    T: Scalar,
    S: DynamicalSystem<T> + Send + Sync,
{
    fn state_dim(&self) -> usize {
        self.signs.state_dim()
    }

    fn control_dim(&self) -> usize {
        self.signs.control_dim()
    }

    fn d_lower(&self, t: T, lo: &[T], hi: &[T], out: &mut [T]) {
        let mut workspace = vec![T::zero(); self.scratch_len::<T>()];
        self.evaluate(t, lo, hi, out, &mut workspace)
    }

    fn d_upper(&self, t: T, hi: &[T], lo: &[T], out: &mut [T]) {
        let mut workspace = vec![T::zero(); self.scratch_len::<T>()];
        self.evaluate(t, hi, lo, out, &mut workspace)
    }

    fn workspace_len(&self) -> usize {
        self.scratch_len::<T>()
    }

    fn d_lower_with(&self, t: T, lo: &[T], hi: &[T], out: &mut [T], workspace: &mut [T]) {
        self.evaluate(t, lo, hi, out, workspace)
    }

    fn d_upper_with(&self, t: T, hi: &[T], lo: &[T], out: &mut [T], workspace: &mut [T]) {
        self.evaluate(t, hi, lo, out, workspace)
    }
}

/// Assembles a [`SignDecomposition`] from a supplied or inferred sign structure.
pub struct DecompositionBuilder<S> {
    system: S,
    signs: Option<SignStructure>,
    kind: SystemKind,
    domain: Option<(IntervalBox<f64>, Option<IntervalBox<f64>>)>,
    time: (f64, f64),
}

impl<S> DecompositionBuilder<S>
where
    S: DynamicalSystem<f64> + DynamicalSystem<IntervalDual>,
{
    pub fn new(system: S) -> Self {
        Self {
            system,
            signs: None,
            kind: SystemKind::Flow,
            domain: None,
            time: ALL_TIME,
        }
    }

    pub fn sign_structure(mut self, signs: SignStructure) -> Self {
        self.signs = Some(signs);
        self
    }

    pub fn kind(mut self, kind: SystemKind) -> Self {
        self.kind = kind;
        self
    }

    /// Derives the sign structure over `state × control` if none is supplied.
    pub fn infer_signs(
        mut self,
        state: IntervalBox<f64>,
        control: Option<IntervalBox<f64>>,
    ) -> Self {
        self.domain = Some((state, control));
        self
    }

    /// Restricts inference to times in `[start, end]`. Defaults to all times.
    pub fn time_window(mut self, start: f64, end: f64) -> Self {
        self.time = (start, end);
        self
    }

    pub fn build(self) -> Result<SignDecomposition<S>> {
        let signs = match (self.signs, &self.domain) {
            (Some(signs), _) => signs,
            (None, Some((state, control))) => {
                SignStructure::infer(&self.system, self.kind, state, control.as_ref(), self.time)?
            }
            (None, None) => {
                return Err(ReachError::Decomposition(
                    "non-decomposable dynamics: no sign structure supplied or derivable"
                        .to_string(),
                ))
            }
        };
        SignDecomposition::new(self.system, signs, self.kind)
    }
}

/// Checks the decomposition contract of `decomposition` against `system` at
/// the sample points of `state × control`.
///
/// Verifies `d_lower(z, z) = d_upper(z, z) = f(z)` within `settings.tolerance`
/// (relative to `|f|`), then the monotonicity directions by forward
/// differences on the pairs `(sample, upper corner)` and `(lower corner, sample)`.
pub fn verify_decomposition<D, S>(
    decomposition: &D,
    system: &S,
    kind: SystemKind,
    state: &IntervalBox<f64>,
    control: Option<&IntervalBox<f64>>,
    settings: &InferenceSettings,
) -> Result<()>
where
    D: Decomposition<f64> + ?Sized,
    S: DynamicalSystem<f64> + ?Sized,
{
    settings.validate()?;
    let n = system.dimension();
    let m = system.control_dimension();
    ReachError::check_len("decomposition state dimension", n, decomposition.state_dim())?;
    ReachError::check_len("decomposition control dimension", m, decomposition.control_dim())?;
    let (lo, hi) = joint_bounds(state, control, n, m)?;
    let samples = sample_points(&lo, &hi, settings);
    let t = settings.time;
    let tol = settings.tolerance;

    let mut f = vec![0.0; n];
    let mut dl = vec![0.0; n];
    let mut du = vec![0.0; n];
    for z in &samples {
        system.apply(t, &z[..n], &z[n..], &mut f);
        decomposition.d_lower(t, z, z, &mut dl);
        decomposition.d_upper(t, z, z, &mut du);
        for i in 0..n {
            let scale = 1.0 + f[i].abs();
            if (dl[i] - f[i]).abs() > tol * scale || (du[i] - f[i]).abs() > tol * scale {
                return Err(ReachError::Decomposition(format!(
                    "d(z, z) != f(z) in component {i} at {z:?}: f = {}, d_lower = {}, d_upper = {}",
                    f[i], dl[i], du[i]
                )));
            }
        }
    }

    let h = settings.fd_step;
    let mut base = vec![0.0; n];
    let mut moved = vec![0.0; n];
    for z in &samples {
        for (a, b) in [(z.as_slice(), hi.as_slice()), (lo.as_slice(), z.as_slice())] {
            for j in 0..n + m {
                let mut a_step = a.to_vec();
                a_step[j] += h;
                let mut b_step = b.to_vec();
                b_step[j] += h;

                let checks: [(&str, bool, &[f64], &[f64], &[f64], &[f64], f64); 4] = [
                    ("d_lower in its first argument", true, a, b, a_step.as_slice(), b, 1.0),
                    ("d_lower in its second argument", true, a, b, a, b_step.as_slice(), -1.0),
                    ("d_upper in its first argument", false, b, a, b_step.as_slice(), a, 1.0),
                    ("d_upper in its second argument", false, b, a, b, a_step.as_slice(), -1.0),
                ];
                for (what, lower, x0, y0, x1, y1, direction) in checks {
                    let exempt_own = kind == SystemKind::Flow && direction > 0.0 && j < n;
                    if lower {
                        decomposition.d_lower(t, x0, y0, &mut base);
                        decomposition.d_lower(t, x1, y1, &mut moved);
                    } else {
                        decomposition.d_upper(t, x0, y0, &mut base);
                        decomposition.d_upper(t, x1, y1, &mut moved);
                    }
                    for i in 0..n {
                        if exempt_own && i == j {
                            continue;
                        }
                        let change = direction * (moved[i] - base[i]);
                        if change < -tol * (1.0 + base[i].abs()) {
                            return Err(ReachError::Decomposition(format!(
                                "{what} is not monotone: output {i} moves the wrong way \
                                 when input {j} increases"
                            )));
                        }
                    }
                }
            }
        }
    }
    debug!(samples = samples.len(), "decomposition contract verified");
    Ok(())
}
