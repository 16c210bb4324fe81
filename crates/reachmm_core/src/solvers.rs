use crate::traits::{cast, Scalar, Steppable, VectorField};
use serde::{Deserialize, Serialize};

/// Explicit Euler: `y + dt * f(t, y)`.
pub struct Euler<T: Scalar> {
    slope: Vec<T>,
}

impl<T: Scalar> Euler<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            slope: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for Euler<T> {
    fn step(&mut self, system: &impl VectorField<T>, t: &mut T, state: &mut [T], dt: T) {
        system.apply(*t, state, &mut self.slope);
        for (y, k) in state.iter_mut().zip(&self.slope) {
            *y = *y + dt * *k;
        }
        *t = *t + dt;
    }
}

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![T::zero(); dim],
            k2: vec![T::zero(); dim],
            k3: vec![T::zero(); dim],
            k4: vec![T::zero(); dim],
            tmp: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl VectorField<T>, t: &mut T, state: &mut [T], dt: T) {
        let half: T = cast(0.5);
        let sixth: T = cast(1.0 / 6.0);
        let two: T = cast(2.0);
        let t0 = *t;

        system.apply(t0, state, &mut self.k1);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k2);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k3);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4);

        for i in 0..state.len() {
            state[i] = state[i]
                + dt * sixth * (self.k1[i] + two * self.k2[i] + two * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
    }
}

/// Discrete Map Stepper
/// Evaluates x_{n+1} = f(x_n); `dt` only advances the clock.
pub struct DiscreteMap<T: Scalar> {
    tmp: Vec<T>,
}

impl<T: Scalar> DiscreteMap<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            tmp: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for DiscreteMap<T> {
    fn step(&mut self, system: &impl VectorField<T>, t: &mut T, state: &mut [T], dt: T) {
        system.apply(*t, state, &mut self.tmp);
        state.copy_from_slice(&self.tmp);
        *t = *t + dt;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IntegratorKind {
    Euler,
    #[default]
    Rk4,
    Discrete,
}

impl IntegratorKind {
    pub fn build<T: Scalar>(self, dim: usize) -> Integrator<T> {
        match self {
            IntegratorKind::Euler => Integrator::Euler(Euler::new(dim)),
            IntegratorKind::Rk4 => Integrator::Rk4(RK4::new(dim)),
            IntegratorKind::Discrete => Integrator::Discrete(DiscreteMap::new(dim)),
        }
    }
}

/// Integrator chosen at runtime.
pub enum Integrator<T: Scalar> {
    Euler(Euler<T>),
    Rk4(RK4<T>),
    Discrete(DiscreteMap<T>),
}

impl<T: Scalar> Steppable<T> for Integrator<T> {
    fn step(&mut self, system: &impl VectorField<T>, t: &mut T, state: &mut [T], dt: T) {
        match self {
            Integrator::Euler(s) => s.step(system, t, state, dt),
            Integrator::Rk4(s) => s.step(system, t, state, dt),
            Integrator::Discrete(s) => s.step(system, t, state, dt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay;

    impl VectorField<f64> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -x[0];
        }
    }

    fn integrate(kind: IntegratorKind, steps: usize, dt: f64) -> (f64, f64) {
        let mut stepper = kind.build::<f64>(1);
        let mut t = 0.0;
        let mut x = [1.0];
        for _ in 0..steps {
            stepper.step(&Decay, &mut t, &mut x, dt);
        }
        (t, x[0])
    }

    #[test]
    fn euler_takes_first_order_steps() {
        let (t, x) = integrate(IntegratorKind::Euler, 2, 0.5);
        assert_eq!(t, 1.0);
        assert_eq!(x, 0.25);
    }

    #[test]
    fn rk4_matches_exponential_decay() {
        let (t, x) = integrate(IntegratorKind::Rk4, 100, 0.01);
        assert!((t - 1.0).abs() < 1e-12);
        assert!((x - (-1.0f64).exp()).abs() < 1e-10);
    }

    #[test]
    fn discrete_map_iterates() {
        let (t, x) = integrate(IntegratorKind::Discrete, 3, 1.0);
        assert_eq!(t, 3.0);
        assert_eq!(x, -1.0);
    }
}
