//! Elementwise interval arithmetic and elementary functions.
//!
//! Every operation satisfies the inclusion property: for any concrete operands
//! inside the argument boxes, the real result lies inside the returned box.
//! Binary operations broadcast their operands; domain violations are errors,
//! never silent infinities.

use super::broadcast::{broadcast_shape, view_as};
use super::rounding::{
    add_down, add_up, div_down, div_up, mul_down, mul_up, pi_bounds, powi_nonneg_down,
    powi_nonneg_up, sqrt_down, sqrt_up, sub_down, sub_up, widen_down, widen_up,
};
use super::IntervalBox;
use crate::error::{ReachError, Result};
use crate::traits::{cast, Endpoint};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, ArrayD, IxDyn, Zip};

/// libm results for exp/log/sin/cos are within one ulp on supported targets.
pub(crate) const LIBM_ULPS: usize = 1;
/// tanh and powf are allowed a looser error bound.
pub(crate) const LOOSE_ULPS: usize = 2;

impl<T: Endpoint> IntervalBox<T> {
    fn map_bounds(&self, f: impl Fn(T, T) -> (T, T)) -> Self {
        let mut lower = ArrayD::zeros(self.lower.raw_dim());
        let mut upper = ArrayD::zeros(self.upper.raw_dim());
        Zip::from(&mut lower)
            .and(&mut upper)
            .and(&self.lower)
            .and(&self.upper)
            .for_each(|lo, hi, &l, &u| {
                let (a, b) = f(l, u);
                *lo = a;
                *hi = b;
            });
        Self::from_parts(lower, upper)
    }

    /// Rejects the operation when any element fails `valid`.
    fn check_domain(&self, op: &'static str, valid: impl Fn(T, T) -> bool) -> Result<()> {
        match self
            .lower
            .iter()
            .zip(self.upper.iter())
            .position(|(&l, &u)| !valid(l, u))
        {
            None => Ok(()),
            Some(index) => {
                let (l, u) = (self.lower_slice()[index], self.upper_slice()[index]);
                Err(ReachError::domain(
                    op,
                    format!("argument [{l}, {u}] at index {index}"),
                ))
            }
        }
    }

    fn zip_bounds(&self, rhs: &Self, f: impl Fn(T, T, T, T) -> (T, T)) -> Result<Self> {
        let shape = broadcast_shape(self.shape(), rhs.shape())?;
        let (al, au) = (view_as(&self.lower, &shape)?, view_as(&self.upper, &shape)?);
        let (bl, bu) = (view_as(&rhs.lower, &shape)?, view_as(&rhs.upper, &shape)?);
        let mut lower = ArrayD::zeros(IxDyn(&shape));
        let mut upper = ArrayD::zeros(IxDyn(&shape));
        Zip::from(&mut lower)
            .and(&mut upper)
            .and(&al)
            .and(&au)
            .and(&bl)
            .and(&bu)
            .for_each(|lo, hi, &al, &au, &bl, &bu| {
                let (a, b) = f(al, au, bl, bu);
                *lo = a;
                *hi = b;
            });
        Ok(Self::from_parts(lower, upper))
    }

    pub fn neg(&self) -> Self {
        self.map_bounds(|l, u| (-u, -l))
    }

    pub fn add(&self, rhs: &Self) -> Result<Self> {
        self.zip_bounds(rhs, |al, au, bl, bu| (add_down(al, bl), add_up(au, bu)))
    }

    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        self.zip_bounds(rhs, |al, au, bl, bu| (sub_down(al, bu), sub_up(au, bl)))
    }

    /// Four-corner product. Elements where both factors are non-negative take
    /// the direct `[al * bl, au * bu]` path.
    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        self.zip_bounds(rhs, mul_bounds)
    }

    /// Quotient; any denominator element containing zero is a domain error.
    pub fn div(&self, rhs: &Self) -> Result<Self> {
        rhs.check_domain("div", |l, u| l > T::zero() || u < T::zero())?;
        self.zip_bounds(rhs, div_bounds)
    }

    /// Extended quotient: denominators containing zero give the whole real line
    /// instead of an error.
    pub fn div_extended(&self, rhs: &Self) -> Result<Self> {
        self.zip_bounds(rhs, |al, au, bl, bu| {
            if bl > T::zero() || bu < T::zero() {
                div_bounds(al, au, bl, bu)
            } else {
                (T::neg_infinity(), T::infinity())
            }
        })
    }

    pub fn recip(&self) -> Result<Self> {
        let one = IntervalBox::from_parts(
            ArrayD::from_elem(IxDyn(&[]), T::one()),
            ArrayD::from_elem(IxDyn(&[]), T::one()),
        );
        one.div(self)
    }

    /// Multiplies by a concrete factor.
    pub fn scale(&self, factor: T) -> Result<Self> {
        if !factor.is_finite() {
            return Err(ReachError::domain(
                "scale",
                format!("non-finite factor {factor}"),
            ));
        }
        Ok(if factor >= T::zero() {
            self.map_bounds(|l, u| (mul_down(l, factor), mul_up(u, factor)))
        } else {
            self.map_bounds(|l, u| (mul_down(u, factor), mul_up(l, factor)))
        })
    }

    pub fn abs(&self) -> Self {
        self.map_bounds(|l, u| {
            if l >= T::zero() {
                (l, u)
            } else if u <= T::zero() {
                (-u, -l)
            } else {
                (T::zero(), (-l).max(u))
            }
        })
    }

    pub fn relu(&self) -> Self {
        self.map_bounds(|l, u| (l.max(T::zero()), u.max(T::zero())))
    }

    pub fn sqr(&self) -> Self {
        self.map_bounds(|l, u| even_power(l, u, 2))
    }

    pub fn sqrt(&self) -> Result<Self> {
        self.check_domain("sqrt", |l, _| l >= T::zero())?;
        Ok(self.map_bounds(|l, u| (sqrt_down(l), sqrt_up(u))))
    }

    pub fn exp(&self) -> Self {
        self.map_bounds(exp_bounds)
    }

    /// Natural logarithm; requires `lower > 0`.
    pub fn log(&self) -> Result<Self> {
        self.check_domain("log", |l, _| l > T::zero())?;
        Ok(self.map_bounds(log_bounds))
    }

    /// Integer power. Negative exponents need a zero-free base.
    pub fn powi(&self, n: i32) -> Result<Self> {
        if n == 0 {
            return Ok(self.map_bounds(|_, _| (T::one(), T::one())));
        }
        let magnitude = n.unsigned_abs();
        if n > 0 {
            return Ok(self.positive_power(magnitude));
        }
        // Invert first: the reciprocal of a zero-free box stays zero-free, while
        // a tiny base raised to |n| can underflow to zero.
        self.check_domain("powi", |l, u| l > T::zero() || u < T::zero())?;
        Ok(self.recip()?.positive_power(magnitude))
    }

    fn positive_power(&self, n: u32) -> Self {
        if n % 2 == 0 {
            self.map_bounds(|l, u| even_power(l, u, n))
        } else {
            self.map_bounds(|l, u| (odd_power_down(l, n), odd_power_up(u, n)))
        }
    }

    /// Real power with a concrete exponent. Integral exponents defer to
    /// [`powi`](Self::powi); otherwise the base must be non-negative, and
    /// strictly positive when the exponent is negative.
    pub fn powf(&self, p: T) -> Result<Self> {
        if p.is_nan() {
            return Err(ReachError::domain("powf", "NaN exponent"));
        }
        if p.fract().is_zero() && p.abs() <= cast(i32::MAX as f64) {
            let n = p.to_i32().unwrap_or(0);
            return self.powi(n);
        }
        if p > T::zero() {
            self.check_domain("powf", |l, _| l >= T::zero())?;
            Ok(self.map_bounds(|l, u| {
                (
                    widen_down(l.powf(p), LOOSE_ULPS).max(T::zero()),
                    widen_up(u.powf(p), LOOSE_ULPS),
                )
            }))
        } else {
            self.check_domain("powf", |l, _| l > T::zero())?;
            Ok(self.map_bounds(|l, u| {
                (
                    widen_down(u.powf(p), LOOSE_ULPS).max(T::zero()),
                    widen_up(l.powf(p), LOOSE_ULPS),
                )
            }))
        }
    }

    /// Interval exponent, `exp(exponent * log(self))`; requires a positive base.
    pub fn pow(&self, exponent: &Self) -> Result<Self> {
        // A single exact exponent that does not change the result shape is a
        // concrete power, which also admits negative bases for integral exponents.
        if exponent.is_degenerate()
            && exponent.len() == 1
            && exponent.lower.ndim() <= self.lower.ndim()
        {
            if let Some((p, _)) = exponent.component(0) {
                return self.powf(p);
            }
        }
        self.check_domain("pow", |l, _| l > T::zero())?;
        Ok(exponent.mul(&self.log()?)?.exp())
    }

    pub fn sin(&self) -> Self {
        self.map_bounds(|l, u| periodic_bounds(l, u, Wave::Sin))
    }

    pub fn cos(&self) -> Self {
        self.map_bounds(|l, u| periodic_bounds(l, u, Wave::Cos))
    }

    pub fn tanh(&self) -> Self {
        self.map_bounds(tanh_bounds)
    }

    /// Logistic function `1 / (1 + exp(-x))`.
    pub fn sigmoid(&self) -> Self {
        let one = T::one();
        self.map_bounds(|l, u| {
            // Lower bound: overestimate exp(-l), so the denominator rounds up.
            let e_hi = if l.is_zero() { one } else { widen_up((-l).exp(), LIBM_ULPS) };
            let e_lo = if u.is_zero() {
                one
            } else {
                widen_down((-u).exp(), LIBM_ULPS).max(T::zero())
            };
            let lo = div_down(one, add_up(one, e_hi)).max(T::zero());
            let hi = div_up(one, add_down(one, e_lo)).min(one);
            (lo, hi)
        })
    }

    /// Elementwise minimum.
    pub fn min(&self, rhs: &Self) -> Result<Self> {
        self.zip_bounds(rhs, |al, au, bl, bu| (al.min(bl), au.min(bu)))
    }

    /// Elementwise maximum.
    pub fn max(&self, rhs: &Self) -> Result<Self> {
        self.zip_bounds(rhs, |al, au, bl, bu| (al.max(bl), au.max(bu)))
    }

    /// Smallest box containing both operands.
    pub fn hull(&self, rhs: &Self) -> Result<Self> {
        self.zip_bounds(rhs, |al, au, bl, bu| (al.min(bl), au.max(bu)))
    }

    /// Elementwise intersection, or `None` when some element is disjoint.
    pub fn intersect(&self, rhs: &Self) -> Result<Option<Self>> {
        let shape = broadcast_shape(self.shape(), rhs.shape())?;
        let (al, au) = (view_as(&self.lower, &shape)?, view_as(&self.upper, &shape)?);
        let (bl, bu) = (view_as(&rhs.lower, &shape)?, view_as(&rhs.upper, &shape)?);
        let lower = Zip::from(&al).and(&bl).map_collect(|&a, &b| a.max(b));
        let upper = Zip::from(&au).and(&bu).map_collect(|&a, &b| a.min(b));
        if Zip::from(&lower).and(&upper).all(|l, u| l <= u) {
            Ok(Some(Self::from_parts(lower, upper)))
        } else {
            Ok(None)
        }
    }

    /// Bounds `weights * x + bias` over a one-dimensional box.
    ///
    /// Each row splits its weights by sign: positive weights pair with the
    /// lower bound of `x` for the output's lower bound and negative ones with
    /// the upper bound, and the reverse for the upper bound.
    pub fn affine(&self, weights: &DMatrix<T>, bias: &DVector<T>) -> Result<Self> {
        if self.lower.ndim() != 1 {
            return Err(ReachError::Shape {
                lhs: self.shape().to_vec(),
                rhs: vec![weights.ncols()],
            });
        }
        ReachError::check_len("affine input", weights.ncols(), self.len())?;
        ReachError::check_len("affine bias", weights.nrows(), bias.len())?;

        let (xl, xu) = (self.lower_slice(), self.upper_slice());
        let mut lower = Vec::with_capacity(weights.nrows());
        let mut upper = Vec::with_capacity(weights.nrows());
        for i in 0..weights.nrows() {
            let mut lo = bias[i];
            let mut hi = bias[i];
            for j in 0..weights.ncols() {
                let w = weights[(i, j)];
                let (for_lo, for_hi) = if w >= T::zero() {
                    (xl[j], xu[j])
                } else {
                    (xu[j], xl[j])
                };
                lo = add_down(lo, mul_down(w, for_lo));
                hi = add_up(hi, mul_up(w, for_hi));
            }
            lower.push(lo);
            upper.push(hi);
        }
        Ok(Self::from_parts(
            Array1::from(lower).into_dyn(),
            Array1::from(upper).into_dyn(),
        ))
    }
}

pub(crate) fn exp_bounds<T: Endpoint>(l: T, u: T) -> (T, T) {
    let lo = if l.is_zero() {
        T::one()
    } else {
        widen_down(l.exp(), LIBM_ULPS).max(T::zero())
    };
    let hi = if u.is_zero() {
        T::one()
    } else {
        widen_up(u.exp(), LIBM_ULPS)
    };
    (lo, hi)
}

/// Logarithm of a positive interval.
pub(crate) fn log_bounds<T: Endpoint>(l: T, u: T) -> (T, T) {
    let lo = if l == T::one() {
        T::zero()
    } else {
        widen_down(l.ln(), LIBM_ULPS)
    };
    let hi = if u == T::one() {
        T::zero()
    } else {
        widen_up(u.ln(), LIBM_ULPS)
    };
    (lo, hi)
}

pub(crate) fn tanh_bounds<T: Endpoint>(l: T, u: T) -> (T, T) {
    let one = T::one();
    let lo = if l.is_zero() {
        T::zero()
    } else {
        widen_down(l.tanh(), LOOSE_ULPS).max(-one)
    };
    let hi = if u.is_zero() {
        T::zero()
    } else {
        widen_up(u.tanh(), LOOSE_ULPS).min(one)
    };
    (lo, hi)
}

/// Encloses a non-decreasing libm function over `[l, u]`.
pub(crate) fn monotone_bounds<T: Endpoint>(l: T, u: T, f: impl Fn(T) -> T, ulps: usize) -> (T, T) {
    (widen_down(f(l), ulps), widen_up(f(u), ulps))
}

pub(crate) fn mul_bounds<T: Endpoint>(al: T, au: T, bl: T, bu: T) -> (T, T) {
    if al >= T::zero() && bl >= T::zero() {
        return (mul_down(al, bl), mul_up(au, bu));
    }
    let lo = mul_down(al, bl)
        .min(mul_down(al, bu))
        .min(mul_down(au, bl))
        .min(mul_down(au, bu));
    let hi = mul_up(al, bl)
        .max(mul_up(al, bu))
        .max(mul_up(au, bl))
        .max(mul_up(au, bu));
    (lo, hi)
}

/// Quotient of intervals whose denominator excludes zero, from the four
/// endpoint quotients.
pub(crate) fn div_bounds<T: Endpoint>(al: T, au: T, bl: T, bu: T) -> (T, T) {
    let lo = div_down(al, bl)
        .min(div_down(al, bu))
        .min(div_down(au, bl))
        .min(div_down(au, bu));
    let hi = div_up(al, bl)
        .max(div_up(al, bu))
        .max(div_up(au, bl))
        .max(div_up(au, bu));
    (lo, hi)
}

/// `[l, u]^n` for even `n`; the minimum sits at zero when the interval contains it.
pub(crate) fn even_power<T: Endpoint>(l: T, u: T, n: u32) -> (T, T) {
    if l >= T::zero() {
        (powi_nonneg_down(l, n), powi_nonneg_up(u, n))
    } else if u <= T::zero() {
        (powi_nonneg_down(-u, n), powi_nonneg_up(-l, n))
    } else {
        (T::zero(), powi_nonneg_up((-l).max(u), n))
    }
}

pub(crate) fn odd_power_down<T: Endpoint>(x: T, n: u32) -> T {
    if x >= T::zero() {
        powi_nonneg_down(x, n)
    } else {
        -powi_nonneg_up(-x, n)
    }
}

pub(crate) fn odd_power_up<T: Endpoint>(x: T, n: u32) -> T {
    if x >= T::zero() {
        powi_nonneg_up(x, n)
    } else {
        -powi_nonneg_down(-x, n)
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Wave {
    Sin,
    Cos,
}

/// Range of sin or cos over `[l, u]`.
///
/// Extrema of both functions sit at `offset + k*pi` (offset `pi/2` for sin, 0
/// for cos), with value `+1` for even `k` and `-1` for odd `k`. Any such point
/// inside the interval pins the corresponding bound; the other bound comes from
/// the endpoints. Candidate points are tested against a slightly enlarged
/// interval so that rounding in `k*pi` can only loosen the result.
pub(crate) fn periodic_bounds<T: Endpoint>(l: T, u: T, wave: Wave) -> (T, T) {
    let one = T::one();
    let (_, pi_hi) = pi_bounds::<T>();
    let two_pi: T = cast(2.0 * std::f64::consts::PI);
    // Past this magnitude k*pi is no longer resolvable in the working precision.
    let resolvable: T = T::one() / T::epsilon();

    if !(l.is_finite() && u.is_finite())
        || u - l >= two_pi
        || l.abs() > resolvable
        || u.abs() > resolvable
    {
        return (-one, one);
    }

    // Enclosure of the function value at a single endpoint.
    let at = |x: T| -> (T, T) {
        match wave {
            Wave::Sin if x.is_zero() => (T::zero(), T::zero()),
            Wave::Cos if x.is_zero() => (one, one),
            Wave::Sin => (widen_down(x.sin(), LIBM_ULPS), widen_up(x.sin(), LIBM_ULPS)),
            Wave::Cos => (widen_down(x.cos(), LIBM_ULPS), widen_up(x.cos(), LIBM_ULPS)),
        }
    };
    let ((ll, lu), (ul, uu)) = (at(l), at(u));
    let mut lo = ll.min(ul);
    let mut hi = lu.max(uu);

    let offset: T = match wave {
        Wave::Sin => cast(std::f64::consts::FRAC_PI_2),
        Wave::Cos => T::zero(),
    };
    let slack = (l.abs() + u.abs() + one) * T::epsilon() * cast(4.0);
    let first = ((l - offset) / pi_hi).floor() - one;
    let mut k = first;
    while k <= first + cast(4.0) {
        let point = offset + k * cast(std::f64::consts::PI);
        if point >= l - slack && point <= u + slack {
            let even = (k / cast(2.0)).fract().is_zero();
            if even {
                hi = one;
            } else {
                lo = -one;
            }
        }
        k = k + one;
    }

    (lo.max(-one), hi.min(one))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Tolerance for comparing against plain `f64` evaluation, which itself rounds.
    const FP_TOLERANCE: f64 = 1e-12;

    fn interval(lower: f64, upper: f64) -> IntervalBox {
        IntervalBox::from_slices(&[lower], &[upper]).unwrap()
    }

    fn bounds(b: &IntervalBox) -> (f64, f64) {
        b.component(0).unwrap()
    }

    fn valid_interval(range: f64) -> impl Strategy<Value = (f64, f64)> {
        (-range..range)
            .prop_flat_map(move |a| (-range..range).prop_map(move |b| (a.min(b), a.max(b))))
    }

    /// Intervals `[a, b]` with `a` in `[start, end)` and width below `width`.
    fn positive_interval(start: f64, end: f64, width: f64) -> impl Strategy<Value = (f64, f64)> {
        (start..end).prop_flat_map(move |a| (a..a + width).prop_map(move |b| (a, b)))
    }

    fn sample_points(lower: f64, upper: f64, num_samples: usize) -> Vec<f64> {
        if lower == upper {
            return vec![lower];
        }
        (0..=num_samples)
            .map(|i| {
                let t = i as f64 / num_samples as f64;
                (lower + (upper - lower) * t).clamp(lower, upper)
            })
            .collect()
    }

    fn encloses(b: &IntervalBox, value: f64) -> bool {
        let (l, u) = bounds(b);
        let slack = FP_TOLERANCE * value.abs().max(1.0);
        l - slack <= value && value <= u + slack
    }

    #[test]
    fn addition_of_simple_intervals() {
        let c = interval(1.0, 2.0).add(&interval(3.0, 4.0)).unwrap();
        assert_eq!(c, interval(4.0, 6.0));
    }

    #[test]
    fn subtraction_swaps_the_subtrahend() {
        let c = interval(1.0, 2.0).sub(&interval(3.0, 4.0)).unwrap();
        assert_eq!(c, interval(-3.0, -1.0));
    }

    #[test]
    fn multiplication_uses_all_four_corners() {
        let c = interval(-1.0, 2.0).mul(&interval(-3.0, 4.0)).unwrap();
        assert_eq!(c, interval(-6.0, 8.0));
        let c = interval(2.0, 3.0).mul(&interval(4.0, 5.0)).unwrap();
        assert_eq!(c, interval(8.0, 15.0));
        let c = interval(-3.0, -2.0).mul(&interval(4.0, 5.0)).unwrap();
        assert_eq!(c, interval(-15.0, -8.0));
    }

    #[test]
    fn division_by_interval_containing_zero_is_a_domain_error() {
        let err = interval(1.0, 2.0).div(&interval(-1.0, 1.0)).unwrap_err();
        assert!(matches!(err, ReachError::Domain { op: "div", .. }));
        assert!(interval(1.0, 2.0).div(&interval(0.0, 1.0)).is_err());
    }

    #[test]
    fn extended_division_returns_the_real_line() {
        let c = interval(1.0, 2.0).div_extended(&interval(-1.0, 1.0)).unwrap();
        assert_eq!(bounds(&c), (f64::NEG_INFINITY, f64::INFINITY));
        let c = interval(1.0, 2.0).div_extended(&interval(2.0, 4.0)).unwrap();
        assert_eq!(c, interval(0.25, 1.0));
    }

    #[test]
    fn division_by_negative_interval() {
        let c = interval(1.0, 2.0).div(&interval(-4.0, -2.0)).unwrap();
        assert_eq!(c, interval(-1.0, -0.25));
        let r = interval(2.0, 4.0).recip().unwrap();
        assert_eq!(r, interval(0.25, 0.5));
    }

    #[test]
    fn broadcasting_combines_row_and_column() {
        let column = IntervalBox::new(
            ArrayD::from_shape_vec(IxDyn(&[2, 1]), vec![0.0, 10.0]).unwrap(),
            ArrayD::from_shape_vec(IxDyn(&[2, 1]), vec![1.0, 11.0]).unwrap(),
        )
        .unwrap();
        let row = IntervalBox::from_slices(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        let sum = column.add(&row).unwrap();
        assert_eq!(sum.shape(), &[2, 3]);
        assert_eq!(sum.lower()[[1, 2]], 13.0);
        assert_eq!(sum.upper()[[0, 1]], 3.0);
    }

    #[test]
    fn incompatible_shapes_are_shape_errors() {
        let a = IntervalBox::from_slices(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let b = IntervalBox::from_slices(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]).unwrap();
        assert!(matches!(a.mul(&b), Err(ReachError::Shape { .. })));
    }

    #[test]
    fn log_and_sqrt_domains() {
        assert!(matches!(
            interval(-1.0, 2.0).log(),
            Err(ReachError::Domain { op: "log", .. })
        ));
        assert!(interval(0.0, 2.0).log().is_err());
        assert!(interval(-0.5, 2.0).sqrt().is_err());
        assert_eq!(interval(0.0, 4.0).sqrt().unwrap(), interval(0.0, 2.0));
        assert_eq!(interval(1.0, 1.0).log().unwrap(), interval(0.0, 0.0));
    }

    #[test]
    fn integer_powers_respect_the_sign_structure() {
        assert_eq!(interval(-2.0, 3.0).powi(2).unwrap(), interval(0.0, 9.0));
        assert_eq!(interval(-3.0, -2.0).powi(2).unwrap(), interval(4.0, 9.0));
        assert_eq!(interval(-2.0, 3.0).powi(3).unwrap(), interval(-8.0, 27.0));
        assert_eq!(interval(2.0, 4.0).powi(-1).unwrap(), interval(0.25, 0.5));
        assert!(matches!(
            interval(-1.0, 1.0).powi(-2),
            Err(ReachError::Domain { op: "powi", .. })
        ));
        assert_eq!(interval(-5.0, 5.0).powi(0).unwrap(), interval(1.0, 1.0));
        assert_eq!(interval(-4.0, -2.0).powi(-2).unwrap(), interval(0.0625, 0.25));
    }

    #[test]
    fn negative_powers_of_tiny_bases_do_not_underflow() {
        let c = interval(1e-200, 1e-199).powi(-2).unwrap();
        let (l, u) = bounds(&c);
        assert!(l >= 1e300);
        assert_eq!(u, f64::INFINITY);

        let c = interval(1e-100, 1e-99).powi(-3).unwrap();
        assert!(encloses(&c, 1e-100f64.powi(-3)));
        assert!(encloses(&c, 1e-99f64.powi(-3)));
    }

    #[test]
    fn real_powers_need_a_nonnegative_base() {
        assert!(interval(-1.0, 4.0).powf(0.5).is_err());
        assert!(interval(0.0, 4.0).powf(-0.5).is_err());
        let c = interval(1.0, 4.0).powf(0.5).unwrap();
        assert!(encloses(&c, 1.0) && encloses(&c, 2.0));
        // Integral exponents allow negative bases.
        assert_eq!(interval(-2.0, 1.0).powf(2.0).unwrap(), interval(0.0, 4.0));
    }

    #[test]
    fn interval_exponent_power() {
        let base = interval(1.0, 2.0);
        let exponent = interval(1.0, 2.0);
        let c = base.pow(&exponent).unwrap();
        for b in sample_points(1.0, 2.0, 8) {
            for e in sample_points(1.0, 2.0, 8) {
                assert!(encloses(&c, b.powf(e)));
            }
        }
        assert!(interval(-1.0, 2.0).pow(&exponent).is_err());
    }

    #[test]
    fn cosine_picks_up_interior_extrema() {
        let c = interval(-1.0, 1.0).cos();
        assert_eq!(bounds(&c).1, 1.0);
        assert!(bounds(&c).0 <= 1.0f64.cos());

        let c = interval(3.0, 3.5).cos();
        assert_eq!(bounds(&c).0, -1.0);

        let c = interval(0.0, 100.0).cos();
        assert_eq!(bounds(&c), (-1.0, 1.0));
    }

    #[test]
    fn sine_on_a_monotone_piece_uses_endpoints() {
        let c = interval(0.1, 0.2).sin();
        let (l, u) = bounds(&c);
        assert!(l <= 0.1f64.sin() && 0.2f64.sin() <= u);
        assert!(u < 0.5);
        let c = interval(1.0, 2.0).sin();
        assert_eq!(bounds(&c).1, 1.0);
    }

    #[test]
    fn activations_are_monotone_and_clamped() {
        let t = interval(-50.0, 50.0).tanh();
        assert_eq!(bounds(&t), (-1.0, 1.0));
        let s = interval(-1.0, 1.0).sigmoid();
        assert!(encloses(&s, 1.0 / (1.0 + 1.0f64.exp())));
        assert!(encloses(&s, 1.0 / (1.0 + (-1.0f64).exp())));
        assert!(bounds(&s).1 < 0.75);
        assert_eq!(interval(-2.0, 3.0).relu(), interval(0.0, 3.0));
        assert_eq!(interval(-2.0, 1.0).abs(), interval(0.0, 2.0));
    }

    #[test]
    fn scaling_by_a_negative_factor_swaps_bounds() {
        assert_eq!(interval(1.0, 2.0).scale(-2.0).unwrap(), interval(-4.0, -2.0));
        assert!(interval(1.0, 2.0).scale(f64::NAN).is_err());
    }

    #[test]
    fn lattice_operations() {
        let a = interval(0.0, 2.0);
        let b = interval(1.0, 3.0);
        assert_eq!(a.hull(&b).unwrap(), interval(0.0, 3.0));
        assert_eq!(a.intersect(&b).unwrap(), Some(interval(1.0, 2.0)));
        assert_eq!(a.intersect(&interval(5.0, 6.0)).unwrap(), None);
        assert_eq!(a.min(&b).unwrap(), interval(0.0, 2.0));
        assert_eq!(a.max(&b).unwrap(), interval(1.0, 3.0));
    }

    #[test]
    fn affine_splits_weights_by_sign() {
        let x = IntervalBox::from_slices(&[-1.0, 0.0], &[1.0, 2.0]).unwrap();
        let w = DMatrix::from_row_slice(2, 2, &[1.0, -1.0, 2.0, 0.5]);
        let b = DVector::from_vec(vec![0.0, 1.0]);
        let y = x.affine(&w, &b).unwrap();
        assert_eq!(y, IntervalBox::from_slices(&[-3.0, -1.0], &[1.0, 4.0]).unwrap());
        assert!(matches!(
            x.affine(&DMatrix::zeros(1, 3), &DVector::zeros(1)),
            Err(ReachError::Dimension { .. })
        ));
    }

    #[test]
    fn degenerate_boxes_match_plain_arithmetic() {
        let a = IntervalBox::point_slice(&[1.5, -2.0, 0.25]).unwrap();
        let b = IntervalBox::point_slice(&[0.5, 4.0, -8.0]).unwrap();
        assert_eq!(a.add(&b).unwrap(), IntervalBox::point_slice(&[2.0, 2.0, -7.75]).unwrap());
        assert_eq!(a.sub(&b).unwrap(), IntervalBox::point_slice(&[1.0, -6.0, 8.25]).unwrap());
        assert_eq!(a.mul(&b).unwrap(), IntervalBox::point_slice(&[0.75, -8.0, -2.0]).unwrap());
        assert_eq!(a.div(&b).unwrap(), IntervalBox::point_slice(&[3.0, -0.5, -0.03125]).unwrap());
        assert_eq!(a.powi(2).unwrap(), IntervalBox::point_slice(&[2.25, 4.0, 0.0625]).unwrap());

        // Transcendental results contain the plain value and stay within a few ulps.
        for (x, boxed, plain) in [
            (0.3, interval(0.3, 0.3).exp(), 0.3f64.exp()),
            (0.3, interval(0.3, 0.3).sin(), 0.3f64.sin()),
            (0.3, interval(0.3, 0.3).cos(), 0.3f64.cos()),
            (0.3, interval(0.3, 0.3).tanh(), 0.3f64.tanh()),
        ] {
            let (l, u) = bounds(&boxed);
            assert!(l <= plain && plain <= u, "x = {x}");
            assert!(u - l <= 8.0 * f64::EPSILON * plain.abs().max(1.0));
        }
        assert_eq!(interval(0.0, 0.0).exp(), interval(1.0, 1.0));
        assert_eq!(interval(0.0, 0.0).sin(), interval(0.0, 0.0));
        assert_eq!(interval(0.0, 0.0).cos(), interval(1.0, 1.0));

        assert_eq!(interval(4.0, 4.0).sqrt().unwrap(), interval(2.0, 2.0));
        assert_eq!(interval(0.0, 0.0).sqrt().unwrap(), interval(0.0, 0.0));
        assert_eq!(interval(1.0, 1.0).log().unwrap(), interval(0.0, 0.0));
        assert_eq!(interval(0.0, 0.0).tanh(), interval(0.0, 0.0));
        assert_eq!(interval(2.0, 2.0).pow(&interval(3.0, 3.0)).unwrap(), interval(8.0, 8.0));
        assert_eq!(interval(-2.0, -2.0).pow(&interval(2.0, 2.0)).unwrap(), interval(4.0, 4.0));
        assert_eq!(interval(2.0, 2.0).powf(-1.0).unwrap(), interval(0.5, 0.5));
        for (boxed, plain) in [
            (interval(2.0, 2.0).log().unwrap(), 2.0f64.ln()),
            (interval(2.0, 2.0).sqrt().unwrap(), 2.0f64.sqrt()),
            (interval(2.0, 2.0).powf(0.5).unwrap(), 2.0f64.powf(0.5)),
            (interval(2.0, 2.0).pow(&interval(0.5, 0.5)).unwrap(), 2.0f64.powf(0.5)),
            (interval(0.3, 0.3).sigmoid(), 1.0 / (1.0 + (-0.3f64).exp())),
        ] {
            let (l, u) = bounds(&boxed);
            assert!(l <= plain && plain <= u, "{plain} not in [{l}, {u}]");
            assert!(u - l <= 16.0 * f64::EPSILON * plain.abs().max(1.0));
        }
    }

    #[test]
    fn works_in_single_precision() {
        let a = IntervalBox::<f32>::from_slices(&[-1.0], &[2.0]).unwrap();
        let b = IntervalBox::<f32>::from_slices(&[-3.0], &[4.0]).unwrap();
        let c = a.mul(&b).unwrap();
        assert_eq!(c.component(0), Some((-6.0, 8.0)));
        let s = a.sin();
        let (l, u) = s.component(0).unwrap();
        assert!(l <= (-1.0f32).sin() && u == 1.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn soundness_add_sub_mul(
            (al, au) in valid_interval(100.0),
            (bl, bu) in valid_interval(100.0),
        ) {
            let a = interval(al, au);
            let b = interval(bl, bu);
            let sum = a.add(&b).unwrap();
            let diff = a.sub(&b).unwrap();
            let prod = a.mul(&b).unwrap();
            for x in sample_points(al, au, 10) {
                for y in sample_points(bl, bu, 10) {
                    prop_assert!(encloses(&sum, x + y));
                    prop_assert!(encloses(&diff, x - y));
                    prop_assert!(encloses(&prod, x * y));
                }
            }
        }

        #[test]
        fn soundness_div(
            (al, au) in valid_interval(100.0),
            (bl, bu) in positive_interval(0.1, 50.0, 50.0),
            negate in any::<bool>(),
        ) {
            let (bl, bu) = if negate { (-bu, -bl) } else { (bl, bu) };
            let a = interval(al, au);
            let b = interval(bl, bu);
            let quot = a.div(&b).unwrap();
            for x in sample_points(al, au, 10) {
                for y in sample_points(bl, bu, 10) {
                    prop_assert!(encloses(&quot, x / y));
                }
            }
        }

        #[test]
        fn soundness_exp_sin_cos((l, u) in valid_interval(20.0)) {
            let a = interval(l, u);
            let e = a.exp();
            let s = a.sin();
            let c = a.cos();
            for x in sample_points(l, u, 50) {
                prop_assert!(encloses(&e, x.exp()));
                prop_assert!(encloses(&s, x.sin()));
                prop_assert!(encloses(&c, x.cos()));
            }
        }

        #[test]
        fn soundness_pow(
            (l, u) in positive_interval(0.01, 10.0, 10.0),
            p in -3.0f64..3.0,
            n in -4i32..6,
        ) {
            let a = interval(l, u);
            let real = a.powf(p).unwrap();
            let int = a.powi(n).unwrap();
            for x in sample_points(l, u, 20) {
                prop_assert!(encloses(&real, x.powf(p)));
                prop_assert!(encloses(&int, x.powi(n)));
            }
        }

        #[test]
        fn results_are_valid_intervals(
            (al, au) in valid_interval(1e3),
            (bl, bu) in valid_interval(1e3),
        ) {
            let a = interval(al, au);
            let b = interval(bl, bu);
            for c in [a.add(&b).unwrap(), a.mul(&b).unwrap(), a.sin(), a.cos(), a.tanh(), a.sqr()] {
                let (l, u) = bounds(&c);
                prop_assert!(l <= u);
            }
        }
    }
}
