//! Forward-mode differentiation over interval arguments.
//!
//! An [`IntervalDual`] carries an enclosure of a value together with an
//! enclosure of its derivative along one seed direction. Evaluating a system on
//! interval duals whose values span a box bounds each partial derivative over
//! the whole box, not just at sample points. All endpoints are rounded outward.
//!
//! Operations without a usable enclosure (a logarithm of a box reaching zero,
//! a division by a box containing zero, a jump discontinuity) return the whole
//! real line. Comparisons are only decided for disjoint operands, so dynamics
//! that branch on their arguments are not enclosed.

use crate::error::{ReachError, Result};
use crate::interval::ops::{
    div_bounds, even_power, exp_bounds, log_bounds, monotone_bounds, mul_bounds, odd_power_down,
    odd_power_up, periodic_bounds, tanh_bounds, Wave, LOOSE_ULPS,
};
use crate::interval::rounding::{
    add_down, add_up, pi_bounds, sqrt_down, sqrt_up, widen_down, widen_up,
};
use crate::traits::DynamicalSystem;
use nalgebra::DMatrix;
use num_traits::{Float, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::num::FpCategory;
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

/// Closed scalar interval `[lo, hi]`. Never holds NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub lo: f64,
    pub hi: f64,
}

impl Span {
    pub const ENTIRE: Span = Span {
        lo: f64::NEG_INFINITY,
        hi: f64::INFINITY,
    };

    pub const ZERO: Span = Span { lo: 0.0, hi: 0.0 };

    /// Crossed or NaN bounds collapse to the whole real line.
    pub fn new(lo: f64, hi: f64) -> Self {
        if lo <= hi {
            Self { lo, hi }
        } else {
            Self::ENTIRE
        }
    }

    pub fn point(value: f64) -> Self {
        Self::new(value, value)
    }

    fn from_pair((lo, hi): (f64, f64)) -> Self {
        Self::new(lo, hi)
    }

    /// Tight enclosure of an `f64` constant that is itself a rounded real.
    fn around(value: f64) -> Self {
        Self::new(widen_down(value, 1), widen_up(value, 1))
    }

    pub fn is_degenerate(&self) -> bool {
        self.lo == self.hi
    }

    pub fn is_bounded(&self) -> bool {
        self.lo.is_finite() && self.hi.is_finite()
    }

    pub fn contains_zero(&self) -> bool {
        self.lo <= 0.0 && 0.0 <= self.hi
    }

    pub fn is_nonnegative(&self) -> bool {
        self.lo >= 0.0
    }

    pub fn is_nonpositive(&self) -> bool {
        self.hi <= 0.0
    }

    pub fn hull(self, other: Self) -> Self {
        Self::new(self.lo.min(other.lo), self.hi.max(other.hi))
    }

    fn add(self, rhs: Self) -> Self {
        Self::new(add_down(self.lo, rhs.lo), add_up(self.hi, rhs.hi))
    }

    fn sub(self, rhs: Self) -> Self {
        self.add(rhs.neg())
    }

    fn neg(self) -> Self {
        Self::new(-self.hi, -self.lo)
    }

    fn mul(self, rhs: Self) -> Self {
        Self::from_pair(mul_bounds(self.lo, self.hi, rhs.lo, rhs.hi))
    }

    fn div(self, rhs: Self) -> Self {
        if self == Self::ZERO && !rhs.contains_zero() {
            return Self::ZERO;
        }
        if rhs.contains_zero() || !self.is_bounded() || !rhs.is_bounded() {
            return Self::ENTIRE;
        }
        Self::from_pair(div_bounds(self.lo, self.hi, rhs.lo, rhs.hi))
    }

    fn sqr(self) -> Self {
        Self::from_pair(even_power(self.lo, self.hi, 2))
    }

    /// `self^n`; negative powers of a box containing zero are unbounded.
    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self::point(1.0);
        }
        let base = if n < 0 {
            Self::point(1.0).div(self)
        } else {
            self
        };
        let m = n.unsigned_abs();
        if m % 2 == 0 {
            Self::from_pair(even_power(base.lo, base.hi, m))
        } else {
            Self::new(odd_power_down(base.lo, m), odd_power_up(base.hi, m))
        }
    }

    fn sqrt(self) -> Self {
        if self.lo < 0.0 {
            return Self::ENTIRE;
        }
        Self::new(sqrt_down(self.lo), sqrt_up(self.hi))
    }

    /// Non-decreasing libm function widened by `LOOSE_ULPS`.
    fn increasing(self, f: impl Fn(f64) -> f64) -> Self {
        Self::from_pair(monotone_bounds(self.lo, self.hi, f, LOOSE_ULPS))
    }

    fn exp(self) -> Self {
        Self::from_pair(exp_bounds(self.lo, self.hi))
    }

    fn cosh(self) -> Self {
        let (a, b) = (self.lo.cosh(), self.hi.cosh());
        if self.contains_zero() {
            Self::new(1.0, widen_up(a.max(b), LOOSE_ULPS))
        } else if self.lo > 0.0 {
            Self::new(widen_down(a, LOOSE_ULPS).max(1.0), widen_up(b, LOOSE_ULPS))
        } else {
            Self::new(widen_down(b, LOOSE_ULPS).max(1.0), widen_up(a, LOOSE_ULPS))
        }
    }

    fn one_minus_sqr(self) -> Self {
        Self::point(1.0).sub(self.sqr())
    }
}

/// Interval-valued dual number.
///
/// `val` encloses the value and `eps` the derivative along the seeded direction
/// for every point of the argument box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalDual {
    pub val: Span,
    pub eps: Span,
}

impl IntervalDual {
    pub fn new(val: Span, eps: Span) -> Self {
        Self { val, eps }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(Span::point(value), Span::ZERO)
    }

    /// Independent variable ranging over `[lo, hi]`.
    pub fn variable(lo: f64, hi: f64) -> Self {
        Self::new(Span::new(lo, hi), Span::point(1.0))
    }

    /// No information about either value or derivative.
    pub fn unknown() -> Self {
        Self::new(Span::ENTIRE, Span::ENTIRE)
    }

    #[inline]
    fn chain(self, val: Span, slope: Span) -> Self {
        Self::new(val, slope.mul(self.eps))
    }

    /// Piecewise-constant function: zero slope unless the box straddles a jump.
    fn step(self, f: impl Fn(f64) -> f64) -> Self {
        let (a, b) = (f(self.val.lo), f(self.val.hi));
        let eps = if a == b { Span::ZERO } else { Span::ENTIRE };
        Self::new(Span::new(a, b), eps)
    }

    /// Function whose derivative blows up where the argument reaches zero.
    fn singular_at_zero(self, val: Span, slope: impl FnOnce() -> Span) -> Self {
        if !self.val.contains_zero() {
            self.chain(val, slope())
        } else if self.eps == Span::ZERO {
            Self::new(val, Span::ZERO)
        } else {
            Self::new(val, Span::ENTIRE)
        }
    }

    fn square(self) -> Self {
        self.chain(self.val.sqr(), Span::point(2.0).mul(self.val))
    }
}

impl Zero for IntervalDual {
    fn zero() -> Self {
        Self::constant(0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == Span::ZERO && self.eps == Span::ZERO
    }
}

impl One for IntervalDual {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl Add for IntervalDual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val.add(rhs.val), self.eps.add(rhs.eps))
    }
}

impl Sub for IntervalDual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val.sub(rhs.val), self.eps.sub(rhs.eps))
    }
}

impl Mul for IntervalDual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.val.mul(rhs.val),
            self.val.mul(rhs.eps).add(self.eps.mul(rhs.val)),
        )
    }
}

impl Div for IntervalDual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        if rhs.val.contains_zero() {
            return Self::unknown();
        }
        let q = self.val.div(rhs.val);
        Self::new(q, self.eps.sub(q.mul(rhs.eps)).div(rhs.val))
    }
}

impl Neg for IntervalDual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(self.val.neg(), self.eps.neg())
    }
}

impl Rem for IntervalDual {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        if rhs.val.contains_zero() || !rhs.val.is_bounded() {
            return Self::unknown();
        }
        let q = self.val.div(rhs.val);
        let (a, b) = (q.lo.trunc(), q.hi.trunc());
        if a == b && a.is_finite() {
            let k = Self::constant(a);
            return self - k * rhs;
        }
        let m = rhs.val.lo.abs().max(rhs.val.hi.abs());
        Self::new(Span::new(-m, m), Span::ENTIRE)
    }
}

macro_rules! assign_ops {
    ($($trait:ident :: $method:ident => $op:tt),*) => {
        $(impl $trait for IntervalDual {
            fn $method(&mut self, rhs: Self) {
                *self = *self $op rhs;
            }
        })*
    };
}

assign_ops!(
    AddAssign::add_assign => +,
    SubAssign::sub_assign => -,
    MulAssign::mul_assign => *,
    DivAssign::div_assign => /,
    RemAssign::rem_assign => %
);

/// Decided only when the value enclosures are disjoint or both operands are
/// identical constants.
impl PartialOrd for IntervalDual {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.val.hi < other.val.lo {
            Some(Ordering::Less)
        } else if self.val.lo > other.val.hi {
            Some(Ordering::Greater)
        } else if self == other && self.val.is_degenerate() {
            Some(Ordering::Equal)
        } else {
            None
        }
    }
}

impl Num for IntervalDual {
    type FromStrRadixErr = <f64 as Num>::FromStrRadixErr;
    fn from_str_radix(str: &str, radix: u32) -> std::result::Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(str, radix).map(Self::constant)
    }
}

/// Only degenerate values convert.
impl ToPrimitive for IntervalDual {
    fn to_i64(&self) -> Option<i64> {
        self.to_f64()?.to_i64()
    }
    fn to_u64(&self) -> Option<u64> {
        self.to_f64()?.to_u64()
    }
    fn to_f64(&self) -> Option<f64> {
        self.val.is_degenerate().then_some(self.val.lo)
    }
}

impl FromPrimitive for IntervalDual {
    fn from_i64(n: i64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_u64(n: u64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_f64(n: f64) -> Option<Self> {
        Some(Self::constant(n))
    }
}

impl NumCast for IntervalDual {
    fn from<T: ToPrimitive>(n: T) -> Option<Self> {
        n.to_f64().map(Self::constant)
    }
}

impl Float for IntervalDual {
    fn nan() -> Self {
        Self::unknown()
    }
    fn infinity() -> Self {
        Self::constant(f64::INFINITY)
    }
    fn neg_infinity() -> Self {
        Self::constant(f64::NEG_INFINITY)
    }
    fn neg_zero() -> Self {
        Self::constant(-0.0)
    }
    fn min_value() -> Self {
        Self::constant(f64::MIN)
    }
    fn min_positive_value() -> Self {
        Self::constant(f64::MIN_POSITIVE)
    }
    fn epsilon() -> Self {
        Self::constant(f64::EPSILON)
    }
    fn max_value() -> Self {
        Self::constant(f64::MAX)
    }
    fn is_nan(self) -> bool {
        false
    }
    fn is_infinite(self) -> bool {
        self.val.lo.is_infinite() || self.val.hi.is_infinite()
    }
    fn is_finite(self) -> bool {
        self.val.is_bounded()
    }
    fn is_normal(self) -> bool {
        self.val.lo.is_normal() && self.val.hi.is_normal()
    }
    fn classify(self) -> FpCategory {
        self.val.lo.classify()
    }

    fn floor(self) -> Self {
        self.step(f64::floor)
    }
    fn ceil(self) -> Self {
        self.step(f64::ceil)
    }
    fn round(self) -> Self {
        self.step(f64::round)
    }
    fn trunc(self) -> Self {
        self.step(f64::trunc)
    }
    fn signum(self) -> Self {
        self.step(f64::signum)
    }

    fn fract(self) -> Self {
        let (a, b) = (self.val.lo.trunc(), self.val.hi.trunc());
        if a == b && a.is_finite() {
            Self::new(self.val.sub(Span::point(a)), self.eps)
        } else {
            Self::new(Span::new(-1.0, 1.0), Span::ENTIRE)
        }
    }
    fn abs(self) -> Self {
        if self.val.is_nonnegative() {
            self
        } else if self.val.is_nonpositive() {
            -self
        } else {
            let top = (-self.val.lo).max(self.val.hi);
            self.chain(Span::new(0.0, top), Span::new(-1.0, 1.0))
        }
    }
    fn is_sign_positive(self) -> bool {
        !self.is_sign_negative()
    }
    fn is_sign_negative(self) -> bool {
        self.val.hi.is_sign_negative()
    }
    fn mul_add(self, a: Self, b: Self) -> Self {
        self * a + b
    }
    fn recip(self) -> Self {
        Self::one() / self
    }
    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self::one();
        }
        if n < 0 && self.val.contains_zero() {
            return Self::unknown();
        }
        let slope = Span::point(n as f64).mul(self.val.powi(n.saturating_sub(1)));
        self.chain(self.val.powi(n), slope)
    }
    fn powf(self, n: Self) -> Self {
        if n.eps == Span::ZERO && n.val.is_degenerate() {
            let p = n.val.lo;
            if p.fract() == 0.0 && p.abs() <= i32::MAX as f64 {
                return self.powi(p as i32);
            }
        }
        if self.val.lo > 0.0 {
            (n * self.ln()).exp()
        } else {
            Self::unknown()
        }
    }
    fn sqrt(self) -> Self {
        if self.val.lo < 0.0 {
            return Self::unknown();
        }
        let root = self.val.sqrt();
        self.singular_at_zero(root, || Span::point(1.0).div(Span::point(2.0).mul(root)))
    }
    fn cbrt(self) -> Self {
        let root = self.val.increasing(f64::cbrt);
        self.singular_at_zero(root, || Span::point(1.0).div(Span::point(3.0).mul(root.sqr())))
    }
    fn exp(self) -> Self {
        let e = self.val.exp();
        self.chain(e, e)
    }
    fn exp2(self) -> Self {
        let e = self.val.increasing(f64::exp2);
        self.chain(e, e.mul(Span::around(std::f64::consts::LN_2)))
    }
    fn exp_m1(self) -> Self {
        self.chain(self.val.increasing(f64::exp_m1), self.val.exp())
    }
    fn ln(self) -> Self {
        if self.val.lo <= 0.0 {
            return Self::unknown();
        }
        self.chain(
            Span::from_pair(log_bounds(self.val.lo, self.val.hi)),
            Span::point(1.0).div(self.val),
        )
    }
    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }
    fn log2(self) -> Self {
        self.ln() / Self::new(Span::around(std::f64::consts::LN_2), Span::ZERO)
    }
    fn log10(self) -> Self {
        self.ln() / Self::new(Span::around(std::f64::consts::LN_10), Span::ZERO)
    }
    fn ln_1p(self) -> Self {
        (Self::one() + self).ln()
    }
    /// The derivative of a max over overlapping arguments lies in the hull of
    /// both derivatives.
    fn max(self, other: Self) -> Self {
        if self.val.lo >= other.val.hi {
            self
        } else if other.val.lo >= self.val.hi {
            other
        } else {
            Self::new(
                Span::new(self.val.lo.max(other.val.lo), self.val.hi.max(other.val.hi)),
                self.eps.hull(other.eps),
            )
        }
    }
    fn min(self, other: Self) -> Self {
        if self.val.hi <= other.val.lo {
            self
        } else if other.val.hi <= self.val.lo {
            other
        } else {
            Self::new(
                Span::new(self.val.lo.min(other.val.lo), self.val.hi.min(other.val.hi)),
                self.eps.hull(other.eps),
            )
        }
    }
    fn abs_sub(self, other: Self) -> Self {
        (self - other).max(Self::zero())
    }
    fn hypot(self, other: Self) -> Self {
        (self.square() + other.square()).sqrt()
    }
    fn sin(self) -> Self {
        let (l, u) = (self.val.lo, self.val.hi);
        self.chain(
            Span::from_pair(periodic_bounds(l, u, Wave::Sin)),
            Span::from_pair(periodic_bounds(l, u, Wave::Cos)),
        )
    }
    fn cos(self) -> Self {
        let (l, u) = (self.val.lo, self.val.hi);
        self.chain(
            Span::from_pair(periodic_bounds(l, u, Wave::Cos)),
            Span::from_pair(periodic_bounds(l, u, Wave::Sin)).neg(),
        )
    }
    fn tan(self) -> Self {
        let cos = Span::from_pair(periodic_bounds(self.val.lo, self.val.hi, Wave::Cos));
        if cos.contains_zero() {
            return Self::unknown();
        }
        let t = self.val.increasing(f64::tan);
        self.chain(t, Span::point(1.0).add(t.sqr()))
    }
    fn asin(self) -> Self {
        if !(self.val.lo > -1.0 && self.val.hi < 1.0) {
            return Self::unknown();
        }
        let slope = Span::point(1.0).div(self.val.one_minus_sqr().sqrt());
        self.chain(self.val.increasing(f64::asin), slope)
    }
    fn acos(self) -> Self {
        if !(self.val.lo > -1.0 && self.val.hi < 1.0) {
            return Self::unknown();
        }
        let val = Span::new(
            widen_down(self.val.hi.acos(), LOOSE_ULPS),
            widen_up(self.val.lo.acos(), LOOSE_ULPS),
        );
        let slope = Span::point(-1.0).div(self.val.one_minus_sqr().sqrt());
        self.chain(val, slope)
    }
    fn atan(self) -> Self {
        let slope = Span::point(1.0).div(Span::point(1.0).add(self.val.sqr()));
        self.chain(self.val.increasing(f64::atan), slope)
    }
    fn atan2(self, other: Self) -> Self {
        let (_, pi_hi) = pi_bounds::<f64>();
        let radius = self.val.sqr().add(other.val.sqr());
        let eps = other
            .val
            .mul(self.eps)
            .sub(self.val.mul(other.eps))
            .div(radius);
        Self::new(Span::new(-pi_hi, pi_hi), eps)
    }
    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }
    fn sinh(self) -> Self {
        self.chain(self.val.increasing(f64::sinh), self.val.cosh())
    }
    fn cosh(self) -> Self {
        self.chain(self.val.cosh(), self.val.increasing(f64::sinh))
    }
    fn tanh(self) -> Self {
        let t = Span::from_pair(tanh_bounds(self.val.lo, self.val.hi));
        self.chain(t, t.one_minus_sqr())
    }
    fn asinh(self) -> Self {
        let slope = Span::point(1.0).div(self.val.sqr().add(Span::point(1.0)).sqrt());
        self.chain(self.val.increasing(f64::asinh), slope)
    }
    fn acosh(self) -> Self {
        if self.val.lo <= 1.0 {
            return Self::unknown();
        }
        let slope = Span::point(1.0).div(self.val.sqr().sub(Span::point(1.0)).sqrt());
        self.chain(self.val.increasing(f64::acosh), slope)
    }
    fn atanh(self) -> Self {
        if !(self.val.lo > -1.0 && self.val.hi < 1.0) {
            return Self::unknown();
        }
        let slope = Span::point(1.0).div(self.val.one_minus_sqr());
        self.chain(self.val.increasing(f64::atanh), slope)
    }
    fn integer_decode(self) -> (u64, i16, i8) {
        self.val.lo.integer_decode()
    }
}

/// Encloses the Jacobian of `f(x, u)` over the joint box `[lower, upper]` of
/// `[x; u]` and every time in `time`.
///
/// Returns the lower and upper bound matrices: every partial derivative
/// `∂f_i/∂z_j` at every point of the box lies in `[lo[(i, j)], hi[(i, j)]]`.
/// Entries that cannot be bounded are infinite.
pub fn jacobian_bounds<S>(
    system: &S,
    time: (f64, f64),
    lower: &[f64],
    upper: &[f64],
) -> Result<(DMatrix<f64>, DMatrix<f64>)>
where
    S: DynamicalSystem<IntervalDual> + ?Sized,
{
    let n = system.dimension();
    let m = system.control_dimension();
    ReachError::check_len("jacobian domain lower bounds", n + m, lower.len())?;
    ReachError::check_len("jacobian domain upper bounds", n + m, upper.len())?;
    for (index, (&lo, &hi)) in lower.iter().zip(upper).enumerate() {
        if !(lo <= hi) {
            return Err(ReachError::InvalidInterval {
                index,
                lower: lo,
                upper: hi,
            });
        }
    }
    if !(time.0 <= time.1) {
        return Err(ReachError::InvalidInterval {
            index: 0,
            lower: time.0,
            upper: time.1,
        });
    }

    let mut args: Vec<IntervalDual> = lower
        .iter()
        .zip(upper)
        .map(|(&lo, &hi)| IntervalDual::new(Span::new(lo, hi), Span::ZERO))
        .collect();
    let t = IntervalDual::new(Span::new(time.0, time.1), Span::ZERO);
    let mut out = vec![IntervalDual::zero(); n];
    let mut jac_lo = DMatrix::zeros(n, n + m);
    let mut jac_hi = DMatrix::zeros(n, n + m);

    for j in 0..n + m {
        args[j].eps = Span::point(1.0);
        system.apply(t, &args[..n], &args[n..], &mut out);
        for i in 0..n {
            jac_lo[(i, j)] = out[i].eps.lo;
            jac_hi[(i, j)] = out[i].eps.hi;
        }
        args[j].eps = Span::ZERO;
    }
    Ok((jac_lo, jac_hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::jacobian;
    use crate::traits::Scalar;
    use std::f64::consts::PI;

    /// ẋ0 = sin(2π x1) / (2π), ẋ1 = x0 exp(-x1) + u
    struct Wavy;

    impl<T: Scalar> DynamicalSystem<T> for Wavy {
        fn dimension(&self) -> usize {
            2
        }

        fn control_dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: T, x: &[T], u: &[T], out: &mut [T]) {
            let two_pi = T::from_f64(2.0 * PI).unwrap_or_else(T::nan);
            out[0] = (two_pi * x[1]).sin() / two_pi;
            out[1] = x[0] * (-x[1]).exp() + u[0];
        }
    }

    fn encloses(lo: f64, hi: f64, value: f64) -> bool {
        lo <= value && value <= hi
    }

    #[test]
    fn arithmetic_encloses_values_and_derivatives() {
        let x = IntervalDual::variable(1.0, 2.0);
        let c = IntervalDual::constant(3.0);

        let p = x * x * c;
        assert_eq!(p.val, Span::new(3.0, 12.0));
        assert_eq!(p.eps, Span::new(6.0, 12.0));

        let q = c / x;
        assert_eq!(q.val, Span::new(1.5, 3.0));
        assert!(q.eps.lo <= -3.0 && q.eps.hi >= -0.75);
        assert!(q.eps.hi < 0.0);

        let s = x.powi(3);
        assert_eq!(s.val, Span::new(1.0, 8.0));
        assert_eq!(s.eps, Span::new(3.0, 12.0));
    }

    #[test]
    fn elementary_functions_enclose_pointwise_derivatives() {
        let x = IntervalDual::variable(0.2, 0.9);
        let checks: [(IntervalDual, fn(f64) -> (f64, f64)); 6] = [
            (x.sin(), |v| (v.sin(), v.cos())),
            (x.cos(), |v| (v.cos(), -v.sin())),
            (x.exp(), |v| (v.exp(), v.exp())),
            (x.ln(), |v| (v.ln(), 1.0 / v)),
            (x.sqrt(), |v| (v.sqrt(), 0.5 / v.sqrt())),
            (x.tanh(), |v| (v.tanh(), 1.0 - v.tanh().powi(2))),
        ];
        for (enclosure, exact) in checks {
            for k in 0..=20 {
                let v = 0.2 + 0.7 * k as f64 / 20.0;
                let (value, slope) = exact(v);
                assert!(encloses(enclosure.val.lo, enclosure.val.hi, value), "value at {v}");
                assert!(encloses(enclosure.eps.lo, enclosure.eps.hi, slope), "slope at {v}");
            }
        }
    }

    #[test]
    fn singularities_give_up_instead_of_guessing() {
        let around_zero = IntervalDual::variable(-1.0, 1.0);
        assert_eq!((IntervalDual::one() / around_zero).eps, Span::ENTIRE);
        assert_eq!(around_zero.ln().eps, Span::ENTIRE);
        assert_eq!(around_zero.powi(-2).eps, Span::ENTIRE);
        assert_eq!(IntervalDual::variable(0.0, 1.0).sqrt().eps, Span::ENTIRE);
        assert_eq!(IntervalDual::variable(0.5, 1.5).floor().eps, Span::ENTIRE);
        assert_eq!(IntervalDual::variable(0.2, 0.8).floor().eps, Span::ZERO);
        // Constants stay exact even next to unbounded slopes.
        assert_eq!(IntervalDual::constant(4.0).sqrt().eps, Span::ZERO);
    }

    #[test]
    fn comparisons_only_decide_disjoint_values() {
        let a = IntervalDual::variable(0.0, 1.0);
        let b = IntervalDual::variable(2.0, 3.0);
        let c = IntervalDual::variable(0.5, 2.5);
        assert!(a < b);
        assert_eq!(a.partial_cmp(&c), None);
        let m = a.max(c);
        assert_eq!(m.val, Span::new(0.5, 2.5));
        assert_eq!(m.eps, Span::point(1.0));
        assert_eq!(a.max(b), b);
    }

    #[test]
    fn jacobian_bounds_cover_sampled_jacobians() {
        let lower = [-1.0, -1.0, -0.5];
        let upper = [1.0, 1.0, 0.5];
        let (lo, hi) = jacobian_bounds(&Wavy, (0.0, 0.0), &lower, &upper).unwrap();
        assert_eq!(lo.shape(), (2, 3));

        for a in 0..=8 {
            for b in 0..=8 {
                let x = [-1.0 + a as f64 / 4.0, -1.0 + b as f64 / 4.0];
                let jac = jacobian(&Wavy, 0.0, &x, &[0.1]).unwrap();
                for i in 0..2 {
                    for j in 0..3 {
                        assert!(
                            encloses(lo[(i, j)], hi[(i, j)], jac[(i, j)]),
                            "entry ({i}, {j}) at {x:?}"
                        );
                    }
                }
            }
        }
        // cos(2π x1) takes both signs on [-1, 1].
        assert!(lo[(0, 1)] < 0.0 && hi[(0, 1)] > 0.0);
        assert_eq!((lo[(1, 2)], hi[(1, 2)]), (1.0, 1.0));
        assert!(lo[(1, 0)] > 0.0);
    }

    #[test]
    fn jacobian_bounds_check_the_domain() {
        assert!(matches!(
            jacobian_bounds(&Wavy, (0.0, 0.0), &[0.0, 0.0], &[1.0, 1.0]),
            Err(ReachError::Dimension { .. })
        ));
        assert!(matches!(
            jacobian_bounds(&Wavy, (0.0, 0.0), &[0.0, 2.0, 0.0], &[1.0, 1.0, 1.0]),
            Err(ReachError::InvalidInterval { index: 1, .. })
        ));
        assert!(jacobian_bounds(&Wavy, (1.0, 0.0), &[0.0; 3], &[1.0; 3]).is_err());
    }
}
