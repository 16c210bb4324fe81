//! Directed rounding on top of round-to-nearest hardware arithmetic.
//!
//! Basic operations use error-free transformations to learn whether the
//! nearest-rounded result is exact and, if not, on which side of it the real
//! result lies. Only inexact results are nudged one ulp outward, so exact
//! computations on degenerate intervals stay bit-identical to plain arithmetic.
//!
//! Elementary functions from the platform libm are not correctly rounded; their
//! results are widened by a fixed number of ulps instead.

use crate::traits::{cast, Endpoint};

macro_rules! impl_endpoint {
    ($t:ty) => {
        impl Endpoint for $t {
            fn next_up(self) -> Self {
                if self.is_nan() || self == <$t>::INFINITY {
                    return self;
                }
                if self == 0.0 {
                    return <$t>::from_bits(1);
                }
                let bits = self.to_bits();
                if self > 0.0 {
                    <$t>::from_bits(bits + 1)
                } else {
                    <$t>::from_bits(bits - 1)
                }
            }

            fn next_down(self) -> Self {
                -(-self).next_up()
            }
        }
    };
}

impl_endpoint!(f64);
impl_endpoint!(f32);

/// Below this magnitude a product or quotient may have lost bits to underflow and
/// the FMA residual is no longer exact.
#[inline]
fn underflow_threshold<T: Endpoint>() -> T {
    T::min_positive_value() / T::epsilon()
}

/// Result of a finite-operand operation that overflowed: the real value is still
/// finite, so the bound on the other side is the largest finite magnitude.
#[inline]
fn overflow_down<T: Endpoint>(r: T) -> T {
    if r > T::zero() {
        T::max_value()
    } else {
        r
    }
}

#[inline]
fn overflow_up<T: Endpoint>(r: T) -> T {
    if r < T::zero() {
        T::min_value()
    } else {
        r
    }
}

#[inline]
fn two_sum<T: Endpoint>(a: T, b: T) -> (T, T) {
    let s = a + b;
    let bb = s - a;
    let err = (a - (s - bb)) + (b - bb);
    (s, err)
}

pub(crate) fn add_down<T: Endpoint>(a: T, b: T) -> T {
    let (s, err) = two_sum(a, b);
    if !s.is_finite() {
        return if a.is_finite() && b.is_finite() {
            overflow_down(s)
        } else {
            s
        };
    }
    if err < T::zero() {
        s.next_down()
    } else {
        s
    }
}

pub(crate) fn add_up<T: Endpoint>(a: T, b: T) -> T {
    let (s, err) = two_sum(a, b);
    if !s.is_finite() {
        return if a.is_finite() && b.is_finite() {
            overflow_up(s)
        } else {
            s
        };
    }
    if err > T::zero() {
        s.next_up()
    } else {
        s
    }
}

#[inline]
pub(crate) fn sub_down<T: Endpoint>(a: T, b: T) -> T {
    add_down(a, -b)
}

#[inline]
pub(crate) fn sub_up<T: Endpoint>(a: T, b: T) -> T {
    add_up(a, -b)
}

/// Sign of `a * b - fl(a * b)`, or `None` when the residual cannot be trusted.
fn mul_residual<T: Endpoint>(a: T, b: T, p: T) -> Option<T> {
    if p.abs() < underflow_threshold() {
        return None;
    }
    Some(a.mul_add(b, -p))
}

/// Endpoint product. A zero endpoint annihilates an unbounded one.
#[inline]
fn raw_mul<T: Endpoint>(a: T, b: T) -> T {
    if a.is_zero() || b.is_zero() {
        T::zero()
    } else {
        a * b
    }
}

pub(crate) fn mul_down<T: Endpoint>(a: T, b: T) -> T {
    let p = raw_mul(a, b);
    if p.is_zero() && (a.is_zero() || b.is_zero()) {
        return p;
    }
    if !p.is_finite() {
        return if a.is_finite() && b.is_finite() {
            overflow_down(p)
        } else {
            p
        };
    }
    match mul_residual(a, b, p) {
        Some(err) if err >= T::zero() => p,
        _ => p.next_down(),
    }
}

pub(crate) fn mul_up<T: Endpoint>(a: T, b: T) -> T {
    let p = raw_mul(a, b);
    if p.is_zero() && (a.is_zero() || b.is_zero()) {
        return p;
    }
    if !p.is_finite() {
        return if a.is_finite() && b.is_finite() {
            overflow_up(p)
        } else {
            p
        };
    }
    match mul_residual(a, b, p) {
        Some(err) if err <= T::zero() => p,
        _ => p.next_up(),
    }
}

/// Sign of `a / b - fl(a / b)` expressed through the exact remainder `a - q * b`.
fn div_residual<T: Endpoint>(a: T, b: T, q: T) -> Option<T> {
    if q.abs() < underflow_threshold() || a.abs() < underflow_threshold() {
        return None;
    }
    let r = (-q).mul_add(b, a);
    Some(if b > T::zero() { r } else { -r })
}

/// `b` must be nonzero.
pub(crate) fn div_down<T: Endpoint>(a: T, b: T) -> T {
    if a.is_zero() {
        return T::zero();
    }
    let q = a / b;
    if !q.is_finite() {
        return if a.is_finite() { overflow_down(q) } else { q };
    }
    if !b.is_finite() {
        // finite / infinite endpoint: the limit is zero approached from the sign of q.
        return if (a > T::zero()) == (b > T::zero()) {
            T::zero()
        } else {
            T::zero().next_down()
        };
    }
    match div_residual(a, b, q) {
        Some(err) if err >= T::zero() => q,
        _ => q.next_down(),
    }
}

pub(crate) fn div_up<T: Endpoint>(a: T, b: T) -> T {
    if a.is_zero() {
        return T::zero();
    }
    let q = a / b;
    if !q.is_finite() {
        return if a.is_finite() { overflow_up(q) } else { q };
    }
    if !b.is_finite() {
        return if (a > T::zero()) == (b > T::zero()) {
            T::zero().next_up()
        } else {
            T::zero()
        };
    }
    match div_residual(a, b, q) {
        Some(err) if err <= T::zero() => q,
        _ => q.next_up(),
    }
}

/// Square root rounded down; `x` must be non-negative. IEEE `sqrt` is correctly
/// rounded, so the residual `x - s^2` decides exactness.
pub(crate) fn sqrt_down<T: Endpoint>(x: T) -> T {
    let s = x.sqrt();
    if !s.is_finite() || s.is_zero() {
        return s;
    }
    if s < underflow_threshold() {
        return s.next_down().max(T::zero());
    }
    let r = (-s).mul_add(s, x);
    if r < T::zero() {
        s.next_down()
    } else {
        s
    }
}

pub(crate) fn sqrt_up<T: Endpoint>(x: T) -> T {
    let s = x.sqrt();
    if !s.is_finite() || (s.is_zero() && x.is_zero()) {
        return s;
    }
    if s < underflow_threshold() {
        return s.next_up();
    }
    let r = (-s).mul_add(s, x);
    if r > T::zero() {
        s.next_up()
    } else {
        s
    }
}

/// Moves a libm result `ulps` steps toward -inf.
pub(crate) fn widen_down<T: Endpoint>(x: T, ulps: usize) -> T {
    if !x.is_finite() {
        return x;
    }
    (0..ulps).fold(x, |acc, _| acc.next_down())
}

/// Moves a libm result `ulps` steps toward +inf.
pub(crate) fn widen_up<T: Endpoint>(x: T, ulps: usize) -> T {
    if !x.is_finite() {
        return x;
    }
    (0..ulps).fold(x, |acc, _| acc.next_up())
}

/// `x^n` for `x >= 0`, rounded down, by binary exponentiation with directed products.
pub(crate) fn powi_nonneg_down<T: Endpoint>(x: T, n: u32) -> T {
    let mut result = T::one();
    let mut base = x;
    let mut e = n;
    while e > 0 {
        if e & 1 == 1 {
            result = mul_down(result, base);
        }
        e >>= 1;
        if e > 0 {
            base = mul_down(base, base);
        }
    }
    result.max(T::zero())
}

/// `x^n` for `x >= 0`, rounded up.
pub(crate) fn powi_nonneg_up<T: Endpoint>(x: T, n: u32) -> T {
    let mut result = T::one();
    let mut base = x;
    let mut e = n;
    while e > 0 {
        if e & 1 == 1 {
            result = mul_up(result, base);
        }
        e >>= 1;
        if e > 0 {
            base = mul_up(base, base);
        }
    }
    result
}

/// `pi` enclosed from below and above for the working precision.
pub(crate) fn pi_bounds<T: Endpoint>() -> (T, T) {
    let pi: T = cast(std::f64::consts::PI);
    (pi.next_down(), pi.next_up())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_up_and_down_step_one_ulp() {
        assert_eq!(1.0f64.next_up(), 1.0 + f64::EPSILON);
        assert_eq!(1.0f64.next_down(), 1.0 - f64::EPSILON / 2.0);
        assert_eq!(0.0f64.next_up(), f64::from_bits(1));
        assert_eq!(0.0f64.next_down(), -f64::from_bits(1));
        assert_eq!(f64::INFINITY.next_up(), f64::INFINITY);
        assert_eq!(f64::MAX.next_up(), f64::INFINITY);
        assert_eq!((-1.0f32).next_up(), -1.0 + f32::EPSILON / 2.0);
    }

    #[test]
    fn exact_sums_are_not_widened() {
        assert_eq!(add_down(1.0, 2.0), 3.0);
        assert_eq!(add_up(1.0, 2.0), 3.0);
        assert_eq!(mul_down(3.0, -4.0), -12.0);
        assert_eq!(div_up(1.0, 4.0), 0.25);
    }

    #[test]
    fn inexact_results_bracket_the_real_value() {
        let lo = add_down(0.1, 0.2);
        let hi = add_up(0.1, 0.2);
        assert!(lo < hi);
        assert!(lo <= 0.1 + 0.2 && 0.1 + 0.2 <= hi);

        let lo = div_down(1.0, 3.0);
        let hi = div_up(1.0, 3.0);
        assert_eq!(hi, lo.next_up());
        assert!(lo * 3.0 <= 1.0 && hi * 3.0 >= 1.0);
    }

    #[test]
    fn overflow_keeps_a_finite_inner_bound() {
        assert_eq!(mul_down(f64::MAX, 2.0), f64::MAX);
        assert_eq!(mul_up(f64::MAX, 2.0), f64::INFINITY);
        assert_eq!(mul_up(-f64::MAX, 2.0), f64::MIN);
    }

    #[test]
    fn zero_annihilates_infinite_endpoints() {
        assert_eq!(mul_down(0.0, f64::INFINITY), 0.0);
        assert_eq!(mul_up(f64::NEG_INFINITY, 0.0), 0.0);
    }

    #[test]
    fn directed_square_roots() {
        assert_eq!(sqrt_down(4.0), 2.0);
        assert_eq!(sqrt_up(4.0), 2.0);
        let lo = sqrt_down(2.0f64);
        let hi = sqrt_up(2.0f64);
        assert!(lo < hi);
        assert!(lo * lo <= 2.0 && hi * hi >= 2.0);
    }

    #[test]
    fn directed_integer_powers() {
        assert_eq!(powi_nonneg_down(2.0, 10), 1024.0);
        assert_eq!(powi_nonneg_up(2.0, 10), 1024.0);
        assert_eq!(powi_nonneg_down(1.5, 7), 17.0859375);
        let lo = powi_nonneg_down(1.1f64, 7);
        let hi = powi_nonneg_up(1.1f64, 7);
        assert!(lo < hi);
        assert!(hi - lo < 1e-14);
    }
}
