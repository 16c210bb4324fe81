//! Explicit two-variant operands.
//!
//! Code that must run both on exact arrays and on interval boxes holds an
//! [`Operand`] and picks the operation by tag. Concrete operands follow plain
//! IEEE array semantics; as soon as one side is an interval, the concrete side
//! is promoted to a zero-width box and the interval rules apply.

use crate::error::Result;
use crate::interval::broadcast::{broadcast_shape, view_as};
use crate::interval::IntervalBox;
use crate::traits::Endpoint;
use ndarray::{ArrayD, Zip};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Concrete,
    Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sqr,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tanh,
    Sigmoid,
    Relu,
    Powi(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand<T: Endpoint = f64> {
    Concrete(ArrayD<T>),
    Interval(IntervalBox<T>),
}

impl<T: Endpoint> Operand<T> {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Concrete(_) => OperandKind::Concrete,
            Operand::Interval(_) => OperandKind::Interval,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Operand::Concrete(values) => values.shape(),
            Operand::Interval(b) => b.shape(),
        }
    }

    /// Interval view of the operand; concrete values become zero-width boxes.
    pub fn to_interval(&self) -> Result<IntervalBox<T>> {
        match self {
            Operand::Concrete(values) => IntervalBox::point(values.clone()),
            Operand::Interval(b) => Ok(b.clone()),
        }
    }

    pub fn binary(&self, op: BinaryOp, rhs: &Self) -> Result<Self> {
        match (self, rhs) {
            (Operand::Concrete(a), Operand::Concrete(b)) => {
                let shape = broadcast_shape(a.shape(), b.shape())?;
                let (a, b) = (view_as(a, &shape)?, view_as(b, &shape)?);
                let f = concrete_binary::<T>(op);
                Ok(Operand::Concrete(
                    Zip::from(&a).and(&b).map_collect(|&x, &y| f(x, y)),
                ))
            }
            _ => {
                let (a, b) = (self.to_interval()?, rhs.to_interval()?);
                let result = match op {
                    BinaryOp::Add => a.add(&b)?,
                    BinaryOp::Sub => a.sub(&b)?,
                    BinaryOp::Mul => a.mul(&b)?,
                    BinaryOp::Div => a.div(&b)?,
                    BinaryOp::Min => a.min(&b)?,
                    BinaryOp::Max => a.max(&b)?,
                };
                Ok(Operand::Interval(result))
            }
        }
    }

    pub fn unary(&self, op: UnaryOp) -> Result<Self> {
        match self {
            Operand::Concrete(values) => Ok(Operand::Concrete(values.mapv(|x| match op {
                UnaryOp::Neg => -x,
                UnaryOp::Abs => x.abs(),
                UnaryOp::Sqr => x * x,
                UnaryOp::Sqrt => x.sqrt(),
                UnaryOp::Exp => x.exp(),
                UnaryOp::Log => x.ln(),
                UnaryOp::Sin => x.sin(),
                UnaryOp::Cos => x.cos(),
                UnaryOp::Tanh => x.tanh(),
                UnaryOp::Sigmoid => T::one() / (T::one() + (-x).exp()),
                UnaryOp::Relu => x.max(T::zero()),
                UnaryOp::Powi(n) => x.powi(n),
            }))),
            Operand::Interval(b) => Ok(Operand::Interval(match op {
                UnaryOp::Neg => b.neg(),
                UnaryOp::Abs => b.abs(),
                UnaryOp::Sqr => b.sqr(),
                UnaryOp::Sqrt => b.sqrt()?,
                UnaryOp::Exp => b.exp(),
                UnaryOp::Log => b.log()?,
                UnaryOp::Sin => b.sin(),
                UnaryOp::Cos => b.cos(),
                UnaryOp::Tanh => b.tanh(),
                UnaryOp::Sigmoid => b.sigmoid(),
                UnaryOp::Relu => b.relu(),
                UnaryOp::Powi(n) => b.powi(n)?,
            })),
        }
    }

    pub fn add(&self, rhs: &Self) -> Result<Self> {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        self.binary(BinaryOp::Mul, rhs)
    }

    pub fn div(&self, rhs: &Self) -> Result<Self> {
        self.binary(BinaryOp::Div, rhs)
    }
}

fn concrete_binary<T: Endpoint>(op: BinaryOp) -> fn(T, T) -> T {
    match op {
        BinaryOp::Add => |x, y| x + y,
        BinaryOp::Sub => |x, y| x - y,
        BinaryOp::Mul => |x, y| x * y,
        BinaryOp::Div => |x, y| x / y,
        BinaryOp::Min => |x: T, y| x.min(y),
        BinaryOp::Max => |x: T, y| x.max(y),
    }
}

impl<T: Endpoint> From<IntervalBox<T>> for Operand<T> {
    fn from(value: IntervalBox<T>) -> Self {
        Operand::Interval(value)
    }
}

impl<T: Endpoint> From<ArrayD<T>> for Operand<T> {
    fn from(value: ArrayD<T>) -> Self {
        Operand::Concrete(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, IxDyn};

    fn concrete(values: &[f64]) -> Operand {
        Operand::Concrete(arr1(values).into_dyn())
    }

    #[test]
    fn concrete_operands_use_plain_arithmetic() {
        let a = concrete(&[1.0, 2.0]);
        let b = concrete(&[4.0, 0.0]);
        let quotient = a.div(&b).unwrap();
        assert_eq!(quotient.kind(), OperandKind::Concrete);
        match quotient {
            Operand::Concrete(v) => {
                assert_eq!(v[0], 0.25);
                assert!(v[1].is_infinite());
            }
            Operand::Interval(_) => unreachable!(),
        }
    }

    #[test]
    fn mixing_promotes_to_interval() {
        let a = concrete(&[2.0]);
        let b = Operand::Interval(IntervalBox::from_slices(&[-1.0], &[3.0]).unwrap());
        let product = a.mul(&b).unwrap();
        assert_eq!(product.kind(), OperandKind::Interval);
        assert_eq!(
            product.to_interval().unwrap(),
            IntervalBox::from_slices(&[-2.0], &[6.0]).unwrap()
        );
    }

    #[test]
    fn interval_division_keeps_domain_errors() {
        let a = concrete(&[1.0]);
        let b = Operand::Interval(IntervalBox::from_slices(&[-1.0], &[1.0]).unwrap());
        assert!(a.div(&b).is_err());
    }

    #[test]
    fn unary_dispatch_matches_variant() {
        let x = concrete(&[0.0, 1.0]);
        let boxed = Operand::Interval(IntervalBox::point(arr1(&[0.0, 1.0]).into_dyn()).unwrap());
        for op in [UnaryOp::Exp, UnaryOp::Sin, UnaryOp::Relu, UnaryOp::Powi(3)] {
            let plain = x.unary(op).unwrap().to_interval().unwrap();
            let enclosed = boxed.unary(op).unwrap().to_interval().unwrap();
            for i in 0..2 {
                let (v, _) = plain.component(i).unwrap();
                let (l, u) = enclosed.component(i).unwrap();
                assert!(l <= v && v <= u, "{op:?} at {i}");
            }
        }
        assert!(boxed.unary(UnaryOp::Log).is_err());
    }

    #[test]
    fn concrete_broadcast_errors_are_shape_errors() {
        let a = Operand::<f64>::Concrete(ArrayD::zeros(IxDyn(&[2, 3])));
        let b = concrete(&[1.0, 2.0]);
        assert!(a.add(&b).is_err());
    }
}
