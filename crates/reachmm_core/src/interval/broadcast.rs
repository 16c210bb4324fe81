//! NumPy-style shape broadcasting for interval operands.

use crate::error::{ReachError, Result};
use ndarray::{ArrayD, ArrayViewD, IxDyn};

/// Shape obtained by broadcasting `lhs` against `rhs`.
///
/// Shapes are aligned at their trailing axes; two extents are compatible when
/// they are equal or one of them is 1.
pub fn broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let ndim = lhs.len().max(rhs.len());
    let mut shape = vec![0; ndim];
    for axis in 0..ndim {
        let l = extent_from_back(lhs, ndim - 1 - axis);
        let r = extent_from_back(rhs, ndim - 1 - axis);
        shape[axis] = match (l, r) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => {
                return Err(ReachError::Shape {
                    lhs: lhs.to_vec(),
                    rhs: rhs.to_vec(),
                })
            }
        };
    }
    Ok(shape)
}

/// Extent of the axis `from_back` positions before the last; missing leading axes are 1.
fn extent_from_back(shape: &[usize], from_back: usize) -> usize {
    if from_back < shape.len() {
        shape[shape.len() - 1 - from_back]
    } else {
        1
    }
}

/// Views `array` with the target `shape`, or reports which shapes clashed.
pub(crate) fn view_as<'a, T>(array: &'a ArrayD<T>, shape: &[usize]) -> Result<ArrayViewD<'a, T>> {
    array
        .broadcast(IxDyn(shape))
        .ok_or_else(|| ReachError::Shape {
            lhs: array.shape().to_vec(),
            rhs: shape.to_vec(),
        })
}
