//! Composite operations built out of [primitives].
//!
//! Each builder runs inside a scope named after itself, so every node it creates can be traced
//! back to the composite which produced it.

use log::debug;

use crate::common::{DimSize, Scalar};
use crate::dims::{canonical_dimension_index, drop_dimensions};
use crate::ops::OpError;
use crate::primitives;
use crate::tensor::LazyTensor;

/// The sub-tensor at `index` along `dim`, with `dim` removed.
fn index_across_dims(input: &LazyTensor, dim: usize, index: i64) -> Result<LazyTensor, OpError> {
    let dim = dim as i64;
    let sliced = primitives::slice(input, dim, index, index + 1, 1)?;
    primitives::squeeze(&sliced, dim)
}

/// The vector cross product of `input` and `other` along an axis of size 3.
///
/// `other` must have the same shape as `input`, which is also the shape of the result. If
/// `dim` is `None`, the first axis of `input` with size 3 is used. Fails before building
/// anything if no such axis exists, or if the given axis does not have size 3.
pub fn cross(
    input: &LazyTensor,
    other: &LazyTensor,
    dim: Option<i64>,
) -> Result<LazyTensor, OpError> {
    let _scope = input.context().push_scope("cross");
    if other.shape() != input.shape() {
        return Err(OpError::IncompatibleShapes {
            op: "cross",
            lhs: input.shape().clone(),
            rhs: other.shape().clone(),
        });
    }
    let dims = input.dimensions()?;
    let rank = dims.len();
    let axis = match dim {
        Some(d) => canonical_dimension_index(d, rank)
            .map_err(|_| OpError::CrossDimensionOutOfRange { dim: d, rank })?,
        None => dims
            .iter()
            .position(|&size| size == 3)
            .ok_or_else(|| OpError::NoDimensionOfSize3(input.shape().clone()))?,
    };
    if dims[axis] != 3 {
        return Err(OpError::CrossDimensionNotSize3 {
            dim: axis,
            size: dims[axis],
        });
    }
    debug!("cross: using axis {axis} of {}", input.shape());

    let components = |t: &LazyTensor| -> Result<[LazyTensor; 3], OpError> {
        Ok([
            index_across_dims(t, axis, 0)?,
            index_across_dims(t, axis, 1)?,
            index_across_dims(t, axis, 2)?,
        ])
    };
    let [u1, u2, u3] = components(input)?;
    let [v1, v2, v3] = components(other)?;

    // a * b - c * d
    let term = |a: &LazyTensor,
                b: &LazyTensor,
                c: &LazyTensor,
                d: &LazyTensor|
     -> Result<LazyTensor, OpError> {
        primitives::sub(
            &primitives::mul(a, b)?,
            &primitives::mul(c, d)?,
            Scalar::Int(1),
        )
    };
    let s1 = term(&u2, &v3, &u3, &v2)?;
    let s2 = term(&u3, &v1, &u1, &v3)?;
    let s3 = term(&u1, &v2, &u2, &v1)?;
    primitives::stack(&[s1, s2, s3], axis as i64)
}

/// A square matrix with the rank-1 `input` on its `diagonal`-th diagonal and zeros
/// elsewhere. Positive `diagonal` selects a diagonal above the main one.
///
/// The result has side `n + |diagonal|`.
pub fn make_matrix_with_diagonal(
    input: &LazyTensor,
    diagonal: i64,
) -> Result<LazyTensor, OpError> {
    let context = input.context();
    let _scope = context.push_scope("make_matrix_with_diagonal");
    if input.rank() != 1 {
        return Err(OpError::invalid_argument(
            "make_matrix_with_diagonal",
            format!("expected a rank-1 input, got {}", input.shape()),
        ));
    }
    let n: DimSize = input.size(0)?;
    debug!("make_matrix_with_diagonal: n={n}, diagonal={diagonal}");

    let padding = if diagonal >= 0 {
        [diagonal, 0, 0, diagonal]
    } else {
        let Some(offset) = diagonal.checked_neg() else {
            return Err(OpError::invalid_argument(
                "make_matrix_with_diagonal",
                format!("diagonal {diagonal} is out of range"),
            ));
        };
        [0, offset, offset, 0]
    };

    let identity = primitives::eye(context, n, n, input.device(), input.dtype());
    let diag = primitives::mul(&identity, input)?;
    primitives::constant_pad_nd(&diag, &padding, Scalar::Int(0))
}

/// The sub-tensor at `index` along `dim`. The result has one fewer dimension than `input`.
pub fn select(input: &LazyTensor, dim: i64, index: i64) -> Result<LazyTensor, OpError> {
    let _scope = input.context().push_scope("select");
    let dim = canonical_dimension_index(dim, input.rank())?;
    let narrowed = primitives::narrow(input, dim as i64, index, 1)?;
    let view_dims = drop_dimensions(narrowed.dimensions()?, &[dim])
        .into_iter()
        .map(|d| d as i64)
        .collect::<Vec<_>>();
    primitives::view(&narrowed, &view_dims)
}
