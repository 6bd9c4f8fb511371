use itertools::{EitherOrBoth, Itertools};

use std::fmt;

use crate::common::{DimSize, Dtype, Scalar};
use crate::device::Device;
use crate::shape::{Shape, ShapeError, ShapeMode};
use crate::tensor::EagerTensor;
use crate::utils::join_into_string;

/// The operation a graph [Node](crate::graph::Node) performs, along with its non-tensor
/// parameters.
///
/// Axis and offset parameters are stored in canonical form: non-negative and in range for the
/// operand they were built against.
#[derive(Debug, Clone)]
pub enum Op {
    /// A leaf bound to an already-materialized tensor.
    DeviceData(EagerTensor),
    Slice {
        dim: usize,
        start: DimSize,
        end: DimSize,
        step: DimSize,
    },
    /// Removes `dim` if it has size one.
    Squeeze { dim: usize },
    Mul,
    /// `lhs - alpha * rhs`
    Sub { alpha: Scalar },
    Stack { dim: usize },
    Narrow {
        dim: usize,
        start: DimSize,
        length: DimSize,
    },
    View { dims: Vec<DimSize> },
    Eye {
        rows: DimSize,
        cols: DimSize,
        dtype: Dtype,
    },
    /// Pads with `value`. `padding` holds `(before, after)` pairs starting at the last axis.
    ConstantPad { padding: Vec<i64>, value: Scalar },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum OpError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("{op} expects {expected} operands but got {actual}")]
    OperandCount {
        op: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{op}: incompatible operand shapes {lhs} and {rhs}")]
    IncompatibleShapes {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },
    #[error("{op}: mismatched element types {lhs} and {rhs}")]
    DtypeMismatch {
        op: &'static str,
        lhs: Dtype,
        rhs: Dtype,
    },
    #[error("{op}: operands live on different devices ({lhs} and {rhs})")]
    DeviceMismatch {
        op: &'static str,
        lhs: Device,
        rhs: Device,
    },
    #[error("{op}: operands belong to different lazy contexts")]
    ContextMismatch { op: &'static str },
    #[error("{op}: {reason}")]
    InvalidArgument { op: &'static str, reason: String },
    #[error("No dimension of size 3 in input: {0}")]
    NoDimensionOfSize3(Shape),
    #[error("Invalid cross argument: dimension {dim} does not have size 3 (got {size})")]
    CrossDimensionNotSize3 { dim: usize, size: DimSize },
    #[error("Invalid cross argument: dimension {dim} out of range for rank {rank}")]
    CrossDimensionOutOfRange { dim: i64, rank: usize },
}

impl OpError {
    /// Returns true if shape inference stopped because concrete sizes are unknown in
    /// [ShapeMode::Dynamic]. Callers may recover by falling back to symbolic handling.
    pub fn is_shape_unknown(&self) -> bool {
        matches!(self, OpError::Shape(e) if e.is_unknown())
    }

    pub(crate) fn invalid_argument(op: &'static str, reason: impl Into<String>) -> Self {
        OpError::InvalidArgument {
            op,
            reason: reason.into(),
        }
    }
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::DeviceData(_) => "device_data",
            Op::Slice { .. } => "slice",
            Op::Squeeze { .. } => "squeeze",
            Op::Mul => "mul",
            Op::Sub { .. } => "sub",
            Op::Stack { .. } => "stack",
            Op::Narrow { .. } => "narrow",
            Op::View { .. } => "view",
            Op::Eye { .. } => "eye",
            Op::ConstantPad { .. } => "constant_pad_nd",
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Op::DeviceData(_) | Op::Eye { .. })
    }

    /// Computes the output [Shape] of this operation applied to operands of the given shapes.
    ///
    /// Concrete operand sizes are read through `mode`, so in [ShapeMode::Dynamic] every operation
    /// which depends on them fails with [ShapeError::Unknown].
    pub fn infer_shape(&self, operands: &[&Shape], mode: ShapeMode) -> Result<Shape, OpError> {
        let op = self.name();
        match self {
            Op::DeviceData(tensor) => {
                expect_operands::<0>(op, operands)?;
                Ok(tensor.shape().clone())
            }
            Op::Eye { rows, cols, dtype } => {
                expect_operands::<0>(op, operands)?;
                Ok(Shape::new(*dtype, vec![*rows, *cols]))
            }
            Op::Slice {
                dim,
                start,
                end,
                step,
            } => {
                let [input] = expect_operands::<1>(op, operands)?;
                let size = array_dimension(input, *dim, mode)?;
                if *step == 0 {
                    return Err(OpError::invalid_argument(op, "step must be positive"));
                }
                if start > end || *end > size {
                    return Err(OpError::invalid_argument(
                        op,
                        format!("range {start}..{end} does not fit dimension {dim} of size {size}"),
                    ));
                }
                let mut output = input.clone();
                output.set_dimension(*dim, (end - start).div_ceil(*step))?;
                Ok(output)
            }
            Op::Squeeze { dim } => {
                let [input] = expect_operands::<1>(op, operands)?;
                let mut output = input.clone();
                if array_dimension(input, *dim, mode)? == 1 {
                    output.delete_dimension(*dim)?;
                }
                Ok(output)
            }
            Op::Mul | Op::Sub { .. } => {
                let [lhs, rhs] = expect_operands::<2>(op, operands)?;
                broadcast_shapes(op, lhs, rhs, mode)
            }
            Op::Stack { dim } => {
                let Some((first, rest)) = operands.split_first() else {
                    return Err(OpError::invalid_argument(op, "expects a non-empty list"));
                };
                first.check_is_array()?;
                if let Some(other) = rest.iter().find(|s| **s != *first) {
                    return Err(OpError::IncompatibleShapes {
                        op,
                        lhs: (*first).clone(),
                        rhs: (*other).clone(),
                    });
                }
                if *dim > first.rank() {
                    return Err(ShapeError::DimensionOutOfRange {
                        dim: *dim as i64,
                        rank: first.rank() + 1,
                    }
                    .into());
                }
                let mut dims = first.dimensions(mode)?.to_vec();
                let mut dynamic = first.dynamic_dimensions().to_vec();
                dims.insert(*dim, operands.len() as DimSize);
                dynamic.insert(*dim, false);
                Ok(Shape::with_dynamic_dimensions(
                    first.element_type(),
                    dims,
                    dynamic,
                )?)
            }
            Op::Narrow { dim, start, length } => {
                let [input] = expect_operands::<1>(op, operands)?;
                let size = array_dimension(input, *dim, mode)?;
                if start.checked_add(*length).map_or(true, |end| end > size) {
                    return Err(OpError::invalid_argument(
                        op,
                        format!(
                            "start {start} and length {length} exceed dimension {dim} of size {size}"
                        ),
                    ));
                }
                let mut output = input.clone();
                output.set_dimension(*dim, *length)?;
                output.set_dynamic_dimension(*dim, false)?;
                Ok(output)
            }
            Op::View { dims } => {
                let [input] = expect_operands::<1>(op, operands)?;
                let input_count = input.element_count(mode)?;
                let output_count: u64 = dims.iter().product();
                if input_count != output_count {
                    return Err(OpError::invalid_argument(
                        op,
                        format!(
                            "cannot view {input} ({input_count} elements) as [{}] ({output_count} elements)",
                            join_into_string(dims, ",")
                        ),
                    ));
                }
                Ok(Shape::new(input.element_type(), dims.clone()))
            }
            Op::ConstantPad { padding, value: _ } => {
                let [input] = expect_operands::<1>(op, operands)?;
                input.check_is_array()?;
                let rank = input.rank();
                if padding.len() % 2 != 0 || padding.len() > 2 * rank {
                    return Err(OpError::invalid_argument(
                        op,
                        format!(
                            "padding length {} must be even and at most twice the rank {rank}",
                            padding.len()
                        ),
                    ));
                }
                let dims = input.dimensions(mode)?;
                let mut output = input.clone();
                for (pair_idx, pair) in padding.chunks_exact(2).enumerate() {
                    let axis = rank - 1 - pair_idx;
                    let padded = i64::try_from(dims[axis])
                        .ok()
                        .and_then(|size| size.checked_add(pair[0]))
                        .and_then(|size| size.checked_add(pair[1]))
                        .ok_or_else(|| {
                            OpError::invalid_argument(
                                op,
                                format!("padding {pair:?} overflows dimension {axis}"),
                            )
                        })?;
                    if padded < 0 {
                        return Err(OpError::invalid_argument(
                            op,
                            format!("padding {pair:?} makes dimension {axis} negative"),
                        ));
                    }
                    output.set_dimension(axis, padded as DimSize)?;
                }
                Ok(output)
            }
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match self {
            Op::DeviceData(tensor) => write!(f, "{name}({})", tensor.device()),
            Op::Slice {
                dim,
                start,
                end,
                step,
            } => write!(f, "{name}(dim={dim}, start={start}, end={end}, step={step})"),
            Op::Squeeze { dim } | Op::Stack { dim } => write!(f, "{name}(dim={dim})"),
            Op::Mul => write!(f, "{name}"),
            Op::Sub { alpha } => write!(f, "{name}(alpha={alpha})"),
            Op::Narrow { dim, start, length } => {
                write!(f, "{name}(dim={dim}, start={start}, length={length})")
            }
            Op::View { dims } => write!(f, "{name}([{}])", join_into_string(dims, ",")),
            Op::Eye { rows, cols, dtype } => write!(f, "{name}({rows}, {cols}, {dtype})"),
            Op::ConstantPad { padding, value } => write!(
                f,
                "{name}([{}], value={value})",
                join_into_string(padding, ",")
            ),
        }
    }
}

fn expect_operands<'a, const N: usize>(
    op: &'static str,
    operands: &[&'a Shape],
) -> Result<[&'a Shape; N], OpError> {
    operands.try_into().map_err(|_| OpError::OperandCount {
        op,
        expected: N,
        actual: operands.len(),
    })
}

fn array_dimension(shape: &Shape, dim: usize, mode: ShapeMode) -> Result<DimSize, ShapeError> {
    shape.check_is_array()?;
    shape.dimension(dim, mode)
}

/// Numpy-style broadcasting: dimensions are aligned from the right and must be equal or one.
fn broadcast_shapes(
    op: &'static str,
    lhs: &Shape,
    rhs: &Shape,
    mode: ShapeMode,
) -> Result<Shape, OpError> {
    lhs.check_is_array()?;
    rhs.check_is_array()?;
    if lhs.element_type() != rhs.element_type() {
        return Err(OpError::DtypeMismatch {
            op,
            lhs: lhs.element_type(),
            rhs: rhs.element_type(),
        });
    }
    let incompatible = || OpError::IncompatibleShapes {
        op,
        lhs: lhs.clone(),
        rhs: rhs.clone(),
    };

    let lhs_dims = lhs.dimensions(mode)?;
    let rhs_dims = rhs.dimensions(mode)?;
    let lhs_iter = lhs_dims.iter().zip(lhs.dynamic_dimensions()).rev();
    let rhs_iter = rhs_dims.iter().zip(rhs.dynamic_dimensions()).rev();

    let mut dims = Vec::with_capacity(lhs.rank().max(rhs.rank()));
    let mut dynamic = Vec::with_capacity(dims.capacity());
    for pair in lhs_iter.zip_longest(rhs_iter) {
        let (size, is_dynamic) = match pair {
            EitherOrBoth::Both((&l, &l_dyn), (&r, &r_dyn)) => {
                if l == r {
                    (l, l_dyn || r_dyn)
                } else if l == 1 {
                    (r, r_dyn)
                } else if r == 1 {
                    (l, l_dyn)
                } else {
                    return Err(incompatible());
                }
            }
            EitherOrBoth::Left((&l, &l_dyn)) => (l, l_dyn),
            EitherOrBoth::Right((&r, &r_dyn)) => (r, r_dyn),
        };
        dims.push(size);
        dynamic.push(is_dynamic);
    }
    dims.reverse();
    dynamic.reverse();
    Ok(Shape::with_dynamic_dimensions(
        lhs.element_type(),
        dims,
        dynamic,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape;
    use proptest::prelude::*;

    const STATIC: ShapeMode = ShapeMode::Static;

    #[test]
    fn test_slice_shape() {
        let input = shape!(f32, [4, 3]);
        let op = Op::Slice {
            dim: 1,
            start: 0,
            end: 3,
            step: 2,
        };
        assert_eq!(op.infer_shape(&[&input], STATIC), Ok(shape!(f32, [4, 2])));
    }

    #[test]
    fn test_slice_rejects_range_past_end() {
        let input = shape!(f32, [4, 3]);
        let op = Op::Slice {
            dim: 1,
            start: 2,
            end: 4,
            step: 1,
        };
        assert!(matches!(
            op.infer_shape(&[&input], STATIC),
            Err(OpError::InvalidArgument { op: "slice", .. })
        ));
    }

    #[test]
    fn test_squeeze_only_removes_unit_dims() {
        let input = shape!(f32, [4, 1, 3]);
        assert_eq!(
            Op::Squeeze { dim: 1 }.infer_shape(&[&input], STATIC),
            Ok(shape!(f32, [4, 3]))
        );
        assert_eq!(
            Op::Squeeze { dim: 0 }.infer_shape(&[&input], STATIC),
            Ok(input.clone())
        );
    }

    #[test]
    fn test_mul_broadcasts() {
        let lhs = shape!(f32, [3, 3]);
        let rhs = shape!(f32, [3]);
        assert_eq!(Op::Mul.infer_shape(&[&lhs, &rhs], STATIC), Ok(shape!(f32, [3, 3])));

        let lhs = shape!(f32, [4, 1, 5]);
        let rhs = shape!(f32, [2, 1]);
        assert_eq!(
            Op::Mul.infer_shape(&[&lhs, &rhs], STATIC),
            Ok(shape!(f32, [4, 2, 5]))
        );
    }

    #[test]
    fn test_sub_rejects_incompatible_shapes() {
        let lhs = shape!(f32, [4, 3]);
        let rhs = shape!(f32, [2]);
        let op = Op::Sub {
            alpha: Scalar::Int(1),
        };
        assert!(matches!(
            op.infer_shape(&[&lhs, &rhs], STATIC),
            Err(OpError::IncompatibleShapes { op: "sub", .. })
        ));
    }

    #[test]
    fn test_mul_rejects_mixed_dtypes() {
        let lhs = shape!(f32, [3]);
        let rhs = shape!(s64, [3]);
        assert_eq!(
            Op::Mul.infer_shape(&[&lhs, &rhs], STATIC),
            Err(OpError::DtypeMismatch {
                op: "mul",
                lhs: Dtype::Float32,
                rhs: Dtype::Sint64
            })
        );
    }

    #[test]
    fn test_broadcast_propagates_dynamic_flags() {
        let lhs = Shape::with_dynamic_dimensions(Dtype::Float32, vec![4, 3], vec![true, false])
            .unwrap();
        let rhs = shape!(f32, [3]);
        let out = Op::Mul.infer_shape(&[&lhs, &rhs], STATIC).unwrap();
        assert_eq!(out.dynamic_dimensions(), &[true, false]);
    }

    #[test]
    fn test_stack_inserts_dimension() {
        let s = shape!(f32, [4]);
        assert_eq!(
            Op::Stack { dim: 1 }.infer_shape(&[&s, &s, &s], STATIC),
            Ok(shape!(f32, [4, 3]))
        );
        assert_eq!(
            Op::Stack { dim: 0 }.infer_shape(&[&s, &s], STATIC),
            Ok(shape!(f32, [2, 4]))
        );
    }

    #[test]
    fn test_stack_rejects_mismatched_operands() {
        let a = shape!(f32, [4]);
        let b = shape!(f32, [5]);
        assert!(matches!(
            Op::Stack { dim: 0 }.infer_shape(&[&a, &b], STATIC),
            Err(OpError::IncompatibleShapes { op: "stack", .. })
        ));
        assert!(matches!(
            Op::Stack { dim: 0 }.infer_shape(&[], STATIC),
            Err(OpError::InvalidArgument { op: "stack", .. })
        ));
    }

    #[test]
    fn test_narrow_shape() {
        let input = shape!(f32, [2, 3, 4]);
        let op = Op::Narrow {
            dim: 1,
            start: 2,
            length: 1,
        };
        assert_eq!(op.infer_shape(&[&input], STATIC), Ok(shape!(f32, [2, 1, 4])));
        let too_long = Op::Narrow {
            dim: 1,
            start: 2,
            length: 2,
        };
        assert!(too_long.infer_shape(&[&input], STATIC).is_err());
    }

    #[test]
    fn test_view_checks_element_count() {
        let input = shape!(f32, [2, 1, 4]);
        let ok = Op::View { dims: vec![2, 4] };
        assert_eq!(ok.infer_shape(&[&input], STATIC), Ok(shape!(f32, [2, 4])));
        let bad = Op::View { dims: vec![3, 4] };
        assert!(bad.infer_shape(&[&input], STATIC).is_err());
    }

    #[test]
    fn test_constant_pad_pairs_start_at_last_axis() {
        let input = shape!(f32, [3, 3]);
        let op = Op::ConstantPad {
            padding: vec![1, 0, 0, 1],
            value: Scalar::Int(0),
        };
        assert_eq!(op.infer_shape(&[&input], STATIC), Ok(shape!(f32, [4, 4])));

        let last_axis_only = Op::ConstantPad {
            padding: vec![2, 3],
            value: Scalar::Int(0),
        };
        assert_eq!(
            last_axis_only.infer_shape(&[&input], STATIC),
            Ok(shape!(f32, [3, 8]))
        );
    }

    #[test]
    fn test_constant_pad_rejects_bad_padding() {
        let input = shape!(f32, [3]);
        let odd = Op::ConstantPad {
            padding: vec![1],
            value: Scalar::Int(0),
        };
        assert!(odd.infer_shape(&[&input], STATIC).is_err());
        let crop_too_much = Op::ConstantPad {
            padding: vec![-2, -2],
            value: Scalar::Int(0),
        };
        assert!(crop_too_much.infer_shape(&[&input], STATIC).is_err());
    }

    #[test]
    fn test_constant_pad_rejects_overflowing_padding() {
        let input = shape!(f32, [3]);
        let op = Op::ConstantPad {
            padding: vec![i64::MAX, 1],
            value: Scalar::Int(0),
        };
        assert!(matches!(
            op.infer_shape(&[&input], STATIC),
            Err(OpError::InvalidArgument {
                op: "constant_pad_nd",
                ..
            })
        ));
    }

    #[test]
    fn test_mul_broadcasts_high_rank() {
        let lhs = Shape::new(Dtype::Float32, vec![1u64; 256]);
        let rhs = shape!(f32, [3]);
        let out = Op::Mul.infer_shape(&[&lhs, &rhs], STATIC).unwrap();
        assert_eq!(out.rank(), 256);
        assert_eq!(out.dimension(255, STATIC), Ok(3));
    }

    #[test]
    fn test_operand_count_checked() {
        let s = shape!(f32, [3]);
        assert_eq!(
            Op::Mul.infer_shape(&[&s], STATIC),
            Err(OpError::OperandCount {
                op: "mul",
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_tuple_operands_rejected() {
        let t = Shape::tuple(vec![shape!(f32, [3])]);
        let err = Op::Squeeze { dim: 0 }.infer_shape(&[&t], STATIC).unwrap_err();
        assert!(matches!(err, OpError::Shape(ShapeError::NotAnArray(_))));
    }

    #[test]
    fn test_display() {
        let op = Op::Narrow {
            dim: 1,
            start: 2,
            length: 1,
        };
        assert_eq!(op.to_string(), "narrow(dim=1, start=2, length=1)");
        let pad = Op::ConstantPad {
            padding: vec![0, -1, -1, 0],
            value: Scalar::Int(0),
        };
        assert_eq!(pad.to_string(), "constant_pad_nd([0,-1,-1,0], value=0)");
    }

    proptest! {
        #[test]
        fn test_dynamic_mode_fails_every_dependent_inference(
            dims in proptest::collection::vec(1u64..6, 1..4),
        ) {
            let input = Shape::new(Dtype::Float32, dims.clone());
            let ops = [
                Op::Squeeze { dim: 0 },
                Op::Narrow { dim: 0, start: 0, length: 1 },
                Op::View { dims: dims.clone() },
                Op::Slice { dim: 0, start: 0, end: 1, step: 1 },
            ];
            for op in ops {
                let err = op.infer_shape(&[&input], ShapeMode::Dynamic).unwrap_err();
                prop_assert!(err.is_shape_unknown());
                prop_assert!(op.infer_shape(&[&input], STATIC).is_ok());
            }
        }

        #[test]
        fn test_broadcast_is_symmetric(
            a in proptest::collection::vec(prop_oneof![Just(1u64), Just(3u64)], 0..4),
            b in proptest::collection::vec(prop_oneof![Just(1u64), Just(3u64)], 0..4),
        ) {
            let lhs = Shape::new(Dtype::Float32, a);
            let rhs = Shape::new(Dtype::Float32, b);
            let forward = Op::Mul.infer_shape(&[&lhs, &rhs], STATIC).unwrap();
            let backward = Op::Mul.infer_shape(&[&rhs, &lhs], STATIC).unwrap();
            prop_assert_eq!(forward.rank(), lhs.rank().max(rhs.rank()));
            prop_assert_eq!(forward, backward);
        }
    }
}
