//! Handle-level constructors for the primitive operations.
//!
//! Each constructor canonicalizes its arguments, checks that all operands share a context and
//! device, infers the output [Shape](crate::shape::Shape) through the context's current
//! [ShapeMode](crate::shape::ShapeMode), and only then allocates a node. A failed call leaves
//! no node behind.

use log::trace;
use smallvec::SmallVec;

use std::panic::Location;
use std::sync::Arc;

use crate::common::{DimSize, Dtype, Scalar};
use crate::context::LazyContext;
use crate::device::Device;
use crate::dims::canonical_dimension_index;
use crate::graph::{Metadata, Node, Operands};
use crate::ops::{Op, OpError};
use crate::shape::Shape;
use crate::tensor::{EagerTensor, LazyTensor};

/// Binds `tensor` as a leaf of a graph in `context`.
#[track_caller]
pub fn device_data(context: &Arc<LazyContext>, tensor: &EagerTensor) -> LazyTensor {
    let shape = tensor.shape().clone();
    let device = tensor.device();
    push_node(
        context,
        device,
        Op::DeviceData(tensor.clone()),
        Operands::new(),
        shape,
    )
}

/// An identity matrix with `rows` rows and `cols` columns.
#[track_caller]
pub fn eye(
    context: &Arc<LazyContext>,
    rows: DimSize,
    cols: DimSize,
    device: Device,
    dtype: Dtype,
) -> LazyTensor {
    push_node(
        context,
        device,
        Op::Eye { rows, cols, dtype },
        Operands::new(),
        Shape::new(dtype, vec![rows, cols]),
    )
}

/// Elements `start, start + step, ...` below `end` along `dim`.
///
/// Negative `start` and `end` count back from the size of `dim`. Both are then clamped to the
/// axis, so an empty range yields a zero-sized dimension.
#[track_caller]
pub fn slice(
    input: &LazyTensor,
    dim: i64,
    start: i64,
    end: i64,
    step: i64,
) -> Result<LazyTensor, OpError> {
    let dim = canonical_dimension_index(dim, input.rank())?;
    if step < 1 {
        return Err(OpError::invalid_argument(
            "slice",
            format!("step must be positive, got {step}"),
        ));
    }
    let size = input.shape().dimension(dim, input.context().shape_mode())?;
    let start = clamp_index(start, size);
    let end = clamp_index(end, size).max(start);
    build(
        Op::Slice {
            dim,
            start,
            end,
            step: step as DimSize,
        },
        &[input],
    )
}

/// Removes `dim` if it has size one. Otherwise the result has `input`'s shape.
#[track_caller]
pub fn squeeze(input: &LazyTensor, dim: i64) -> Result<LazyTensor, OpError> {
    let dim = canonical_dimension_index(dim, input.rank())?;
    build(Op::Squeeze { dim }, &[input])
}

/// Elementwise product with broadcasting.
#[track_caller]
pub fn mul(lhs: &LazyTensor, rhs: &LazyTensor) -> Result<LazyTensor, OpError> {
    build(Op::Mul, &[lhs, rhs])
}

/// Elementwise `lhs - alpha * rhs` with broadcasting.
#[track_caller]
pub fn sub(lhs: &LazyTensor, rhs: &LazyTensor, alpha: Scalar) -> Result<LazyTensor, OpError> {
    build(Op::Sub { alpha }, &[lhs, rhs])
}

/// Joins equally-shaped tensors along a new axis at `dim`.
#[track_caller]
pub fn stack(inputs: &[LazyTensor], dim: i64) -> Result<LazyTensor, OpError> {
    let Some(first) = inputs.first() else {
        return Err(OpError::invalid_argument("stack", "expects a non-empty list"));
    };
    let dim = canonical_dimension_index(dim, first.rank() + 1)?;
    let operands = inputs.iter().collect::<SmallVec<[&LazyTensor; 4]>>();
    build(Op::Stack { dim }, &operands)
}

/// The `length` elements along `dim` beginning at `start`. A negative `start` counts back
/// from the end of the axis.
#[track_caller]
pub fn narrow(
    input: &LazyTensor,
    dim: i64,
    start: i64,
    length: DimSize,
) -> Result<LazyTensor, OpError> {
    let dim = canonical_dimension_index(dim, input.rank())?;
    let size = input.shape().dimension(dim, input.context().shape_mode())?;
    let wrapped = if start < 0 { start + size as i64 } else { start };
    if wrapped < 0 {
        return Err(OpError::invalid_argument(
            "narrow",
            format!("start {start} out of range for dimension {dim} of size {size}"),
        ));
    }
    build(
        Op::Narrow {
            dim,
            start: wrapped as DimSize,
            length,
        },
        &[input],
    )
}

/// Reinterprets `input` with new dimensions. At most one entry of `dims` may be `-1`, in which
/// case it is inferred from the element count.
#[track_caller]
pub fn view(input: &LazyTensor, dims: &[i64]) -> Result<LazyTensor, OpError> {
    let dims = infer_view_dimensions(input, dims)?;
    build(Op::View { dims }, &[input])
}

/// Pads `input` with `value`. `padding` holds `(before, after)` pairs starting at the last
/// axis. Negative entries crop.
#[track_caller]
pub fn constant_pad_nd(
    input: &LazyTensor,
    padding: &[i64],
    value: Scalar,
) -> Result<LazyTensor, OpError> {
    build(
        Op::ConstantPad {
            padding: padding.to_vec(),
            value,
        },
        &[input],
    )
}

fn clamp_index(index: i64, size: DimSize) -> DimSize {
    let size_i64 = size as i64;
    let wrapped = if index < 0 { index + size_i64 } else { index };
    wrapped.clamp(0, size_i64) as DimSize
}

fn infer_view_dimensions(input: &LazyTensor, dims: &[i64]) -> Result<Vec<DimSize>, OpError> {
    let mut inferred_axis = None;
    let mut known_count: DimSize = 1;
    for (axis, &d) in dims.iter().enumerate() {
        match d {
            -1 if inferred_axis.is_none() => inferred_axis = Some(axis),
            -1 => {
                return Err(OpError::invalid_argument(
                    "view",
                    "only one dimension can be inferred",
                ))
            }
            d if d < 0 => {
                return Err(OpError::invalid_argument(
                    "view",
                    format!("invalid dimension size {d}"),
                ))
            }
            d => known_count *= d as DimSize,
        }
    }

    let mut output = dims.iter().map(|&d| d.max(0) as DimSize).collect::<Vec<_>>();
    if let Some(axis) = inferred_axis {
        let total = input.shape().element_count(input.context().shape_mode())?;
        if known_count == 0 || total % known_count != 0 {
            return Err(OpError::invalid_argument(
                "view",
                format!("cannot infer dimension {axis} of a view of {} elements", total),
            ));
        }
        output[axis] = total / known_count;
    }
    Ok(output)
}

/// Validates operands, infers the output shape and allocates the node.
#[track_caller]
fn build(op: Op, operands: &[&LazyTensor]) -> Result<LazyTensor, OpError> {
    let name = op.name();
    let Some((first, rest)) = operands.split_first() else {
        return Err(OpError::OperandCount {
            op: name,
            expected: 1,
            actual: 0,
        });
    };
    for other in rest {
        if !Arc::ptr_eq(first.context(), other.context()) {
            return Err(OpError::ContextMismatch { op: name });
        }
        if first.device() != other.device() {
            return Err(OpError::DeviceMismatch {
                op: name,
                lhs: first.device(),
                rhs: other.device(),
            });
        }
    }

    let context = first.context();
    let shapes = operands
        .iter()
        .map(|t| t.shape())
        .collect::<SmallVec<[&Shape; 4]>>();
    let shape = op.infer_shape(&shapes, context.shape_mode())?;
    let node_operands = operands
        .iter()
        .map(|t| Arc::clone(t.node()))
        .collect::<Operands>();
    Ok(push_node(context, first.device(), op, node_operands, shape))
}

#[track_caller]
fn push_node(
    context: &Arc<LazyContext>,
    device: Device,
    op: Op,
    operands: Operands,
    shape: Shape,
) -> LazyTensor {
    let metadata = Metadata {
        scope: context.current_scope(),
        location: Some(Location::caller()),
    };
    let node = Node::new(op, operands, shape, metadata);
    context.record_node_created();
    trace!("Built {} {} -> {}", node.id(), node.op(), node.shape());
    LazyTensor::from_node(Arc::clone(context), node, device)
}
