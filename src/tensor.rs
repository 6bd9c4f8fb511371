use std::fmt;
use std::sync::Arc;

use crate::common::{DimSize, Dtype};
use crate::context::LazyContext;
use crate::device::Device;
use crate::dims::canonical_dimension_index;
use crate::graph::NodeRef;
use crate::primitives;
use crate::shape::{Shape, ShapeError, ShapeMode};

/// A handle to one node of a lazy graph, plus the device and element type of its value.
///
/// Cloning a handle is cheap and shares the node.
#[derive(Clone)]
pub struct LazyTensor {
    node: NodeRef,
    context: Arc<LazyContext>,
    device: Device,
}

/// A tensor whose bytes already exist, typically supplied by the caller or returned by a
/// backend.
#[derive(Clone)]
pub struct EagerTensor {
    shape: Shape,
    device: Device,
    data: Arc<[u8]>,
}

/// Either representation of a tensor value.
#[derive(Clone, Debug)]
pub enum TensorValue {
    Eager(EagerTensor),
    Lazy(LazyTensor),
}

/// Executes lazy graphs. Implemented by backends.
pub trait Materialize {
    fn materialize(&self, tensor: &LazyTensor) -> Result<EagerTensor, TensorError>;
}

#[derive(thiserror::Error, Debug)]
pub enum TensorError {
    #[error("Expected {expected} bytes for {shape} but got {actual}")]
    ByteLength {
        shape: Shape,
        expected: usize,
        actual: usize,
    },
    #[error("Eager tensors must have an array shape with a sized element type, got {0}")]
    UnsupportedShape(Shape),
    #[error("Backend failed to materialize tensor: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LazyTensor {
    pub(crate) fn from_node(context: Arc<LazyContext>, node: NodeRef, device: Device) -> Self {
        LazyTensor {
            node,
            context,
            device,
        }
    }

    /// Binds an eager tensor as a leaf of a new lazy graph in `context`.
    pub fn from_eager(context: &Arc<LazyContext>, tensor: &EagerTensor) -> Self {
        primitives::device_data(context, tensor)
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn context(&self) -> &Arc<LazyContext> {
        &self.context
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn dtype(&self) -> Dtype {
        self.node.shape().element_type()
    }

    /// The inferred shape. Read concrete sizes through [LazyTensor::dimensions] to respect the
    /// context's shape mode.
    pub fn shape(&self) -> &Shape {
        self.node.shape()
    }

    pub fn rank(&self) -> usize {
        self.shape().rank()
    }

    pub fn dimensions(&self) -> Result<&[DimSize], ShapeError> {
        self.shape().dimensions(self.context.shape_mode())
    }

    /// The size of axis `dim`, which may be negative to count from the end.
    pub fn size(&self, dim: i64) -> Result<DimSize, ShapeError> {
        let dim = canonical_dimension_index(dim, self.rank())?;
        self.shape().dimension(dim, self.context.shape_mode())
    }

    pub fn ptr_eq(&self, other: &LazyTensor) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl fmt::Debug for LazyTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyTensor")
            .field("node", &self.node)
            .field("device", &self.device)
            .finish()
    }
}

impl fmt::Display for LazyTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} on {}", self.node.id(), self.shape(), self.device)
    }
}

impl EagerTensor {
    pub fn new(
        shape: Shape,
        device: Device,
        data: impl Into<Arc<[u8]>>,
    ) -> Result<Self, TensorError> {
        let data = data.into();
        let expected = Self::byte_len(&shape)?;
        if data.len() != expected {
            return Err(TensorError::ByteLength {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(EagerTensor {
            shape,
            device,
            data,
        })
    }

    pub fn zeros(shape: Shape, device: Device) -> Result<Self, TensorError> {
        let len = Self::byte_len(&shape)?;
        Self::new(shape, device, vec![0u8; len])
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn dtype(&self) -> Dtype {
        self.shape.element_type()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn byte_len(shape: &Shape) -> Result<usize, TensorError> {
        let unsupported = || TensorError::UnsupportedShape(shape.clone());
        if shape.is_tuple() {
            return Err(unsupported());
        }
        let element_size = shape.element_type().size().ok_or_else(unsupported)?;
        // Eager tensors are always concrete, regardless of any context's mode.
        let count = shape
            .element_count(ShapeMode::Static)
            .map_err(|_| unsupported())?;
        usize::try_from(count * u64::from(element_size)).map_err(|_| unsupported())
    }
}

impl fmt::Debug for EagerTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerTensor")
            .field("shape", &self.shape.to_string())
            .field("device", &self.device)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl TensorValue {
    pub fn shape(&self) -> &Shape {
        match self {
            TensorValue::Eager(t) => t.shape(),
            TensorValue::Lazy(t) => t.shape(),
        }
    }

    pub fn device(&self) -> Device {
        match self {
            TensorValue::Eager(t) => t.device(),
            TensorValue::Lazy(t) => t.device(),
        }
    }

    pub fn dtype(&self) -> Dtype {
        self.shape().element_type()
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, TensorValue::Lazy(_))
    }

    /// Converts to a lazy handle. Eager values become `device_data` leaves in `context`.
    pub fn into_lazy(self, context: &Arc<LazyContext>) -> LazyTensor {
        match self {
            TensorValue::Eager(t) => LazyTensor::from_eager(context, &t),
            TensorValue::Lazy(t) => t,
        }
    }

    /// Converts to an eager value, running the graph through `backend` if necessary.
    pub fn into_eager(self, backend: &impl Materialize) -> Result<EagerTensor, TensorError> {
        match self {
            TensorValue::Eager(t) => Ok(t),
            TensorValue::Lazy(t) => backend.materialize(&t),
        }
    }
}

impl From<EagerTensor> for TensorValue {
    fn from(tensor: EagerTensor) -> Self {
        TensorValue::Eager(tensor)
    }
}

impl From<LazyTensor> for TensorValue {
    fn from(tensor: LazyTensor) -> Self {
        TensorValue::Lazy(tensor)
    }
}
