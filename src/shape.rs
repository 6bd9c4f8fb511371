use itertools::Itertools;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::{DimSize, Dtype};
use crate::layout::{row_major, Layout};
use crate::utils::join_into_string;

/// The element type and dimensions of a value flowing through a lazy graph.
///
/// A Shape is either an array (an element type plus one size per dimension) or a tuple of
/// nested Shapes, never both. Every dimension additionally carries a flag marking it as
/// dynamic, meaning its concrete size is not guaranteed to be known while the graph is built.
///
/// Equality and hashing consider only the element type, the dimension sizes, and (for tuples)
/// the nested Shapes. Two Shapes which differ only in [Layout] or in their dynamic-dimension
/// flags compare equal. Keep this in mind before using a Shape as a deduplication key.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Shape {
    element_type: Dtype,
    dimensions: Vec<DimSize>,
    dynamic_dimensions: Vec<bool>,
    is_tuple: bool,
    tuple_shapes: Vec<Shape>,
    layout: Layout,
}

/// The program-level signature of a lowered graph: its parameters and its result.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProgramShape {
    parameters: Vec<Shape>,
    parameter_names: Vec<String>,
    result: Shape,
}

/// Whether concrete dimension sizes may be read while building a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShapeMode {
    #[default]
    Static,
    /// Concrete sizes are not guaranteed. Reading them fails with [ShapeError::Unknown].
    Dynamic,
}

/// An atomically-updated [ShapeMode], shared by every graph built in one
/// [LazyContext](crate::context::LazyContext).
#[derive(Debug, Default)]
pub struct ShapeModeFlag(AtomicBool);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("Exact shape not known")]
    Unknown,
    #[error("Dimension {dim} out of range for rank {rank}")]
    DimensionOutOfRange { dim: i64, rank: usize },
    #[error("Tuple index {index} out of range for {len} element shapes")]
    TupleIndexOutOfRange { index: usize, len: usize },
    #[error("Expected an array shape but got tuple {0}")]
    NotAnArray(Box<Shape>),
    #[error("Got {dynamic} dynamic-dimension flags for {dimensions} dimensions")]
    DynamicDimensionsLength { dimensions: usize, dynamic: usize },
    #[error("Got {parameters} parameters but {names} parameter names")]
    ParameterNameMismatch { parameters: usize, names: usize },
}

impl ShapeError {
    /// Returns true if this is the recoverable error raised by reading concrete dimensions
    /// in [ShapeMode::Dynamic].
    pub fn is_unknown(&self) -> bool {
        matches!(self, ShapeError::Unknown)
    }
}

impl Shape {
    /// Creates a static, array-typed Shape with a row-major layout.
    pub fn new(element_type: Dtype, dimensions: impl Into<Vec<DimSize>>) -> Self {
        let dimensions = dimensions.into();
        let rank = dimensions.len();
        Shape {
            element_type,
            dynamic_dimensions: vec![false; rank],
            dimensions,
            is_tuple: false,
            tuple_shapes: vec![],
            layout: row_major(rank),
        }
    }

    pub fn scalar(element_type: Dtype) -> Self {
        Shape::new(element_type, vec![])
    }

    /// Creates an array-typed Shape with explicit dynamic-dimension flags.
    pub fn with_dynamic_dimensions(
        element_type: Dtype,
        dimensions: impl Into<Vec<DimSize>>,
        dynamic_dimensions: impl Into<Vec<bool>>,
    ) -> Result<Self, ShapeError> {
        let mut shape = Shape::new(element_type, dimensions);
        let dynamic_dimensions = dynamic_dimensions.into();
        if dynamic_dimensions.len() != shape.dimensions.len() {
            return Err(ShapeError::DynamicDimensionsLength {
                dimensions: shape.dimensions.len(),
                dynamic: dynamic_dimensions.len(),
            });
        }
        shape.dynamic_dimensions = dynamic_dimensions;
        Ok(shape)
    }

    pub fn tuple(element_shapes: impl Into<Vec<Shape>>) -> Self {
        Shape {
            element_type: Dtype::Undefined,
            dimensions: vec![],
            dynamic_dimensions: vec![],
            is_tuple: true,
            tuple_shapes: element_shapes.into(),
            layout: Layout::empty(),
        }
    }

    pub fn element_type(&self) -> Dtype {
        self.element_type
    }

    pub fn set_element_type(&mut self, element_type: Dtype) {
        debug_assert!(!self.is_tuple);
        self.element_type = element_type;
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_array(&self) -> bool {
        !self.is_tuple
    }

    pub fn is_tuple(&self) -> bool {
        self.is_tuple
    }

    /// Returns every dimension size.
    ///
    /// Fails with [ShapeError::Unknown] in [ShapeMode::Dynamic], whether or not the sizes were
    /// set concretely.
    pub fn dimensions(&self, mode: ShapeMode) -> Result<&[DimSize], ShapeError> {
        match mode {
            ShapeMode::Dynamic => Err(ShapeError::Unknown),
            ShapeMode::Static => Ok(&self.dimensions),
        }
    }

    /// Returns the size of dimension `index`.
    ///
    /// [ShapeError::Unknown] takes priority over a range check.
    pub fn dimension(&self, index: usize, mode: ShapeMode) -> Result<DimSize, ShapeError> {
        let dimensions = self.dimensions(mode)?;
        dimensions
            .get(index)
            .copied()
            .ok_or(ShapeError::DimensionOutOfRange {
                dim: index as i64,
                rank: dimensions.len(),
            })
    }

    pub fn set_dimension(&mut self, index: usize, value: DimSize) -> Result<(), ShapeError> {
        let rank = self.rank();
        let slot = self
            .dimensions
            .get_mut(index)
            .ok_or(ShapeError::DimensionOutOfRange {
                dim: index as i64,
                rank,
            })?;
        *slot = value;
        Ok(())
    }

    /// Removes dimension `index` entirely, reducing the rank by one.
    ///
    /// Sizes, dynamic flags, and the layout of the surviving dimensions keep their relative
    /// order.
    pub fn delete_dimension(&mut self, index: usize) -> Result<(), ShapeError> {
        self.check_dimension_index(index)?;
        self.dimensions.remove(index);
        self.dynamic_dimensions.remove(index);
        self.layout.delete_dimension(index);
        debug_assert_eq!(self.dimensions.len(), self.dynamic_dimensions.len());
        Ok(())
    }

    pub fn dynamic_dimensions(&self) -> &[bool] {
        &self.dynamic_dimensions
    }

    pub fn is_dynamic_dimension(&self, index: usize) -> Result<bool, ShapeError> {
        self.check_dimension_index(index)?;
        Ok(self.dynamic_dimensions[index])
    }

    pub fn set_dynamic_dimension(
        &mut self,
        index: usize,
        is_dynamic: bool,
    ) -> Result<(), ShapeError> {
        self.check_dimension_index(index)?;
        self.dynamic_dimensions[index] = is_dynamic;
        Ok(())
    }

    /// Returns true if no dimension of this Shape (or any nested Shape) is dynamic.
    pub fn is_static(&self) -> bool {
        self.dynamic_dimensions.iter().all(|d| !d) && self.tuple_shapes.iter().all(Shape::is_static)
    }

    pub fn tuple_shapes_len(&self) -> usize {
        self.tuple_shapes.len()
    }

    pub fn tuple_shape(&self, index: usize) -> Result<&Shape, ShapeError> {
        self.tuple_shapes
            .get(index)
            .ok_or(ShapeError::TupleIndexOutOfRange {
                index,
                len: self.tuple_shapes.len(),
            })
    }

    pub fn tuple_shapes(&self) -> &[Shape] {
        &self.tuple_shapes
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn set_layout(&mut self, layout: Layout) {
        debug_assert!(layout.is_empty() || layout.rank() == self.rank());
        self.layout = layout;
    }

    /// The number of elements in an array Shape. Scalars have one element.
    pub fn element_count(&self, mode: ShapeMode) -> Result<u64, ShapeError> {
        if self.is_tuple {
            return Err(ShapeError::NotAnArray(Box::new(self.clone())));
        }
        Ok(self.dimensions(mode)?.iter().product())
    }

    /// Fails with [ShapeError::NotAnArray] if this is a tuple Shape.
    pub fn check_is_array(&self) -> Result<(), ShapeError> {
        if self.is_tuple {
            return Err(ShapeError::NotAnArray(Box::new(self.clone())));
        }
        Ok(())
    }

    pub fn to_string_with_layout(&self) -> String {
        if self.is_tuple {
            return format!(
                "({})",
                self.tuple_shapes
                    .iter()
                    .map(Shape::to_string_with_layout)
                    .join(", ")
            );
        }
        format!("{self}{}", self.layout)
    }

    fn check_dimension_index(&self, index: usize) -> Result<(), ShapeError> {
        if index >= self.rank() {
            return Err(ShapeError::DimensionOutOfRange {
                dim: index as i64,
                rank: self.rank(),
            });
        }
        Ok(())
    }
}

impl PartialEq for Shape {
    fn eq(&self, other: &Self) -> bool {
        self.element_type == other.element_type
            && self.dimensions == other.dimensions
            && self.is_tuple == other.is_tuple
            && self.tuple_shapes == other.tuple_shapes
    }
}

impl Eq for Shape {}

impl Hash for Shape {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.element_type.hash(state);
        self.dimensions.hash(state);
        self.is_tuple.hash(state);
        self.tuple_shapes.hash(state);
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_tuple {
            return write!(f, "({})", self.tuple_shapes.iter().join(", "));
        }
        write!(
            f,
            "{}[{}]",
            self.element_type,
            join_into_string(&self.dimensions, ",")
        )
    }
}

impl ProgramShape {
    /// Creates a ProgramShape.
    ///
    /// # Panics
    /// Panics if `parameters` and `parameter_names` differ in length.
    pub fn new(parameters: Vec<Shape>, parameter_names: Vec<String>, result: Shape) -> Self {
        match Self::try_new(parameters, parameter_names, result) {
            Ok(program_shape) => program_shape,
            Err(e) => panic!("Invalid ProgramShape: {e}"),
        }
    }

    pub fn try_new(
        parameters: Vec<Shape>,
        parameter_names: Vec<String>,
        result: Shape,
    ) -> Result<Self, ShapeError> {
        if parameters.len() != parameter_names.len() {
            return Err(ShapeError::ParameterNameMismatch {
                parameters: parameters.len(),
                names: parameter_names.len(),
            });
        }
        Ok(ProgramShape {
            parameters,
            parameter_names,
            result,
        })
    }

    pub fn parameters_size(&self) -> usize {
        self.parameters.len()
    }

    pub fn parameters(&self) -> &[Shape] {
        &self.parameters
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    pub fn result(&self) -> &Shape {
        &self.result
    }
}

impl fmt::Display for ProgramShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .parameter_names
            .iter()
            .zip(&self.parameters)
            .map(|(name, shape)| format!("{name}: {shape}"))
            .join(", ");
        write!(f, "({params}) -> {}", self.result)
    }
}

impl ShapeModeFlag {
    pub fn new(mode: ShapeMode) -> Self {
        ShapeModeFlag(AtomicBool::new(mode == ShapeMode::Dynamic))
    }

    pub fn load(&self) -> ShapeMode {
        if self.0.load(Ordering::SeqCst) {
            ShapeMode::Dynamic
        } else {
            ShapeMode::Static
        }
    }

    /// Switches to [ShapeMode::Dynamic]. There is no transition back.
    ///
    /// Returns the previous mode.
    pub fn set_dynamic(&self) -> ShapeMode {
        if self.0.swap(true, Ordering::SeqCst) {
            ShapeMode::Dynamic
        } else {
            ShapeMode::Static
        }
    }
}

pub mod macros {
    /// Maps an element type name (`f32`, `s64`, ...) to a [Dtype](crate::common::Dtype).
    #[macro_export]
    macro_rules! dtype {
        (pred) => { $crate::common::Dtype::Bool };
        (u8) => { $crate::common::Dtype::Uint8 };
        (s8) => { $crate::common::Dtype::Sint8 };
        (s16) => { $crate::common::Dtype::Sint16 };
        (s32) => { $crate::common::Dtype::Sint32 };
        (s64) => { $crate::common::Dtype::Sint64 };
        (f16) => { $crate::common::Dtype::Float16 };
        (bf16) => { $crate::common::Dtype::Bfloat16 };
        (f32) => { $crate::common::Dtype::Float32 };
        (f64) => { $crate::common::Dtype::Float64 };
        ($dt:expr) => { $dt };
    }

    /// Builds a static array [Shape](crate::shape::Shape), e.g. `shape!(f32, [4, 3])`.
    #[macro_export]
    macro_rules! shape {
        ($dt:tt, [ $( $dim:expr ),* $(,)? ]) => {
            $crate::shape::Shape::new(
                $crate::dtype!($dt),
                vec![ $( ($dim) as $crate::common::DimSize ),* ],
            )
        };
    }
}
