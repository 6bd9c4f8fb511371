use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The size of a single tensor dimension.
pub type DimSize = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum Dtype {
    /// Placeholder element type, used by tuple shapes.
    #[default]
    Undefined,
    Bool,
    Uint8,
    Sint8,
    Sint16,
    Sint32,
    Sint64,
    Float16,
    Bfloat16,
    Float32,
    Float64,
}

/// A constant operand embedded in an [Op](crate::ops::Op), such as a padding value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Dtype {
    /// The bytes required to represent a value of this Dtype.
    ///
    /// Returns `None` for [Dtype::Undefined].
    pub fn size(&self) -> Option<u8> {
        match self {
            Dtype::Undefined => None,
            Dtype::Bool | Dtype::Uint8 | Dtype::Sint8 => Some(1),
            Dtype::Sint16 | Dtype::Float16 | Dtype::Bfloat16 => Some(2),
            Dtype::Sint32 | Dtype::Float32 => Some(4),
            Dtype::Sint64 | Dtype::Float64 => Some(8),
        }
    }
}

impl Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dtype::Undefined => write!(f, "undef"),
            Dtype::Bool => write!(f, "pred"),
            Dtype::Uint8 => write!(f, "u8"),
            Dtype::Sint8 => write!(f, "s8"),
            Dtype::Sint16 => write!(f, "s16"),
            Dtype::Sint32 => write!(f, "s32"),
            Dtype::Sint64 => write!(f, "s64"),
            Dtype::Float16 => write!(f, "f16"),
            Dtype::Bfloat16 => write!(f, "bf16"),
            Dtype::Float32 => write!(f, "f32"),
            Dtype::Float64 => write!(f, "f64"),
        }
    }
}

impl std::str::FromStr for Dtype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pred" | "bool" => Ok(Dtype::Bool),
            "u8" => Ok(Dtype::Uint8),
            "s8" | "i8" => Ok(Dtype::Sint8),
            "s16" | "i16" => Ok(Dtype::Sint16),
            "s32" | "i32" => Ok(Dtype::Sint32),
            "s64" | "i64" => Ok(Dtype::Sint64),
            "f16" => Ok(Dtype::Float16),
            "bf16" => Ok(Dtype::Bfloat16),
            "f32" => Ok(Dtype::Float32),
            "f64" => Ok(Dtype::Float64),
            _ => Err(format!("unknown element type: {s}")),
        }
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}
