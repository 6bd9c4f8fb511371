//! Helpers for turning user-supplied axis indices into canonical ones.

use crate::shape::ShapeError;

/// Maps a possibly-negative axis index onto `[0, rank)`.
///
/// Non-negative indices are returned unchanged if they are less than `rank`. Negative indices
/// count from the end, so `-1` is the last axis.
///
/// # Examples
/// ```
/// # use lazytensor::dims::canonical_dimension_index;
/// assert_eq!(canonical_dimension_index(1, 3), Ok(1));
/// assert_eq!(canonical_dimension_index(-1, 3), Ok(2));
/// assert!(canonical_dimension_index(3, 3).is_err());
/// assert!(canonical_dimension_index(-4, 3).is_err());
/// ```
pub fn canonical_dimension_index(dim: i64, rank: usize) -> Result<usize, ShapeError> {
    let out_of_range = ShapeError::DimensionOutOfRange { dim, rank };
    let rank_i64 = i64::try_from(rank).map_err(|_| out_of_range.clone())?;
    let canonical = if dim < 0 { dim + rank_i64 } else { dim };
    if !(0..rank_i64).contains(&canonical) {
        return Err(out_of_range);
    }
    Ok(canonical as usize)
}

pub fn canonical_dimension_indices(dims: &[i64], rank: usize) -> Result<Vec<usize>, ShapeError> {
    dims.iter()
        .map(|&d| canonical_dimension_index(d, rank))
        .collect()
}

/// Returns `dimension_sizes` without the entries at the indices in `dims_to_drop`.
///
/// Survivors keep their relative order. Indices in `dims_to_drop` which are out of range are
/// ignored.
pub fn drop_dimensions<T: Copy>(dimension_sizes: &[T], dims_to_drop: &[usize]) -> Vec<T> {
    dimension_sizes
        .iter()
        .enumerate()
        .filter(|(i, _)| !dims_to_drop.contains(i))
        .map(|(_, &d)| d)
        .collect()
}
