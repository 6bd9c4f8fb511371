use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A backend hint for how a tensor's logical dimensions are ordered in memory.
///
/// `minor_to_major[0]` is the fastest-varying logical dimension. A layout does not participate
/// in [Shape](crate::shape::Shape) equality and is never consulted by shape inference; it is
/// carried through so that a backend can pick a physical representation.
///
/// The empty layout means "no preference" and is used by tuple and scalar shapes.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default, Deserialize, Serialize)]
pub struct Layout {
    minor_to_major: Vec<usize>,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum LayoutError {
    #[error("Layout {0:?} is not a permutation of its logical dimensions")]
    NotAPermutation(Vec<usize>),
}

impl Layout {
    pub fn new(minor_to_major: Vec<usize>) -> Layout {
        Self::new_checked(minor_to_major).unwrap()
    }

    pub fn new_checked(minor_to_major: Vec<usize>) -> Result<Layout, LayoutError> {
        let rank = minor_to_major.len();
        let is_permutation = minor_to_major.iter().all(|&d| d < rank)
            && minor_to_major.iter().all_unique();
        if !is_permutation {
            return Err(LayoutError::NotAPermutation(minor_to_major));
        }
        Ok(Layout { minor_to_major })
    }

    pub fn empty() -> Layout {
        Layout::default()
    }

    pub fn is_empty(&self) -> bool {
        self.minor_to_major.is_empty()
    }

    pub fn rank(&self) -> usize {
        self.minor_to_major.len()
    }

    pub fn minor_to_major(&self) -> &[usize] {
        &self.minor_to_major
    }

    pub fn is_row_major(&self) -> bool {
        self.minor_to_major.iter().rev().copied().eq(0..self.rank())
    }

    /// Removes logical dimension `dim`, renumbering every later dimension down by one.
    ///
    /// Does nothing to an empty layout.
    pub fn delete_dimension(&mut self, dim: usize) {
        if self.is_empty() {
            return;
        }
        debug_assert!(dim < self.rank());
        self.minor_to_major.retain(|&d| d != dim);
        for d in self.minor_to_major.iter_mut() {
            if *d > dim {
                *d -= 1;
            }
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.minor_to_major.iter().join(","))
    }
}

pub fn row_major(rank: usize) -> Layout {
    Layout {
        minor_to_major: (0..rank).rev().collect(),
    }
}

pub fn col_major(rank: usize) -> Layout {
    let mut layout = row_major(rank);
    layout.minor_to_major.reverse();
    layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_row_major_display() {
        assert_eq!(row_major(3).to_string(), "{2,1,0}");
        assert_eq!(col_major(3).to_string(), "{0,1,2}");
        assert_eq!(Layout::empty().to_string(), "{}");
    }

    #[test]
    fn test_new_checked_rejects_non_permutations() {
        assert_eq!(
            Layout::new_checked(vec![0, 0]),
            Err(LayoutError::NotAPermutation(vec![0, 0]))
        );
        assert!(Layout::new_checked(vec![2, 0]).is_err());
        assert!(Layout::new_checked(vec![1, 0]).is_ok());
    }

    #[test]
    fn test_delete_dimension_renumbers() {
        let mut layout = Layout::new(vec![0, 2, 1]);
        layout.delete_dimension(1);
        assert_eq!(layout.minor_to_major(), &[0, 1]);
    }

    #[test]
    fn test_row_major_supports_high_ranks() {
        let layout = row_major(300);
        assert_eq!(layout.rank(), 300);
        assert_eq!(layout.minor_to_major()[0], 299);
        assert!(layout.is_row_major());
    }

    proptest! {
        #[test]
        fn test_row_major_stays_row_major_after_delete(rank in 1usize..8, dim_seed in 0usize..8) {
            let dim = dim_seed % rank;
            let mut layout = row_major(rank);
            layout.delete_dimension(dim);
            prop_assert_eq!(layout.rank(), rank - 1);
            prop_assert!(layout.is_row_major());
        }
    }
}
