use crate::error::{Result, TensorError};
use std::fmt;

/// A permutation of tensor modes.
///
/// Applying `p` to a sequence moves element `i` to position `p[i]`, so
/// `apply(&[a, b, c])` with `p = {0, 2, 1}` gives `[a, c, b]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permutation {
    p: Vec<usize>,
}

impl Permutation {
    /// Create a permutation, checking that `p` is a bijection on `0..p.len()`.
    pub fn new(p: Vec<usize>) -> Result<Self> {
        let mut seen = vec![false; p.len()];
        for &x in &p {
            if x >= p.len() || seen[x] {
                return Err(TensorError::InvalidPermutation(p));
            }
            seen[x] = true;
        }
        Ok(Permutation { p })
    }

    pub fn identity(dim: usize) -> Self {
        Permutation {
            p: (0..dim).collect(),
        }
    }

    /// Number of modes permuted.
    pub fn dim(&self) -> usize {
        self.p.len()
    }

    pub fn is_identity(&self) -> bool {
        self.p.iter().enumerate().all(|(i, &x)| i == x)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.p
    }

    pub fn inverse(&self) -> Permutation {
        let mut inv = vec![0; self.p.len()];
        for (i, &x) in self.p.iter().enumerate() {
            inv[x] = i;
        }
        Permutation { p: inv }
    }

    /// Permute a sequence: `out[p[i]] = v[i]`.
    ///
    /// # Panics
    /// Panics if `v.len() != self.dim()`.
    pub fn apply<T: Clone>(&self, v: &[T]) -> Vec<T> {
        assert_eq!(v.len(), self.p.len(), "permutation rank mismatch");
        let mut out = v.to_vec();
        for (i, &x) in self.p.iter().enumerate() {
            out[x] = v[i].clone();
        }
        out
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, x) in self.p.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", x)?;
        }
        write!(f, "}}")
    }
}
