mod permute;

use crate::backend::ComputeBackend;
use crate::dtype::Scalar;
use crate::error::{Result, TensorError};
use crate::permutation::Permutation;

/// Pure-Rust CPU compute backend.
///
/// Straightforward loops optimized for correctness rather than peak
/// performance. Used by `Tensor` tiles unless another backend is supplied.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> ComputeBackend<T> for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn gemm(
        &self,
        alpha: T,
        a: &[T],
        b: &[T],
        c: &mut [T],
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<()> {
        if a.len() != m * k {
            return Err(TensorError::Other(format!(
                "gemm: a.len()={} but expected m*k={}",
                a.len(),
                m * k
            )));
        }
        if b.len() != k * n {
            return Err(TensorError::Other(format!(
                "gemm: b.len()={} but expected k*n={}",
                b.len(),
                k * n
            )));
        }
        if c.len() != m * n {
            return Err(TensorError::Other(format!(
                "gemm: c.len()={} but expected m*n={}",
                c.len(),
                m * n
            )));
        }

        // i-p-j order keeps the inner loop contiguous in both b and c.
        for i in 0..m {
            let c_row = &mut c[i * n..(i + 1) * n];
            for p in 0..k {
                let a_ip = alpha * a[i * k + p];
                if a_ip.is_zero() {
                    continue;
                }
                let b_row = &b[p * n..(p + 1) * n];
                for (cj, &bj) in c_row.iter_mut().zip(b_row) {
                    *cj += a_ip * bj;
                }
            }
        }
        Ok(())
    }

    fn add_assign(&self, a: &mut [T], b: &[T]) -> Result<()> {
        if a.len() != b.len() {
            return Err(TensorError::RangeMismatch {
                expected: vec![a.len()],
                got: vec![b.len()],
            });
        }
        for (x, &y) in a.iter_mut().zip(b) {
            *x += y;
        }
        Ok(())
    }

    fn scale(&self, a: &[T], s: T) -> Vec<T> {
        a.iter().map(|&x| x * s).collect()
    }

    fn permute(&self, a: &[T], extent: &[usize], perm: &Permutation) -> Result<Vec<T>> {
        if perm.dim() != extent.len() {
            return Err(TensorError::RankMismatch {
                expected: extent.len(),
                got: perm.dim(),
            });
        }
        let volume: usize = extent.iter().product();
        if a.len() != volume {
            return Err(TensorError::RangeMismatch {
                expected: extent.to_vec(),
                got: vec![a.len()],
            });
        }
        Ok(permute::permute(a, extent, perm))
    }
}
