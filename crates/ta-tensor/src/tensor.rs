use crate::backend::ComputeBackend;
use crate::cpu::CpuBackend;
use crate::dtype::{DType, Scalar};
use crate::error::{Result, TensorError};
use crate::gemm::GemmHelper;
use crate::permutation::Permutation;
use crate::range::Range;

/// A dense tile: row-major data over a `Range`.
///
/// Coordinates passed to [`at`](Tensor::at) and [`from_fn`](Tensor::from_fn)
/// are absolute, i.e. they include the range's lower bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T: Scalar> {
    range: Range,
    data: Vec<T>,
}

impl<T: Scalar> Tensor<T> {
    /// Create a tile from row-major data.
    ///
    /// # Panics
    /// Panics if `data.len() != range.volume()`.
    pub fn new(range: Range, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            range.volume(),
            "data length {} does not match range {} (volume={})",
            data.len(),
            range,
            range.volume()
        );
        Tensor { range, data }
    }

    /// Create a zero-filled tile.
    pub fn zeros(range: Range) -> Self {
        let n = range.volume();
        Tensor {
            range,
            data: vec![T::zero(); n],
        }
    }

    /// Create a tile whose element at each absolute coordinate is `f(coord)`.
    pub fn from_fn(range: Range, mut f: impl FnMut(&[usize]) -> T) -> Self {
        let data = range.coords().map(|c| f(&c)).collect();
        Tensor { range, data }
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Element at an absolute coordinate.
    pub fn at(&self, coord: &[usize]) -> Result<T> {
        let ord = self.range.try_ordinal(coord)?;
        Ok(self.data[ord])
    }

    /// Returns true if every element is zero.
    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|x| x.is_zero())
    }

    /// Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.data
            .iter()
            .map(|x| {
                let a = x.to_f64_abs();
                a * a
            })
            .sum::<f64>()
            .sqrt()
    }

    pub fn scale(&self, factor: T) -> Tensor<T> {
        let data = ComputeBackend::<T>::scale(&CpuBackend, &self.data, factor);
        Tensor {
            range: self.range.clone(),
            data,
        }
    }

    /// Add `other` into `self`; both tiles must cover the same range.
    pub fn add_to(&mut self, other: &Tensor<T>) -> Result<()> {
        if self.range != other.range {
            return Err(TensorError::RangeMismatch {
                expected: self.range.extent().to_vec(),
                got: other.range.extent().to_vec(),
            });
        }
        CpuBackend.add_assign(&mut self.data, &other.data)
    }

    /// Reorder the modes: mode `i` of `self` becomes mode `perm[i]`.
    pub fn permute(&self, perm: &Permutation) -> Result<Tensor<T>> {
        self.permute_with(perm, &CpuBackend)
    }

    pub fn permute_with(
        &self,
        perm: &Permutation,
        backend: &dyn ComputeBackend<T>,
    ) -> Result<Tensor<T>> {
        let range = self.range.permute(perm)?;
        if perm.is_identity() {
            return Ok(self.clone());
        }
        let data = backend.permute(&self.data, self.range.extent(), perm)?;
        Ok(Tensor { range, data })
    }

    /// `factor * (self x right)` contracted over the inner modes described by
    /// `helper`.
    pub fn contract(&self, right: &Tensor<T>, helper: &GemmHelper, factor: T) -> Result<Tensor<T>> {
        self.contract_with(right, helper, factor, &CpuBackend)
    }

    pub fn contract_with(
        &self,
        right: &Tensor<T>,
        helper: &GemmHelper,
        factor: T,
        backend: &dyn ComputeBackend<T>,
    ) -> Result<Tensor<T>> {
        let range = helper.make_result_range(&self.range, &right.range)?;
        let (m, k, n) = helper.compute_matrix_sizes(self.range.extent(), right.range.extent());
        let mut data = vec![T::zero(); range.volume()];
        backend.gemm(factor, &self.data, &right.data, &mut data, m, k, n)?;
        Ok(Tensor { range, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mat(rows: usize, cols: usize, data: Vec<i32>) -> Tensor<i32> {
        Tensor::new(Range::from_extent(vec![rows, cols]), data)
    }

    #[test]
    fn test_new_tensor() {
        let t = mat(2, 3, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(t.range().extent(), &[2, 3]);
        assert_eq!(t.dtype(), DType::I32);
        assert_eq!(t.at(&[1, 0]).unwrap(), 4);
        assert!(t.at(&[2, 0]).is_err());
    }

    #[test]
    #[should_panic]
    fn test_new_range_mismatch_panics() {
        let _t = mat(2, 2, vec![1, 2, 3]);
    }

    #[test]
    fn test_from_fn_uses_absolute_coords() {
        let t = Tensor::from_fn(Range::new(vec![2, 4], vec![2, 2]), |c| {
            (c[0] * 10 + c[1]) as i64
        });
        assert_eq!(t.data(), &[24, 25, 34, 35]);
        assert_eq!(t.at(&[3, 5]).unwrap(), 35);
    }

    #[test]
    fn test_zero_and_norm() {
        let z: Tensor<f64> = Tensor::zeros(Range::from_extent(vec![2, 2]));
        assert!(z.is_zero());
        assert_eq!(z.norm(), 0.0);

        let t = Tensor::new(Range::from_extent(vec![2]), vec![3.0f64, -4.0]);
        assert!(!t.is_zero());
        assert_relative_eq!(t.norm(), 5.0);
    }

    #[test]
    fn test_contract_matrix() {
        let a = mat(2, 2, vec![1, 2, 3, 4]);
        let b = mat(2, 2, vec![5, 6, 7, 8]);
        let h = GemmHelper::new(2, 2, 2).unwrap();
        let c = a.contract(&b, &h, 1).unwrap();
        assert_eq!(c.data(), &[19, 22, 43, 50]);
        let c2 = a.contract(&b, &h, 2).unwrap();
        assert_eq!(c2.data(), &[38, 44, 86, 100]);
    }

    #[test]
    fn test_contract_keeps_outer_bounds() {
        let a = Tensor::new(Range::new(vec![4, 0], vec![1, 2]), vec![1.0f32, 2.0]);
        let b = Tensor::new(Range::new(vec![0, 6], vec![2, 1]), vec![3.0f32, 4.0]);
        let h = GemmHelper::new(2, 2, 2).unwrap();
        let c = a.contract(&b, &h, 1.0).unwrap();
        assert_eq!(c.range(), &Range::new(vec![4, 6], vec![1, 1]));
        assert_relative_eq!(c.data()[0], 11.0);
    }

    #[test]
    fn test_contract_rank3() {
        // C[i,l] = sum_{j,k} A[i,j,k] * B[j,k,l]
        let a = Tensor::from_fn(Range::from_extent(vec![2, 2, 3]), |c| {
            (c[0] + 2 * c[1] + 3 * c[2]) as i64
        });
        let b = Tensor::from_fn(Range::from_extent(vec![2, 3, 2]), |c| {
            (c[0] * c[1] + c[2]) as i64
        });
        let h = GemmHelper::new(2, 3, 3).unwrap();
        let c = a.contract(&b, &h, 1).unwrap();
        for i in 0..2 {
            for l in 0..2 {
                let mut expected = 0;
                for j in 0..2 {
                    for k in 0..3 {
                        expected += a.at(&[i, j, k]).unwrap() * b.at(&[j, k, l]).unwrap();
                    }
                }
                assert_eq!(c.at(&[i, l]).unwrap(), expected);
            }
        }
    }

    #[test]
    fn test_contract_mismatch() {
        let a = mat(1, 3, vec![1, 2, 3]);
        let b = mat(2, 2, vec![1, 2, 3, 4]);
        let h = GemmHelper::new(2, 2, 2).unwrap();
        assert!(a.contract(&b, &h, 1).is_err());
    }

    #[test]
    fn test_add_to() {
        let mut a = mat(1, 2, vec![1, 2]);
        a.add_to(&mat(1, 2, vec![10, 20])).unwrap();
        assert_eq!(a.data(), &[11, 22]);
        assert!(a.add_to(&mat(2, 1, vec![1, 1])).is_err());
    }

    #[test]
    fn test_permute() {
        let t = Tensor::new(Range::new(vec![0, 3], vec![2, 3]), vec![1, 2, 3, 4, 5, 6]);
        let p = Permutation::new(vec![1, 0]).unwrap();
        let tt = t.permute(&p).unwrap();
        assert_eq!(tt.range(), &Range::new(vec![3, 0], vec![3, 2]));
        assert_eq!(tt.data(), &[1, 4, 2, 5, 3, 6]);
        assert_eq!(tt.at(&[4, 1]).unwrap(), t.at(&[1, 4]).unwrap());

        let same = t.permute(&Permutation::identity(2)).unwrap();
        assert_eq!(same, t);
    }

    #[test]
    fn test_scale() {
        let t = mat(1, 3, vec![1, -2, 3]).scale(3);
        assert_eq!(t.data(), &[3, -6, 9]);
    }
}
