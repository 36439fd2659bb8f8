use crate::permutation::Permutation;

/// Permute a row-major array: input mode `i` becomes output mode `perm[i]`.
///
/// Walks the input in order with an odometer and scatters each element using
/// the output stride of its destination mode.
pub(crate) fn permute<T: Copy>(a: &[T], extent: &[usize], perm: &Permutation) -> Vec<T> {
    if a.is_empty() {
        return Vec::new();
    }
    let rank = extent.len();
    let out_extent = perm.apply(extent);
    let mut out_strides = vec![1usize; rank];
    for i in (0..rank.saturating_sub(1)).rev() {
        out_strides[i] = out_strides[i + 1] * out_extent[i + 1];
    }
    // Output stride seen by each input mode.
    let scatter: Vec<usize> = perm.as_slice().iter().map(|&p| out_strides[p]).collect();

    let mut out = a.to_vec();
    let mut idx = vec![0usize; rank];
    let mut offset = 0usize;
    for &x in a {
        out[offset] = x;
        for d in (0..rank).rev() {
            idx[d] += 1;
            offset += scatter[d];
            if idx[d] < extent[d] {
                break;
            }
            offset -= scatter[d] * extent[d];
            idx[d] = 0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let a: Vec<i32> = (0..24).collect();
        let p = Permutation::identity(3);
        assert_eq!(permute(&a, &[2, 3, 4], &p), a);
    }

    #[test]
    fn test_rank3() {
        // a[i][j][k] = 100*i + 10*j + k with extent [2, 3, 4]
        let mut a = Vec::new();
        for i in 0..2 {
            for j in 0..3 {
                for k in 0..4 {
                    a.push(100 * i + 10 * j + k);
                }
            }
        }
        // Mode 0 -> 2, 1 -> 0, 2 -> 1: out extent [3, 4, 2], out[j][k][i].
        let p = Permutation::new(vec![2, 0, 1]).unwrap();
        let out = permute(&a, &[2, 3, 4], &p);
        for j in 0..3 {
            for k in 0..4 {
                for i in 0..2 {
                    assert_eq!(out[(j * 4 + k) * 2 + i], 100 * i + 10 * j + k);
                }
            }
        }
    }
}
