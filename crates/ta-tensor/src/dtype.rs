use half::f16;
use std::fmt;
use std::ops::{Add, AddAssign, Mul};

/// Element types a tile can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    I32,
    I64,
    /// 16-bit floating point (IEEE 754 half-precision, via the `half` crate).
    F16,
    F32,
    F64,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::I32 => write!(f, "i32"),
            DType::I64 => write!(f, "i64"),
            DType::F16 => write!(f, "f16"),
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
        }
    }
}

/// Numeric element of a tile.
pub trait Scalar:
    Copy
    + Send
    + Sync
    + PartialEq
    + fmt::Debug
    + 'static
    + Add<Output = Self>
    + AddAssign
    + Mul<Output = Self>
{
    const DTYPE: DType;

    fn zero() -> Self;

    fn one() -> Self;

    /// Magnitude as `f64`, used for norms.
    fn to_f64_abs(self) -> f64;

    fn is_zero(self) -> bool {
        self == Self::zero()
    }
}

macro_rules! impl_scalar {
    ($t:ty, $dtype:expr, $zero:expr, $one:expr) => {
        impl Scalar for $t {
            const DTYPE: DType = $dtype;

            fn zero() -> Self {
                $zero
            }

            fn one() -> Self {
                $one
            }

            fn to_f64_abs(self) -> f64 {
                (self as f64).abs()
            }
        }
    };
}

impl_scalar!(i32, DType::I32, 0, 1);
impl_scalar!(i64, DType::I64, 0, 1);
impl_scalar!(f32, DType::F32, 0.0, 1.0);
impl_scalar!(f64, DType::F64, 0.0, 1.0);

impl Scalar for f16 {
    const DTYPE: DType = DType::F16;

    fn zero() -> Self {
        f16::ZERO
    }

    fn one() -> Self {
        f16::ONE
    }

    fn to_f64_abs(self) -> f64 {
        self.to_f64().abs()
    }
}
