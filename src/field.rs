use core::fmt::Debug;
use num_traits::Float;

/// Storage precision of a matrix element, recorded by descriptors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Precision {
    /// 32-bit IEEE floating point.
    Single,
    /// 64-bit IEEE floating point.
    Double,
}

mod seal {
    pub trait Seal {}
    impl Seal for f32 {}
    impl Seal for f64 {}
}

/// Trait that describes a real number field usable as a matrix element.
///
/// This trait is sealed: it is implemented for the element types the matrix multiplication
/// backend provides kernels for, `f32` and `f64`.
pub trait RealField:
    seal::Seal + Float + bytemuck::Pod + Default + Debug + Send + Sync + 'static
{
    /// Precision tag of the type.
    const PRECISION: Precision;

    /// Converts an `f64` constant to `Self`.
    fn from_f64(value: f64) -> Self;
}

impl RealField for f32 {
    const PRECISION: Precision = Precision::Single;

    #[inline(always)]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl RealField for f64 {
    const PRECISION: Precision = Precision::Double;

    #[inline(always)]
    fn from_f64(value: f64) -> Self {
        value
    }
}
