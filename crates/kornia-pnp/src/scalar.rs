//! Floating point abstraction shared by every solver of the crate.

use nalgebra::RealField;
use rand::distr::uniform::SampleUniform;

/// Floating point type usable by the solvers, implemented for `f32` and `f64`.
pub trait Real: RealField + Copy + Default + SampleUniform {}

impl<T> Real for T where T: RealField + Copy + Default + SampleUniform {}

/// Converts a double precision literal into the working scalar type.
#[inline(always)]
pub fn lit<T: Real>(value: f64) -> T {
    nalgebra::convert(value)
}

/// Returns `true` if the scalar type is single precision.
#[inline(always)]
pub fn is_single_precision<T: Real>() -> bool {
    std::mem::size_of::<T>() == std::mem::size_of::<f32>()
}

/// Strict epsilon: `1e-6` for single precision, `1e-12` for double precision.
#[inline(always)]
pub fn eps<T: Real>() -> T {
    if is_single_precision::<T>() {
        lit(1e-6)
    } else {
        lit(1e-12)
    }
}

/// Weak epsilon: `1e-3` for single precision, `1e-6` for double precision.
#[inline(always)]
pub fn weak_eps<T: Real>() -> T {
    if is_single_precision::<T>() {
        lit(1e-3)
    } else {
        lit(1e-6)
    }
}

/// Returns `true` if `value` is zero up to [`eps`].
#[inline(always)]
pub fn is_equal_eps<T: Real>(value: T) -> bool {
    value.abs() <= eps::<T>()
}

/// Largest finite value, used to saturate invalid errors.
#[inline(always)]
pub fn saturated<T: Real>() -> T {
    if is_single_precision::<T>() {
        lit(f32::MAX as f64)
    } else {
        lit(f64::MAX)
    }
}

/// Converts a working scalar into double precision, `NaN` if it has no double precision counterpart.
#[inline(always)]
pub fn to_f64<T: Real>(value: T) -> f64 {
    nalgebra::try_convert(value).unwrap_or(f64::NAN)
}
