//! Numeric trait bounds shared by the tensor, field and solver modules.
//!
//! Mirrors the generic `Index`/`Real` split used throughout this crate's teacher
//! library: almost every public type is generic over a real scalar type and an
//! integer index type so that callers can pick 32- or 64-bit precision.

use nalgebra::RealField;
use num::{FromPrimitive, Integer, ToPrimitive};

/// Marker bound applied implicitly to every type that can cross a `rayon`
/// parallel-for boundary.
pub trait ThreadSafe: Send + Sync {}
impl<T: Send + Sync> ThreadSafe for T {}

/// Bound satisfied by `f32`/`f64`, used for all "real" tensor components.
pub trait Real:
    RealField + Copy + FromPrimitive + ToPrimitive + bytemuck::Pod + ThreadSafe + 'static
{
    /// Attempts a lossless-effort conversion to another real type, used when
    /// converting parameters or persisted models between precisions.
    fn try_convert<T: Real>(&self) -> Option<T> {
        T::from_f64(self.to_f64()?)
    }
}

impl Real for f32 {}
impl Real for f64 {}

/// Bound satisfied by `i32`/`i64`, used for all "integer" tensor components and
/// for the neighbor index's flat cell keys.
pub trait Index:
    Integer + Copy + FromPrimitive + ToPrimitive + bytemuck::Pod + ThreadSafe + 'static
{
}

impl Index for i32 {}
impl Index for i64 {}
