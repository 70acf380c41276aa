//! Fixed-rank tensor primitives: rank-0 (scalar), rank-1 (`N`-vector) and rank-2
//! (`N`×`N` matrix) tensors over a [`Real`] component type, backed by
//! `nalgebra`'s fixed-size statically-dimensioned types.
//!
//! `Shape` and the rank are compile-time known (`N` is a const generic), matching
//! the `TensorType = (ComponentType, Shape)` pairing described for the field
//! storage layer: a `Vector<R, N>` or `Matrix<R, N>` here is exactly the tensor a
//! [`crate::field::Field`] of the corresponding shape stores one-per-particle.

use crate::error::MathError;
use nalgebra::{SMatrix, SVector};

/// Rank-1 tensor: an `N`-component vector.
pub type Vector<R, const N: usize> = SVector<R, N>;
/// Rank-2 tensor: an `N`×`N` matrix.
pub type Matrix<R, const N: usize> = SMatrix<R, N, N>;

/// Constructs the zero vector/matrix. Thin alias kept for symmetry with `ones`
/// and `identity`, which nalgebra does not spell the same way for both ranks.
pub fn zeros_vec<R: nalgebra::RealField + Copy, const N: usize>() -> Vector<R, N> {
    Vector::<R, N>::zeros()
}

pub fn zeros_mat<R: nalgebra::RealField + Copy, const N: usize>() -> Matrix<R, N> {
    Matrix::<R, N>::zeros()
}

pub fn ones_vec<R: nalgebra::RealField + Copy, const N: usize>() -> Vector<R, N> {
    Vector::<R, N>::repeat(R::one())
}

pub fn identity<R: nalgebra::RealField + Copy, const N: usize>() -> Matrix<R, N> {
    Matrix::<R, N>::identity()
}

pub fn from_array<R: nalgebra::Scalar + Copy, const N: usize>(values: [R; N]) -> Vector<R, N> {
    Vector::<R, N>::from_column_slice(&values)
}

/// Componentwise most-positive representable value.
pub fn most_positive<R: crate::numeric::Real, const N: usize>() -> Vector<R, N> {
    Vector::<R, N>::repeat(R::max_value().unwrap_or_else(R::one))
}

/// Componentwise most-negative representable value.
pub fn most_negative<R: crate::numeric::Real, const N: usize>() -> Vector<R, N> {
    Vector::<R, N>::repeat(R::min_value().unwrap_or_else(|| -R::one()))
}

pub fn positive_infinity<R: crate::numeric::Real, const N: usize>() -> Vector<R, N> {
    Vector::<R, N>::repeat(R::max_value().unwrap_or_else(R::one))
}

pub fn negative_infinity<R: crate::numeric::Real, const N: usize>() -> Vector<R, N> {
    Vector::<R, N>::repeat(R::min_value().unwrap_or_else(|| -R::one()))
}

/// Cross product, defined only in 3D. Returns [`MathError::BadDimension`] for any
/// other `N`.
pub fn cross<R: nalgebra::RealField + Copy, const N: usize>(
    a: &Vector<R, N>,
    b: &Vector<R, N>,
) -> Result<Vector<R, N>, MathError> {
    if N != 3 {
        return Err(MathError::BadDimension(N));
    }
    // Safety-free reinterpretation via component access: nalgebra's `cross` is
    // only defined for `Vector3`, so we build the result componentwise instead of
    // transmuting dimensions.
    let ax = a[0];
    let ay = a[1];
    let az = a[2];
    let bx = b[0];
    let by = b[1];
    let bz = b[2];
    let mut out = Vector::<R, N>::zeros();
    out[0] = ay * bz - az * by;
    out[1] = az * bx - ax * bz;
    out[2] = ax * by - ay * bx;
    Ok(out)
}

/// Outer product `a ⊗ b`.
pub fn outer<R: nalgebra::RealField + Copy, const N: usize>(
    a: &Vector<R, N>,
    b: &Vector<R, N>,
) -> Matrix<R, N> {
    a * b.transpose()
}

/// Safe normalization: returns the zero vector if `v` is (numerically) zero,
/// instead of producing `NaN` like `nalgebra`'s `normalize` would.
pub fn normalized<R: nalgebra::RealField + Copy, const N: usize>(v: &Vector<R, N>) -> Vector<R, N> {
    let n = v.norm();
    if n > R::default_epsilon() {
        v / n
    } else {
        Vector::<R, N>::zeros()
    }
}

/// Componentwise minimum.
pub fn component_min<R: nalgebra::RealField + Copy, const N: usize>(
    a: &Vector<R, N>,
    b: &Vector<R, N>,
) -> Vector<R, N> {
    a.zip_map(b, |x, y| if x < y { x } else { y })
}

/// Componentwise maximum.
pub fn component_max<R: nalgebra::RealField + Copy, const N: usize>(
    a: &Vector<R, N>,
    b: &Vector<R, N>,
) -> Vector<R, N> {
    a.zip_map(b, |x, y| if x > y { x } else { y })
}

/// Componentwise absolute value.
pub fn component_abs<R: nalgebra::RealField + Copy, const N: usize>(a: &Vector<R, N>) -> Vector<R, N> {
    a.map(|x| x.abs())
}

/// Largest single component (not the norm).
pub fn maximum_component<R: nalgebra::RealField + Copy, const N: usize>(a: &Vector<R, N>) -> R {
    a.fold(R::min_value().unwrap_or(a[0]), |acc, x| if x > acc { x } else { acc })
}

/// `1/x` if `|x| > eps`, else `0`. [`MathError::BadArgument`] if `eps <= 0`.
pub fn reciprocal_or_zero<R: nalgebra::RealField + Copy>(x: R, eps: R) -> Result<R, MathError> {
    if eps <= R::zero() {
        return Err(MathError::BadArgument(format!(
            "epsilon must be positive, got {eps:?}"
        )));
    }
    if x.abs() > eps {
        Ok(R::one() / x)
    } else {
        Ok(R::zero())
    }
}

/// Smoothstep interpolation between `edge0` and `edge1`, clamped outside
/// `[edge0, edge1]`.
pub fn smoothstep<R: nalgebra::RealField + Copy>(edge0: R, edge1: R, x: R) -> R {
    let three = R::from_f64(3.0).unwrap();
    let two = R::from_f64(2.0).unwrap();
    let t = ((x - edge0) / (edge1 - edge0)).clamp(R::zero(), R::one());
    t * t * (three - two * t)
}

/// Left-continuous Heaviside step: `1` for `x > 0`, `0` for `x <= 0`.
pub fn unit_step<R: nalgebra::RealField + Copy>(x: R) -> R {
    if x > R::zero() {
        R::one()
    } else {
        R::zero()
    }
}

/// Converts a 3-vector into its skew-symmetric cross-product matrix, such that
/// `skew(a) * b == cross(a, b)`.
pub fn skew<R: nalgebra::RealField + Copy>(a: &Vector<R, 3>) -> Matrix<R, 3> {
    let z = R::zero();
    Matrix::<R, 3>::new(z, -a[2], a[1], a[2], z, -a[0], -a[1], a[0], z)
}

/// Extracts the axial vector from a skew-symmetric matrix (inverse of [`skew`]).
pub fn unskew<R: nalgebra::RealField + Copy>(m: &Matrix<R, 3>) -> Vector<R, 3> {
    let half = R::from_f64(0.5).unwrap();
    Vector::<R, 3>::new((m[(2, 1)] - m[(1, 2)]) * half, (m[(0, 2)] - m[(2, 0)]) * half, (m[(1, 0)] - m[(0, 1)]) * half)
}

/// Moore–Penrose pseudo-inverse, via SVD.
pub fn pseudo_inverse<R: nalgebra::RealField + Copy, const N: usize>(
    m: &Matrix<R, N>,
) -> Result<Matrix<R, N>, MathError> {
    let eps = R::default_epsilon();
    (*m).pseudo_inverse(eps)
        .map_err(|e| MathError::BadArgument(e.to_string()))
}

/// Solves the positive-semidefinite system `A x = b` via an LDLᵀ-equivalent
/// Cholesky factorization. Fails with [`MathError::Singular`] if `A` is not
/// positive definite to within numerical tolerance.
pub fn solve_psd<R: nalgebra::RealField + Copy, const N: usize>(
    a: &Matrix<R, N>,
    b: &Vector<R, N>,
) -> Result<Vector<R, N>, MathError> {
    nalgebra::linalg::Cholesky::new(*a)
        .ok_or(MathError::Singular)
        .map(|chol| chol.solve(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_is_safe_at_zero() {
        let v: Vector<f64, 3> = Vector::zeros();
        assert_eq!(normalized(&v), Vector::zeros());
    }

    #[test]
    fn cross_is_anti_commutative() {
        let a = from_array([1.0, 0.0, 0.0]);
        let b = from_array([0.0, 1.0, 0.0]);
        let ab = cross(&a, &b).unwrap();
        let ba = cross(&b, &a).unwrap();
        assert_eq!(ab, -ba);
    }

    #[test]
    fn cross_outside_3d_fails() {
        let a: Vector<f64, 2> = Vector::zeros();
        assert!(matches!(cross(&a, &a), Err(MathError::BadDimension(2))));
    }

    #[test]
    fn reciprocal_or_zero_rejects_nonpositive_eps() {
        assert!(reciprocal_or_zero(1.0, 0.0).is_err());
        assert!(reciprocal_or_zero(1.0, -1.0).is_err());
    }

    #[test]
    fn skew_matches_cross() {
        let a = from_array([1.0, 2.0, 3.0]);
        let b = from_array([4.0, -1.0, 2.0]);
        let viaskew = skew(&a) * b;
        let viacross = cross(&a, &b).unwrap();
        assert!((viaskew - viacross).norm() < 1e-12);
    }
}
