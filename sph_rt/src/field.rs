//! Type-erased field storage: a closed tagged variant over
//! `{Real, Integer, Boolean} x {Rank0, Rank1<D>, Rank2<D,D>}`, resolved once per
//! `Model` at construction time (`D`, the spatial dimension, is a crate-wide
//! const generic — the model's groups, fields and neighbor index all share it).
//!
//! This replaces the inheritance-plus-downcast pattern a C++ port would reach for
//! with a closed enum: there is no `dyn Any`, so a mismatched `Get`/`Set` is a
//! compile-time or `BadType` runtime error rather than a failed downcast.

use crate::error::FieldError;
use crate::numeric::{Index, Real};
use crate::tensor::{Matrix, Vector};

/// The three supported component types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Real,
    Integer,
    Boolean,
}

/// The three supported tensor ranks. Rank-1/2 carry the (crate-wide) dimension
/// `D` purely for display; the actual extent lives in the const generic of the
/// `Field` variant itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Rank0,
    Rank1(usize),
    Rank2(usize, usize),
}

/// `(ComponentType, Shape)` pair identifying a field's storage layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub component: ComponentType,
    pub shape: Shape,
}

impl TensorType {
    pub fn scalar(component: ComponentType) -> Self {
        TensorType { component, shape: Shape::Rank0 }
    }
    pub fn vector(component: ComponentType, d: usize) -> Self {
        TensorType { component, shape: Shape::Rank1(d) }
    }
    pub fn matrix(component: ComponentType, d: usize) -> Self {
        TensorType { component, shape: Shape::Rank2(d, d) }
    }
}

impl std::fmt::Display for TensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{:?}", self.component, self.shape)
    }
}

/// Array-of-tensors storage for one named field, erased over component type and
/// rank but fixed to the model's spatial dimension `D`.
#[derive(Debug, Clone)]
pub enum Field<R: Real, I: Index, const D: usize> {
    RealScalar(Vec<R>),
    RealVector(Vec<Vector<R, D>>),
    RealMatrix(Vec<Matrix<R, D>>),
    IntegerScalar(Vec<I>),
    IntegerVector(Vec<Vector<I, D>>),
    BooleanScalar(Vec<bool>),
}

impl<R: Real, I: Index, const D: usize> Field<R, I, D> {
    pub fn new_real_scalar() -> Self {
        Field::RealScalar(Vec::new())
    }
    pub fn new_real_vector() -> Self {
        Field::RealVector(Vec::new())
    }
    pub fn new_real_matrix() -> Self {
        Field::RealMatrix(Vec::new())
    }
    pub fn new_integer_scalar() -> Self {
        Field::IntegerScalar(Vec::new())
    }
    pub fn new_integer_vector() -> Self {
        Field::IntegerVector(Vec::new())
    }
    pub fn new_boolean_scalar() -> Self {
        Field::BooleanScalar(Vec::new())
    }

    /// Number of tensors currently stored.
    pub fn size(&self) -> usize {
        match self {
            Field::RealScalar(v) => v.len(),
            Field::RealVector(v) => v.len(),
            Field::RealMatrix(v) => v.len(),
            Field::IntegerScalar(v) => v.len(),
            Field::IntegerVector(v) => v.len(),
            Field::BooleanScalar(v) => v.len(),
        }
    }

    pub fn tensor_type(&self) -> TensorType {
        match self {
            Field::RealScalar(_) => TensorType::scalar(ComponentType::Real),
            Field::RealVector(_) => TensorType::vector(ComponentType::Real, D),
            Field::RealMatrix(_) => TensorType::matrix(ComponentType::Real, D),
            Field::IntegerScalar(_) => TensorType::scalar(ComponentType::Integer),
            Field::IntegerVector(_) => TensorType::vector(ComponentType::Integer, D),
            Field::BooleanScalar(_) => TensorType::scalar(ComponentType::Boolean),
        }
    }

    /// Resizes to exactly `n` tensors, filling new slots with the type's zero
    /// value (or `false` for booleans).
    pub fn resize(&mut self, n: usize) {
        match self {
            Field::RealScalar(v) => v.resize(n, R::zero()),
            Field::RealVector(v) => v.resize(n, Vector::<R, D>::zeros()),
            Field::RealMatrix(v) => v.resize(n, Matrix::<R, D>::zeros()),
            Field::IntegerScalar(v) => v.resize(n, I::zero()),
            Field::IntegerVector(v) => v.resize(n, Vector::<I, D>::zeros()),
            Field::BooleanScalar(v) => v.resize(n, false),
        }
    }

    /// Applies a permutation so that `new[i] = old[perm[i]]`. Fails with
    /// [`FieldError::BadPermutation`] if `perm` is not a bijection on
    /// `0..self.size()`.
    pub fn permute(&mut self, perm: &[usize]) -> Result<(), FieldError> {
        if !is_permutation(perm, self.size()) {
            return Err(FieldError::BadPermutation(self.size()));
        }
        macro_rules! permute_vec {
            ($v:expr) => {{
                let old = $v.clone();
                for (new_i, &old_i) in perm.iter().enumerate() {
                    $v[new_i] = old[old_i].clone();
                }
            }};
        }
        match self {
            Field::RealScalar(v) => permute_vec!(v),
            Field::RealVector(v) => permute_vec!(v),
            Field::RealMatrix(v) => permute_vec!(v),
            Field::IntegerScalar(v) => permute_vec!(v),
            Field::IntegerVector(v) => permute_vec!(v),
            Field::BooleanScalar(v) => permute_vec!(v),
        }
        Ok(())
    }

    pub fn as_real_scalar(&self) -> Result<&Vec<R>, FieldError> {
        match self {
            Field::RealScalar(v) => Ok(v),
            other => Err(mismatch(other, TensorType::scalar(ComponentType::Real))),
        }
    }
    pub fn as_real_scalar_mut(&mut self) -> Result<&mut Vec<R>, FieldError> {
        let tt = self.tensor_type();
        match self {
            Field::RealScalar(v) => Ok(v),
            _ => Err(FieldError::BadType {
                expected: TensorType::scalar(ComponentType::Real).to_string(),
                actual: tt.to_string(),
            }),
        }
    }
    pub fn as_real_vector(&self) -> Result<&Vec<Vector<R, D>>, FieldError> {
        match self {
            Field::RealVector(v) => Ok(v),
            other => Err(mismatch(other, TensorType::vector(ComponentType::Real, D))),
        }
    }
    pub fn as_real_vector_mut(&mut self) -> Result<&mut Vec<Vector<R, D>>, FieldError> {
        let tt = self.tensor_type();
        match self {
            Field::RealVector(v) => Ok(v),
            _ => Err(FieldError::BadType {
                expected: TensorType::vector(ComponentType::Real, D).to_string(),
                actual: tt.to_string(),
            }),
        }
    }
    pub fn as_real_matrix(&self) -> Result<&Vec<Matrix<R, D>>, FieldError> {
        match self {
            Field::RealMatrix(v) => Ok(v),
            other => Err(mismatch(other, TensorType::matrix(ComponentType::Real, D))),
        }
    }
    pub fn as_real_matrix_mut(&mut self) -> Result<&mut Vec<Matrix<R, D>>, FieldError> {
        let tt = self.tensor_type();
        match self {
            Field::RealMatrix(v) => Ok(v),
            _ => Err(FieldError::BadType {
                expected: TensorType::matrix(ComponentType::Real, D).to_string(),
                actual: tt.to_string(),
            }),
        }
    }
    pub fn as_integer_scalar(&self) -> Result<&Vec<I>, FieldError> {
        match self {
            Field::IntegerScalar(v) => Ok(v),
            other => Err(mismatch(other, TensorType::scalar(ComponentType::Integer))),
        }
    }
    pub fn as_integer_scalar_mut(&mut self) -> Result<&mut Vec<I>, FieldError> {
        let tt = self.tensor_type();
        match self {
            Field::IntegerScalar(v) => Ok(v),
            _ => Err(FieldError::BadType {
                expected: TensorType::scalar(ComponentType::Integer).to_string(),
                actual: tt.to_string(),
            }),
        }
    }
    pub fn as_boolean_scalar(&self) -> Result<&Vec<bool>, FieldError> {
        match self {
            Field::BooleanScalar(v) => Ok(v),
            other => Err(mismatch(other, TensorType::scalar(ComponentType::Boolean))),
        }
    }
    pub fn as_boolean_scalar_mut(&mut self) -> Result<&mut Vec<bool>, FieldError> {
        let tt = self.tensor_type();
        match self {
            Field::BooleanScalar(v) => Ok(v),
            _ => Err(FieldError::BadType {
                expected: TensorType::scalar(ComponentType::Boolean).to_string(),
                actual: tt.to_string(),
            }),
        }
    }
}

fn mismatch<R: Real, I: Index, const D: usize>(actual: &Field<R, I, D>, expected: TensorType) -> FieldError {
    FieldError::BadType {
        expected: expected.to_string(),
        actual: actual.tensor_type().to_string(),
    }
}

fn is_permutation(perm: &[usize], n: usize) -> bool {
    if perm.len() != n {
        return false;
    }
    let mut seen = vec![false; n];
    for &p in perm {
        if p >= n || seen[p] {
            return false;
        }
        seen[p] = true;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_and_permute_roundtrip() {
        let mut f: Field<f64, i32, 3> = Field::new_real_scalar();
        f.resize(3);
        {
            let v = f.as_real_scalar_mut().unwrap();
            v[0] = 1.0;
            v[1] = 2.0;
            v[2] = 3.0;
        }
        f.permute(&[2, 0, 1]).unwrap();
        assert_eq!(f.as_real_scalar().unwrap(), &vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn permute_rejects_non_permutation() {
        let mut f: Field<f64, i32, 3> = Field::new_real_scalar();
        f.resize(3);
        assert!(f.permute(&[0, 0, 2]).is_err());
        assert!(f.permute(&[0, 1]).is_err());
    }

    #[test]
    fn identity_permutation_is_noop() {
        let mut f: Field<f64, i32, 3> = Field::new_real_scalar();
        f.resize(3);
        {
            let v = f.as_real_scalar_mut().unwrap();
            v[0] = 1.0;
            v[1] = 2.0;
            v[2] = 3.0;
        }
        f.permute(&[0, 1, 2]).unwrap();
        assert_eq!(f.as_real_scalar().unwrap(), &vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn type_mismatch_is_reported() {
        let f: Field<f64, i32, 3> = Field::new_real_scalar();
        assert!(f.as_real_vector().is_err());
    }
}
