//! Cubic spline SPH smoothing kernel with compact support radius `2h`, the only
//! kernel shape used by this runtime (boundary volume, density, pressure and
//! viscosity all evaluate the same `W`/`∇W`).

use crate::error::MathError;
use crate::tensor::Vector;
use nalgebra::RealField;

/// `2h`: the radius outside of which `W` and `∇W` are identically zero.
pub fn kernel_support_radius<R: RealField + Copy>(h: R) -> R {
    R::from_f64(2.0).unwrap() * h
}

fn normalization<R: RealField + Copy, const N: usize>(h: R) -> Result<R, MathError> {
    let sigma = match N {
        1 => R::from_f64(2.0 / 3.0).unwrap(),
        2 => R::from_f64(10.0 / (7.0 * std::f64::consts::PI)).unwrap(),
        3 => R::from_f64(1.0 / std::f64::consts::PI).unwrap(),
        n => return Err(MathError::BadDimension(n)),
    };
    Ok(sigma / h.powi(N as i32))
}

fn cubic_spline_shape<R: RealField + Copy>(q: R) -> R {
    let one = R::one();
    let two = R::from_f64(2.0).unwrap();
    if q < one {
        let q2 = q * q;
        let q3 = q2 * q;
        one - R::from_f64(1.5).unwrap() * q2 + R::from_f64(0.75).unwrap() * q3
    } else if q < two {
        let t = two - q;
        R::from_f64(0.25).unwrap() * t * t * t
    } else {
        R::zero()
    }
}

fn cubic_spline_shape_derivative<R: RealField + Copy>(q: R) -> R {
    let one = R::one();
    let two = R::from_f64(2.0).unwrap();
    if q < one {
        -R::from_f64(3.0).unwrap() * q + R::from_f64(2.25).unwrap() * q * q
    } else if q < two {
        let t = two - q;
        -R::from_f64(0.75).unwrap() * t * t
    } else {
        R::zero()
    }
}

/// Evaluates `W(dx, h)`. Radially symmetric: `W(dx, h) == W(-dx, h)`.
pub fn kernel_h<R: RealField + Copy, const N: usize>(dx: &Vector<R, N>, h: R) -> Result<R, MathError> {
    if h <= R::zero() {
        return Err(MathError::BadArgument("h must be positive".to_string()));
    }
    let sigma = normalization::<R, N>(h)?;
    let q = dx.norm() / h;
    Ok(sigma * cubic_spline_shape(q))
}

/// Evaluates `∇W(dx, h)`. Point-antisymmetric: `∇W(dx, h) == -∇W(-dx, h)`.
pub fn kernel_gradient_h<R: RealField + Copy, const N: usize>(
    dx: &Vector<R, N>,
    h: R,
) -> Result<Vector<R, N>, MathError> {
    if h <= R::zero() {
        return Err(MathError::BadArgument("h must be positive".to_string()));
    }
    let r = dx.norm();
    if r <= R::default_epsilon() {
        return Ok(Vector::<R, N>::zeros());
    }
    let sigma = normalization::<R, N>(h)?;
    let q = r / h;
    let dfdq = cubic_spline_shape_derivative(q);
    // d/dr W = sigma/h * f'(q); gradient = (d/dr W) * (dx / r)
    let dwdr = sigma * dfdq / h;
    Ok(dx * (dwdr / r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::from_array;

    #[test]
    fn kernel_is_symmetric() {
        let h = 0.1_f64;
        let dx = from_array([0.03, -0.02, 0.01]);
        let w1 = kernel_h(&dx, h).unwrap();
        let w2 = kernel_h(&-dx, h).unwrap();
        assert!((w1 - w2).abs() < 1e-12);
    }

    #[test]
    fn gradient_is_point_antisymmetric() {
        let h = 0.1_f64;
        let dx = from_array([0.03, -0.02, 0.01]);
        let g1 = kernel_gradient_h(&dx, h).unwrap();
        let g2 = kernel_gradient_h(&-dx, h).unwrap();
        assert!((g1 + g2).norm() < 1e-12);
    }

    #[test]
    fn gradient_at_origin_is_zero() {
        let h = 0.1_f64;
        let dx: Vector<f64, 3> = Vector::zeros();
        let g = kernel_gradient_h(&dx, h).unwrap();
        assert_eq!(g, Vector::zeros());
    }

    #[test]
    fn kernel_zero_outside_support() {
        let h = 0.1_f64;
        let dx = from_array([0.25, 0.0, 0.0]);
        assert_eq!(kernel_h(&dx, h).unwrap(), 0.0);
    }

    /// Numerically integrates `W` over its support on a dense Cartesian grid.
    fn grid_coords(h: f64, steps: usize) -> (f64, f64) {
        let r = 2.0 * h;
        (r, (2.0 * r) / steps as f64)
    }

    #[test]
    fn kernel_integrates_to_one_1d() {
        let h = 0.05_f64;
        let steps = 400;
        let (r, cell) = grid_coords(h, steps);
        let mut sum = 0.0;
        for i in 0..steps {
            let x = -r + (i as f64 + 0.5) * cell;
            let dx: Vector<f64, 1> = from_array([x]);
            if dx.norm() <= r {
                sum += kernel_h(&dx, h).unwrap() * cell;
            }
        }
        assert!((sum - 1.0).abs() < 2e-2, "integral was {sum}");
    }

    #[test]
    fn kernel_integrates_to_one_2d() {
        let h = 0.05_f64;
        let steps = 80;
        let (r, cell) = grid_coords(h, steps);
        let mut sum = 0.0;
        for i in 0..steps {
            for j in 0..steps {
                let x = -r + (i as f64 + 0.5) * cell;
                let y = -r + (j as f64 + 0.5) * cell;
                let dx: Vector<f64, 2> = from_array([x, y]);
                if dx.norm() <= r {
                    sum += kernel_h(&dx, h).unwrap() * cell * cell;
                }
            }
        }
        assert!((sum - 1.0).abs() < 2e-2, "integral was {sum}");
    }

    #[test]
    fn kernel_integrates_to_one_3d() {
        let h = 0.05_f64;
        let steps = 40;
        let (r, cell) = grid_coords(h, steps);
        let mut sum = 0.0;
        for i in 0..steps {
            for j in 0..steps {
                for k in 0..steps {
                    let x = -r + (i as f64 + 0.5) * cell;
                    let y = -r + (j as f64 + 0.5) * cell;
                    let z = -r + (k as f64 + 0.5) * cell;
                    let dx: Vector<f64, 3> = from_array([x, y, z]);
                    if dx.norm() <= r {
                        sum += kernel_h(&dx, h).unwrap() * cell * cell * cell;
                    }
                }
            }
        }
        assert!((sum - 1.0).abs() < 2e-2, "integral was {sum}");
    }
}
