//! Implicit viscosity solver: per-spatial-component preconditioned
//! conjugate gradients with a diagonal preconditioner, used by the PT16
//! vorticity-diffusion and velocity-reconstruction viscosity schemes.
//!
//! The solver itself only knows about flat `R` vectors; the owning scheme
//! supplies `rhs`/`system`/`diagonal`/`apply` closures closing over whatever
//! neighbor-list/field state the particular linear system needs (vorticity
//! diffusion `(I - nu dt L) w = w0`, or the velocity-reconstruction system),
//! matching this crate's snapshot-map-writeback idiom: `system` is expected to
//! do its own `rayon` parallel-for internally when it evaluates `A*x`.

use crate::error::ModelError;
use crate::model::Model;
use crate::neighborhood::NeighborIndex;
use crate::numeric::{Index, Real};
use crate::schemes::implicit_viscosity::ImplicitViscosityScheme;
use rayon::prelude::*;

/// Per-component CG closures. `system` computes `(A*x)[f]` for every particle
/// given the current iterate `x`; it is expected to do so with its own
/// internal `rayon` parallel-for (its gradient/neighbor work is the
/// performance-critical part, not this loop).
pub struct ComponentSystem<'a, R: Real> {
    pub rhs: Box<dyn Fn(usize) -> R + Sync + 'a>,
    pub system: Box<dyn Fn(&[R]) -> Vec<R> + Sync + 'a>,
    pub diagonal: Box<dyn Fn(usize) -> R + Sync + 'a>,
    /// Optional per-particle gate applied to the final solution (e.g.
    /// suppressing the update for newborn particles during `fade_duration`).
    pub apply: Option<Box<dyn Fn(usize, R, R) -> R + Sync + 'a>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CgReport {
    pub iterations: u32,
    pub broke_down: bool,
}

/// Solves one real linear system `A x = b` with a Jacobi (diagonal)
/// preconditioner. `x0` is the warm-started initial guess, overwritten in
/// place with the solution.
///
/// Termination: `r.r < eps^2 * b.b`, `eps = tolerance * 1e-5 * rest_density`,
/// capped at `max_iters`. A near-machine-epsilon `p^T A p` or `r^T z`
/// signals numerical breakdown: the loop exits early (not an error) and
/// reports `broke_down = true`.
pub fn solve_component<R: Real>(
    sys: &ComponentSystem<R>,
    x0: &mut [R],
    tolerance: R,
    rest_density: R,
    max_iters: u32,
) -> CgReport {
    let n = x0.len();
    let b: Vec<R> = (0..n).into_par_iter().map(|f| (sys.rhs)(f)).collect();
    let diag: Vec<R> = (0..n).into_par_iter().map(|f| (sys.diagonal)(f)).collect();

    let bb: R = b.iter().fold(R::zero(), |acc, v| acc + *v * *v);
    let eps = tolerance * R::from_f64(1e-5).unwrap() * rest_density;
    let threshold = eps * eps * bb;
    let breakdown_eps = R::default_epsilon() * R::from_f64(1e3).unwrap();

    let ax0 = (sys.system)(x0);
    let mut r: Vec<R> = (0..n).map(|f| b[f] - ax0[f]).collect();

    let precondition = |r: &[R]| -> Vec<R> {
        (0..n)
            .map(|f| if diag[f].abs() > R::default_epsilon() { r[f] / diag[f] } else { r[f] })
            .collect()
    };

    let mut z = precondition(&r);
    let mut p = z.clone();
    let mut rz_old: R = (0..n).fold(R::zero(), |acc, f| acc + r[f] * z[f]);

    let mut report = CgReport::default();
    let rr0: R = r.iter().fold(R::zero(), |acc, v| acc + *v * *v);
    if rr0 < threshold {
        return report;
    }

    for iter in 0..max_iters {
        let ap = (sys.system)(&p);
        let p_ap: R = (0..n).fold(R::zero(), |acc, f| acc + p[f] * ap[f]);

        if p_ap.abs() < breakdown_eps {
            report.broke_down = true;
            report.iterations = iter;
            break;
        }

        let alpha = rz_old / p_ap;
        for f in 0..n {
            x0[f] += alpha * p[f];
            r[f] -= alpha * ap[f];
        }

        let rr: R = r.iter().fold(R::zero(), |acc, v| acc + *v * *v);
        report.iterations = iter + 1;
        if rr < threshold {
            break;
        }

        z = precondition(&r);
        let rz_new: R = (0..n).fold(R::zero(), |acc, f| acc + r[f] * z[f]);
        if rz_old.abs() < breakdown_eps {
            report.broke_down = true;
            break;
        }
        let beta = rz_new / rz_old;
        for f in 0..n {
            p[f] = z[f] + beta * p[f];
        }
        rz_old = rz_new;
    }

    if let Some(apply) = &sys.apply {
        for f in 0..n {
            x0[f] = apply(f, x0[f], x0[f]);
        }
    }
    report
}

/// Drives the PT16 implicit vorticity-diffusion solve for every active fluid
/// group: builds each group's `(I - nu dt L)` system once via
/// `ImplicitViscosityScheme::prepare_group`, then runs `solve_component`
/// independently per axis (x, y, z) against the shared diagonal/weights,
/// warm-started from the group's current `vorticity` field. Returns the
/// worst (max) iteration count and whether any axis broke down, across all
/// groups and axes.
pub fn solve_vorticity_diffusion<R: Real, I: Index>(
    scheme: &ImplicitViscosityScheme,
    model: &mut Model<R, I, 3>,
    nhood: &NeighborIndex<R, 3>,
    h: R,
    dt: R,
) -> Result<CgReport, ModelError> {
    let mut worst = CgReport::default();

    for &group_index in scheme.active_fluid_groups() {
        let system = scheme.prepare_group(model, nhood, h, dt, group_index)?;
        let n = system.diagonal.len();
        if n == 0 {
            continue;
        }

        let group = model.get_group_by_index(group_index).unwrap();
        let mut vorticity = group.get_varying("vorticity")?.as_real_vector()?.clone();

        for axis in 0..3 {
            let mut x: Vec<R> = vorticity.iter().map(|v| v[axis]).collect();
            let rhs = &system.rhs;
            let diagonal = &system.diagonal;
            let weights = &system.weights;

            let cg_sys: ComponentSystem<R> = ComponentSystem {
                rhs: Box::new(move |f| rhs[f][axis]),
                system: Box::new(move |x: &[R]| {
                    (0..n)
                        .into_par_iter()
                        .map(|f| {
                            let mut a_x = diagonal[f] * x[f];
                            for &(j, w) in &weights[f] {
                                a_x -= w * x[j];
                            }
                            a_x
                        })
                        .collect()
                }),
                diagonal: Box::new(move |f| diagonal[f]),
                apply: None,
            };

            let report = solve_component(&cg_sys, &mut x, system.tolerance, system.rest_density, system.max_iterations);
            if report.iterations > worst.iterations {
                worst.iterations = report.iterations;
            }
            worst.broke_down |= report.broke_down;

            for f in 0..n {
                vorticity[f][axis] = x[f];
            }
        }

        let group = model.get_group_by_index_mut(group_index).unwrap();
        group.get_varying_mut("vorticity")?.as_real_vector_mut()?.copy_from_slice(&vorticity);
    }

    Ok(worst)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Solves the trivial diagonal system `A = 2I`, `b = [4, 4, 4]`, whose
    /// exact solution is `x = [2, 2, 2]`.
    #[test]
    fn converges_on_a_diagonal_system() {
        let n = 3;
        let sys: ComponentSystem<f64> = ComponentSystem {
            rhs: Box::new(|_f| 4.0),
            system: Box::new(|x: &[f64]| x.iter().map(|v| 2.0 * v).collect()),
            diagonal: Box::new(|_f| 2.0),
            apply: None,
        };
        let mut x = vec![0.0; n];
        let report = solve_component(&sys, &mut x, 1e-3, 1000.0, 50);
        assert!(!report.broke_down);
        for v in x {
            assert!((v - 2.0).abs() < 1e-6);
        }
    }

    #[test]
    fn apply_gate_can_override_the_solution() {
        let n = 2;
        let sys: ComponentSystem<f64> = ComponentSystem {
            rhs: Box::new(|_f| 1.0),
            system: Box::new(|x: &[f64]| x.to_vec()),
            diagonal: Box::new(|_f| 1.0),
            apply: Some(Box::new(|f, _old, new| if f == 0 { 0.0 } else { new })),
        };
        let mut x = vec![0.0; n];
        solve_component(&sys, &mut x, 1e-3, 1000.0, 10);
        assert_eq!(x[0], 0.0);
    }
}
