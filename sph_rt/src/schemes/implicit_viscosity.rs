//! `implicit_viscosity.compute_vorticity`: the per-particle half of the PT16
//! (Peer & Teschner 2016) implicit vorticity-diffusion viscosity solve. The
//! component-wise conjugate-gradient loop itself lives in
//! `solvers::viscosity_cg`; this module only builds the linear system each
//! axis is solved against and writes the converged vorticity back.

use crate::error::ModelError;
use crate::kernel::{kernel_gradient_h, kernel_h};
use crate::model::{integer_scalar, real_scalar, real_vector, Model};
use crate::neighborhood::NeighborIndex;
use crate::numeric::{Index, Real};
use crate::scheme::{gather_neighbors, select_active_groups, GroupSelector, NeighborScratch, Scheme, ScratchPool};
use crate::tensor::{cross, zeros_vec, Vector};
use num::ToPrimitive;
use rayon::prelude::*;
use std::cell::RefCell;

/// The per-group linear-system data `solvers::viscosity_cg::solve_vorticity_diffusion`
/// solves three times (once per spatial axis). `diagonal[f]` and `weights[f]`
/// only depend on positions/mass/density, so they are built once and reused
/// across all three axes.
pub(crate) struct GroupSystem<R: Real> {
    pub diagonal: Vec<R>,
    pub weights: Vec<Vec<(usize, R)>>,
    pub rhs: Vec<Vector<R, 3>>,
    pub rest_density: R,
    pub tolerance: R,
    pub max_iterations: u32,
}

pub struct ImplicitViscosityScheme {
    selector: GroupSelector,
    active_groups: Vec<usize>,
    scratch: ScratchPool,
}

impl ImplicitViscosityScheme {
    pub fn new() -> Self {
        ImplicitViscosityScheme { selector: GroupSelector::new("fluid"), active_groups: Vec::new(), scratch: ScratchPool::new() }
    }

    pub fn active_fluid_groups(&self) -> &[usize] {
        &self.active_groups
    }

    /// Curl estimator: `w[f] = sum_f' (m[f']/rho[f']) (v[f']-v[f]) x grad_W(x_ff', h)`.
    /// Writes the result into `vorticity` (the CG solve's warm-started
    /// iterate) and `vorticity_rhs` (the solve's fixed right-hand side `w0`).
    pub fn compute_vorticity<R: Real, I: Index>(
        &self,
        model: &mut Model<R, I, 3>,
        nhood: &NeighborIndex<R, 3>,
        h: R,
    ) -> Result<(), ModelError> {
        for &group_index in &self.active_groups {
            let group = model.get_group_by_index(group_index).unwrap();
            let positions = group.positions().cloned().unwrap_or_default();
            let velocities = group.get_varying("velocity")?.as_real_vector()?.clone();
            let n = positions.len();
            if n == 0 {
                continue;
            }

            let neighbor_data: Vec<(usize, Vec<Vector<R, 3>>, Vec<Vector<R, 3>>, Vec<R>, Vec<R>)> = model
                .groups()
                .filter(|g| self.selector.matches(g))
                .map(|g| {
                    let pos = g.positions().cloned().unwrap_or_default();
                    let vel = g.get_varying("velocity").ok().and_then(|f| f.as_real_vector().ok()).cloned().unwrap_or_default();
                    let mass = g.get_varying("mass").ok().and_then(|f| f.as_real_scalar().ok()).cloned().unwrap_or_default();
                    let rho = g.get_varying("density").ok().and_then(|f| f.as_real_scalar().ok()).cloned().unwrap_or_default();
                    (g.group_index(), pos, vel, mass, rho)
                })
                .collect();

            let vorticity: Vec<Vector<R, 3>> = (0..n)
                .into_par_iter()
                .map(|i| {
                    let cell = self.scratch.get_or(|| RefCell::new(NeighborScratch::default()));
                    let mut scratch = cell.borrow_mut();
                    if gather_neighbors(nhood, model, group_index, i, &mut scratch).is_err() {
                        return zeros_vec();
                    }
                    let mut w: Vector<R, 3> = zeros_vec();
                    for (ng, pos_n, vel_n, mass_n, rho_n) in &neighbor_data {
                        for &j in scratch.of_group(*ng) {
                            if *ng == group_index && j == i {
                                continue;
                            }
                            let x_ij = positions[i] - pos_n[j];
                            let v_ji = vel_n[j] - velocities[i];
                            let grad = kernel_gradient_h(&x_ij, h).unwrap_or_else(|_| zeros_vec());
                            let weight = mass_n[j] / rho_n[j].max(R::default_epsilon());
                            if let Ok(curl) = cross(&v_ji, &grad) {
                                w += curl * weight;
                            }
                        }
                    }
                    w
                })
                .collect();

            let group = model.get_group_by_index_mut(group_index).unwrap();
            group.get_varying_mut("vorticity")?.as_real_vector_mut()?.copy_from_slice(&vorticity);
            group.get_varying_mut("vorticity_rhs")?.as_real_vector_mut()?.copy_from_slice(&vorticity);
        }
        Ok(())
    }

    /// Builds the `(diagonal, weights)` pair shared by all three axes of
    /// group `group_index`'s vorticity-diffusion system:
    /// `diagonal[f] = 1 + nu*dt * sum_f' w(f,f')`,
    /// `weights[f] = [(f', w(f,f'))]`, `w(f,f') = nu*dt*(m[f']/rho[f'])*W(x_ff', h)`,
    /// so that `(A x)[f] = diagonal[f]*x[f] - sum_f' w(f,f')*x[f']` is exactly
    /// `(I - nu*dt*L) x` for the graph Laplacian `L` over same-group neighbors.
    pub(crate) fn prepare_group<R: Real, I: Index>(
        &self,
        model: &Model<R, I, 3>,
        nhood: &NeighborIndex<R, 3>,
        h: R,
        dt: R,
        group_index: usize,
    ) -> Result<GroupSystem<R>, ModelError> {
        let group = model.get_group_by_index(group_index).unwrap();
        let positions = group.positions().cloned().unwrap_or_default();
        let masses = group.get_varying("mass")?.as_real_scalar()?.clone();
        let densities = group.get_varying("density")?.as_real_scalar()?.clone();
        let rest_density = group.get_uniform("rest_density")?.as_real_scalar()?[0];
        let nu = group.get_uniform("vorticity_viscosity")?.as_real_scalar()?[0];
        let tolerance = group.get_uniform("vorticity_diffusion_max_error")?.as_real_scalar()?[0];
        let max_iterations = group.get_uniform("vorticity_diffusion_max_iterations")?.as_integer_scalar()?[0].to_u32().unwrap_or(0);
        let rhs = group.get_varying("vorticity_rhs")?.as_real_vector()?.clone();

        let n = positions.len();
        let mut diagonal = vec![R::one(); n];
        let mut weights: Vec<Vec<(usize, R)>> = vec![Vec::new(); n];
        for i in 0..n {
            let cell = self.scratch.get_or(|| RefCell::new(NeighborScratch::default()));
            let mut scratch = cell.borrow_mut();
            if gather_neighbors(nhood, model, group_index, i, &mut scratch).is_err() {
                continue;
            }
            let mut diag = R::one();
            for &j in scratch.of_group(group_index) {
                if j == i {
                    continue;
                }
                let x_ij = positions[i] - positions[j];
                let w_ij = kernel_h(&x_ij, h).unwrap_or(R::zero());
                let weight = nu * dt * (masses[j] / densities[j].max(R::default_epsilon())) * w_ij;
                diag += weight;
                weights[i].push((j, weight));
            }
            diagonal[i] = diag;
        }

        Ok(GroupSystem { diagonal, weights, rhs, rest_density, tolerance, max_iterations })
    }
}

impl Default for ImplicitViscosityScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Real, I: Index> Scheme<R, I, 3> for ImplicitViscosityScheme {
    fn require(&mut self, model: &mut Model<R, I, 3>) -> Result<(), ModelError> {
        crate::scheme::require_on_matching(model, &self.selector, |g| {
            g.add_varying("position", real_vector)?;
            g.add_varying("velocity", real_vector)?;
            g.add_varying("mass", real_scalar)?;
            g.add_varying("density", real_scalar)?;
            g.add_varying("vorticity", real_vector)?;
            g.add_varying("vorticity_rhs", real_vector)?;
            g.add_uniform("rest_density", real_scalar)?;
            g.add_uniform("vorticity_viscosity", real_scalar)?;
            g.add_uniform("vorticity_diffusion_max_error", real_scalar)?;
            g.add_uniform("vorticity_diffusion_max_iterations", integer_scalar)?;
            Ok(())
        })
    }

    fn load(&mut self, model: &Model<R, I, 3>) {
        self.active_groups = select_active_groups(model, &self.selector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::from_array;

    #[test]
    fn swirling_pair_develops_nonzero_vorticity() {
        let h = 0.025_f64;
        let mut model: Model<f64, i32, 3> = Model::new();
        model.add_group("fluid", "fluid").unwrap();
        let mut scheme = ImplicitViscosityScheme::new();
        scheme.require(&mut model).unwrap();
        {
            let g = model.get_group_mut("fluid").unwrap();
            g.get_uniform_mut("rest_density").unwrap().as_real_scalar_mut().unwrap()[0] = 1000.0;
            g.get_uniform_mut("vorticity_viscosity").unwrap().as_real_scalar_mut().unwrap()[0] = 0.01;
            g.get_uniform_mut("vorticity_diffusion_max_error").unwrap().as_real_scalar_mut().unwrap()[0] = 1.0;
            g.get_uniform_mut("vorticity_diffusion_max_iterations").unwrap().as_integer_scalar_mut().unwrap()[0] = 50;
            g.create_items(2);
            let pos = g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap();
            pos[0] = from_array([0.0, 0.0, 0.0]);
            pos[1] = from_array([0.02, 0.0, 0.0]);
            let vel = g.get_varying_mut("velocity").unwrap().as_real_vector_mut().unwrap();
            vel[0] = from_array([0.0, 1.0, 0.0]);
            vel[1] = from_array([0.0, -1.0, 0.0]);
            g.get_varying_mut("mass").unwrap().as_real_scalar_mut().unwrap().fill(h.powi(3) * 1000.0);
            g.get_varying_mut("density").unwrap().as_real_scalar_mut().unwrap().fill(1000.0);
        }
        scheme.load(&model);
        let mut nh: NeighborIndex<f64, 3> = NeighborIndex::new();
        nh.set_radius(2.0 * h).unwrap();
        nh.load(&model).unwrap();
        nh.update(&model);

        scheme.compute_vorticity(&mut model, &nh, h).unwrap();
        let vorticity = model.get_group("fluid").unwrap().get_varying("vorticity").unwrap().as_real_vector().unwrap();
        assert!(vorticity[0][2].abs() > 0.0 || vorticity[1][2].abs() > 0.0, "counter-moving pair should curl around z");
    }
}
