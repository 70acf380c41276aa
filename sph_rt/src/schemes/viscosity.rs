//! `viscosity.accumulate_acceleration`: the AAT13-family explicit
//! artificial viscosity (Monaghan-form) contribution to fluid acceleration,
//! added on top of whatever `gravity.initialize_acceleration` already wrote.

use crate::error::ModelError;
use crate::kernel::kernel_gradient_h;
use crate::model::{real_scalar, real_vector, Model};
use crate::neighborhood::NeighborIndex;
use crate::numeric::{Index, Real};
use crate::scheme::{gather_neighbors, select_active_groups, GroupSelector, NeighborScratch, Scheme, ScratchPool};
use rayon::prelude::*;
use std::cell::RefCell;

pub struct ViscosityScheme {
    selector: GroupSelector,
    active_groups: Vec<usize>,
    scratch: ScratchPool,
}

impl ViscosityScheme {
    pub fn new() -> Self {
        ViscosityScheme { selector: GroupSelector::new("fluid"), active_groups: Vec::new(), scratch: ScratchPool::new() }
    }

    /// Monaghan artificial viscosity: for each ordered fluid pair `(f, f')`
    /// with `v_ff' . x_ff' < 0`,
    /// `Pi = -alpha * c * mu / rho_bar`, `mu = h * v_ff'.x_ff' / (|x_ff'|^2 + 0.01h^2)`,
    /// accumulated as `a[f] -= m[f'] * Pi * grad_W(x_ff', h)`.
    pub fn accumulate_acceleration<R: Real, I: Index>(
        &self,
        model: &mut Model<R, I, 3>,
        nhood: &NeighborIndex<R, 3>,
        h: R,
    ) -> Result<(), ModelError> {
        let eps = R::from_f64(0.01).unwrap() * h * h;
        for &group_index in &self.active_groups {
            let group = model.get_group_by_index(group_index).unwrap();
            let positions = group.positions().cloned().unwrap_or_default();
            let velocities = group.get_varying("velocity")?.as_real_vector()?.clone();
            let own_density = group.get_varying("density")?.as_real_scalar()?.clone();
            let alpha = group.get_uniform("viscosity")?.as_real_scalar()?[0];
            let speed_of_sound = group.get_uniform("speed_of_sound")?.as_real_scalar()?[0];

            let neighbor_data: Vec<(usize, Vec<crate::tensor::Vector<R, 3>>, Vec<crate::tensor::Vector<R, 3>>, Vec<R>, Vec<R>)> = model
                .groups()
                .filter(|g| self.selector.matches(g))
                .map(|g| {
                    let pos = g.positions().cloned().unwrap_or_default();
                    let vel = g.get_varying("velocity").and_then(|f| f.as_real_vector().cloned().map_err(Into::into)).unwrap_or_default();
                    let mass = g.get_varying("mass").and_then(|f| f.as_real_scalar().cloned().map_err(Into::into)).unwrap_or_default();
                    let rho = g.get_varying("density").and_then(|f| f.as_real_scalar().cloned().map_err(Into::into)).unwrap_or_default();
                    (g.group_index(), pos, vel, mass, rho)
                })
                .collect();

            let contributions: Vec<crate::tensor::Vector<R, 3>> = (0..positions.len())
                .into_par_iter()
                .map(|i| {
                    let cell = self.scratch.get_or(|| RefCell::new(NeighborScratch::default()));
                    let mut scratch = cell.borrow_mut();
                    if gather_neighbors(nhood, model, group_index, i, &mut scratch).is_err() {
                        return crate::tensor::zeros_vec();
                    }
                    let mut acc = crate::tensor::zeros_vec();
                    for (ng, pos_n, vel_n, mass_n, rho_n) in &neighbor_data {
                        for &j in scratch.of_group(*ng) {
                            let x_ij = positions[i] - pos_n[j];
                            let v_ij = velocities[i] - vel_n[j];
                            let dot = v_ij.dot(&x_ij);
                            if dot >= R::zero() {
                                continue;
                            }
                            let mu = h * dot / (x_ij.norm_squared() + eps);
                            let rho_bar = (own_density[i] + rho_n[j]) / R::from_f64(2.0).unwrap();
                            let pi = -alpha * speed_of_sound * mu / rho_bar.max(R::default_epsilon());
                            let grad = kernel_gradient_h(&x_ij, h).unwrap_or_else(|_| crate::tensor::zeros_vec());
                            acc -= grad * (mass_n[j] * pi);
                        }
                    }
                    acc
                })
                .collect();

            let group = model.get_group_by_index_mut(group_index).unwrap();
            let acceleration = group.get_varying_mut("acceleration")?.as_real_vector_mut()?;
            for (slot, c) in acceleration.iter_mut().zip(contributions.iter()) {
                *slot += *c;
            }
        }
        Ok(())
    }
}

impl Default for ViscosityScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Real, I: Index> Scheme<R, I, 3> for ViscosityScheme {
    fn require(&mut self, model: &mut Model<R, I, 3>) -> Result<(), ModelError> {
        crate::scheme::require_on_matching(model, &self.selector, |g| {
            g.add_varying("position", real_vector)?;
            g.add_varying("velocity", real_vector)?;
            g.add_varying("mass", real_scalar)?;
            g.add_varying("density", real_scalar)?;
            g.add_varying("acceleration", real_vector)?;
            g.add_uniform("viscosity", real_scalar)?;
            g.add_uniform("speed_of_sound", real_scalar)?;
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
    fn approaching_particles_get_damped() {
        let h = 0.025_f64;
        let mut model: Model<f64, i32, 3> = Model::new();
        model.add_group("fluid", "fluid").unwrap();
        let mut scheme = ViscosityScheme::new();
        scheme.require(&mut model).unwrap();
        {
            let g = model.get_group_mut("fluid").unwrap();
            g.get_uniform_mut("viscosity").unwrap().as_real_scalar_mut().unwrap()[0] = 0.08;
            g.get_uniform_mut("speed_of_sound").unwrap().as_real_scalar_mut().unwrap()[0] = 30.0;
            g.create_items(2);
            let pos = g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap();
            pos[0] = from_array([0.0, 0.0, 0.0]);
            pos[1] = from_array([0.02, 0.0, 0.0]);
            let vel = g.get_varying_mut("velocity").unwrap().as_real_vector_mut().unwrap();
            vel[0] = from_array([1.0, 0.0, 0.0]);
            vel[1] = from_array([-1.0, 0.0, 0.0]);
            g.get_varying_mut("mass").unwrap().as_real_scalar_mut().unwrap().fill(h.powi(3) * 1000.0);
            g.get_varying_mut("density").unwrap().as_real_scalar_mut().unwrap().fill(1000.0);
        }
        scheme.load(&model);
        let mut nh: NeighborIndex<f64, 3> = NeighborIndex::new();
        nh.set_radius(2.0 * h).unwrap();
        nh.load(&model).unwrap();
        nh.update(&model);

        scheme.accumulate_acceleration(&mut model, &nh, h).unwrap();
        let acc = model.get_group("fluid").unwrap().get_varying("acceleration").unwrap().as_real_vector().unwrap();
        // particle 0 moves toward particle 1 and should be decelerated (negative x acceleration)
        assert!(acc[0][0] < 0.0);
        assert!(acc[1][0] > 0.0);
    }
}
