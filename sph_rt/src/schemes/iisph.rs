//! `iisph.{setup, iteration_pressure_acceleration, iteration_pressure}`
//!: the three scheme procedures the IISPH pressure solver
//! (`sph_rt::solvers::iisph`) drives each step. This module only implements
//! the per-particle math; the outer min/max-iteration, APRDE-convergence and
//! eligibility control flow lives in the solver module so it can be unit
//! tested independently of any one scheme wiring.

use crate::error::ModelError;
use crate::kernel::kernel_gradient_h;
use crate::model::{real_scalar, real_vector, Model};
use crate::neighborhood::NeighborIndex;
use crate::numeric::{Index, Real};
use crate::scheme::{gather_neighbors, select_active_groups, GroupSelector, NeighborScratch, Scheme, ScratchPool};
use crate::tensor::Vector;
use num::ToPrimitive;
use rayon::prelude::*;
use std::cell::RefCell;

pub struct IisphScheme {
    fluid: GroupSelector,
    boundary: GroupSelector,
    active_fluid: Vec<usize>,
    active_boundary: Vec<usize>,
    scratch: ScratchPool,
}

/// Read-only per-fluid-group snapshot reused across the three procedures in a
/// single solver iteration, avoiding repeated re-snapshotting of immutable
/// neighbor data inside a `rayon` parallel region.
struct FluidSnapshot<R: Real> {
    group_index: usize,
    positions: Vec<Vector<R, 3>>,
    velocities: Vec<Vector<R, 3>>,
    masses: Vec<R>,
    densities: Vec<R>,
    rest_density: R,
}

struct BoundarySnapshot<R: Real> {
    group_index: usize,
    positions: Vec<Vector<R, 3>>,
    volumes: Vec<R>,
}

impl IisphScheme {
    pub fn new() -> Self {
        IisphScheme {
            fluid: GroupSelector::new("fluid"),
            boundary: GroupSelector::new("boundary"),
            active_fluid: Vec::new(),
            active_boundary: Vec::new(),
            scratch: ScratchPool::new(),
        }
    }

    fn snapshot_fluids<R: Real, I: Index>(&self, model: &Model<R, I, 3>) -> Vec<FluidSnapshot<R>> {
        self.active_fluid
            .iter()
            .map(|&gi| {
                let g = model.get_group_by_index(gi).unwrap();
                FluidSnapshot {
                    group_index: gi,
                    positions: g.positions().cloned().unwrap_or_default(),
                    velocities: g.get_varying("velocity").and_then(|f| f.as_real_vector().cloned().map_err(Into::into)).unwrap_or_default(),
                    masses: g.get_varying("mass").and_then(|f| f.as_real_scalar().cloned().map_err(Into::into)).unwrap_or_default(),
                    densities: g.get_varying("density").and_then(|f| f.as_real_scalar().cloned().map_err(Into::into)).unwrap_or_default(),
                    rest_density: g.get_uniform("rest_density").and_then(|f| f.as_real_scalar().map(|v| v[0]).map_err(Into::into)).unwrap_or_else(|_: ModelError| R::one()),
                }
            })
            .collect()
    }

    fn snapshot_boundaries<R: Real, I: Index>(&self, model: &Model<R, I, 3>) -> Vec<BoundarySnapshot<R>> {
        self.active_boundary
            .iter()
            .map(|&gi| {
                let g = model.get_group_by_index(gi).unwrap();
                BoundarySnapshot {
                    group_index: gi,
                    positions: g.positions().cloned().unwrap_or_default(),
                    volumes: g.get_varying("volume").and_then(|f| f.as_real_scalar().cloned().map_err(Into::into)).unwrap_or_default(),
                }
            })
            .collect()
    }

    /// `source_term[f] = rest_density - advected_density[f]`, where
    /// `advected_density` is extrapolated one `dt` forward along the current
    /// (pre-pressure) velocity; also primes `d_ii[f]` (this particle's own
    /// pressure-gradient sensitivity) and warm-starts `pressure[f]` by
    /// clamping the previous step's value to `>= 0`.
    pub fn setup<R: Real, I: Index>(
        &self,
        model: &mut Model<R, I, 3>,
        nhood: &NeighborIndex<R, 3>,
        h: R,
        dt: R,
    ) -> Result<(), ModelError> {
        let fluids = self.snapshot_fluids(model);
        let boundaries = self.snapshot_boundaries(model);

        for fs in &fluids {
            let results: Vec<(R, Vector<R, 3>)> = (0..fs.positions.len())
                .into_par_iter()
                .map(|i| {
                    let cell = self.scratch.get_or(|| RefCell::new(NeighborScratch::default()));
                    let mut scratch = cell.borrow_mut();
                    if gather_neighbors(nhood, model, fs.group_index, i, &mut scratch).is_err() {
                        return (fs.densities[i], crate::tensor::zeros_vec());
                    }
                    let mut advected = fs.densities[i];
                    let mut d_ii = crate::tensor::zeros_vec::<R, 3>();
                    for other in &fluids {
                        for &j in scratch.of_group(other.group_index) {
                            if other.group_index == fs.group_index && j == i {
                                continue;
                            }
                            let dx = fs.positions[i] - other.positions[j];
                            let grad = kernel_gradient_h(&dx, h).unwrap_or_else(|_| crate::tensor::zeros_vec());
                            let v_ij = fs.velocities[i] - other.velocities[j];
                            advected += dt * other.masses[j] * v_ij.dot(&grad);
                            d_ii -= grad * (dt * dt * other.masses[j] / (fs.densities[i] * fs.densities[i]).max(R::default_epsilon()));
                        }
                    }
                    for b in &boundaries {
                        for &j in scratch.of_group(b.group_index) {
                            let dx = fs.positions[i] - b.positions[j];
                            let grad = kernel_gradient_h(&dx, h).unwrap_or_else(|_| crate::tensor::zeros_vec());
                            let mass_b = b.volumes[j] * fs.rest_density;
                            advected += dt * mass_b * fs.velocities[i].dot(&grad);
                            d_ii -= grad * (dt * dt * mass_b / (fs.densities[i] * fs.densities[i]).max(R::default_epsilon()));
                        }
                    }
                    (advected, d_ii)
                })
                .collect();

            let group = model.get_group_by_index_mut(fs.group_index).unwrap();
            let advected_field = group.get_varying_mut("advected_density")?.as_real_scalar_mut()?;
            for (slot, (adv, _)) in advected_field.iter_mut().zip(results.iter()) {
                *slot = *adv;
            }
            let d_ii_field = group.get_varying_mut("d_ii")?.as_real_vector_mut()?;
            for (slot, (_, d)) in d_ii_field.iter_mut().zip(results.iter()) {
                *slot = *d;
            }
            let source_term = group.get_varying_mut("source_term")?.as_real_scalar_mut()?;
            for (slot, (adv, _)) in source_term.iter_mut().zip(results.iter()) {
                *slot = fs.rest_density - *adv;
            }
            let pressure = group.get_varying_mut("pressure")?.as_real_scalar_mut()?;
            for p in pressure.iter_mut() {
                if *p < R::zero() {
                    *p = R::zero();
                }
            }
        }

        // Second pass: the diagonal coefficient needs every particle's `d_ii`,
        // so it must run after the loop above has fully populated them.
        let fluids = self.snapshot_fluids(model);
        for fs in &fluids {
            let group_d_ii: Vec<Vector<R, 3>> = model.get_group_by_index(fs.group_index).unwrap().get_varying("d_ii")?.as_real_vector()?.clone();
            let other_d_ii: Vec<(usize, Vec<Vector<R, 3>>)> = self
                .active_fluid
                .iter()
                .map(|&gi| (gi, model.get_group_by_index(gi).unwrap().get_varying("d_ii").unwrap().as_real_vector().unwrap().clone()))
                .collect();

            let diagonals: Vec<R> = (0..fs.positions.len())
                .into_par_iter()
                .map(|i| {
                    let cell = self.scratch.get_or(|| RefCell::new(NeighborScratch::default()));
                    let mut scratch = cell.borrow_mut();
                    if gather_neighbors(nhood, model, fs.group_index, i, &mut scratch).is_err() {
                        return R::zero();
                    }
                    let mut a_ii = R::zero();
                    for other in &fluids {
                        let other_d = &other_d_ii.iter().find(|(gi, _)| *gi == other.group_index).unwrap().1;
                        for &j in scratch.of_group(other.group_index) {
                            if other.group_index == fs.group_index && j == i {
                                continue;
                            }
                            let dx = fs.positions[i] - other.positions[j];
                            let grad = kernel_gradient_h(&dx, h).unwrap_or_else(|_| crate::tensor::zeros_vec());
                            let d_ji = grad * (dt * dt * fs.masses[i] / (other.densities[j] * other.densities[j]).max(R::default_epsilon()));
                            a_ii += other.masses[j] * (group_d_ii[i] - d_ji).dot(&grad);
                        }
                    }
                    for b in &boundaries {
                        for &j in scratch.of_group(b.group_index) {
                            let dx = fs.positions[i] - b.positions[j];
                            let grad = kernel_gradient_h(&dx, h).unwrap_or_else(|_| crate::tensor::zeros_vec());
                            let mass_b = b.volumes[j] * fs.rest_density;
                            a_ii += mass_b * group_d_ii[i].dot(&grad);
                        }
                    }
                    a_ii
                })
                .collect();

            let group = model.get_group_by_index_mut(fs.group_index).unwrap();
            let diagonal = group.get_varying_mut("diagonal")?.as_real_scalar_mut()?;
            diagonal.clone_from_slice(&diagonals);
        }

        model.set_global_integer("iisph_nprde", I::zero())?;
        Ok(())
    }

    /// `pressure_acceleration[f] = -Σ_j m_j (p_f/ρ_f² + p_j/ρ_j²) ∇W_fj - Σ_b ρ₀ V_b (p_f/ρ_f²) ∇W_fb`.
    pub fn iteration_pressure_acceleration<R: Real, I: Index>(
        &self,
        model: &mut Model<R, I, 3>,
        nhood: &NeighborIndex<R, 3>,
        h: R,
    ) -> Result<(), ModelError> {
        let fluids = self.snapshot_fluids(model);
        let boundaries = self.snapshot_boundaries(model);
        let pressures: Vec<(usize, Vec<R>)> = self
            .active_fluid
            .iter()
            .map(|&gi| (gi, model.get_group_by_index(gi).unwrap().get_varying("pressure").unwrap().as_real_scalar().unwrap().clone()))
            .collect();
        let lookup_p = |gi: usize| pressures.iter().find(|(g, _)| *g == gi).map(|(_, v)| v).unwrap();

        for fs in &fluids {
            let own_pressure = lookup_p(fs.group_index);
            let results: Vec<Vector<R, 3>> = (0..fs.positions.len())
                .into_par_iter()
                .map(|i| {
                    let cell = self.scratch.get_or(|| RefCell::new(NeighborScratch::default()));
                    let mut scratch = cell.borrow_mut();
                    if gather_neighbors(nhood, model, fs.group_index, i, &mut scratch).is_err() {
                        return crate::tensor::zeros_vec();
                    }
                    let term_i = own_pressure[i] / (fs.densities[i] * fs.densities[i]).max(R::default_epsilon());
                    let mut acc = crate::tensor::zeros_vec::<R, 3>();
                    for other in &fluids {
                        let other_p = lookup_p(other.group_index);
                        for &j in scratch.of_group(other.group_index) {
                            if other.group_index == fs.group_index && j == i {
                                continue;
                            }
                            let dx = fs.positions[i] - other.positions[j];
                            let grad = kernel_gradient_h(&dx, h).unwrap_or_else(|_| crate::tensor::zeros_vec());
                            let term_j = other_p[j] / (other.densities[j] * other.densities[j]).max(R::default_epsilon());
                            acc -= grad * (other.masses[j] * (term_i + term_j));
                        }
                    }
                    for b in &boundaries {
                        for &j in scratch.of_group(b.group_index) {
                            let dx = fs.positions[i] - b.positions[j];
                            let grad = kernel_gradient_h(&dx, h).unwrap_or_else(|_| crate::tensor::zeros_vec());
                            let mass_b = b.volumes[j] * fs.rest_density;
                            acc -= grad * (mass_b * term_i);
                        }
                    }
                    acc
                })
                .collect();

            let group = model.get_group_by_index_mut(fs.group_index).unwrap();
            let field = group.get_varying_mut("pressure_acceleration")?.as_real_vector_mut()?;
            field.clone_from_slice(&results);
        }
        Ok(())
    }

    /// Relaxed-Jacobi pressure update; accumulates positive per-particle
    /// density errors into the global `iisph_aprde`/`iisph_nprde` reductions.
    pub fn iteration_pressure<R: Real, I: Index>(
        &self,
        model: &mut Model<R, I, 3>,
        nhood: &NeighborIndex<R, 3>,
        h: R,
        dt: R,
    ) -> Result<(), ModelError> {
        let omega = R::from_f64(0.5).unwrap();
        let fluids = self.snapshot_fluids(model);
        let boundaries = self.snapshot_boundaries(model);
        let accelerations: Vec<(usize, Vec<Vector<R, 3>>)> = self
            .active_fluid
            .iter()
            .map(|&gi| (gi, model.get_group_by_index(gi).unwrap().get_varying("pressure_acceleration").unwrap().as_real_vector().unwrap().clone()))
            .collect();
        let lookup_a = |gi: usize| accelerations.iter().find(|(g, _)| *g == gi).map(|(_, v)| v).unwrap();

        let mut total_aprde = R::zero();
        let mut total_nprde: i64 = 0;

        for fs in &fluids {
            let own_accel = lookup_a(fs.group_index);
            let group = model.get_group_by_index(fs.group_index).unwrap();
            let source_term = group.get_varying("source_term")?.as_real_scalar()?.clone();
            let diagonal = group.get_varying("diagonal")?.as_real_scalar()?.clone();
            let pressure = group.get_varying("pressure")?.as_real_scalar()?.clone();

            let results: Vec<(R, R)> = (0..fs.positions.len())
                .into_par_iter()
                .map(|i| {
                    let cell = self.scratch.get_or(|| RefCell::new(NeighborScratch::default()));
                    let mut scratch = cell.borrow_mut();
                    if gather_neighbors(nhood, model, fs.group_index, i, &mut scratch).is_err() {
                        return (pressure[i], R::zero());
                    }
                    let mut ap = R::zero();
                    for other in &fluids {
                        let other_accel = lookup_a(other.group_index);
                        for &j in scratch.of_group(other.group_index) {
                            if other.group_index == fs.group_index && j == i {
                                continue;
                            }
                            let dx = fs.positions[i] - other.positions[j];
                            let grad = kernel_gradient_h(&dx, h).unwrap_or_else(|_| crate::tensor::zeros_vec());
                            ap += dt * dt * other.masses[j] * (own_accel[i] - other_accel[j]).dot(&grad);
                        }
                    }
                    for b in &boundaries {
                        for &j in scratch.of_group(b.group_index) {
                            let dx = fs.positions[i] - b.positions[j];
                            let grad = kernel_gradient_h(&dx, h).unwrap_or_else(|_| crate::tensor::zeros_vec());
                            let mass_b = b.volumes[j] * fs.rest_density;
                            ap += dt * dt * mass_b * own_accel[i].dot(&grad);
                        }
                    }

                    let new_pressure = if diagonal[i].abs() > R::default_epsilon() {
                        let candidate = pressure[i] + omega * (source_term[i] - ap) / diagonal[i];
                        if candidate < R::zero() {
                            R::zero()
                        } else {
                            candidate
                        }
                    } else {
                        R::zero()
                    };

                    let density_error = ap - source_term[i];
                    let positive_error = if density_error > R::zero() { density_error } else { R::zero() };
                    (new_pressure, positive_error)
                })
                .collect();

            let group = model.get_group_by_index_mut(fs.group_index).unwrap();
            let pressure_field = group.get_varying_mut("pressure")?.as_real_scalar_mut()?;
            for (slot, (p, _)) in pressure_field.iter_mut().zip(results.iter()) {
                *slot = *p;
            }
            for (_, err) in &results {
                if *err > R::zero() {
                    total_aprde += *err;
                    total_nprde += 1;
                }
            }
        }

        let prior_aprde = model.global_real("iisph_aprde").unwrap_or_else(|_| R::zero());
        let prior_nprde = model.global_integer("iisph_nprde").and_then(|v| v.to_i64().ok_or_else(|| crate::error::ModelError::InvalidIdentifier("iisph_nprde".into()))).unwrap_or(0);
        model.set_global_real("iisph_aprde", prior_aprde + total_aprde)?;
        model.set_global_integer("iisph_nprde", I::from_i64(prior_nprde + total_nprde).unwrap_or_else(I::zero))?;
        Ok(())
    }

    pub fn active_fluid_groups(&self) -> &[usize] {
        &self.active_fluid
    }
}

impl Default for IisphScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Real, I: Index> Scheme<R, I, 3> for IisphScheme {
    fn require(&mut self, model: &mut Model<R, I, 3>) -> Result<(), ModelError> {
        crate::scheme::require_on_matching(model, &self.fluid, |g| {
            g.add_varying("position", real_vector)?;
            g.add_varying("velocity", real_vector)?;
            g.add_varying("mass", real_scalar)?;
            g.add_varying("density", real_scalar)?;
            g.add_varying("pressure", real_scalar)?;
            g.add_varying("source_term", real_scalar)?;
            g.add_varying("diagonal", real_scalar)?;
            g.add_varying("advected_density", real_scalar)?;
            g.add_varying("d_ii", real_vector)?;
            g.add_varying("pressure_acceleration", real_vector)?;
            g.add_uniform("rest_density", real_scalar)?;
            Ok(())
        })?;
        crate::scheme::require_on_matching(model, &self.boundary, |g| {
            g.add_varying("position", real_vector)?;
            g.add_varying("volume", real_scalar)?;
            Ok(())
        })?;
        model.add_global("iisph_aprde", real_scalar)?;
        model.add_global("iisph_nprde", crate::model::integer_scalar)
    }

    fn load(&mut self, model: &Model<R, I, 3>) {
        self.active_fluid = select_active_groups(model, &self.fluid);
        self.active_boundary = select_active_groups(model, &self.boundary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::from_array;

    fn two_particle_model() -> (Model<f64, i32, 3>, IisphScheme, NeighborIndex<f64, 3>) {
        let h = 0.025_f64;
        let mut model: Model<f64, i32, 3> = Model::new();
        let mut scheme = IisphScheme::new();
        model.add_group("fluid", "fluid").unwrap();
        scheme.require(&mut model).unwrap();
        {
            let g = model.get_group_mut("fluid").unwrap();
            g.get_uniform_mut("rest_density").unwrap().as_real_scalar_mut().unwrap()[0] = 1000.0;
            g.create_items(2);
            let pos = g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap();
            pos[0] = from_array([0.0, 0.0, 0.0]);
            pos[1] = from_array([0.02, 0.0, 0.0]);
            g.get_varying_mut("mass").unwrap().as_real_scalar_mut().unwrap().fill(h.powi(3) * 1000.0);
            g.get_varying_mut("density").unwrap().as_real_scalar_mut().unwrap().fill(1100.0); // above rest: eligible
        }
        scheme.load(&model);
        let mut nh: NeighborIndex<f64, 3> = NeighborIndex::new();
        nh.set_radius(2.0 * h).unwrap();
        nh.load(&model).unwrap();
        nh.update(&model);
        (model, scheme, nh)
    }

    #[test]
    fn setup_then_one_iteration_runs_without_error() {
        let (mut model, scheme, nh) = two_particle_model();
        let h = 0.025;
        let dt = 0.0005;
        scheme.setup(&mut model, &nh, h, dt).unwrap();
        scheme.iteration_pressure_acceleration(&mut model, &nh, h).unwrap();
        scheme.iteration_pressure(&mut model, &nh, h, dt).unwrap();
        let nprde = model.global_integer("iisph_nprde").unwrap();
        assert!(nprde >= 0);
    }

    #[test]
    fn warm_started_negative_pressure_is_clamped() {
        let (mut model, scheme, nh) = two_particle_model();
        model.get_group_mut("fluid").unwrap().get_varying_mut("pressure").unwrap().as_real_scalar_mut().unwrap().fill(-5.0);
        scheme.setup(&mut model, &nh, 0.025, 0.0005).unwrap();
        let pressure = model.get_group("fluid").unwrap().get_varying("pressure").unwrap().as_real_scalar().unwrap();
        assert!(pressure.iter().all(|&p| p >= 0.0));
    }
}
