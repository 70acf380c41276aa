//! `surface_tension.accumulate_acceleration`: He14-family cohesion +
//! curvature surface tension, a supplemental scheme gated by the presence of a
//! group's `surface_tension` uniform (see `SPEC_FULL.md`). Builds on the same
//! Akinci-style cohesion kernel the boundary/density schemes already use for
//! `W`, but with its own normalized cubic-spline-derived cohesion kernel `C`.
//!
//! Runs in two passes per step: `compute_normal` (color-field gradient,
//! normalized) then `accumulate_acceleration` (cohesion pulls particles
//! together along the line of centers; curvature pushes along the normal
//! difference, flattening the surface).

use crate::error::ModelError;
use crate::kernel::kernel_support_radius;
use crate::model::{real_scalar, real_vector, Model};
use crate::neighborhood::NeighborIndex;
use crate::numeric::{Index, Real};
use crate::scheme::{gather_neighbors, select_active_groups, GroupSelector, NeighborScratch, Scheme, ScratchPool};
use crate::tensor::Vector;
use rayon::prelude::*;
use std::cell::RefCell;

/// Akinci (2013) cohesion spline, `C(r)` on `[0, h_support]`, zero at both
/// ends and at `r=0`, peaked near `h_support/2`.
fn cohesion_kernel<R: Real>(r: R, h_support: R) -> R {
    if r <= R::zero() || r > h_support {
        return R::zero();
    }
    let sigma = R::from_f64(32.0).unwrap() / (R::pi() * h_support.powi(9));
    let half = h_support / R::from_f64(2.0).unwrap();
    let term_cubed = (h_support - r).powi(3);
    let r_cubed = r.powi(3);
    let base = if r > half {
        term_cubed * r_cubed
    } else {
        R::from_f64(2.0).unwrap() * term_cubed * r_cubed - h_support.powi(6) / R::from_f64(64.0).unwrap()
    };
    sigma * base
}

pub struct SurfaceTensionScheme {
    selector: GroupSelector,
    active_groups: Vec<usize>,
    scratch: ScratchPool,
}

impl SurfaceTensionScheme {
    pub fn new() -> Self {
        SurfaceTensionScheme { selector: GroupSelector::new("fluid").with_tag("surface_tension"), active_groups: Vec::new(), scratch: ScratchPool::new() }
    }

    /// Color-field gradient `n[f] = h * Σ_{f'} (m[f']/rho[f']) grad_W(x_ff', h)`, normalized.
    pub fn compute_normal<R: Real, I: Index>(
        &self,
        model: &mut Model<R, I, 3>,
        nhood: &NeighborIndex<R, 3>,
        h: R,
    ) -> Result<(), ModelError> {
        for &group_index in &self.active_groups {
            let group = model.get_group_by_index(group_index).unwrap();
            let positions = group.positions().cloned().unwrap_or_default();
            let masses = group.get_varying("mass")?.as_real_scalar()?.clone();
            let densities = group.get_varying("density")?.as_real_scalar()?.clone();

            let normals: Vec<Vector<R, 3>> = (0..positions.len())
                .into_par_iter()
                .map(|i| {
                    let cell = self.scratch.get_or(|| RefCell::new(NeighborScratch::default()));
                    let mut scratch = cell.borrow_mut();
                    if gather_neighbors(nhood, model, group_index, i, &mut scratch).is_err() {
                        return crate::tensor::zeros_vec();
                    }
                    let mut grad = crate::tensor::zeros_vec::<R, 3>();
                    for &j in scratch.of_group(group_index) {
                        if j == i {
                            continue;
                        }
                        let x_ij = positions[i] - positions[j];
                        let w_grad = crate::kernel::kernel_gradient_h(&x_ij, h).unwrap_or_else(|_| crate::tensor::zeros_vec());
                        let weight = masses[j] / densities[j].max(R::default_epsilon());
                        grad += w_grad * weight;
                    }
                    grad * h
                })
                .collect();

            let group = model.get_group_by_index_mut(group_index).unwrap();
            let stored = group.get_varying_mut("surface_normal")?.as_real_vector_mut()?;
            stored.clone_from_slice(&normals);
        }
        Ok(())
    }

    pub fn accumulate_acceleration<R: Real, I: Index>(
        &self,
        model: &mut Model<R, I, 3>,
        nhood: &NeighborIndex<R, 3>,
        h: R,
    ) -> Result<(), ModelError> {
        let h_support = kernel_support_radius(h);
        for &group_index in &self.active_groups {
            let group = model.get_group_by_index(group_index).unwrap();
            let positions = group.positions().cloned().unwrap_or_default();
            let masses = group.get_varying("mass")?.as_real_scalar()?.clone();
            let densities = group.get_varying("density")?.as_real_scalar()?.clone();
            let normals = group.get_varying("surface_normal")?.as_real_vector()?.clone();
            let sigma = group.get_uniform("surface_tension")?.as_real_scalar()?[0];

            let contributions: Vec<Vector<R, 3>> = (0..positions.len())
                .into_par_iter()
                .map(|i| {
                    let cell = self.scratch.get_or(|| RefCell::new(NeighborScratch::default()));
                    let mut scratch = cell.borrow_mut();
                    if gather_neighbors(nhood, model, group_index, i, &mut scratch).is_err() {
                        return crate::tensor::zeros_vec();
                    }
                    let mut acc = crate::tensor::zeros_vec::<R, 3>();
                    for &j in scratch.of_group(group_index) {
                        if j == i {
                            continue;
                        }
                        let x_ij = positions[i] - positions[j];
                        let r = x_ij.norm();
                        if r <= R::default_epsilon() {
                            continue;
                        }
                        let rho_bar = (densities[i] + densities[j]) / R::from_f64(2.0).unwrap();
                        let correction = R::from_f64(2.0).unwrap() * densities[i] / rho_bar.max(R::default_epsilon());

                        let cohesion_dir = x_ij / r;
                        let cohesion = cohesion_kernel(r, h_support) * masses[j] * cohesion_dir;
                        let curvature = normals[i] - normals[j];

                        acc -= (cohesion + curvature) * (sigma * correction);
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

impl Default for SurfaceTensionScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Real, I: Index> Scheme<R, I, 3> for SurfaceTensionScheme {
    fn require(&mut self, model: &mut Model<R, I, 3>) -> Result<(), ModelError> {
        crate::scheme::require_on_matching(model, &self.selector, |g| {
            g.add_varying("position", real_vector)?;
            g.add_varying("mass", real_scalar)?;
            g.add_varying("density", real_scalar)?;
            g.add_varying("acceleration", real_vector)?;
            g.add_varying("surface_normal", real_vector)?;
            g.add_uniform("surface_tension", real_scalar)?;
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
    fn pair_is_pulled_together() {
        let h = 0.025_f64;
        let mut model: Model<f64, i32, 3> = Model::new();
        model.add_group("fluid", "fluid").unwrap();
        model.get_group_mut("fluid").unwrap().add_tag("surface_tension");
        let mut scheme = SurfaceTensionScheme::new();
        scheme.require(&mut model).unwrap();
        {
            let g = model.get_group_mut("fluid").unwrap();
            g.get_uniform_mut("surface_tension").unwrap().as_real_scalar_mut().unwrap()[0] = 0.5;
            g.create_items(2);
            let pos = g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap();
            pos[0] = from_array([0.0, 0.0, 0.0]);
            pos[1] = from_array([0.03, 0.0, 0.0]);
            g.get_varying_mut("mass").unwrap().as_real_scalar_mut().unwrap().fill(h.powi(3) * 1000.0);
            g.get_varying_mut("density").unwrap().as_real_scalar_mut().unwrap().fill(1000.0);
        }
        scheme.load(&model);
        let mut nh: NeighborIndex<f64, 3> = NeighborIndex::new();
        nh.set_radius(2.0 * h).unwrap();
        nh.load(&model).unwrap();
        nh.update(&model);

        scheme.compute_normal(&mut model, &nh, h).unwrap();
        scheme.accumulate_acceleration(&mut model, &nh, h).unwrap();
        let acc = model.get_group("fluid").unwrap().get_varying("acceleration").unwrap().as_real_vector().unwrap();
        // cohesion should pull particle 0 toward particle 1 (positive x) when
        // separation is within the cohesion kernel's support.
        assert!(acc[0][0] >= 0.0);
    }
}
