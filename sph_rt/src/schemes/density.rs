//! `density.compute_density`: per-fluid-particle density from both the
//! fluid and boundary neighborhoods, using the boundary volume computed by
//! [`crate::schemes::boundary`] as a stand-in boundary mass.

use crate::error::ModelError;
use crate::kernel::kernel_h;
use crate::model::{real_scalar, real_vector, Model};
use crate::neighborhood::NeighborIndex;
use crate::numeric::{Index, Real};
use crate::scheme::{gather_neighbors, select_active_groups, GroupSelector, NeighborScratch, Scheme, ScratchPool};
use rayon::prelude::*;
use std::cell::RefCell;

pub struct DensityScheme {
    fluid: GroupSelector,
    boundary: GroupSelector,
    active_fluid: Vec<usize>,
    active_boundary: Vec<usize>,
    scratch: ScratchPool,
}

impl DensityScheme {
    pub fn new() -> Self {
        DensityScheme {
            fluid: GroupSelector::new("fluid"),
            boundary: GroupSelector::new("boundary"),
            active_fluid: Vec::new(),
            active_boundary: Vec::new(),
            scratch: ScratchPool::new(),
        }
    }

    /// `ρ[f] = Σ_{f' in fluid} m[f'] W(...) + Σ_{b in boundary} V[b] ρ0[f] W(...)`.
    pub fn compute_density<R: Real, I: Index>(
        &self,
        model: &mut Model<R, I, 3>,
        nhood: &NeighborIndex<R, 3>,
        h: R,
    ) -> Result<(), ModelError> {
        for &group_index in &self.active_fluid {
            let group = model.get_group_by_index(group_index).unwrap();
            let positions = group.positions().cloned().unwrap_or_default();
            let rest_density = group.get_uniform("rest_density")?.as_real_scalar()?[0];

            let masses_by_group: Vec<(usize, Vec<R>)> = model
                .groups()
                .filter(|g| self.fluid.matches(g))
                .map(|g| (g.group_index(), g.get_varying("mass").map(|f| f.as_real_scalar().cloned()).ok().flatten().unwrap_or_default()))
                .collect();
            let positions_by_group: Vec<(usize, Vec<crate::tensor::Vector<R, 3>>)> = model
                .groups()
                .map(|g| (g.group_index(), g.positions().cloned().unwrap_or_default()))
                .collect();
            let volumes_by_group: Vec<(usize, Vec<R>)> = model
                .groups()
                .filter(|g| self.boundary.matches(g))
                .map(|g| (g.group_index(), g.get_varying("volume").map(|f| f.as_real_scalar().cloned()).ok().flatten().unwrap_or_default()))
                .collect();

            let lookup = |table: &[(usize, Vec<R>)], idx: usize| table.iter().find(|(gi, _)| *gi == idx).map(|(_, v)| v);
            let lookup_pos = |table: &[(usize, Vec<crate::tensor::Vector<R, 3>>)], idx: usize| {
                table.iter().find(|(gi, _)| *gi == idx).map(|(_, v)| v)
            };

            let densities: Vec<R> = (0..positions.len())
                .into_par_iter()
                .map(|i| {
                    let cell = self.scratch.get_or(|| RefCell::new(NeighborScratch::default()));
                    let mut scratch = cell.borrow_mut();
                    if gather_neighbors(nhood, model, group_index, i, &mut scratch).is_err() {
                        return R::zero();
                    }
                    let mut rho = R::zero();
                    for &fg in &self.active_fluid {
                        let Some(masses) = lookup(&masses_by_group, fg) else { continue };
                        let Some(positions_n) = lookup_pos(&positions_by_group, fg) else { continue };
                        for &j in scratch.of_group(fg) {
                            let dx = positions[i] - positions_n[j];
                            rho += masses[j] * kernel_h(&dx, h).unwrap_or_else(|_| R::zero());
                        }
                    }
                    for &bg in &self.active_boundary {
                        let Some(volumes) = lookup(&volumes_by_group, bg) else { continue };
                        let Some(positions_n) = lookup_pos(&positions_by_group, bg) else { continue };
                        for &j in scratch.of_group(bg) {
                            let dx = positions[i] - positions_n[j];
                            rho += volumes[j] * rest_density * kernel_h(&dx, h).unwrap_or_else(|_| R::zero());
                        }
                    }
                    rho
                })
                .collect();

            let group = model.get_group_by_index_mut(group_index).unwrap();
            let stored = group.get_varying_mut("density")?.as_real_scalar_mut()?;
            stored.clone_from_slice(&densities);
        }
        Ok(())
    }
}

impl Default for DensityScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Real, I: Index> Scheme<R, I, 3> for DensityScheme {
    fn require(&mut self, model: &mut Model<R, I, 3>) -> Result<(), ModelError> {
        crate::scheme::require_on_matching(model, &self.fluid, |g| {
            g.add_varying("position", real_vector)?;
            g.add_varying("mass", real_scalar)?;
            g.add_varying("density", real_scalar)?;
            g.add_uniform("rest_density", real_scalar)?;
            Ok(())
        })?;
        crate::scheme::require_on_matching(model, &self.boundary, |g| {
            g.add_varying("position", real_vector)?;
            g.add_varying("volume", real_scalar)?;
            Ok(())
        })
    }

    fn load(&mut self, model: &Model<R, I, 3>) {
        self.active_fluid = select_active_groups(model, &self.fluid);
        self.active_boundary = select_active_groups(model, &self.boundary);
    }
}
