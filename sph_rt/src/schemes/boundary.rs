//! `boundary.compute_volume`: static boundary particles get a one-time
//! (or per-permute) volume estimate from their own neighbor density, used by
//! fluid schemes as a Akinci-style boundary mass substitute.

use crate::error::ModelError;
use crate::kernel::kernel_h;
use crate::model::{real_scalar, real_vector, Model};
use crate::neighborhood::NeighborIndex;
use crate::numeric::{Index, Real};
use crate::scheme::{gather_neighbors, select_active_groups, GroupSelector, NeighborScratch, Scheme, ScratchPool};
use rayon::prelude::*;
use std::cell::RefCell;

pub struct BoundaryScheme {
    selector: GroupSelector,
    active_groups: Vec<usize>,
    scratch: ScratchPool,
}

impl BoundaryScheme {
    pub fn new() -> Self {
        BoundaryScheme { selector: GroupSelector::new("boundary"), active_groups: Vec::new(), scratch: ScratchPool::new() }
    }

    /// For each boundary particle `b`: `V[b] = 1 / sum_{b' in boundary, neighbor} W(x_b - x_b', h)`.
    pub fn compute_volume<R: Real, I: Index>(
        &self,
        model: &mut Model<R, I, 3>,
        nhood: &NeighborIndex<R, 3>,
        h: R,
    ) -> Result<(), ModelError> {
        for &group_index in &self.active_groups {
            let positions = model
                .get_group_by_index(group_index)
                .unwrap()
                .positions()
                .cloned()
                .unwrap_or_default();

            let volumes: Vec<R> = (0..positions.len())
                .into_par_iter()
                .map(|i| {
                    let cell = self.scratch.get_or(|| RefCell::new(NeighborScratch::default()));
                    let mut scratch = cell.borrow_mut();
                    if gather_neighbors(nhood, model, group_index, i, &mut scratch).is_err() {
                        return R::zero();
                    }
                    let mut denom = R::zero();
                    for &j in scratch.of_group(group_index) {
                        let dx = positions[i] - positions[j];
                        denom += kernel_h(&dx, h).unwrap_or_else(|_| R::zero());
                    }
                    crate::tensor::reciprocal_or_zero(denom, R::default_epsilon()).unwrap_or(R::zero())
                })
                .collect();

            let group = model.get_group_by_index_mut(group_index).unwrap();
            let stored = group.get_varying_mut("volume")?.as_real_scalar_mut()?;
            stored.clone_from_slice(&volumes);
        }
        Ok(())
    }
}

impl Default for BoundaryScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Real, I: Index> Scheme<R, I, 3> for BoundaryScheme {
    fn require(&mut self, model: &mut Model<R, I, 3>) -> Result<(), ModelError> {
        crate::scheme::require_on_matching(model, &self.selector, |g| {
            g.add_varying("position", real_vector)?;
            g.add_varying("volume", real_scalar)?;
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

    /// Two-fluid-particle-style scenario applied to boundary: a flat 10x10
    /// grid of boundary particles spaced `h` apart should yield nearly
    /// constant `V[b]` away from the edges.
    #[test]
    fn interior_boundary_volumes_are_uniform() {
        let h = 0.025_f64;
        let mut model: Model<f64, i32, 3> = Model::new();
        model.add_group("boundary", "boundary").unwrap();
        let mut scheme = BoundaryScheme::new();
        scheme.require(&mut model).unwrap();
        {
            let g = model.get_group_by_index_mut(0).unwrap();
            let n = 10;
            g.create_items(n * n);
            let positions = g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap();
            for i in 0..n {
                for j in 0..n {
                    positions[i * n + j] = from_array([i as f64 * h, j as f64 * h, 0.0]);
                }
            }
        }
        scheme.load(&model);

        let mut nh: NeighborIndex<f64, 3> = NeighborIndex::new();
        nh.set_radius(2.0 * h).unwrap();
        nh.load(&model).unwrap();
        nh.update(&model);

        scheme.compute_volume(&mut model, &nh, h).unwrap();

        let volumes = model.get_group_by_index(0).unwrap().get_varying("volume").unwrap().as_real_scalar().unwrap().clone();
        let n = 10usize;
        let interior: Vec<f64> = (2..n - 2)
            .flat_map(|i| (2..n - 2).map(move |j| i * n + j))
            .map(|idx| volumes[idx])
            .collect();
        let mean = interior.iter().sum::<f64>() / interior.len() as f64;
        for &v in &interior {
            assert!((v - mean).abs() / mean < 0.01, "v={v} mean={mean}");
        }
    }
}
