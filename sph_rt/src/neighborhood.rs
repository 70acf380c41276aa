//! Spatial neighbor index: a uniform spatial hash over particle
//! positions across all of a `Model`'s groups, answering range queries
//! "particles within radius r of (group, item)" or "of a free-standing point".
//!
//! A straightforward uniform grid: cells of edge >= r,
//! hashed with a fixed large-prime mixing function; each cell stores its
//! resident `(group_index, item_index)` pairs; a query enumerates the 3^D
//! neighbor cells and filters by squared distance.

use crate::error::NeighborError;
use crate::model::Model;
use crate::numeric::{Index, Real};
use crate::tensor::Vector;
use smallvec::SmallVec;
use std::collections::HashSet;

pub(crate) type CellKey = i64;

fn mix_cell(i: i64, j: i64, k: i64) -> CellKey {
    const P1: i64 = 73856093;
    const P2: i64 = 19349663;
    const P3: i64 = 83492791;
    i.wrapping_mul(P1) ^ j.wrapping_mul(P2) ^ k.wrapping_mul(P3)
}

fn cell_of<R: Real>(coord: R, cell_size: R) -> i64 {
    (coord / cell_size).floor().to_i64().unwrap_or(0)
}

/// `(group_index, item_index)` identifying a single particle.
pub type ParticleId = (usize, usize);

struct GroupEntry<R: Real, const D: usize> {
    /// Whether this group's particles can be found as neighbors of a query (a
    /// group tagged `"cannot_be_neighbor"` or lacking `"position"` never appears
    /// here).
    queryable: bool,
    positions: Vec<Vector<R, D>>,
}

/// Uniform 3D spatial hash over all groups with a `position` varying field.
pub struct NeighborIndex<R: Real, const D: usize> {
    radius: R,
    cell_size: R,
    groups: Vec<GroupEntry<R, D>>,
    cells: crate::model::MapType<CellKey, SmallVec<[ParticleId; 8]>>,
    /// Pairs of (querying_group, candidate_group) explicitly disabled; empty by
    /// default, meaning all active-active pairs are considered.
    disabled_pairs: HashSet<(usize, usize)>,
}

impl<R: Real, const D: usize> NeighborIndex<R, D> {
    pub fn new() -> Self {
        NeighborIndex {
            radius: R::zero(),
            cell_size: R::zero(),
            groups: Vec::new(),
            cells: crate::model::new_map(),
            disabled_pairs: HashSet::new(),
        }
    }

    /// Sets the query radius; the cell edge is chosen `>= r`. Fails with
    /// [`NeighborError::BadRadius`] if `r <= 0`.
    pub fn set_radius(&mut self, r: R) -> Result<(), NeighborError> {
        if r <= R::zero() {
            return Err(NeighborError::BadRadius(r.to_f64().unwrap_or(f64::NAN)));
        }
        self.radius = r;
        self.cell_size = r;
        Ok(())
    }

    pub fn radius(&self) -> R {
        self.radius
    }

    /// Disables a (querying_group, candidate_group) activation pair. By default
    /// all active-active pairs are considered.
    pub fn disable_pair(&mut self, querying_group: usize, candidate_group: usize) {
        self.disabled_pairs.insert((querying_group, candidate_group));
    }
    pub fn enable_pair(&mut self, querying_group: usize, candidate_group: usize) {
        self.disabled_pairs.remove(&(querying_group, candidate_group));
    }

    /// Records the per-group position view and whether the group participates
    /// as a neighbor candidate. Must be called whenever group membership or
    /// field storage may have changed.
    pub fn load<I: Index>(&mut self, model: &Model<R, I, D>) -> Result<(), NeighborError> {
        self.groups.clear();
        for group in model.groups() {
            let queryable = !group.has_tag("cannot_be_neighbor") && group.positions().is_some();
            let positions = group.positions().cloned().unwrap_or_default();
            self.groups.push(GroupEntry { queryable, positions });
        }
        Ok(())
    }

    /// Refreshes every loaded group's position snapshot from the model's
    /// current `position` field, then rebuilds the cell table from it. Must be
    /// called after every step where positions may have moved. Unlike `load`,
    /// this never changes which groups are queryable or their particle
    /// counts — call `load` again if particles were created, destroyed, or
    /// permuted.
    pub fn update<I: Index>(&mut self, model: &Model<R, I, D>) {
        for (entry, group) in self.groups.iter_mut().zip(model.groups()) {
            if let Some(positions) = group.positions() {
                entry.positions = positions.clone();
            }
        }

        self.cells.clear();
        if self.cell_size <= R::zero() {
            return;
        }
        for (group_index, entry) in self.groups.iter().enumerate() {
            if !entry.queryable {
                continue;
            }
            for (item_index, pos) in entry.positions.iter().enumerate() {
                let key = self.cell_key(pos);
                self.cells.entry(key).or_default().push((group_index, item_index));
            }
        }
    }

    fn cell_key(&self, pos: &Vector<R, D>) -> CellKey {
        let mut coords = [0i64; 3];
        for d in 0..D.min(3) {
            coords[d] = cell_of(pos[d], self.cell_size);
        }
        mix_cell(coords[0], coords[1], coords[2])
    }

    fn cell_coords(&self, pos: &Vector<R, D>) -> [i64; 3] {
        let mut coords = [0i64; 3];
        for d in 0..D.min(3) {
            coords[d] = cell_of(pos[d], self.cell_size);
        }
        coords
    }

    /// Invokes `visitor(neighbor_group, neighbor_item)` exactly once per
    /// neighbor within `radius` of particle `(group, item)`, including the query
    /// particle itself when applicable. Fails with
    /// [`NeighborError::MissingPosition`] if `group` has no position field.
    pub fn neighbors<I: Index>(
        &self,
        model: &Model<R, I, D>,
        group: usize,
        item: usize,
        mut visitor: impl FnMut(usize, usize),
    ) -> Result<(), NeighborError> {
        let g = model
            .get_group_by_index(group)
            .ok_or_else(|| NeighborError::MissingPosition(format!("group index {group}")))?;
        let positions = g
            .positions()
            .ok_or_else(|| NeighborError::MissingPosition(g.name().to_string()))?;
        let pos = positions
            .get(item)
            .ok_or_else(|| NeighborError::MissingPosition(format!("{}/{item}", g.name())))?;
        self.query_point(*pos, group, &mut visitor);
        Ok(())
    }

    /// Range query around a free-standing point, not tied to a particle.
    pub fn neighbors_of_point(&self, point: Vector<R, D>, querying_group: usize, visitor: impl FnMut(usize, usize)) {
        let mut visitor = visitor;
        self.query_point(point, querying_group, &mut visitor);
    }

    fn query_point(&self, point: Vector<R, D>, querying_group: usize, visitor: &mut dyn FnMut(usize, usize)) {
        let base = self.cell_coords(&point);
        let r2 = self.radius * self.radius;
        for di in -1..=1 {
            for dj in -1..=1 {
                for dk in -1..=1 {
                    let key = mix_cell(base[0] + di, base[1] + dj, base[2] + dk);
                    if let Some(residents) = self.cells.get(&key) {
                        for &(ng, ni) in residents {
                            if self.disabled_pairs.contains(&(querying_group, ng)) {
                                continue;
                            }
                            let npos = self.groups[ng].positions[ni];
                            if (npos - point).norm_squared() <= r2 {
                                visitor(ng, ni);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Whether a free-standing point has any existing neighbor within `radius`
    /// of it (used by sources for the anti-pileup check).
    pub fn has_any_neighbor(&self, point: Vector<R, D>, querying_group: usize) -> bool {
        let mut found = false;
        self.query_point(point, querying_group, &mut |_, _| found = true);
        found
    }

    /// As [`Self::has_any_neighbor`], but against an arbitrary radius instead of
    /// the index's configured query radius (used by sources, whose anti-pileup
    /// check radius `1.1h` need not match the scheme radius `2h`).
    pub fn has_any_neighbor_within(&self, point: Vector<R, D>, querying_group: usize, radius: R) -> bool {
        if self.cell_size <= R::zero() {
            return false;
        }
        let base = self.cell_coords(&point);
        let span = (radius / self.cell_size).ceil().to_i64().unwrap_or(1).max(1);
        let r2 = radius * radius;
        for di in -span..=span {
            for dj in -span..=span {
                for dk in -span..=span {
                    let key = mix_cell(base[0] + di, base[1] + dj, base[2] + dk);
                    if let Some(residents) = self.cells.get(&key) {
                        for &(ng, ni) in residents {
                            if self.disabled_pairs.contains(&(querying_group, ng)) {
                                continue;
                            }
                            let npos = self.groups[ng].positions[ni];
                            if (npos - point).norm_squared() <= r2 {
                                return true;
                            }
                        }
                    }
                }
            }
        }
        false
    }

    /// Computes a locality-improving permutation per group (Morton/Z-order over
    /// cells) and applies it to all varying fields of each group, then re-runs
    /// `update`.
    pub fn permute<I: Index>(&mut self, model: &mut Model<R, I, D>) -> Result<(), NeighborError> {
        for group in model.groups_mut() {
            let Some(positions) = group.positions().cloned() else { continue };
            let mut order: Vec<usize> = (0..positions.len()).collect();
            let keys: Vec<u64> = positions.iter().map(|p| morton_key(self, p)).collect();
            order.sort_by_key(|&i| keys[i]);
            group.permute(&order).map_err(|_| NeighborError::MissingPosition(group.name().to_string()))?;
        }
        self.load(model)?;
        self.update(model);
        Ok(())
    }
}

impl<R: Real, const D: usize> Default for NeighborIndex<R, D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Interleaves the low bits of each cell coordinate into a single Z-order key.
fn morton_key<R: Real, const D: usize>(nh: &NeighborIndex<R, D>, p: &Vector<R, D>) -> u64 {
    let coords = nh.cell_coords(p);
    let bits = 16u32;
    let mut key = 0u64;
    for b in 0..bits {
        for (axis, &c) in coords.iter().enumerate() {
            let v = (c as u64).wrapping_add(1 << 20); // bias into non-negative range
            let bit = (v >> b) & 1;
            key |= bit << (b as usize * 3 + axis);
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::real_vector;
    use crate::tensor::from_array;

    fn naive_neighbors<R: Real, I: Index, const D: usize>(
        model: &Model<R, I, D>,
        center: Vector<R, D>,
        radius: R,
    ) -> HashSet<ParticleId> {
        let mut out = HashSet::new();
        for group in model.groups() {
            if group.has_tag("cannot_be_neighbor") {
                continue;
            }
            if let Some(positions) = group.positions() {
                for (i, p) in positions.iter().enumerate() {
                    if (*p - center).norm() <= radius {
                        out.insert((group.group_index(), i));
                    }
                }
            }
        }
        out
    }

    #[test]
    fn matches_naive_quadratic_oracle() {
        let mut model: Model<f64, i32, 3> = Model::new();
        let g = model.add_group("fluid", "fluid").unwrap();
        g.add_varying("position", real_vector).unwrap();
        g.create_items(30);
        {
            let positions = g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap();
            for (i, p) in positions.iter_mut().enumerate() {
                *p = from_array([(i % 5) as f64 * 0.1, (i / 5) as f64 * 0.1, 0.0]);
            }
        }

        let mut nh: NeighborIndex<f64, 3> = NeighborIndex::new();
        nh.set_radius(0.15).unwrap();
        nh.load(&model).unwrap();
        nh.update(&model);

        let expected = naive_neighbors(&model, from_array([0.2, 0.2, 0.0]), 0.15);
        let mut got = HashSet::new();
        nh.neighbors_of_point(from_array([0.2, 0.2, 0.0]), 0, |g, i| {
            got.insert((g, i));
        });
        assert_eq!(got, expected);
    }

    #[test]
    fn radius_must_be_positive() {
        let mut nh: NeighborIndex<f64, 3> = NeighborIndex::new();
        assert!(nh.set_radius(0.0).is_err());
        assert!(nh.set_radius(-1.0).is_err());
    }

    #[test]
    fn cannot_be_neighbor_tag_excludes_group() {
        let mut model: Model<f64, i32, 3> = Model::new();
        let g = model.add_group("boundary", "boundary").unwrap();
        g.add_tag("cannot_be_neighbor");
        g.add_varying("position", real_vector).unwrap();
        g.create_items(1);

        let mut nh: NeighborIndex<f64, 3> = NeighborIndex::new();
        nh.set_radius(1.0).unwrap();
        nh.load(&model).unwrap();
        nh.update(&model);
        assert!(!nh.has_any_neighbor(Vector::<f64, 3>::zeros(), 0));
    }
}
