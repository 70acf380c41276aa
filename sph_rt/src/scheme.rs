//! Scheme runtime: the `Require`/`Load` contract every scheme honors, and
//! the shared scratch space its procedures use to gather neighbors per particle.
//!
//! Concrete schemes (density, boundary volume, gravity, viscosity, surface
//! tension, symplectic Euler integration, the IISPH procedures) live under
//! [`crate::schemes`]; this module only defines the contract and the
//! thread-local neighbor-list scratch they all share, mirroring this crate's
//! `ReconstructionWorkspace`/`LocalReconstructionWorkspace` pattern: one
//! `ThreadLocal<RefCell<_>>` reused across steps, lazily sized on first use.

use crate::error::ModelError;
use crate::model::{Group, Model};
use crate::neighborhood::NeighborIndex;
use crate::numeric::{Index, Real};
use smallvec::SmallVec;
use std::cell::RefCell;
use thread_local::ThreadLocal;

/// Every scheme declares its field requirements and, once loaded, the active
/// groups its procedures run over.
pub trait Scheme<R: Real, I: Index, const D: usize> {
    /// Declares every global, uniform and varying field this scheme touches.
    /// Idempotent: safe to call multiple times (relies on `Group::add_*`'s own
    /// idempotence).
    fn require(&mut self, model: &mut Model<R, I, D>) -> Result<(), ModelError>;

    /// Snapshots which groups currently match this scheme's selectors. Must be
    /// called whenever group membership or field storage may have changed.
    fn load(&mut self, model: &Model<R, I, D>);
}

/// A scheme's predicate for "does this group participate": `type == T` and
/// `tags ⊇ required_tags`.
#[derive(Debug, Clone)]
pub struct GroupSelector {
    pub group_type: String,
    pub required_tags: Vec<String>,
}

impl GroupSelector {
    pub fn new(group_type: impl Into<String>) -> Self {
        GroupSelector { group_type: group_type.into(), required_tags: Vec::new() }
    }
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.required_tags.push(tag.into());
        self
    }
    pub fn matches<R: Real, I: Index, const D: usize>(&self, group: &Group<R, I, D>) -> bool {
        group.group_type() == self.group_type && self.required_tags.iter().all(|t| group.has_tag(t))
    }
}

/// Runs `f` against every group currently matching `selector`; used by
/// `Scheme::require` implementations to declare fields only on participating
/// groups.
pub fn require_on_matching<R: Real, I: Index, const D: usize>(
    model: &mut Model<R, I, D>,
    selector: &GroupSelector,
    mut f: impl FnMut(&mut Group<R, I, D>) -> Result<(), ModelError>,
) -> Result<(), ModelError> {
    let indices: Vec<usize> = model.groups().filter(|g| selector.matches(g)).map(|g| g.group_index()).collect();
    for idx in indices {
        f(model.get_group_by_index_mut(idx).expect("index came from this model"))?;
    }
    Ok(())
}

/// Indices of every group currently matching `selector`, in `group_index`
/// order (serial iteration order over active groups, per the concurrency
/// contract).
pub fn select_active_groups<R: Real, I: Index, const D: usize>(
    model: &Model<R, I, D>,
    selector: &GroupSelector,
) -> Vec<usize> {
    model.groups().filter(|g| selector.matches(g)).map(|g| g.group_index()).collect()
}

/// Per-thread reusable neighbor-gathering buffer: one inner list per candidate
/// group, small-vector-optimized, cleared but not shrunk between particles.
#[derive(Default)]
pub struct NeighborScratch {
    pub by_group: Vec<SmallVec<[usize; 64]>>,
}

impl NeighborScratch {
    fn ensure_groups(&mut self, group_count: usize) {
        if self.by_group.len() < group_count {
            self.by_group.resize_with(group_count, SmallVec::new);
        }
    }

    fn clear(&mut self) {
        for bucket in &mut self.by_group {
            bucket.clear();
        }
    }

    pub fn of_group(&self, group_index: usize) -> &[usize] {
        self.by_group.get(group_index).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Thread-local pool of [`NeighborScratch`] buffers, one per worker thread that
/// ever calls [`gather_neighbors`].
pub type ScratchPool = ThreadLocal<RefCell<NeighborScratch>>;

/// Fills `scratch` with the neighbors of `(group, item)`, bucketed by neighbor
/// group index. Reuses `scratch`'s allocations (only clears the slots, never
/// shrinks them).
pub fn gather_neighbors<R: Real, I: Index, const D: usize>(
    nhood: &NeighborIndex<R, D>,
    model: &Model<R, I, D>,
    group: usize,
    item: usize,
    scratch: &mut NeighborScratch,
) -> Result<(), crate::error::NeighborError> {
    scratch.ensure_groups(model.group_count());
    scratch.clear();
    nhood.neighbors(model, group, item, |ng, ni| {
        scratch.by_group[ng].push(ni);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::real_vector;

    #[test]
    fn selector_matches_type_and_tags() {
        let mut model: Model<f64, i32, 3> = Model::new();
        model.add_group("fluid", "fluid").unwrap();
        let boundary = model.add_group("b", "boundary").unwrap();
        boundary.add_tag("visible");

        let fluid_sel = GroupSelector::new("fluid");
        assert_eq!(select_active_groups(&model, &fluid_sel), vec![0]);

        let visible_boundary = GroupSelector::new("boundary").with_tag("visible");
        assert_eq!(select_active_groups(&model, &visible_boundary), vec![1]);

        let invisible_boundary = GroupSelector::new("boundary").with_tag("cannot_be_neighbor");
        assert!(select_active_groups(&model, &invisible_boundary).is_empty());
    }

    #[test]
    fn gather_neighbors_buckets_by_group() {
        let mut model: Model<f64, i32, 3> = Model::new();
        let g = model.add_group("fluid", "fluid").unwrap();
        g.add_varying("position", real_vector).unwrap();
        g.create_items(2);
        {
            let positions = g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap();
            positions[0] = crate::tensor::from_array([0.0, 0.0, 0.0]);
            positions[1] = crate::tensor::from_array([0.01, 0.0, 0.0]);
        }
        let mut nh: NeighborIndex<f64, 3> = NeighborIndex::new();
        nh.set_radius(0.1).unwrap();
        nh.load(&model).unwrap();
        nh.update(&model);

        let mut scratch = NeighborScratch::default();
        gather_neighbors(&nh, &model, 0, 0, &mut scratch).unwrap();
        assert_eq!(scratch.of_group(0).len(), 2); // self + the other particle
    }
}
