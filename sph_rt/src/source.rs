//! Particle sources: periodic emitters attached to a group, realized as
//! either a hexagonal close-packed (HCP) or simple cubic grid (SCG) lattice
//! layer generator. Both share the same emission contract; only the in-layer
//! packing and `layer_height` differ.
//!
//! A `Source` holds no back-pointer to its owning `Model`/`Group` — only the
//! `group_index` of the group it spawns into, resolved through the `Model`
//! passed to `emit` each time it fires. This is the non-owning-handle
//! translation of the original's `(Model*, Group*)` pair.

use crate::model::Model;
use crate::neighborhood::NeighborIndex;
use crate::numeric::{Index, Real};
use crate::scheduler::SchedulerAction;
use crate::tensor::Vector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Hexagonal close-packed lattice.
    Hcp,
    /// Simple cubic grid lattice.
    Scg,
}

/// A periodic particle emitter. Lives inside the `sources` list of the group it
/// targets.
#[derive(Debug, Clone)]
pub struct Source<R: Real, I: Index, const D: usize> {
    pub kind: SourceKind,
    pub target_group: usize,
    pub center: Vector<R, D>,
    pub velocity: Vector<R, D>,
    pub radius: R,
    pub remaining_count: i64,
    invocation: u64,
    _marker: std::marker::PhantomData<I>,
}

impl<R: Real, I: Index, const D: usize> Source<R, I, D> {
    pub fn new(kind: SourceKind, target_group: usize, center: Vector<R, D>, velocity: Vector<R, D>, radius: R, remaining_count: i64) -> Self {
        Source { kind, target_group, center, velocity, radius, remaining_count, invocation: 0, _marker: std::marker::PhantomData }
    }

    fn layer_height(&self, h: R) -> R {
        match self.kind {
            SourceKind::Hcp => R::from_f64(6.0f64.sqrt() / 3.0).unwrap() * h,
            SourceKind::Scg => h / R::from_f64(2.0f64.sqrt()).unwrap(),
        }
    }

    fn lattice_spacing(&self, h: R) -> R {
        h
    }
}

/// Builds an orthonormal basis `(u, v)` spanning the plane orthogonal to
/// `dir` (assumed normalized, 3D only — the lattice sources are a 3D concept).
fn orthogonal_basis<R: Real>(dir: Vector<R, 3>) -> (Vector<R, 3>, Vector<R, 3>) {
    let axis = if dir[2].abs() < R::from_f64(0.9).unwrap() {
        Vector::<R, 3>::new(R::zero(), R::zero(), R::one())
    } else {
        Vector::<R, 3>::new(R::one(), R::zero(), R::zero())
    };
    let u = crate::tensor::normalized(&crate::tensor::cross(&axis, &dir).unwrap());
    let v = crate::tensor::cross(&dir, &u).unwrap();
    (u, v)
}

/// Generates the in-plane lattice offsets for one layer, within `radius` of the
/// origin, for the given `invocation` parity (HCP alternates row offset between
/// even/odd invocations).
fn layer_offsets<R: Real>(kind: SourceKind, radius: R, spacing: R, invocation: u64) -> Vec<(R, R)> {
    let mut offsets = Vec::new();
    let n = (radius / spacing).to_i64().unwrap_or(0) + 2;
    match kind {
        SourceKind::Hcp => {
            let row_spacing = spacing * R::from_f64(3.0f64.sqrt() / 2.0).unwrap();
            let parity_shift = if invocation % 2 == 1 { spacing / R::from_f64(2.0).unwrap() } else { R::zero() };
            for row in -n..=n {
                let y = R::from_i64(row).unwrap() * row_spacing;
                if y.abs() > radius {
                    continue;
                }
                let row_offset = if row.rem_euclid(2) == 1 { spacing / R::from_f64(2.0).unwrap() } else { R::zero() };
                for col in -n..=n {
                    let x = R::from_i64(col).unwrap() * spacing + row_offset + parity_shift;
                    if (x * x + y * y).sqrt() <= radius {
                        offsets.push((x, y));
                    }
                }
            }
        }
        SourceKind::Scg => {
            for row in -n..=n {
                let y = R::from_i64(row).unwrap() * spacing;
                if y.abs() > radius {
                    continue;
                }
                for col in -n..=n {
                    let x = R::from_i64(col).unwrap() * spacing;
                    if (x * x + y * y).sqrt() <= radius {
                        offsets.push((x, y));
                    }
                }
            }
        }
    }
    offsets
}

/// Fires the source at `source_index` within `group_index`'s source list. This
/// is the scheduler-callback body: emits one lattice layer of particles (with
/// an anti-pileup check against `nhood`), decrements `remaining_count` by the
/// number actually created, and returns the scheduling action for the next
/// firing.
pub fn emit<R: Real, I: Index>(
    model: &mut Model<R, I, 3>,
    nhood: &NeighborIndex<R, 3>,
    group_index: usize,
    source_index: usize,
    h: R,
    rest_density: R,
    now: R,
    lateness: R,
) -> SchedulerAction<R> {
    let group = model.get_group_by_index_mut(group_index).expect("source's target group must exist");
    let source = &mut group.sources_mut()[source_index];

    if source.remaining_count <= 0 {
        return SchedulerAction::DoNothing;
    }

    let dir = crate::tensor::normalized(&source.velocity);
    let (u, v) = orthogonal_basis(dir);
    let spacing = source.lattice_spacing(h);
    let layer_height = source.layer_height(h);
    let speed = source.velocity.norm();
    let interval = if speed > R::default_epsilon() { layer_height / speed } else { layer_height };

    let drift = source.velocity * (interval + lateness);
    let offsets = layer_offsets(source.kind, source.radius, spacing, source.invocation);
    source.invocation += 1;

    let candidates: Vec<Vector<R, 3>> = offsets
        .into_iter()
        .map(|(x, y)| source.center + u * x + v * y + drift)
        .collect();

    let min_dist = R::from_f64(1.1).unwrap() * h;
    let mut to_spawn = Vec::new();
    for candidate in candidates {
        if source.remaining_count <= 0 {
            break;
        }
        if !nhood.has_any_neighbor_within(candidate, group_index, min_dist) {
            to_spawn.push(candidate);
            source.remaining_count -= 1;
        }
    }

    if !to_spawn.is_empty() {
        let source_velocity = group.sources()[source_index].velocity;
        let n = to_spawn.len();
        let range = group.create_items(n);
        let mass = h.powi(3) * rest_density;
        if let Ok(positions) = group.get_varying_mut("position").and_then(|f| f.as_real_vector_mut().map_err(Into::into)) {
            for (slot, pos) in range.clone().zip(to_spawn.iter()) {
                positions[slot] = *pos;
            }
        }
        if let Ok(velocities) = group.get_varying_mut("velocity").and_then(|f| f.as_real_vector_mut().map_err(Into::into)) {
            for slot in range.clone() {
                velocities[slot] = source_velocity;
            }
        }
        if let Ok(masses) = group.get_varying_mut("mass").and_then(|f| f.as_real_scalar_mut().map_err(Into::into)) {
            for slot in range.clone() {
                masses[slot] = mass;
            }
        }
        if let Ok(births) = group.get_varying_mut("time_of_birth").and_then(|f| f.as_real_scalar_mut().map_err(Into::into)) {
            for slot in range {
                births[slot] = now;
            }
        }
    }

    let remaining = group.sources()[source_index].remaining_count;
    if remaining <= 0 {
        SchedulerAction::DoNothing
    } else {
        SchedulerAction::RescheduleAfter(interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{real_scalar, real_vector};
    use crate::tensor::from_array;

    fn setup() -> (Model<f64, i32, 3>, NeighborIndex<f64, 3>) {
        let mut model: Model<f64, i32, 3> = Model::new();
        let g = model.add_group("fluid", "fluid").unwrap();
        g.add_varying("position", real_vector).unwrap();
        g.add_varying("velocity", real_vector).unwrap();
        g.add_varying("mass", real_scalar).unwrap();
        g.add_varying("time_of_birth", real_scalar).unwrap();
        let h = 0.025;
        let src = Source::new(SourceKind::Scg, 0, from_array([0.0, 0.0, 0.0]), from_array([1.0, 0.0, 0.0]), 2.0 * h, 100);
        g.sources_mut().push(src);

        let mut nh: NeighborIndex<f64, 3> = NeighborIndex::new();
        nh.set_radius(2.0 * h).unwrap();
        nh.load(&model).unwrap();
        nh.update(&model);
        (model, nh)
    }

    #[test]
    fn anti_pileup_blocks_the_spawn_point() {
        let (mut model, mut nh) = setup();
        let h = 0.025;
        {
            let g = model.get_group_by_index_mut(0).unwrap();
            g.create_items(1);
            g.get_varying_mut("position").unwrap().as_real_vector_mut().unwrap()[0] = from_array([0.0, 0.0, 0.0]);
        }
        nh.load(&model).unwrap();
        nh.update(&model);

        let before = model.get_group_by_index(0).unwrap().item_count();
        let action = emit(&mut model, &nh, 0, 0, h, 1000.0, 0.0, 0.0);
        let after = model.get_group_by_index(0).unwrap().item_count();
        assert_eq!(before + 1, after, "only the pre-existing particle should remain, no new ones near it");
        assert!(matches!(action, SchedulerAction::RescheduleAfter(_)));
    }

    #[test]
    fn exhausted_source_does_not_reschedule() {
        let (mut model, nh) = setup();
        {
            let g = model.get_group_by_index_mut(0).unwrap();
            g.sources_mut()[0].remaining_count = 0;
        }
        let action = emit(&mut model, &nh, 0, 0, 0.025, 1000.0, 0.0, 0.0);
        assert!(matches!(action, SchedulerAction::DoNothing));
    }
}
